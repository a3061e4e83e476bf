//! faceid-core — Face location, fingerprinting and matching.
//!
//! Faces are found with an OpenCV-format Haar cascade, summarized as a
//! 52-value colour/gradient fingerprint, and matched against a gallery by
//! cosine similarity.

pub mod detector;
pub mod extractor;
pub mod imaging;
pub mod types;

pub use detector::{CascadeDetector, DetectParams, FaceLocator};
pub use types::{
    BoundingBox, CosineMatcher, Fingerprint, FingerprintError, GalleryEntry, MatchResult, Matcher,
    FINGERPRINT_LEN,
};

/// File name of the pretrained frontal-face cascade.
pub const DEFAULT_CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";
