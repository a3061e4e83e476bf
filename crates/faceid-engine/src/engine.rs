//! Identity engine: locate → extract → store or match.
//!
//! The engine keeps no gallery state of its own. Every call reads the store,
//! so engines in separate processes sharing one database stay consistent.
//! All work is synchronous; callers that need to stay responsive should run
//! the calls on a blocking-capable thread.

use crate::config::Config;
use crate::upload::StagedUpload;
use faceid_core::detector::DetectorError;
use faceid_core::extractor::{self, ExtractError};
use faceid_core::{BoundingBox, CascadeDetector, CosineMatcher, FaceLocator, Fingerprint, Matcher};
use faceid_store::{ActionKind, ActionLogEntry, GalleryStore, IdentitySummary, Stats, StoreError};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Confidence recorded for a registration event.
const REGISTER_CONFIDENCE: f64 = 100.0;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("feature extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("an identity named '{0}' already exists")]
    DuplicateName(String),
    #[error("no identity named '{0}'")]
    NotFound(String),
    #[error("invalid identity name {0:?}")]
    InvalidName(String),
    #[error("upload is not a recognized image format")]
    NotAnImage,
    #[error("storage failure: {0}")]
    Storage(StoreError),
    #[error("failed to save face crop: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateName(name) => EngineError::DuplicateName(name),
            StoreError::NotFound(name) => EngineError::NotFound(name),
            other => EngineError::Storage(other),
        }
    }
}

impl From<ExtractError> for EngineError {
    fn from(e: ExtractError) -> Self {
        EngineError::ExtractionFailed(e.to_string())
    }
}

/// A completed registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: i64,
    pub name: String,
    /// Uncropped reference image recorded with the identity.
    pub image_path: PathBuf,
    /// Saved face crop.
    pub face_path: PathBuf,
}

/// Outcome of a recognition attempt. Confidence is the raw similarity × 100.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// No usable face in the image.
    NoFace,
    /// A face was found but no identity passed the threshold.
    Unknown { confidence: f64 },
    Matched { name: String, confidence: f64 },
}

impl Recognition {
    pub fn name(&self) -> Option<&str> {
        match self {
            Recognition::Matched { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Recognition::NoFace => 0.0,
            Recognition::Unknown { confidence } | Recognition::Matched { confidence, .. } => *confidence,
        }
    }
}

/// Result of comparing the faces of two images directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub same: bool,
    pub confidence: f64,
}

/// Everything derived from one image's best face.
struct FaceAnalysis {
    bbox: BoundingBox,
    crop: RgbImage,
    fingerprint: Fingerprint,
}

pub struct IdentityEngine {
    locator: Box<dyn FaceLocator>,
    store: Arc<GalleryStore>,
    faces_dir: PathBuf,
    uploads_dir: PathBuf,
    threshold: f64,
}

impl IdentityEngine {
    pub fn new(
        locator: Box<dyn FaceLocator>,
        store: Arc<GalleryStore>,
        faces_dir: impl Into<PathBuf>,
        uploads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            locator,
            store,
            faces_dir: faces_dir.into(),
            uploads_dir: uploads_dir.into(),
            threshold: crate::config::DEFAULT_MATCH_THRESHOLD,
        }
    }

    /// Acceptance threshold in percent; matches must strictly exceed it.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Build the engine described by `config`: cascade locator, store on disk,
    /// directories created. Fails fast if the cascade or database is unusable.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        config.ensure_dirs()?;
        let detector = CascadeDetector::load(&config.cascade_path)?;
        let store = GalleryStore::open(&config.db_path)?;

        tracing::info!(
            db = %config.db_path.display(),
            faces = %config.faces_dir.display(),
            threshold = config.match_threshold,
            "identity engine ready"
        );

        Ok(Self::new(
            Box::new(detector),
            Arc::new(store),
            &config.faces_dir,
            &config.uploads_dir,
        )
        .with_threshold(config.match_threshold))
    }

    pub fn store(&self) -> &Arc<GalleryStore> {
        &self.store
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Where the face crop of `name` is saved.
    pub fn face_path(&self, name: &str) -> PathBuf {
        self.faces_dir.join(format!("{name}.jpg"))
    }

    /// Enroll `name` from the face in the image at `image_path`.
    pub fn register(&self, name: &str, image_path: &Path) -> Result<Registration, EngineError> {
        validate_name(name)?;

        let analysis = self.analyze(image_path)?;
        let id = self
            .store
            .register(name, &analysis.fingerprint, &image_path.to_string_lossy())?;

        let face_path = self.face_path(name);
        let finish = self
            .save_crop(&analysis.crop, &face_path)
            .and_then(|()| Ok(self.store.log(ActionKind::Register, Some(name), REGISTER_CONFIDENCE)?));
        if let Err(e) = finish {
            tracing::error!(name, error = %e, "registration incomplete; rolling back");
            self.undo_register(name, &face_path);
            return Err(e);
        }

        tracing::info!(id, name, bbox = ?analysis.bbox, "identity registered");
        Ok(Registration {
            id,
            name: name.to_string(),
            image_path: image_path.to_path_buf(),
            face_path,
        })
    }

    /// Identify the face in the image at `image_path`.
    ///
    /// A missing face or undecodable image is an ordinary outcome, reported as
    /// [`Recognition::NoFace`] rather than an error.
    pub fn recognize(&self, image_path: &Path) -> Result<Recognition, EngineError> {
        let analysis = match self.analyze(image_path) {
            Ok(analysis) => analysis,
            Err(e @ (EngineError::NoFaceDetected | EngineError::ExtractionFailed(_))) => {
                tracing::debug!(path = %image_path.display(), reason = %e, "recognize: no usable face");
                return Ok(Recognition::NoFace);
            }
            Err(e) => return Err(e),
        };

        let gallery = self.store.gallery()?;
        if gallery.is_empty() {
            tracing::debug!("recognize: gallery is empty");
            return Ok(Recognition::Unknown { confidence: 0.0 });
        }

        let result = CosineMatcher.compare(&analysis.fingerprint, &gallery, self.threshold);
        let confidence = result.confidence();

        match result.name {
            Some(name) => {
                self.store.log(ActionKind::Recognize, Some(&name), confidence)?;
                tracing::info!(name = %name, confidence, "face recognized");
                Ok(Recognition::Matched { name, confidence })
            }
            None => {
                self.store.log(ActionKind::Unknown, None, confidence)?;
                tracing::info!(confidence, threshold = self.threshold, "face not recognized");
                Ok(Recognition::Unknown { confidence })
            }
        }
    }

    /// Compare the best faces of two images without touching the gallery.
    pub fn compare(&self, first: &Path, second: &Path) -> Result<Comparison, EngineError> {
        let analyses = self.analyze(first).and_then(|a| Ok((a, self.analyze(second)?)));
        let (a, b) = match analyses {
            Ok(pair) => pair,
            Err(EngineError::NoFaceDetected | EngineError::ExtractionFailed(_)) => {
                return Ok(Comparison { same: false, confidence: 0.0 });
            }
            Err(e) => return Err(e),
        };

        let confidence = a.fingerprint.similarity(&b.fingerprint) * 100.0;
        Ok(Comparison {
            same: confidence > self.threshold,
            confidence,
        })
    }

    /// Remove `name` from the gallery and delete its face crop. Log entries stay.
    pub fn delete(&self, name: &str) -> Result<(), EngineError> {
        self.store.delete(name)?;

        if validate_name(name).is_ok() {
            let face_path = self.face_path(name);
            match std::fs::remove_file(&face_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %face_path.display(), error = %e, "failed to remove face crop"),
            }
        }

        tracing::info!(name, "identity deleted");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        Ok(self.store.list()?)
    }

    pub fn stats(&self) -> Result<Stats, EngineError> {
        Ok(self.store.stats()?)
    }

    pub fn recent_logs(&self, limit: usize) -> Result<Vec<ActionLogEntry>, EngineError> {
        Ok(self.store.recent_logs(limit)?)
    }

    /// Register from an uploaded payload. The upload is kept as the reference
    /// image on success and removed on any failure.
    pub fn register_upload(&self, name: &str, bytes: &[u8]) -> Result<Registration, EngineError> {
        validate_name(name)?;
        let ext = sniff_extension(bytes)?;
        let staged = StagedUpload::write(&self.uploads_dir, &format!("{name}_{}.{ext}", Uuid::new_v4()), bytes)?;

        let registration = self.register(name, staged.path())?;
        if let Err(e) = staged.persist() {
            tracing::error!(name, error = %e, "failed to keep reference image; rolling back");
            self.undo_register(name, &registration.face_path);
            return Err(e.into());
        }
        Ok(registration)
    }

    /// Recognize an uploaded payload. The upload is always removed.
    pub fn recognize_upload(&self, bytes: &[u8]) -> Result<Recognition, EngineError> {
        let ext = sniff_extension(bytes)?;
        let staged = StagedUpload::write(&self.uploads_dir, &format!("temp_{}.{ext}", Uuid::new_v4()), bytes)?;
        self.recognize(staged.path())
    }

    fn analyze(&self, image_path: &Path) -> Result<FaceAnalysis, EngineError> {
        let image = load_image(image_path)?;
        let bbox = self.locator.locate(&image).ok_or(EngineError::NoFaceDetected)?;
        let crop = extractor::crop_face(&image, &bbox)?;
        let fingerprint = extractor::fingerprint_crop(&crop)?;
        Ok(FaceAnalysis { bbox, crop, fingerprint })
    }

    fn save_crop(&self, crop: &RgbImage, face_path: &Path) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.faces_dir)?;
        crop.save_with_format(face_path, ImageFormat::Jpeg)?;
        Ok(())
    }

    fn undo_register(&self, name: &str, face_path: &Path) {
        if let Err(e) = self.store.delete(name) {
            tracing::error!(name, error = %e, "failed to roll back identity row");
        }
        if let Err(e) = std::fs::remove_file(face_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %face_path.display(), error = %e, "failed to remove face crop");
            }
        }
    }
}

/// Decode an image upright: an EXIF orientation tag is applied to the pixels.
fn load_image(path: &Path) -> Result<DynamicImage, EngineError> {
    let undecodable = |e: image::ImageError| EngineError::ExtractionFailed(format!("cannot decode {}: {e}", path.display()));

    let mut decoder = image::ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()
        .map_err(undecodable)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder).map_err(undecodable)?;
    image.apply_orientation(orientation);
    Ok(image)
}

fn sniff_extension(bytes: &[u8]) -> Result<&'static str, EngineError> {
    let format = image::guess_format(bytes).map_err(|_| EngineError::NotAnImage)?;
    Ok(format.extensions_str().first().copied().unwrap_or("img"))
}

/// Names key the face-crop files, so they must be usable as a file stem.
fn validate_name(name: &str) -> Result<(), EngineError> {
    let bad = name.trim().is_empty()
        || name.contains(['/', '\\'])
        || name.contains("..")
        || name.chars().any(char::is_control);
    if bad {
        return Err(EngineError::InvalidName(name.to_string()));
    }
    Ok(())
}
