//! faceid-engine — Identity engine composing the face locator, the
//! fingerprint extractor, the matcher and the gallery store.

pub mod config;
pub mod engine;
pub mod response;
mod upload;

pub use config::Config;
pub use engine::{Comparison, EngineError, IdentityEngine, Recognition, Registration};
pub use faceid_store::{ActionLogEntry, IdentitySummary, Stats};
pub use response::{CompareResponse, RecognizeResponse, RegisterResponse};
