//! Serializable result shapes handed to API surfaces.
//!
//! Confidences here are for display: clamped to `[0, 100]` and rounded to two
//! decimals. The engine's own results keep the raw value.

use crate::engine::{Comparison, Recognition, Registration};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub name: String,
    pub message: String,
}

impl From<&Registration> for RegisterResponse {
    fn from(reg: &Registration) -> Self {
        Self {
            success: true,
            name: reg.name.clone(),
            message: format!("Successfully registered {}", reg.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizeResponse {
    pub matched: bool,
    pub name: Option<String>,
    pub confidence: f64,
    pub message: String,
}

impl From<&Recognition> for RecognizeResponse {
    fn from(rec: &Recognition) -> Self {
        let confidence = report_confidence(rec.confidence());
        match rec {
            Recognition::Matched { name, .. } => Self {
                matched: true,
                name: Some(name.clone()),
                confidence,
                message: format!("Recognized {name}"),
            },
            Recognition::Unknown { .. } => Self {
                matched: false,
                name: None,
                confidence,
                message: "Face not recognized".to_string(),
            },
            Recognition::NoFace => Self {
                matched: false,
                name: None,
                confidence,
                message: "No face detected".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareResponse {
    pub same: bool,
    pub confidence: f64,
}

impl From<&Comparison> for CompareResponse {
    fn from(cmp: &Comparison) -> Self {
        Self {
            same: cmp.same,
            confidence: report_confidence(cmp.confidence),
        }
    }
}

/// Clamp to `[0, 100]` and round to two decimals.
pub fn report_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_report_confidence() {
        assert_eq!(report_confidence(87.12345), 87.12);
        assert_eq!(report_confidence(100.0000001), 100.0);
        assert_eq!(report_confidence(-3.0), 0.0);
        assert_eq!(report_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_recognize_json_shape() {
        let rec = Recognition::Matched {
            name: "Alice".into(),
            confidence: 99.999999,
        };
        let json = serde_json::to_value(RecognizeResponse::from(&rec)).unwrap();
        assert_eq!(json["matched"], true);
        assert_eq!(json["name"], "Alice");
        assert_eq!(json["confidence"], 100.0);

        let json = serde_json::to_value(RecognizeResponse::from(&Recognition::NoFace)).unwrap();
        assert_eq!(json["matched"], false);
        assert!(json["name"].is_null());
        assert_eq!(json["confidence"], 0.0);
    }

    #[test]
    fn test_unknown_keeps_near_miss_confidence() {
        let resp = RecognizeResponse::from(&Recognition::Unknown { confidence: 41.238 });
        assert!(!resp.matched);
        assert_eq!(resp.confidence, 41.24);
        assert_eq!(resp.message, "Face not recognized");
    }

    #[test]
    fn test_register_and_compare() {
        let reg = Registration {
            id: 1,
            name: "Bob".into(),
            image_path: PathBuf::from("/tmp/bob.png"),
            face_path: PathBuf::from("/tmp/faces/Bob.jpg"),
        };
        let resp = RegisterResponse::from(&reg);
        assert!(resp.success);
        assert_eq!(resp.message, "Successfully registered Bob");

        let cmp = CompareResponse::from(&Comparison {
            same: false,
            confidence: 12.3456,
        });
        assert_eq!(cmp, CompareResponse { same: false, confidence: 12.35 });
    }
}
