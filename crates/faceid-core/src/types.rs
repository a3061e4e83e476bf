use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of histogram bins per colour channel.
pub const HISTOGRAM_BINS: usize = 16;

/// Fingerprint length: three 16-bin channel histograms plus mean/std of the
/// horizontal and vertical gradient fields.
pub const FINGERPRINT_LEN: usize = 3 * HISTOGRAM_BINS + 4;

/// Axis-aligned face region in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("expected {FINGERPRINT_LEN} values, got {0}")]
    WrongLength(usize),
    #[error("non-finite value at index {0}")]
    NonFinite(usize),
    #[error("malformed encoding: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Fixed-length face descriptor, unit-normalized unless the raw vector was zero.
///
/// Serializes as a plain JSON array of numbers, which is also the stored form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Fingerprint {
    values: Vec<f64>,
}

impl Fingerprint {
    /// Build a fingerprint from raw feature values, dividing by the Euclidean norm.
    ///
    /// A zero vector is kept as is.
    pub fn normalized(raw: Vec<f64>) -> Result<Self, FingerprintError> {
        let mut fp = Self::try_from(raw)?;
        let norm = fp.norm();
        if norm > 0.0 {
            for v in &mut fp.values {
                *v /= norm;
            }
        }
        Ok(fp)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Cosine similarity of two unit vectors: the plain dot product.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    pub fn to_json(&self) -> String {
        // A Vec<f64> of finite values always serializes.
        serde_json::to_string(&self.values).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_json(encoded: &str) -> Result<Self, FingerprintError> {
        let values: Vec<f64> = serde_json::from_str(encoded)?;
        Self::try_from(values)
    }
}

impl TryFrom<Vec<f64>> for Fingerprint {
    type Error = FingerprintError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        if values.len() != FINGERPRINT_LEN {
            return Err(FingerprintError::WrongLength(values.len()));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(FingerprintError::NonFinite(idx));
        }
        Ok(Self { values })
    }
}

impl From<Fingerprint> for Vec<f64> {
    fn from(fp: Fingerprint) -> Self {
        fp.values
    }
}

/// One gallery row as read back from storage: the name and the still-encoded
/// fingerprint. Decoding happens during the match scan so a bad row can be
/// skipped without failing the whole gallery read.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub name: String,
    pub encoded: String,
}

impl GalleryEntry {
    pub fn new(name: impl Into<String>, fingerprint: &Fingerprint) -> Self {
        Self {
            name: name.into(),
            encoded: fingerprint.to_json(),
        }
    }

    pub fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Fingerprint::from_json(&self.encoded)
    }
}

/// Result of matching a probe fingerprint against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Name of the accepted identity, `None` when the best score missed the threshold.
    pub name: Option<String>,
    /// Best similarity found, reported even when it was not accepted.
    pub similarity: f64,
}

impl MatchResult {
    pub fn none() -> Self {
        Self {
            name: None,
            similarity: 0.0,
        }
    }

    pub fn matched(&self) -> bool {
        self.name.is_some()
    }

    /// Similarity expressed as a percentage. Not clamped.
    pub fn confidence(&self) -> f64 {
        self.similarity * 100.0
    }
}

/// Strategy for comparing a probe fingerprint against the gallery.
///
/// `threshold` is a confidence (percentage); a match is accepted only when the
/// best confidence is strictly greater.
pub trait Matcher {
    fn compare(&self, probe: &Fingerprint, gallery: &[GalleryEntry], threshold: f64) -> MatchResult;
}

/// Linear-scan cosine matcher.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Fingerprint, gallery: &[GalleryEntry], threshold: f64) -> MatchResult {
        if gallery.is_empty() {
            return MatchResult::none();
        }

        let mut best_sim = 0.0f64;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let known = match entry.fingerprint() {
                Ok(fp) => fp,
                Err(e) => {
                    tracing::debug!(name = %entry.name, error = %e, "skipping malformed gallery fingerprint");
                    continue;
                }
            };
            let sim = probe.similarity(&known);
            // Strict comparison keeps the first of equal maxima.
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim * 100.0 > threshold => MatchResult {
                name: Some(gallery[idx].name.clone()),
                similarity: best_sim,
            },
            _ => MatchResult {
                name: None,
                similarity: best_sim,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(idx: usize) -> Fingerprint {
        let mut raw = vec![0.0; FINGERPRINT_LEN];
        raw[idx] = 1.0;
        Fingerprint::normalized(raw).unwrap()
    }

    fn mixed(a: usize, b: usize, wa: f64, wb: f64) -> Fingerprint {
        let mut raw = vec![0.0; FINGERPRINT_LEN];
        raw[a] = wa;
        raw[b] = wb;
        Fingerprint::normalized(raw).unwrap()
    }

    #[test]
    fn test_normalized_has_unit_norm() {
        let raw: Vec<f64> = (0..FINGERPRINT_LEN).map(|i| i as f64 * 3.5).collect();
        let fp = Fingerprint::normalized(raw).unwrap();
        assert!((fp.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_vector_left_unnormalized() {
        let fp = Fingerprint::normalized(vec![0.0; FINGERPRINT_LEN]).unwrap();
        assert_eq!(fp.norm(), 0.0);
        assert!(fp.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = Fingerprint::normalized(vec![1.0; 10]).unwrap_err();
        assert!(matches!(err, FingerprintError::WrongLength(10)));
    }

    #[test]
    fn test_json_roundtrip_preserves_values() {
        let fp = mixed(3, 40, 2.0, 1.0);
        let back = Fingerprint::from_json(&fp.to_json()).unwrap();
        assert_eq!(fp, back);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(Fingerprint::from_json("not json"), Err(FingerprintError::Decode(_))));
        assert!(matches!(Fingerprint::from_json("[1.0, 2.0]"), Err(FingerprintError::WrongLength(2))));
    }

    #[test]
    fn test_serde_enforces_length() {
        let parsed: Result<Fingerprint, _> = serde_json::from_str("[0.5, 0.5]");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_similarity_identical_is_one() {
        let fp = mixed(1, 2, 0.3, 0.7);
        assert!((fp.similarity(&fp) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_similarity_orthogonal_is_zero() {
        assert!(unit(0).similarity(&unit(1)).abs() < 1e-12);
    }

    #[test]
    fn test_matcher_scans_whole_gallery() {
        let gallery = vec![
            GalleryEntry::new("decoy1", &unit(1)),
            GalleryEntry::new("decoy2", &unit(2)),
            GalleryEntry::new("match", &unit(0)),
        ];
        let result = CosineMatcher.compare(&unit(0), &gallery, 65.0);
        assert!(result.matched());
        assert_eq!(result.name.as_deref(), Some("match"));
        assert!((result.confidence() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_matcher_tie_keeps_first() {
        let gallery = vec![
            GalleryEntry::new("first", &unit(0)),
            GalleryEntry::new("second", &unit(0)),
        ];
        let result = CosineMatcher.compare(&unit(0), &gallery, 65.0);
        assert_eq!(result.name.as_deref(), Some("first"));
    }

    #[test]
    fn test_matcher_near_miss_reports_best_confidence() {
        // cos = 0.6 / 1.0 -> 60%
        let probe = mixed(0, 1, 0.6, 0.8);
        let gallery = vec![GalleryEntry::new("alice", &unit(0))];
        let result = CosineMatcher.compare(&probe, &gallery, 65.0);
        assert!(!result.matched());
        assert!((result.confidence() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_matcher_threshold_is_strict() {
        let probe = mixed(0, 1, 0.65, (1.0f64 - 0.65 * 0.65).sqrt());
        let gallery = vec![GalleryEntry::new("alice", &unit(0))];
        let confidence = CosineMatcher.compare(&probe, &gallery, 0.0).confidence();
        let at_boundary = CosineMatcher.compare(&probe, &gallery, confidence);
        assert!(!at_boundary.matched());
        let below = CosineMatcher.compare(&probe, &gallery, confidence - 1e-6);
        assert!(below.matched());
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let result = CosineMatcher.compare(&unit(0), &[], 65.0);
        assert_eq!(result, MatchResult::none());
    }

    #[test]
    fn test_matcher_skips_malformed_entries() {
        let gallery = vec![
            GalleryEntry { name: "broken".into(), encoded: "{oops".into() },
            GalleryEntry { name: "short".into(), encoded: "[1.0]".into() },
            GalleryEntry::new("bob", &unit(5)),
        ];
        let result = CosineMatcher.compare(&unit(5), &gallery, 65.0);
        assert_eq!(result.name.as_deref(), Some("bob"));
    }

    #[test]
    fn test_matcher_all_malformed_is_no_match() {
        let gallery = vec![GalleryEntry { name: "broken".into(), encoded: "[]".into() }];
        let result = CosineMatcher.compare(&unit(0), &gallery, 65.0);
        assert!(!result.matched());
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_bounding_box_area() {
        assert_eq!(BoundingBox::new(5, 5, 30, 40).area(), 1200);
    }
}
