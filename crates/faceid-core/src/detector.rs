//! Haar cascade face locator.
//!
//! Evaluates an OpenCV-format boosted Haar cascade (e.g.
//! `haarcascade_frontalface_default.xml`) with the classic Viola-Jones
//! multi-scale sliding-window scan, then clusters the raw hits and keeps the
//! clusters with enough neighbours.

use crate::imaging::{resize_bilinear, to_intensity};
use crate::types::BoundingBox;
use image::{DynamicImage, GrayImage};
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const DEFAULT_SCALE_FACTOR: f64 = 1.1;
const DEFAULT_MIN_NEIGHBORS: usize = 5;
const DEFAULT_MIN_SIZE: u32 = 30;
/// Relative tolerance for two hits to count as the same face.
const GROUP_EPS: f64 = 0.2;
/// Windows whose normalized area/stddev ratio reaches this are too flat to score.
const MIN_VARIANCE_RATIO: f64 = 0.1;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0} — place haarcascade_frontalface_default.xml there or set FACEID_CASCADE_PATH")]
    ModelNotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("invalid cascade: {0}")]
    InvalidCascade(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

/// Finds the face to fingerprint in a decoded image.
pub trait FaceLocator: Send + Sync {
    /// Return the largest face region, or `None` when there is no face.
    fn locate(&self, image: &DynamicImage) -> Option<BoundingBox>;
}

/// Pick the face with the largest area; the first one wins ties.
pub fn largest(faces: &[BoundingBox]) -> Option<BoundingBox> {
    faces.iter().fold(None, |best: Option<BoundingBox>, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(*face),
    })
}

/// Multi-scale scan parameters.
#[derive(Debug, Clone, Copy)]
pub struct DetectParams {
    pub scale_factor: f64,
    pub min_neighbors: usize,
    pub min_size: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: DEFAULT_MIN_SIZE,
        }
    }
}

/// Rectangle with a weight, in base-window coordinates.
#[derive(Debug, Clone, Copy)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
}

/// Split node. `left`/`right` > 0 index another node; <= 0 select leaf `-value`.
#[derive(Debug, Clone, Copy)]
pub struct TreeNode {
    pub left: i32,
    pub right: i32,
    pub feature: usize,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct WeakClassifier {
    pub nodes: Vec<TreeNode>,
    pub leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub threshold: f64,
    pub classifiers: Vec<WeakClassifier>,
}

/// A boosted Haar cascade.
#[derive(Debug, Clone)]
pub struct Cascade {
    pub width: u32,
    pub height: u32,
    pub stages: Vec<Stage>,
    pub features: Vec<HaarFeature>,
}

impl Cascade {
    /// Parse a cascade in OpenCV's `opencv-cascade-classifier` XML layout.
    pub fn from_xml(text: &str) -> Result<Self, DetectorError> {
        let doc = roxmltree::Document::parse(text)?;

        if doc
            .descendants()
            .any(|n| n.attribute("type_id") == Some("opencv-haar-classifier"))
        {
            return Err(DetectorError::Unsupported(
                "old-style opencv-haar-classifier layout".into(),
            ));
        }

        let root = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| invalid("missing <cascade> element"))?;

        if let Some(kind) = optional_text(root, "featureType") {
            if kind != "HAAR" {
                return Err(DetectorError::Unsupported(format!("feature type {kind}")));
            }
        }

        let width = parse_num::<u32>(required_text(root, "width")?, "width")?;
        let height = parse_num::<u32>(required_text(root, "height")?, "height")?;

        let mut stages = Vec::new();
        for stage_node in elements(required_child(root, "stages")?) {
            let threshold = parse_num::<f64>(required_text(stage_node, "stageThreshold")?, "stageThreshold")?;
            let mut classifiers = Vec::new();
            for weak in elements(required_child(stage_node, "weakClassifiers")?) {
                let raw_nodes = parse_list(required_text(weak, "internalNodes")?, "internalNodes")?;
                if raw_nodes.is_empty() || raw_nodes.len() % 4 != 0 {
                    return Err(invalid("internalNodes must hold groups of 4 values"));
                }
                let nodes = raw_nodes
                    .chunks_exact(4)
                    .map(|c| {
                        if c[2] < 0.0 || c[2].fract() != 0.0 {
                            return Err(invalid("node feature index must be a non-negative integer"));
                        }
                        Ok(TreeNode {
                            left: c[0] as i32,
                            right: c[1] as i32,
                            feature: c[2] as usize,
                            threshold: c[3],
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let leaves = parse_list(required_text(weak, "leafValues")?, "leafValues")?;
                classifiers.push(WeakClassifier { nodes, leaves });
            }
            stages.push(Stage { threshold, classifiers });
        }

        let mut features = Vec::new();
        for feature_node in elements(required_child(root, "features")?) {
            if optional_text(feature_node, "tilted").is_some_and(|t| t != "0") {
                return Err(DetectorError::Unsupported("tilted Haar features".into()));
            }
            let mut rects = Vec::new();
            for rect_node in elements(required_child(feature_node, "rects")?) {
                let values = parse_list(rect_node.text().unwrap_or(""), "rect")?;
                let [x, y, w, h, weight] = values[..] else {
                    return Err(invalid("rect must hold 5 values"));
                };
                rects.push(WeightedRect {
                    x: x as u32,
                    y: y as u32,
                    width: w as u32,
                    height: h as u32,
                    weight,
                });
            }
            features.push(HaarFeature { rects });
        }

        let cascade = Self { width, height, stages, features };
        cascade.validate()?;
        Ok(cascade)
    }

    /// Check every index and rectangle so evaluation never goes out of bounds.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.width < 3 || self.height < 3 {
            return Err(invalid("window must be at least 3x3"));
        }
        if self.stages.is_empty() {
            return Err(invalid("cascade has no stages"));
        }
        for feature in &self.features {
            for r in &feature.rects {
                let right = r.x.checked_add(r.width);
                let bottom = r.y.checked_add(r.height);
                if right.map_or(true, |v| v > self.width) || bottom.map_or(true, |v| v > self.height) {
                    return Err(invalid("feature rectangle exceeds the window"));
                }
            }
        }
        for stage in &self.stages {
            for weak in &stage.classifiers {
                for (idx, node) in weak.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return Err(invalid("node references a missing feature"));
                    }
                    for next in [node.left, node.right] {
                        if next > 0 {
                            let next = next as usize;
                            if next <= idx || next >= weak.nodes.len() {
                                return Err(invalid("node references an invalid child"));
                            }
                        } else if (-next) as usize >= weak.leaves.len() {
                            return Err(invalid("node references a missing leaf"));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> DetectorError {
    DetectorError::InvalidCascade(msg.to_string())
}

fn elements<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn required_child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Result<roxmltree::Node<'a, 'input>, DetectorError> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| DetectorError::InvalidCascade(format!("missing <{name}>")))
}

fn optional_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
        .map(str::trim)
}

fn required_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str, DetectorError> {
    optional_text(node, name).ok_or_else(|| DetectorError::InvalidCascade(format!("missing <{name}>")))
}

fn parse_num<T: std::str::FromStr>(text: &str, what: &str) -> Result<T, DetectorError> {
    text.trim()
        .parse()
        .map_err(|_| DetectorError::InvalidCascade(format!("bad {what}: {text:?}")))
}

fn parse_list(text: &str, what: &str) -> Result<Vec<f64>, DetectorError> {
    text.split_whitespace().map(|t| parse_num(t, what)).collect()
}

/// Summed-area tables over an 8-bit image.
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    fn new(data: &[u8], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sum = vec![0u64; stride * (height + 1)];
        let mut sq_sum = vec![0u64; stride * (height + 1)];

        for y in 0..height {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..width {
                let p = data[y * width + x] as u64;
                row += p;
                row_sq += p * p;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    fn area(table: &[u64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> u64 {
        table[(y + h) * stride + x + w] + table[y * stride + x]
            - table[y * stride + x + w]
            - table[(y + h) * stride + x]
    }

    fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::area(&self.sum, self.stride, x, y, w, h)
    }

    fn rect_sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::area(&self.sq_sum, self.stride, x, y, w, h)
    }
}

/// Candidate rectangle with signed coordinates for clustering arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

/// Haar-cascade face detector.
pub struct CascadeDetector {
    cascade: Cascade,
    params: DetectParams,
}

impl CascadeDetector {
    /// Load a cascade XML file with the default scan parameters.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DetectorError::ModelNotFound(path.display().to_string()));
        }

        let text = std::fs::read_to_string(path)?;
        let cascade = Cascade::from_xml(&text)?;

        tracing::info!(
            path = %path.display(),
            window = ?(cascade.width, cascade.height),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );

        Ok(Self::new(cascade, DetectParams::default()))
    }

    pub fn new(cascade: Cascade, params: DetectParams) -> Self {
        Self { cascade, params }
    }

    /// Detect faces in an intensity image, in cluster order.
    pub fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        if self.params.scale_factor <= 1.0 {
            tracing::warn!(scale_factor = self.params.scale_factor, "scale factor must exceed 1.0");
            return Vec::new();
        }

        let (img_w, img_h) = (gray.width() as usize, gray.height() as usize);
        let (cw, ch) = (self.cascade.width as usize, self.cascade.height as usize);
        let min_size = self.params.min_size as usize;

        let mut candidates = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let win_w = (cw as f64 * factor).round() as usize;
            let win_h = (ch as f64 * factor).round() as usize;
            if win_w > img_w || win_h > img_h {
                break;
            }

            if win_w >= min_size && win_h >= min_size {
                let sw = (img_w as f64 / factor).round() as usize;
                let sh = (img_h as f64 / factor).round() as usize;
                if sw < cw || sh < ch {
                    break;
                }

                let scaled = resize_bilinear(gray.as_raw(), img_w, img_h, 1, sw, sh);
                let integral = IntegralImage::new(&scaled, sw, sh);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=sh - ch).step_by(step) {
                    for x in (0..=sw - cw).step_by(step) {
                        if self.evaluate(&integral, x, y) {
                            candidates.push(Rect {
                                x: (x as f64 * factor).round() as i32,
                                y: (y as f64 * factor).round() as i32,
                                w: win_w as i32,
                                h: win_h as i32,
                            });
                        }
                    }
                }
            }

            factor *= self.params.scale_factor;
        }

        let grouped = group_rectangles(&candidates, self.params.min_neighbors, GROUP_EPS);
        tracing::debug!(
            candidates = candidates.len(),
            faces = grouped.len(),
            "cascade scan complete"
        );

        grouped
            .into_iter()
            .map(|r| {
                let x = r.x.max(0) as u32;
                let y = r.y.max(0) as u32;
                BoundingBox::new(
                    x,
                    y,
                    (r.w.max(0) as u32).min(img_w as u32 - x.min(img_w as u32)),
                    (r.h.max(0) as u32).min(img_h as u32 - y.min(img_h as u32)),
                )
            })
            .filter(|b| b.width > 0 && b.height > 0)
            .collect()
    }

    /// Run the cascade on the base-size window whose top-left corner is (x, y).
    fn evaluate(&self, integral: &IntegralImage, x: usize, y: usize) -> bool {
        let (cw, ch) = (self.cascade.width as usize, self.cascade.height as usize);

        let area = ((cw - 2) * (ch - 2)) as f64;
        let sum = integral.rect_sum(x + 1, y + 1, cw - 2, ch - 2) as f64;
        let sq_sum = integral.rect_sq_sum(x + 1, y + 1, cw - 2, ch - 2) as f64;
        let nf = area * sq_sum - sum * sum;
        if nf <= 0.0 {
            return false;
        }
        let nf = nf.sqrt();
        if area / nf >= MIN_VARIANCE_RATIO {
            return false;
        }

        for stage in &self.cascade.stages {
            let score: f64 = stage
                .classifiers
                .iter()
                .map(|weak| self.evaluate_tree(weak, integral, x, y, nf))
                .sum();
            if score < stage.threshold {
                return false;
            }
        }
        true
    }

    fn evaluate_tree(
        &self,
        weak: &WeakClassifier,
        integral: &IntegralImage,
        x: usize,
        y: usize,
        nf: f64,
    ) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = &weak.nodes[idx];
            let feature = &self.cascade.features[node.feature];
            let value: f64 = feature
                .rects
                .iter()
                .map(|r| {
                    r.weight
                        * integral.rect_sum(
                            x + r.x as usize,
                            y + r.y as usize,
                            r.width as usize,
                            r.height as usize,
                        ) as f64
                })
                .sum::<f64>()
                / nf;

            let next = if value < node.threshold { node.left } else { node.right };
            if next <= 0 {
                return weak.leaves[(-next) as usize];
            }
            idx = next as usize;
        }
    }
}

impl FaceLocator for CascadeDetector {
    fn locate(&self, image: &DynamicImage) -> Option<BoundingBox> {
        let gray = to_intensity(&image.to_rgb8());
        let faces = self.detect(&gray);
        let face = largest(&faces);
        tracing::debug!(found = faces.len(), selected = ?face, "face locate");
        face
    }
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.w.min(b.w) + a.h.min(b.h)) as f64 * 0.5;
    ((a.x - b.x).abs() as f64) <= delta
        && ((a.y - b.y).abs() as f64) <= delta
        && ((a.x + a.w - b.x - b.w).abs() as f64) <= delta
        && ((a.y + a.h - b.y - b.h).abs() as f64) <= delta
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster raw hits, average each cluster, and keep clusters with more than
/// `group_threshold` members that are not nested inside a stronger cluster.
///
/// A threshold of 0 returns the hits unchanged.
fn group_rectangles(rects: &[Rect], group_threshold: usize, eps: f64) -> Vec<Rect> {
    if group_threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let ri = find_root(&mut parent, i);
                let rj = find_root(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Label clusters in order of their first member.
    let mut label_of_root = vec![usize::MAX; n];
    let mut sums: Vec<[f64; 4]> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        if label_of_root[root] == usize::MAX {
            label_of_root[root] = sums.len();
            sums.push([0.0; 4]);
            counts.push(0);
        }
        let label = label_of_root[root];
        sums[label][0] += r.x as f64;
        sums[label][1] += r.y as f64;
        sums[label][2] += r.w as f64;
        sums[label][3] += r.h as f64;
        counts[label] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(counts.iter())
        .map(|(s, &c)| {
            let k = 1.0 / c as f64;
            Rect {
                x: (s[0] * k).round() as i32,
                y: (s[1] * k).round() as i32,
                w: (s[2] * k).round() as i32,
                h: (s[3] * k).round() as i32,
            }
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= group_threshold {
            continue;
        }

        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let dx = (r2.w as f64 * eps).round() as i32;
            let dy = (r2.h as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.w <= r2.x + r2.w + dx
                && r1.y + r1.h <= r2.y + r2.h + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            kept.push(*r1);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY_CASCADE_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageNum>1</stageNum>
  <stages>
    <!-- stage 0 -->
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1.0000000000000001e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 24 24 -1.</_>
        <_>
          0 12 24 12 2.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    /// One stump firing on "bottom half brighter than top half".
    fn edge_cascade() -> Cascade {
        Cascade {
            width: 24,
            height: 24,
            stages: vec![Stage {
                threshold: 0.0,
                classifiers: vec![WeakClassifier {
                    nodes: vec![TreeNode { left: 0, right: -1, feature: 0, threshold: 0.1 }],
                    leaves: vec![-1.0, 1.0],
                }],
            }],
            features: vec![HaarFeature {
                rects: vec![
                    WeightedRect { x: 0, y: 0, width: 24, height: 24, weight: -1.0 },
                    WeightedRect { x: 0, y: 12, width: 24, height: 12, weight: 2.0 },
                ],
            }],
        }
    }

    fn dark_over_light(w: u32, h: u32, edge: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |_, y| image::Luma([if y < edge { 0 } else { 255 }]))
    }

    fn rect(x: i32, y: i32, w: i32, h: i32) -> Rect {
        Rect { x, y, w, h }
    }

    #[test]
    fn test_integral_rect_sums() {
        let data: Vec<u8> = (1..=12).collect(); // 4x3
        let ii = IntegralImage::new(&data, 4, 3);
        assert_eq!(ii.rect_sum(0, 0, 4, 3), (1..=12).sum::<u64>());
        // Middle 2x2: rows 1-2, cols 1-2 -> 6+7+10+11
        assert_eq!(ii.rect_sum(1, 1, 2, 2), 34);
        assert_eq!(ii.rect_sq_sum(0, 0, 1, 1), 1);
        assert_eq!(ii.rect_sq_sum(3, 2, 1, 1), 144);
    }

    #[test]
    fn test_largest_prefers_area_then_first() {
        let faces = [
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(5, 5, 20, 20),
            BoundingBox::new(50, 50, 20, 20),
        ];
        assert_eq!(largest(&faces), Some(BoundingBox::new(5, 5, 20, 20)));
        assert_eq!(largest(&[]), None);
    }

    #[test]
    fn test_group_rectangles_merges_and_thresholds() {
        let mut hits: Vec<Rect> = (0..6).map(|i| rect(100 + i, 100 + i, 40, 40)).collect();
        hits.push(rect(300, 300, 40, 40)); // lone hit
        let grouped = group_rectangles(&hits, 5, GROUP_EPS);
        assert_eq!(grouped, vec![rect(103, 103, 40, 40)]);
    }

    #[test]
    fn test_group_rectangles_needs_more_than_threshold() {
        let hits: Vec<Rect> = (0..5).map(|i| rect(10 + i, 10, 30, 30)).collect();
        assert!(group_rectangles(&hits, 5, GROUP_EPS).is_empty());
    }

    #[test]
    fn test_group_rectangles_zero_threshold_passthrough() {
        let hits = vec![rect(0, 0, 30, 30), rect(1, 1, 30, 30)];
        assert_eq!(group_rectangles(&hits, 0, GROUP_EPS), hits);
    }

    #[test]
    fn test_group_rectangles_drops_nested_weaker_cluster() {
        let mut hits: Vec<Rect> = (0..10).map(|_| rect(0, 0, 100, 100)).collect();
        hits.extend((0..4).map(|_| rect(30, 30, 30, 30)));
        let grouped = group_rectangles(&hits, 3, GROUP_EPS);
        assert_eq!(grouped, vec![rect(0, 0, 100, 100)]);
    }

    #[test]
    fn test_uniform_image_has_no_faces() {
        let detector = CascadeDetector::new(edge_cascade(), DetectParams::default());
        let gray = GrayImage::from_pixel(120, 120, image::Luma([200]));
        assert!(detector.detect(&gray).is_empty());
    }

    #[test]
    fn test_edge_cascade_fires_across_edge() {
        let detector = CascadeDetector::new(edge_cascade(), DetectParams::default());
        let gray = dark_over_light(120, 120, 60);
        let faces = detector.detect(&gray);
        assert!(!faces.is_empty());
        for face in &faces {
            assert!(face.width >= DEFAULT_MIN_SIZE && face.height >= DEFAULT_MIN_SIZE);
            assert!(face.x + face.width <= 120 && face.y + face.height <= 120);
            assert!(face.y < 60 && face.y + face.height > 60, "{face:?} misses the edge");
        }
    }

    #[test]
    fn test_image_smaller_than_min_size() {
        let detector = CascadeDetector::new(edge_cascade(), DetectParams::default());
        let gray = dark_over_light(28, 28, 14);
        assert!(detector.detect(&gray).is_empty());
    }

    #[test]
    fn test_locate_on_color_image() {
        let detector = CascadeDetector::new(edge_cascade(), DetectParams::default());
        let rgb = image::RgbImage::from_fn(120, 120, |_, y| {
            if y < 60 { image::Rgb([0, 0, 0]) } else { image::Rgb([255, 255, 255]) }
        });
        let face = detector.locate(&DynamicImage::ImageRgb8(rgb));
        assert!(face.is_some());

        let blank = DynamicImage::ImageRgb8(image::RgbImage::new(120, 120));
        assert!(detector.locate(&blank).is_none());
    }

    #[test]
    fn test_parse_tiny_cascade() {
        let cascade = Cascade::from_xml(TINY_CASCADE_XML).unwrap();
        assert_eq!((cascade.width, cascade.height), (24, 24));
        assert_eq!(cascade.stages.len(), 1);
        assert_eq!(cascade.stages[0].classifiers.len(), 1);
        let weak = &cascade.stages[0].classifiers[0];
        assert_eq!(weak.nodes.len(), 1);
        assert_eq!(weak.nodes[0].left, 0);
        assert_eq!(weak.nodes[0].right, -1);
        assert!((weak.nodes[0].threshold - 0.1).abs() < 1e-12);
        assert_eq!(weak.leaves, vec![-1.0, 1.0]);
        assert_eq!(cascade.features[0].rects.len(), 2);
        assert_eq!(cascade.features[0].rects[1].y, 12);
        assert_eq!(cascade.features[0].rects[1].weight, 2.0);
    }

    #[test]
    fn test_parsed_cascade_matches_hand_built() {
        let parsed = CascadeDetector::new(Cascade::from_xml(TINY_CASCADE_XML).unwrap(), DetectParams::default());
        let built = CascadeDetector::new(edge_cascade(), DetectParams::default());
        let gray = dark_over_light(120, 120, 60);
        assert_eq!(parsed.detect(&gray), built.detect(&gray));
    }

    #[test]
    fn test_tilted_features_unsupported() {
        let xml = TINY_CASCADE_XML.replace("</rects></_></features>", "</rects><tilted>1</tilted></_></features>");
        assert!(matches!(Cascade::from_xml(&xml), Err(DetectorError::Unsupported(_))));
    }

    #[test]
    fn test_lbp_cascade_unsupported() {
        let xml = TINY_CASCADE_XML.replace("<featureType>HAAR</featureType>", "<featureType>LBP</featureType>");
        assert!(matches!(Cascade::from_xml(&xml), Err(DetectorError::Unsupported(_))));
    }

    #[test]
    fn test_bad_feature_index_rejected() {
        let xml = TINY_CASCADE_XML.replace("0 -1 0 1.0000000000000001e-01", "0 -1 7 1.0000000000000001e-01");
        assert!(matches!(Cascade::from_xml(&xml), Err(DetectorError::InvalidCascade(_))));
    }

    #[test]
    fn test_negative_feature_index_rejected() {
        let xml = TINY_CASCADE_XML.replace("0 -1 0 1.0000000000000001e-01", "0 -1 -2 1.0000000000000001e-01");
        assert!(matches!(Cascade::from_xml(&xml), Err(DetectorError::InvalidCascade(_))));
    }

    #[test]
    fn test_overflowing_rect_rejected() {
        let mut cascade = edge_cascade();
        cascade.features[0].rects[1].x = u32::MAX - 1;
        cascade.features[0].rects[1].width = 4;
        assert!(matches!(cascade.validate(), Err(DetectorError::InvalidCascade(_))));
    }

    #[test]
    fn test_missing_cascade_file() {
        let err = CascadeDetector::load("/nonexistent/haarcascade.xml").err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
