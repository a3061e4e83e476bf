//! Colour-histogram and gradient-statistics face fingerprints.
//!
//! A face crop is resized to a canonical 100×100 square and summarized as
//! 52 numbers: a 16-bin histogram per colour channel (blue, green, red) and
//! the mean and standard deviation of the horizontal and vertical Sobel
//! gradient fields. The vector is L2-normalized.

use crate::imaging::{resize_bilinear, to_intensity};
use crate::types::{BoundingBox, Fingerprint, FingerprintError, HISTOGRAM_BINS};
use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::Array2;
use thiserror::Error;

// --- Named constants ---
const CANONICAL_SIZE: u32 = 100;
const BIN_WIDTH: usize = 256 / HISTOGRAM_BINS;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("face region {0:?} lies outside the image")]
    EmptyRegion(BoundingBox),
    #[error("fingerprint: {0}")]
    Fingerprint(#[from] FingerprintError),
}

/// Crop the image to `bbox` (clamped to the image bounds).
pub fn crop_face(image: &DynamicImage, bbox: &BoundingBox) -> Result<RgbImage, ExtractError> {
    let (w, h) = (image.width(), image.height());
    let x = bbox.x.min(w);
    let y = bbox.y.min(h);
    let cw = bbox.width.min(w - x);
    let ch = bbox.height.min(h - y);
    if cw == 0 || ch == 0 {
        return Err(ExtractError::EmptyRegion(*bbox));
    }
    Ok(image.crop_imm(x, y, cw, ch).to_rgb8())
}

/// Compute the fingerprint of the face inside `bbox`.
pub fn extract(image: &DynamicImage, bbox: &BoundingBox) -> Result<Fingerprint, ExtractError> {
    let crop = crop_face(image, bbox)?;
    fingerprint_crop(&crop)
}

/// Compute the fingerprint of an already-cropped face.
pub fn fingerprint_crop(crop: &RgbImage) -> Result<Fingerprint, ExtractError> {
    let size = CANONICAL_SIZE as usize;
    let data = resize_bilinear(
        crop.as_raw(),
        crop.width() as usize,
        crop.height() as usize,
        3,
        size,
        size,
    );
    let resized = RgbImage::from_raw(CANONICAL_SIZE, CANONICAL_SIZE, data)
        .ok_or(ExtractError::EmptyRegion(BoundingBox::new(0, 0, crop.width(), crop.height())))?;

    let mut raw = Vec::with_capacity(crate::FINGERPRINT_LEN);
    // Blue, green, red.
    for channel in [2usize, 1, 0] {
        raw.extend(channel_histogram(&resized, channel));
    }

    let gray = to_intensity(&resized);
    let (gx, gy) = sobel_gradients(&gray);
    raw.extend([mean(&gx), std_dev(&gx), mean(&gy), std_dev(&gy)]);

    Ok(Fingerprint::normalized(raw)?)
}

/// Pixel counts of one channel in 16 equal-width bins over 0..256.
fn channel_histogram(image: &RgbImage, channel: usize) -> [f64; HISTOGRAM_BINS] {
    let mut hist = [0.0f64; HISTOGRAM_BINS];
    for pixel in image.pixels() {
        hist[pixel.0[channel] as usize / BIN_WIDTH] += 1.0;
    }
    hist
}

/// Reflect-101 border index: `-1 -> 1`, `len -> len - 2`.
fn reflect_101(i: isize, len: usize) -> usize {
    let n = len as isize;
    if n == 1 {
        return 0;
    }
    let mut i = i;
    if i < 0 {
        i = -i;
    }
    if i >= n {
        i = 2 * n - 2 - i;
    }
    i.clamp(0, n - 1) as usize
}

/// First-order 3×3 Sobel derivatives in x and y.
fn sobel_gradients(gray: &GrayImage) -> (Array2<f64>, Array2<f64>) {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let px = |x: isize, y: isize| -> f64 {
        gray.get_pixel(reflect_101(x, w) as u32, reflect_101(y, h) as u32).0[0] as f64
    };

    let mut gx = Array2::<f64>::zeros((h, w));
    let mut gy = Array2::<f64>::zeros((h, w));

    for y in 0..h as isize {
        for x in 0..w as isize {
            let tl = px(x - 1, y - 1);
            let tc = px(x, y - 1);
            let tr = px(x + 1, y - 1);
            let ml = px(x - 1, y);
            let mr = px(x + 1, y);
            let bl = px(x - 1, y + 1);
            let bc = px(x, y + 1);
            let br = px(x + 1, y + 1);

            gx[[y as usize, x as usize]] = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
            gy[[y as usize, x as usize]] = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
        }
    }

    (gx, gy)
}

fn mean(field: &Array2<f64>) -> f64 {
    field.mean().unwrap_or(0.0)
}

/// Population standard deviation.
fn std_dev(field: &Array2<f64>) -> f64 {
    if field.is_empty() {
        return 0.0;
    }
    field.std(0.0)
}
