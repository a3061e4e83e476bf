//! Pixel-level helpers shared by the locator and the extractor.

use image::{GrayImage, RgbImage};

/// Convert an RGB image to 8-bit intensity with BT.601 luma weights.
pub fn to_intensity(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        image::Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Resize interleaved 8-bit pixel data with bilinear interpolation.
///
/// Sample positions use half-pixel centres, so a same-size resize is an
/// exact copy and a uniform image stays uniform.
pub fn resize_bilinear(
    src: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    new_w: usize,
    new_h: usize,
) -> Vec<u8> {
    let mut resized = vec![0u8; new_w * new_h * channels];
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return resized;
    }

    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
        let fy = if src_y < 0.0 { 0.0 } else { fy };

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
            let fx = if src_x < 0.0 { 0.0 } else { fx };

            for c in 0..channels {
                let tl = src[(y0 * width + x0) * channels + c] as f32;
                let tr = src[(y0 * width + x1) * channels + c] as f32;
                let bl = src[(y1 * width + x0) * channels + c] as f32;
                let br = src[(y1 * width + x1) * channels + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                resized[(y * new_w + x) * channels + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    resized
}
