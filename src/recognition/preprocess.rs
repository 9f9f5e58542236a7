//! Image preprocessing for the deck classifier
//!
//! Handles resizing, normalization, and tensor conversion. The
//! normalization maps pixel intensity from [0, 255] to [-1, 1]; this is a
//! fixed contract with the classifier model, not tunable per call.

use ndarray::{Array3, Array4};

/// Preprocessing configuration
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Classifier input width
    pub input_width: u32,
    /// Classifier input height
    pub input_height: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            input_width: 224,
            input_height: 224,
            // The model expects: (pixel / 255.0 - 0.5) / 0.5 = pixel / 127.5 - 1.0
            // This maps [0, 255] -> [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

impl PreprocessConfig {
    pub fn with_geometry(width: u32, height: u32) -> Self {
        Self {
            input_width: width,
            input_height: height,
            ..Self::default()
        }
    }
}

/// Convert RGBA image data to RGB f32 array scaled to [0, 1]
pub fn rgba_to_rgb_f32(data: &[u8], width: u32, height: u32) -> Array3<f32> {
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for y in 0..height as usize {
        for x in 0..width as usize {
            let idx = (y * width as usize + x) * 4;
            if idx + 2 < data.len() {
                rgb[[y, x, 0]] = data[idx] as f32 / 255.0;
                rgb[[y, x, 1]] = data[idx + 1] as f32 / 255.0;
                rgb[[y, x, 2]] = data[idx + 2] as f32 / 255.0;
            }
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Resize image to the classifier's fixed input geometry
pub fn resize_to_input(image: &Array3<f32>, target_width: u32, target_height: u32) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let h = h as f32;
    let w = w as f32;

    let new_h = target_height as usize;
    let new_w = target_width as usize;
    let scale_y = h / new_h as f32;
    let scale_x = w / new_w as f32;

    let mut resized = Array3::<f32>::zeros((new_h, new_w, c));

    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 * scale_y).min(h - 1.0);
            let src_x = (x as f32 * scale_x).min(w - 1.0);

            // Bilinear interpolation
            let y0 = src_y.floor() as usize;
            let y1 = (y0 + 1).min(h as usize - 1);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(w as usize - 1);

            let fy = src_y - y0 as f32;
            let fx = src_x - x0 as f32;

            for ch in 0..c {
                let v00 = image[[y0, x0, ch]];
                let v01 = image[[y0, x1, ch]];
                let v10 = image[[y1, x0, ch]];
                let v11 = image[[y1, x1, ch]];

                let v0 = v00 * (1.0 - fx) + v01 * fx;
                let v1 = v10 * (1.0 - fx) + v11 * fx;
                resized[[y, x, ch]] = v0 * (1.0 - fy) + v1 * fy;
            }
        }
    }

    resized
}

/// Full preprocessing pipeline: RGBA frame bytes to a normalized NCHW
/// tensor matching the classifier's input geometry. All intermediate
/// arrays are scoped to this call and released on return.
pub fn preprocess_for_classification(
    data: &[u8],
    width: u32,
    height: u32,
    config: &PreprocessConfig,
) -> Array4<f32> {
    let rgb = rgba_to_rgb_f32(data, width, height);
    let resized = resize_to_input(&rgb, config.input_width, config.input_height);
    let normalized = normalize(&resized, &config.mean, &config.std);
    hwc_to_nchw(&normalized)
}
