//! Data Augmentation Module for Lesion Images
//!
//! Turns a decoded image into a normalized CHW float buffer ready for the
//! network.
//!
//! # Augmentation Strategy
//!
//! - **Training**: center crop, random perspective warp, random vertical and
//!   horizontal flips, then normalization
//! - **Validation/Test**: center crop and normalization only, a pure function
//!   of the input image

use image::{imageops, DynamicImage, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::{IMAGENET_MEAN, IMAGENET_STD, IMAGE_SIZE};

/// Probabilities and strength of the random transforms
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Probability of applying the perspective warp
    pub perspective_prob: f64,
    /// How far corners may move, as a fraction of half the image side
    pub distortion_scale: f64,
    /// Probability of a vertical flip
    pub vertical_flip_prob: f64,
    /// Probability of a horizontal flip
    pub horizontal_flip_prob: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            perspective_prob: 0.5,
            distortion_scale: 0.5,
            vertical_flip_prob: 0.5,
            horizontal_flip_prob: 0.5,
        }
    }
}

impl AugmentationConfig {
    /// Disable all random transforms
    pub fn none() -> Self {
        Self {
            perspective_prob: 0.0,
            distortion_scale: 0.0,
            vertical_flip_prob: 0.0,
            horizontal_flip_prob: 0.0,
        }
    }
}

/// Crop, optional random transforms, tensor conversion and normalization
#[derive(Clone, Debug)]
pub struct AugmentationPipeline {
    config: AugmentationConfig,
    crop_size: u32,
}

impl AugmentationPipeline {
    /// Deterministic pipeline for validation and test images
    pub fn evaluation() -> Self {
        Self {
            config: AugmentationConfig::none(),
            crop_size: IMAGE_SIZE as u32,
        }
    }

    /// Randomized pipeline for training images
    pub fn training() -> Self {
        Self {
            config: AugmentationConfig::default(),
            crop_size: IMAGE_SIZE as u32,
        }
    }

    /// Same transforms at a different output resolution
    pub fn with_crop_size(mut self, crop_size: u32) -> Self {
        self.crop_size = crop_size;
        self
    }

    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    pub fn is_randomized(&self) -> bool {
        self.config != AugmentationConfig::none()
    }

    /// Length of the buffer produced by `apply`
    pub fn output_len(&self) -> usize {
        3 * self.crop_size as usize * self.crop_size as usize
    }

    /// Run the pipeline. Output is CHW, length `3 * crop * crop`.
    ///
    /// The evaluation pipeline never draws from `rng`.
    pub fn apply(&self, img: &DynamicImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let mut rgb = center_crop(&img.to_rgb8(), self.crop_size);

        if self.config.perspective_prob > 0.0 && rng.gen::<f64>() < self.config.perspective_prob {
            let (start, end) = perspective_corners(
                rgb.width(),
                rgb.height(),
                self.config.distortion_scale,
                rng,
            );
            rgb = warp_perspective(&rgb, &start, &end);
        }

        if self.config.vertical_flip_prob > 0.0 && rng.gen::<f64>() < self.config.vertical_flip_prob
        {
            imageops::flip_vertical_in_place(&mut rgb);
        }

        if self.config.horizontal_flip_prob > 0.0
            && rng.gen::<f64>() < self.config.horizontal_flip_prob
        {
            imageops::flip_horizontal_in_place(&mut rgb);
        }

        to_normalized_chw(&rgb)
    }
}

/// Crop the central `size x size` window.
///
/// Images smaller than the window are zero-padded around the center.
pub fn center_crop(img: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    let left = crop_offset(width, size);
    let top = crop_offset(height, size);

    RgbImage::from_fn(size, size, |x, y| {
        let sx = x as i64 + left;
        let sy = y as i64 + top;
        if sx >= 0 && sy >= 0 && sx < width as i64 && sy < height as i64 {
            *img.get_pixel(sx as u32, sy as u32)
        } else {
            Rgb([0, 0, 0])
        }
    })
}

fn crop_offset(extent: u32, size: u32) -> i64 {
    if extent >= size {
        ((extent - size) as f64 / 2.0).round_ties_even() as i64
    } else {
        -(((size - extent) / 2) as i64)
    }
}

type Corners = [[f64; 2]; 4];

/// Draw displaced corners for a perspective warp.
///
/// Returns `(start, end)`: the original corners (top-left, top-right,
/// bottom-right, bottom-left) and where each one moves to.
fn perspective_corners(
    width: u32,
    height: u32,
    distortion: f64,
    rng: &mut ChaCha8Rng,
) -> (Corners, Corners) {
    let w = width as i64;
    let h = height as i64;
    let dx = (distortion * (w / 2) as f64) as i64;
    let dy = (distortion * (h / 2) as f64) as i64;

    let mut near = |extent: i64, d: i64| rng.gen_range(0..d + 1).min(extent - 1) as f64;
    let top_left = [near(w, dx), near(h, dy)];
    let top_right_y = near(h, dy);
    let bottom_left_x = near(w, dx);

    let mut far = |extent: i64, d: i64| rng.gen_range((extent - d - 1).max(0)..extent) as f64;
    let top_right = [far(w, dx), top_right_y];
    let bottom_right = [far(w, dx), far(h, dy)];
    let bottom_left = [bottom_left_x, far(h, dy)];

    let start = [
        [0.0, 0.0],
        [(w - 1) as f64, 0.0],
        [(w - 1) as f64, (h - 1) as f64],
        [0.0, (h - 1) as f64],
    ];
    (start, [top_left, top_right, bottom_right, bottom_left])
}

/// Homography coefficients `[a, b, c, d, e, f, g, h]` mapping each `from`
/// point onto the matching `to` point.
fn solve_homography(from: &Corners, to: &Corners) -> Option<[f64; 8]> {
    let mut m = [[0.0f64; 9]; 8];
    for (i, (p, q)) in from.iter().zip(to.iter()).enumerate() {
        m[2 * i] = [p[0], p[1], 1.0, 0.0, 0.0, 0.0, -q[0] * p[0], -q[0] * p[1], q[0]];
        m[2 * i + 1] = [0.0, 0.0, 0.0, p[0], p[1], 1.0, -q[1] * p[0], -q[1] * p[1], q[1]];
    }

    // Gaussian elimination with partial pivoting on the augmented matrix
    for col in 0..8 {
        let pivot = (col..8).max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);

        for row in 0..8 {
            if row != col {
                let factor = m[row][col] / m[col][col];
                for k in col..9 {
                    m[row][k] -= factor * m[col][k];
                }
            }
        }
    }

    let mut coeffs = [0.0; 8];
    for (i, c) in coeffs.iter_mut().enumerate() {
        *c = m[i][8] / m[i][i];
    }
    Some(coeffs)
}

/// Warp so that the `start` corners land on the `end` corners.
///
/// Each output pixel is pulled back through the inverse mapping and sampled
/// bicubically; points outside the source are filled with zero.
fn warp_perspective(img: &RgbImage, start: &Corners, end: &Corners) -> RgbImage {
    let Some([a, b, c, d, e, f, g, h]) = solve_homography(end, start) else {
        return img.clone();
    };

    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let (x, y) = (x as f64, y as f64);
        let denom = g * x + h * y + 1.0;
        if denom.abs() < f64::EPSILON {
            return Rgb([0, 0, 0]);
        }
        let src_x = (a * x + b * y + c) / denom;
        let src_y = (d * x + e * y + f) / denom;
        bicubic_sample(img, src_x as f32, src_y as f32)
    })
}

/// Cubic convolution coefficient, as used by PIL and torch
const CUBIC_A: f32 = -0.75;

/// Weights of the four taps at offsets -1, 0, 1, 2 for fraction `t`
fn cubic_weights(t: f32) -> [f32; 4] {
    let a = CUBIC_A;
    let near = |x: f32| ((a + 2.0) * x - (a + 3.0)) * x * x + 1.0;
    let far = |x: f32| ((a * x - 5.0 * a) * x + 8.0 * a) * x - 4.0 * a;

    let w0 = far(t + 1.0);
    let w1 = near(t);
    let w2 = near(1.0 - t);
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}

/// Sample a pixel using bicubic interpolation, zero outside the image.
///
/// Taps past the border are clamped to the edge pixel.
fn bicubic_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();

    // Slack absorbs rounding in the solved homography at the borders
    const SLACK: f32 = 1e-3;
    if x < -SLACK
        || y < -SLACK
        || x > (width - 1) as f32 + SLACK
        || y > (height - 1) as f32 + SLACK
    {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let wx = cubic_weights(x - x0);
    let wy = cubic_weights(y - y0);

    let tap = |base: f32, offset: usize, limit: u32| -> u32 {
        (base as i64 + offset as i64 - 1).clamp(0, limit as i64 - 1) as u32
    };

    let mut acc = [0f32; 3];
    for (j, wy) in wy.iter().enumerate() {
        let py = tap(y0, j, height);
        for (i, wx) in wx.iter().enumerate() {
            let px = tap(x0, i, width);
            let p = img.get_pixel(px, py);
            for c in 0..3 {
                acc[c] += p[c] as f32 * wx * wy;
            }
        }
    }

    Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

/// Scale to [0, 1], normalize per channel, lay out as CHW
fn to_normalized_chw(rgb: &RgbImage) -> Vec<f32> {
    let (width, height) = rgb.dimensions();
    let mut data = Vec::with_capacity(3 * height as usize * width as usize);

    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let v = rgb.get_pixel(x, y)[c] as f32 / 255.0;
                data.push((v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
            }
        }
    }

    data
}
