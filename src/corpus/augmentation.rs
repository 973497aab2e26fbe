//! Augmentation Policy for Class Balancing
//!
//! Randomized transforms used to synthesize extra examples for under-populated
//! classes: horizontal mirroring, a small rotation and color jitter on
//! brightness, contrast and saturation.
//!
//! The transforms are independent. Color jitter components run in a random
//! order on each call, and the output always keeps the source's dimensions.

use image::{ImageBuffer, Rgb, RgbImage};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{CurationError, Result};

/// Configuration of the randomized augmentation applied by the balancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationPolicy {
    /// Probability of mirroring horizontally (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Maximum rotation angle in degrees (uniform in ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Brightness factor range (1.0 ± brightness)
    pub brightness: f32,
    /// Contrast factor range (1.0 ± contrast)
    pub contrast: f32,
    /// Saturation factor range (1.0 ± saturation)
    pub saturation: f32,
}

impl Default for AugmentationPolicy {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            rotation_degrees: 15.0,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Jitter {
    Brightness,
    Contrast,
    Saturation,
}

impl AugmentationPolicy {
    /// Identity policy, every call returns an exact copy
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            rotation_degrees: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            saturation: 0.0,
        }
    }

    /// Check that every parameter is in range
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.horizontal_flip_prob) {
            return Err(CurationError::Config(format!(
                "horizontal_flip_prob must be in [0, 1], got {}",
                self.horizontal_flip_prob
            )));
        }
        if !(0.0..=180.0).contains(&self.rotation_degrees) {
            return Err(CurationError::Config(format!(
                "rotation_degrees must be in [0, 180], got {}",
                self.rotation_degrees
            )));
        }
        for (name, value) in [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CurationError::Config(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Apply the policy with fresh randomness drawn from `rng`
    pub fn apply<R: Rng + ?Sized>(&self, image: &RgbImage, rng: &mut R) -> RgbImage {
        let mut result = image.clone();

        if self.horizontal_flip_prob > 0.0 && rng.gen::<f32>() < self.horizontal_flip_prob {
            image::imageops::flip_horizontal_in_place(&mut result);
        }

        if self.rotation_degrees > 0.0 {
            let angle = rng.gen_range(-self.rotation_degrees..=self.rotation_degrees);
            result = rotate(&result, angle);
        }

        let mut jitters = [Jitter::Brightness, Jitter::Contrast, Jitter::Saturation];
        jitters.shuffle(rng);

        for jitter in jitters {
            match jitter {
                Jitter::Brightness if self.brightness > 0.0 => {
                    let factor = sample_factor(self.brightness, rng);
                    result = adjust_brightness(&result, factor);
                }
                Jitter::Contrast if self.contrast > 0.0 => {
                    let factor = sample_factor(self.contrast, rng);
                    result = adjust_contrast(&result, factor);
                }
                Jitter::Saturation if self.saturation > 0.0 => {
                    let factor = sample_factor(self.saturation, rng);
                    result = adjust_saturation(&result, factor);
                }
                _ => {}
            }
        }

        result
    }
}

fn sample_factor<R: Rng + ?Sized>(delta: f32, rng: &mut R) -> f32 {
    (1.0 + rng.gen_range(-delta..=delta)).max(0.0)
}

/// Rotate around the center by `angle_degrees`, filling uncovered pixels with black
fn rotate(img: &RgbImage, angle_degrees: f32) -> RgbImage {
    let (width, height) = img.dimensions();
    if angle_degrees.abs() < 0.1 || width == 0 || height == 0 {
        return img.clone();
    }

    let angle_rad = angle_degrees.to_radians();

    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    let cos_a = angle_rad.cos();
    let sin_a = angle_rad.sin();

    ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;

        let src_x = cx + dx * cos_a + dy * sin_a;
        let src_y = cy - dx * sin_a + dy * cos_a;

        bilinear_sample(img, src_x, src_y)
    })
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();

    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;

        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}

fn map_channels(img: &RgbImage, f: impl Fn(f32, f32) -> f32) -> RgbImage {
    let mut output = img.clone();
    for pixel in output.pixels_mut() {
        let gray = luminance(pixel);
        for c in 0..3 {
            pixel[c] = f(pixel[c] as f32, gray).round().clamp(0.0, 255.0) as u8;
        }
    }
    output
}

fn luminance(pixel: &Rgb<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

/// Scale every channel by `factor`
fn adjust_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    map_channels(img, |v, _| v * factor)
}

/// Scale pixel values around the mean luminance
fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let count = (img.width() as f64 * img.height() as f64).max(1.0);
    let sum: f64 = img.pixels().map(|p| luminance(p) as f64).sum();
    let mean = (sum / count) as f32;

    map_channels(img, |v, _| mean + factor * (v - mean))
}

/// Interpolate between the grayscale and the original pixel
fn adjust_saturation(img: &RgbImage, factor: f32) -> RgbImage {
    map_channels(img, |v, gray| gray + factor * (v - gray))
}
