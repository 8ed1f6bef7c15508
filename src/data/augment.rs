use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;
use serde::{Serialize, Deserialize};

/// Random image perturbations applied to training samples before
/// preprocessing. Validation and test splits always use `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentationPolicy {
    #[default]
    None,
    /// Random horizontal flip and a rotation of up to ±10°.
    Light,
    /// Random resized crop (80-100% of the area), horizontal flip, ±20%
    /// brightness, contrast and saturation jitter, ±0.1 hue shift, and a
    /// rotation of up to ±10°.
    Strong,
}

const CROP_MIN_AREA: f64 = 0.8;
const CROP_MIN_RATIO: f64 = 3.0 / 4.0;
const CROP_MAX_RATIO: f64 = 4.0 / 3.0;
const JITTER: f64 = 0.2;
/// Fraction of the hue circle.
const HUE_JITTER: f64 = 0.1;
const MAX_ROTATION_DEGREES: f64 = 10.0;

impl AugmentationPolicy {
    pub fn is_none(&self) -> bool {
        matches!(self, AugmentationPolicy::None)
    }

    pub fn apply<R: Rng + ?Sized>(&self, img: &DynamicImage, rng: &mut R) -> DynamicImage {
        match self {
            AugmentationPolicy::None => img.clone(),
            AugmentationPolicy::Light => {
                let flipped = random_flip(img.clone(), rng);
                random_rotation(&flipped, rng)
            }
            AugmentationPolicy::Strong => {
                let cropped = random_resized_crop(img, rng);
                let flipped = random_flip(cropped, rng);
                let jittered = color_jitter(&flipped, rng);
                random_rotation(&jittered, rng)
            }
        }
    }
}

fn random_flip<R: Rng + ?Sized>(img: DynamicImage, rng: &mut R) -> DynamicImage {
    if rng.gen_bool(0.5) {
        img.fliph()
    } else {
        img
    }
}

/// Crops a region covering 80-100% of the image with an aspect ratio in
/// [3/4, 4/3]. The final resize happens in preprocessing.
fn random_resized_crop<R: Rng + ?Sized>(img: &DynamicImage, rng: &mut R) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w < 2 || h < 2 {
        return img.clone();
    }
    let area = (w as f64 * h as f64) * rng.gen_range(CROP_MIN_AREA..=1.0);
    let ratio = rng.gen_range(CROP_MIN_RATIO..=CROP_MAX_RATIO);
    let cw = ((area * ratio).sqrt().round() as u32).clamp(1, w);
    let ch = ((area / ratio).sqrt().round() as u32).clamp(1, h);
    let x = rng.gen_range(0..=w - cw);
    let y = rng.gen_range(0..=h - ch);
    img.crop_imm(x, y, cw, ch)
}

fn random_rotation<R: Rng + ?Sized>(img: &DynamicImage, rng: &mut R) -> DynamicImage {
    let degrees = rng.gen_range(-MAX_ROTATION_DEGREES..=MAX_ROTATION_DEGREES);
    rotate(img, degrees)
}

/// Rotates about the image center, keeping the canvas size. Pixels that
/// come from outside the source are black.
fn rotate(img: &DynamicImage, degrees: f64) -> DynamicImage {
    let src = img.to_rgb8();
    if degrees == 0.0 {
        return DynamicImage::ImageRgb8(src);
    }
    let (w, h) = src.dimensions();
    let (cx, cy) = ((w as f64 - 1.0) / 2.0, (h as f64 - 1.0) / 2.0);
    let (sin, cos) = degrees.to_radians().sin_cos();

    let out = RgbImage::from_fn(w, h, |x, y| {
        let (dx, dy) = (x as f64 - cx, y as f64 - cy);
        bilinear(&src, cx + dx * cos + dy * sin, cy - dx * sin + dy * cos)
    });
    DynamicImage::ImageRgb8(out)
}

fn bilinear(img: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f64 || y > (h - 1) as f64 {
        return Rgb([0, 0, 0]);
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);

    let corners = [
        (img.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (img.get_pixel(x1, y0), fx * (1.0 - fy)),
        (img.get_pixel(x0, y1), (1.0 - fx) * fy),
        (img.get_pixel(x1, y1), fx * fy),
    ];
    let mut px = [0u8; 3];
    for (c, v) in px.iter_mut().enumerate() {
        let value: f64 = corners.iter().map(|(p, wgt)| p.0[c] as f64 * wgt).sum();
        *v = value.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(px)
}

/// Brightness, contrast and saturation each scaled by a factor in
/// [0.8, 1.2], then the hue rotated by up to a tenth of the circle.
fn color_jitter<R: Rng + ?Sized>(img: &DynamicImage, rng: &mut R) -> DynamicImage {
    let brightness = rng.gen_range(1.0 - JITTER..=1.0 + JITTER);
    let contrast = rng.gen_range(1.0 - JITTER..=1.0 + JITTER);
    let saturation = rng.gen_range(1.0 - JITTER..=1.0 + JITTER);
    let hue = rng.gen_range(-HUE_JITTER..=HUE_JITTER);

    let mut rgb: RgbImage = img.to_rgb8();
    let n = (rgb.width() as f64 * rgb.height() as f64 * 3.0).max(1.0);
    let mean = rgb.pixels()
        .flat_map(|p| p.0)
        .map(|v| v as f64 * brightness)
        .sum::<f64>() / n;

    for p in rgb.pixels_mut() {
        for v in p.0.iter_mut() {
            let bright = *v as f64 * brightness;
            *v = ((bright - mean) * contrast + mean).round().clamp(0.0, 255.0) as u8;
        }
    }
    let saturated = adjust_saturation(rgb, saturation);
    DynamicImage::ImageRgb8(shift_hue(saturated, hue))
}

/// Blends each pixel with its luma: 0 gives grayscale, 1 the original.
fn adjust_saturation(mut rgb: RgbImage, factor: f64) -> RgbImage {
    for p in rgb.pixels_mut() {
        let [r, g, b] = p.0.map(f64::from);
        let gray = 0.299 * r + 0.587 * g + 0.114 * b;
        for v in p.0.iter_mut() {
            *v = (gray + factor * (*v as f64 - gray)).round().clamp(0.0, 255.0) as u8;
        }
    }
    rgb
}

/// Rotates every pixel's hue by `shift` turns, keeping saturation and value.
fn shift_hue(mut rgb: RgbImage, shift: f64) -> RgbImage {
    if shift == 0.0 {
        return rgb;
    }
    for p in rgb.pixels_mut() {
        let [r, g, b] = p.0.map(|v| v as f64 / 255.0);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;
        if delta == 0.0 {
            continue;
        }
        let hue = if max == r {
            ((g - b) / delta).rem_euclid(6.0)
        } else if max == g {
            (b - r) / delta + 2.0
        } else {
            (r - g) / delta + 4.0
        };
        let h = (hue / 6.0 + shift).rem_euclid(1.0) * 6.0;
        let x = delta * (1.0 - (h % 2.0 - 1.0).abs());
        let (r1, g1, b1) = match h as u32 {
            0 => (delta, x, 0.0),
            1 => (x, delta, 0.0),
            2 => (0.0, delta, x),
            3 => (0.0, x, delta),
            4 => (x, 0.0, delta),
            _ => (delta, 0.0, x),
        };
        p.0 = [r1, g1, b1].map(|v| ((v + min) * 255.0).round().clamp(0.0, 255.0) as u8);
    }
    rgb
}
