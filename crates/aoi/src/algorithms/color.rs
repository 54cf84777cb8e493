//! 8-bit colour space conversions on the OpenCV scale: HSV hue in `0..=179`,
//! LAB with `L * 255 / 100` and `a`, `b` offset by 128.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    #[default]
    Rgb,
    Hsv,
    Lab,
}

impl ColorSpace {
    pub fn convert(self, rgb: [u8; 3]) -> [u8; 3] {
        match self {
            ColorSpace::Rgb => rgb,
            ColorSpace::Hsv => rgb_to_hsv(rgb),
            ColorSpace::Lab => rgb_to_lab(rgb),
        }
    }
}

pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v > 0.0 { delta / v * 255.0 } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / delta
    } else if v == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    [
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round().min(255.0) as u8,
        v as u8,
    ]
}

fn srgb_to_linear(c: u8) -> f64 {
    let c = c as f64 / 255.0;
    if c <= 0.04045 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) }
}

fn lab_f(t: f64) -> f64 {
    if t > 0.008856 { t.cbrt() } else { 7.787 * t + 16.0 / 116.0 }
}

pub fn rgb_to_lab([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));

    // D65 white point
    let x = (0.412453 * r + 0.357580 * g + 0.180423 * b) / 0.950456;
    let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
    let z = (0.019334 * r + 0.119193 * g + 0.950227 * b) / 1.088754;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > 0.008856 { 116.0 * fy - 16.0 } else { 903.3 * y };
    let a = 500.0 * (fx - fy);
    let bb = 200.0 * (fy - fz);

    [
        (l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8,
        (a + 128.0).round().clamp(0.0, 255.0) as u8,
        (bb + 128.0).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Circular distance between two hues on the 0..=179 scale
pub fn hue_distance(a: u8, b: u8) -> u8 {
    let d = (a.min(179) as i16 - b.min(179) as i16).unsigned_abs() as u8;
    d.min(180 - d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
    }

    #[test]
    fn test_lab_neutrals() {
        assert_eq!(rgb_to_lab([255, 255, 255]), [255, 128, 128]);
        assert_eq!(rgb_to_lab([0, 0, 0]), [0, 128, 128]);
        let red = rgb_to_lab([255, 0, 0]);
        assert!(red[1] > 200, "red should sit far along +a: {red:?}");
    }

    #[test]
    fn test_hue_distance_wraps() {
        assert_eq!(hue_distance(175, 5), 10);
        assert_eq!(hue_distance(5, 175), 10);
        assert_eq!(hue_distance(30, 90), 60);
    }
}
