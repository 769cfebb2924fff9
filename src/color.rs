use std::fmt;
use std::str::FromStr;

use palette::{Hsl, IntoColor, Lab, Srgb, Xyz};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("invalid hex color {0:?}, expected #RRGGBB")]
    InvalidHex(String),
}

/// An 8-bit sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` (the leading `#` is optional, case is ignored).
    pub fn from_hex(s: &str) -> Result<Self, ColorError> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ColorError::InvalidHex(s.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| ColorError::InvalidHex(s.to_string()))
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    /// Uppercase `#RRGGBB`.
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    pub fn to_lab(self) -> Lab {
        xyz_to_lab(rgb_to_xyz(self.r, self.g, self.b))
    }

    pub(crate) fn as_f64(self) -> [f64; 3] {
        [self.r as f64, self.g as f64, self.b as f64]
    }

    /// Round a floating point RGB triple back into 8-bit channels.
    pub(crate) fn from_f64(c: [f64; 3]) -> Self {
        let q = |v: f64| v.round().clamp(0.0, 255.0) as u8;
        Self::new(q(c[0]), q(c[1]), q(c[2]))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Rgb {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// A sampled color together with how many pixels carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorCount {
    pub rgb: Rgb,
    pub count: u32,
}

impl ColorCount {
    pub fn new(rgb: Rgb, count: u32) -> Self {
        Self { rgb, count }
    }
}

// ------------------------------------------------------------
// sRGB -> XYZ -> L*a*b*
// ------------------------------------------------------------

/// Gamma-decode an sRGB triple and project it into CIE XYZ (D65).
///
/// `Y` is normalised so that reference white has `Y == 1.0`.
pub fn rgb_to_xyz(r: u8, g: u8, b: u8) -> Xyz {
    Srgb::<u8>::new(r, g, b).into_linear::<f32>().into_color()
}

/// CIE L*a*b* relative to the D65 white point. `L` spans 0..=100.
pub fn xyz_to_lab(xyz: Xyz) -> Lab {
    xyz.into_color()
}

/// CIE76 color difference: plain Euclidean distance in L*a*b*.
pub fn delta_e(a: &Lab, b: &Lab) -> f64 {
    let dl = (a.l - b.l) as f64;
    let da = (a.a - b.a) as f64;
    let db = (a.b - b.b) as f64;
    (dl * dl + da * da + db * db).sqrt()
}

/// Euclidean distance between two colors in raw 0-255 RGB space.
pub fn rgb_distance(a: Rgb, b: Rgb) -> f64 {
    rgb_distance_sq(a.as_f64(), b.as_f64()).sqrt()
}

#[inline(always)]
pub(crate) fn rgb_distance_sq(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

/// HSL hue angle in degrees, in `[0, 360)`. Greys report 0.
pub fn hue_degrees(rgb: Rgb) -> f64 {
    let hsl: Hsl = Srgb::new(rgb.r, rgb.g, rgb.b).into_format::<f32>().into_color();
    hsl.hue.into_positive_degrees() as f64
}
