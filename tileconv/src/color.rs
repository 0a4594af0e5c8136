//! Color types and utilities for image processing.
//!
//! This module contains color-related functionality including:
//! - `Color`, a 3-bit-per-channel entry of the hardware color cube
//! - `Palette`, the ordered list of hardware colors used by a tile set
//! - `Oklab` wrapper for the oklab crate's color type
//! - Squared RGB distance used everywhere colors are compared

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::error::ConversionError;

/// Highest value of a hardware color channel
pub const CHANNEL_MAX: u8 = 7;
/// Number of entries in the hardware color cube (8 * 8 * 8)
pub const CUBE_SIZE: usize = 512;
/// Maximum number of entries in a palette (4-bit color indices)
pub const MAX_PALETTE_COLORS: usize = 16;

/// Squared Euclidean distance between two 24-bit colors
#[inline]
pub fn rgb_distance_sq(a: Rgb<u8>, b: Rgb<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(&x, &y)| {
            let d = x as i32 - y as i32;
            (d * d) as u32
        })
        .sum()
}

/// Expand a 3-bit channel value to the full 8-bit range
#[inline]
pub fn expand_channel(value: u8) -> u8 {
    (value as u32 * 255 / CHANNEL_MAX as u32) as u8
}

/// One entry of the hardware color cube.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u8; 3]", into = "[u8; 3]")]
pub struct Color {
    r: u8,
    g: u8,
    b: u8,
}

impl Color {
    /// Create a color, rejecting channels outside 0..=7
    pub fn new(r: u8, g: u8, b: u8) -> Option<Self> {
        if r > CHANNEL_MAX || g > CHANNEL_MAX || b > CHANNEL_MAX {
            return None;
        }
        Some(Color { r, g, b })
    }

    /// Color at `index` of the cube in raster order (red outermost, blue innermost)
    pub fn from_cube_index(index: usize) -> Option<Self> {
        if index >= CUBE_SIZE {
            return None;
        }
        Some(Color {
            r: (index >> 6) as u8,
            g: ((index >> 3) & 7) as u8,
            b: (index & 7) as u8,
        })
    }

    /// Iterate the whole hardware cube in raster order
    pub fn cube() -> impl Iterator<Item = Color> {
        (0..CUBE_SIZE).filter_map(Color::from_cube_index)
    }

    pub fn r(&self) -> u8 {
        self.r
    }

    pub fn g(&self) -> u8 {
        self.g
    }

    pub fn b(&self) -> u8 {
        self.b
    }

    /// The 24-bit color this entry displays as
    pub fn to_rgb(self) -> Rgb<u8> {
        Rgb([
            expand_channel(self.r),
            expand_channel(self.g),
            expand_channel(self.b),
        ])
    }

    /// Nearest cube color by squared RGB distance; ties keep the first in raster order
    pub fn nearest(rgb: Rgb<u8>) -> Color {
        let mut best = Color { r: 0, g: 0, b: 0 };
        let mut best_distance = u32::MAX;

        for candidate in Color::cube() {
            let distance = rgb_distance_sq(rgb, candidate.to_rgb());
            if distance < best_distance {
                best_distance = distance;
                best = candidate;
            }
        }

        best
    }
}

impl TryFrom<[u8; 3]> for Color {
    type Error = String;

    fn try_from([r, g, b]: [u8; 3]) -> Result<Self, Self::Error> {
        Color::new(r, g, b).ok_or_else(|| format!("color channels ({r}, {g}, {b}) exceed 3 bits"))
    }
}

impl From<Color> for [u8; 3] {
    fn from(color: Color) -> Self {
        [color.r, color.g, color.b]
    }
}

/// Ordered list of up to 16 unique hardware colors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    colors: Vec<Color>,
}

impl Palette {
    /// Build a palette, checking size and uniqueness
    pub fn new(colors: Vec<Color>) -> Result<Self, ConversionError> {
        if colors.is_empty() || colors.len() > MAX_PALETTE_COLORS {
            return Err(ConversionError::InvalidConfig {
                field: "palette",
                reason: format!(
                    "expected 1 to {MAX_PALETTE_COLORS} colors, got {}",
                    colors.len()
                ),
            });
        }
        for (i, color) in colors.iter().enumerate() {
            if colors[..i].contains(color) {
                return Err(ConversionError::InvalidConfig {
                    field: "palette",
                    reason: format!("duplicate color {:?} at index {i}", color),
                });
            }
        }
        Ok(Palette { colors })
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// The palette in 24-bit form, for distance comparisons and rendering
    pub fn to_rgb(&self) -> Vec<Rgb<u8>> {
        self.colors.iter().map(|c| c.to_rgb()).collect()
    }
}

/// Wrapper around oklab::Oklab with additional functionality
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq)]
#[repr(transparent)]
pub struct Oklab(oklab::Oklab);

impl std::ops::Deref for Oklab {
    type Target = oklab::Oklab;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<oklab::Oklab> for Oklab {
    fn from(oklab: oklab::Oklab) -> Self {
        Oklab(oklab)
    }
}

impl Oklab {
    /// Create a new Oklab color from L, a, b components
    pub fn new(l: f32, a: f32, b: f32) -> Self {
        Oklab(oklab::Oklab { l, a, b })
    }

    /// Convert from RGB to Oklab
    pub fn from_rgb(rgb: Rgb<u8>) -> Self {
        let [r, g, b] = rgb.0;
        oklab::srgb_to_oklab([r, g, b].into()).into()
    }

    /// Convert Oklab to RGB
    pub fn to_rgb(self) -> Rgb<u8> {
        let rgb = oklab::oklab_to_srgb(self.0);
        Rgb([rgb.r, rgb.g, rgb.b])
    }

    /// Component along an axis (0 = L, 1 = a, 2 = b)
    pub fn axis(&self, axis: usize) -> f32 {
        match axis {
            0 => self.l,
            1 => self.a,
            _ => self.b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_expand_to_full_range() {
        assert_eq!(expand_channel(0), 0);
        assert_eq!(expand_channel(7), 255);
        assert_eq!(expand_channel(1), 36);
    }

    #[test]
    fn cube_is_raster_ordered() {
        let cube: Vec<Color> = Color::cube().collect();
        assert_eq!(cube.len(), CUBE_SIZE);
        assert_eq!(cube[0], Color::new(0, 0, 0).unwrap());
        assert_eq!(cube[1], Color::new(0, 0, 1).unwrap());
        assert_eq!(cube[8], Color::new(0, 1, 0).unwrap());
        assert_eq!(cube[64], Color::new(1, 0, 0).unwrap());
    }

    #[test]
    fn out_of_range_channels_are_rejected() {
        assert!(Color::new(8, 0, 0).is_none());
        assert!(Color::try_from([0, 0, 9]).is_err());
    }

    #[test]
    fn nearest_snaps_to_cube() {
        let snapped = Color::nearest(Rgb([250, 3, 130]));
        assert_eq!((snapped.r(), snapped.g(), snapped.b()), (7, 0, 4));
        for color in Color::cube() {
            assert_eq!(Color::nearest(color.to_rgb()), color);
        }
    }

    #[test]
    fn palette_rejects_duplicates() {
        let black = Color::new(0, 0, 0).unwrap();
        assert!(Palette::new(vec![black, black]).is_err());
        assert!(Palette::new(Vec::new()).is_err());
        assert_eq!(Palette::new(vec![black]).unwrap().len(), 1);
    }
}
