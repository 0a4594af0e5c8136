use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::color::rgb_distance_sq;
use crate::error::ConversionError;
use crate::tile::{EncodedTile, TILE_SIZE};

/// Distortion measure used to rank tile merges
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum CostModel {
    /// Sum of squared RGB distances over all 64 rendered pixels
    #[default]
    Exact,
    /// Differing pattern bits plus differing color bytes; faster, lower quality
    BitProxy,
}

/// Symmetric distortion score between two encoded tiles
#[derive(Debug, Clone, Copy)]
pub struct TileCostModel<'a> {
    model: CostModel,
    palette: &'a [Rgb<u8>],
}

impl<'a> TileCostModel<'a> {
    pub fn new(model: CostModel, palette: &'a [Rgb<u8>]) -> Self {
        TileCostModel { model, palette }
    }

    pub fn model(&self) -> CostModel {
        self.model
    }

    pub fn distortion(&self, a: &EncodedTile, b: &EncodedTile) -> Result<u64, ConversionError> {
        match self.model {
            CostModel::Exact => self.pixel_distortion(a, b),
            CostModel::BitProxy => Ok(bit_distance(a, b)),
        }
    }

    fn pixel_distortion(&self, a: &EncodedTile, b: &EncodedTile) -> Result<u64, ConversionError> {
        let pixels_a = a.pixel_colors(self.palette)?;
        let pixels_b = b.pixel_colors(self.palette)?;
        Ok(pixels_a
            .iter()
            .zip(pixels_b.iter())
            .map(|(&pa, &pb)| rgb_distance_sq(pa, pb) as u64)
            .sum())
    }
}

fn bit_distance(a: &EncodedTile, b: &EncodedTile) -> u64 {
    (0..TILE_SIZE)
        .map(|row| {
            let bits = (a.patterns[row] ^ b.patterns[row]).count_ones() as u64;
            let color = (a.colors[row] != b.colors[row]) as u64;
            bits + color
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palette() -> Vec<Rgb<u8>> {
        vec![Rgb([0, 0, 0]), Rgb([255, 255, 255]), Rgb([255, 0, 0])]
    }

    fn tile(pattern: u8, color: u8) -> EncodedTile {
        EncodedTile {
            patterns: [pattern; TILE_SIZE],
            colors: [color; TILE_SIZE],
        }
    }

    #[test]
    fn exact_cost_sums_pixel_distances() {
        let palette = palette();
        let cost = TileCostModel::new(CostModel::Exact, &palette);
        // One column per row differs: black vs white
        let a = tile(0b1000_0000, 0x10);
        let b = tile(0b0000_0000, 0x10);
        assert_eq!(cost.distortion(&a, &b).unwrap(), 8 * 3 * 255 * 255);
        assert_eq!(cost.distortion(&b, &a).unwrap(), 8 * 3 * 255 * 255);
    }

    #[test]
    fn identical_renders_cost_nothing() {
        let palette = palette();
        let cost = TileCostModel::new(CostModel::Exact, &palette);
        // Solid black written two ways
        let a = tile(0x00, 0x00);
        let b = tile(0x00, 0x20);
        assert_eq!(cost.distortion(&a, &b).unwrap(), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn bit_proxy_counts_bits_and_color_bytes() {
        let palette = palette();
        let cost = TileCostModel::new(CostModel::BitProxy, &palette);
        let a = tile(0b1111_0000, 0x10);
        let b = tile(0b0011_0000, 0x20);
        assert_eq!(cost.distortion(&a, &b).unwrap(), 8 * (2 + 1));
        assert_eq!(cost.distortion(&a, &a).unwrap(), 0);
    }

    #[test]
    fn exact_cost_rejects_unknown_indices() {
        let palette = palette();
        let cost = TileCostModel::new(CostModel::Exact, &palette);
        assert!(cost.distortion(&tile(0, 0x00), &tile(0, 0x07)).is_err());
    }
}
