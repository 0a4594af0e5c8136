//! 8x8 tiles in the 2-colors-per-row hardware format.
//!
//! Each row of a tile is one pattern byte (bit 7 is the leftmost column,
//! a set bit selects the foreground) and one color byte (foreground index in
//! the high nibble, background index in the low nibble).

use image::Rgb;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::color::rgb_distance_sq;
use crate::error::ConversionError;
use crate::quantize::QuantizedImage;

/// Tile edge length in pixels
pub const TILE_SIZE: usize = 8;
/// Number of pixels in a tile
pub const TILE_PIXELS: usize = TILE_SIZE * TILE_SIZE;

/// An 8x8 block of palette indices, row-major
pub type IndexBlock = [[u8; TILE_SIZE]; TILE_SIZE];

/// One tile in hardware form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodedTile {
    pub patterns: [u8; TILE_SIZE],
    pub colors: [u8; TILE_SIZE],
}

#[derive(Serialize, Deserialize)]
struct HexTile {
    patterns: String,
    colors: String,
}

impl Serialize for EncodedTile {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        HexTile {
            patterns: hex::encode(self.patterns),
            colors: hex::encode(self.colors),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EncodedTile {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = HexTile::deserialize(deserializer)?;
        let mut tile = EncodedTile::default();
        hex::decode_to_slice(&raw.patterns, &mut tile.patterns).map_err(serde::de::Error::custom)?;
        hex::decode_to_slice(&raw.colors, &mut tile.colors).map_err(serde::de::Error::custom)?;
        Ok(tile)
    }
}

impl Default for EncodedTile {
    fn default() -> Self {
        EncodedTile {
            patterns: [0; TILE_SIZE],
            colors: [0; TILE_SIZE],
        }
    }
}

impl EncodedTile {
    pub fn foreground(&self, row: usize) -> u8 {
        self.colors[row] >> 4
    }

    pub fn background(&self, row: usize) -> u8 {
        self.colors[row] & 0x0f
    }

    pub fn is_foreground(&self, row: usize, col: usize) -> bool {
        self.patterns[row] & (0x80 >> col) != 0
    }

    /// Palette index shown at (`row`, `col`)
    pub fn pixel_index(&self, row: usize, col: usize) -> u8 {
        if self.is_foreground(row, col) {
            self.foreground(row)
        } else {
            self.background(row)
        }
    }

    /// Decode back to a block of palette indices
    pub fn decode(&self) -> IndexBlock {
        std::array::from_fn(|row| std::array::from_fn(|col| self.pixel_index(row, col)))
    }

    /// Resolve all 64 pixels to 24-bit colors, row-major
    pub fn pixel_colors(&self, palette: &[Rgb<u8>]) -> Result<[Rgb<u8>; TILE_PIXELS], ConversionError> {
        let mut pixels = [Rgb([0, 0, 0]); TILE_PIXELS];
        for row in 0..TILE_SIZE {
            let background = lookup(palette, self.background(row))?;
            let foreground = lookup(palette, self.foreground(row))?;
            for col in 0..TILE_SIZE {
                pixels[row * TILE_SIZE + col] = if self.is_foreground(row, col) {
                    foreground
                } else {
                    background
                };
            }
        }
        Ok(pixels)
    }
}

fn lookup(palette: &[Rgb<u8>], index: u8) -> Result<Rgb<u8>, ConversionError> {
    palette
        .get(index as usize)
        .copied()
        .ok_or(ConversionError::PaletteIndexOutOfRange {
            index,
            palette_len: palette.len(),
        })
}

/// Collapses blocks of palette indices into hardware tiles
pub struct TileEncoder<'a> {
    palette: &'a [Rgb<u8>],
}

impl<'a> TileEncoder<'a> {
    pub fn new(palette: &'a [Rgb<u8>]) -> Self {
        TileEncoder { palette }
    }

    /// Encode one row into its (pattern byte, color byte) pair.
    ///
    /// The background is always the lower of the two chosen indices. With
    /// more than two indices in the row, the two most frequent win (ties go
    /// to the lower index) and every other pixel takes whichever of them is
    /// closer, preferring the background on equal distance.
    pub fn encode_row(&self, row: &[u8; TILE_SIZE]) -> Result<(u8, u8), ConversionError> {
        let mut counts = [0usize; 16];
        for &index in row {
            if index as usize >= self.palette.len() || index > 0x0f {
                return Err(ConversionError::PaletteIndexOutOfRange {
                    index,
                    palette_len: self.palette.len(),
                });
            }
            counts[index as usize] += 1;
        }

        let (background, foreground) = counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .sorted_by_key(|&(index, &count)| (std::cmp::Reverse(count), index))
            .map(|(index, _)| index as u8)
            .take(2)
            .minmax()
            .into_option()
            .ok_or_else(|| ConversionError::Internal("empty tile row".to_string()))?;

        if background == foreground {
            return Ok((0, background << 4 | background));
        }

        let bg_rgb = self.palette[background as usize];
        let fg_rgb = self.palette[foreground as usize];
        let mut pattern = 0u8;
        for (col, &index) in row.iter().enumerate() {
            let is_foreground = if index == foreground {
                true
            } else if index == background {
                false
            } else {
                let rgb = self.palette[index as usize];
                rgb_distance_sq(rgb, bg_rgb) > rgb_distance_sq(rgb, fg_rgb)
            };
            if is_foreground {
                pattern |= 0x80 >> col;
            }
        }

        Ok((pattern, foreground << 4 | background))
    }

    pub fn encode_block(&self, block: &IndexBlock) -> Result<EncodedTile, ConversionError> {
        let mut tile = EncodedTile::default();
        for (row, indices) in block.iter().enumerate() {
            let (pattern, color) = self.encode_row(indices)?;
            tile.patterns[row] = pattern;
            tile.colors[row] = color;
        }
        Ok(tile)
    }
}

/// Split a quantized image into 8x8 index blocks, row-major by cell
pub fn extract_blocks(image: &QuantizedImage) -> Result<Vec<IndexBlock>, ConversionError> {
    let tile = TILE_SIZE as u32;
    if image.width == 0 || image.height == 0 || image.width % tile != 0 || image.height % tile != 0
    {
        return Err(ConversionError::InvalidDimensions(
            image.width,
            image.height,
            tile,
            tile,
        ));
    }

    let cells_x = image.width / tile;
    let cells_y = image.height / tile;
    let mut blocks = Vec::with_capacity((cells_x * cells_y) as usize);

    for cell_y in 0..cells_y {
        for cell_x in 0..cells_x {
            let block: IndexBlock = std::array::from_fn(|row| {
                std::array::from_fn(|col| {
                    image.index_at(cell_x * tile + col as u32, cell_y * tile + row as u32)
                })
            });
            blocks.push(block);
        }
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palette() -> Vec<Rgb<u8>> {
        vec![
            Rgb([0, 0, 0]),
            Rgb([255, 255, 255]),
            Rgb([255, 0, 0]),
            Rgb([36, 36, 36]),
            Rgb([218, 218, 218]),
        ]
    }

    #[test]
    fn single_color_row() {
        let palette = palette();
        let encoder = TileEncoder::new(&palette);
        assert_eq!(encoder.encode_row(&[2; 8]).unwrap(), (0x00, 0x22));
    }

    #[test]
    fn two_color_row_uses_ascending_order() {
        let palette = palette();
        let encoder = TileEncoder::new(&palette);
        let (pattern, color) = encoder.encode_row(&[2, 2, 0, 0, 2, 0, 0, 0]).unwrap();
        assert_eq!(color, 0x20);
        assert_eq!(pattern, 0b1100_1000);
    }

    #[test]
    fn extra_colors_go_to_the_nearer_of_the_two() {
        let palette = palette();
        let encoder = TileEncoder::new(&palette);
        // 0 and 1 dominate; 3 is dark grey, 4 is light grey
        let (pattern, color) = encoder.encode_row(&[0, 0, 0, 1, 1, 1, 3, 4]).unwrap();
        assert_eq!(color, 0x10);
        assert_eq!(pattern, 0b0001_1101);
    }

    #[test]
    fn frequency_ties_prefer_lower_indices() {
        let palette = palette();
        let encoder = TileEncoder::new(&palette);
        let (_, color) = encoder.encode_row(&[4, 4, 3, 3, 1, 1, 2, 2]).unwrap();
        assert_eq!(color, 0x21);
    }

    #[test]
    fn two_color_blocks_round_trip() {
        let palette = palette();
        let encoder = TileEncoder::new(&palette);
        let block: IndexBlock = std::array::from_fn(|row| {
            std::array::from_fn(|col| if (row + col) % 3 == 0 { 4 } else { row as u8 % 2 })
        });
        let tile = encoder.encode_block(&block).unwrap();
        assert_eq!(tile.decode(), block);
    }

    #[test]
    fn reassignment_is_nearest_of_two() {
        let palette = palette();
        let encoder = TileEncoder::new(&palette);
        let block: IndexBlock = [
            [0, 1, 2, 3, 4, 0, 1, 2],
            [4, 4, 2, 2, 3, 0, 1, 1],
            [2, 2, 2, 1, 1, 0, 3, 4],
            [3, 3, 3, 4, 4, 4, 0, 0],
            [0, 0, 0, 0, 0, 0, 0, 0],
            [1, 2, 3, 4, 1, 2, 3, 4],
            [0, 4, 0, 4, 2, 2, 2, 2],
            [3, 1, 3, 1, 3, 1, 3, 1],
        ];
        let tile = encoder.encode_block(&block).unwrap();
        for (row, indices) in block.iter().enumerate() {
            let bg = palette[tile.background(row) as usize];
            let fg = palette[tile.foreground(row) as usize];
            for (col, &index) in indices.iter().enumerate() {
                let source = palette[index as usize];
                let assigned = palette[tile.pixel_index(row, col) as usize];
                let other = if assigned == fg { bg } else { fg };
                assert!(rgb_distance_sq(source, assigned) <= rgb_distance_sq(source, other));
            }
        }
    }

    #[test]
    fn rejects_indices_outside_palette() {
        let palette = palette();
        let encoder = TileEncoder::new(&palette);
        assert!(matches!(
            encoder.encode_row(&[0, 0, 0, 0, 9, 0, 0, 0]),
            Err(ConversionError::PaletteIndexOutOfRange { index: 9, .. })
        ));
    }

    #[test]
    fn serializes_as_hex() {
        let tile = EncodedTile {
            patterns: [0xff, 0, 0, 0, 0, 0, 0, 0x81],
            colors: [0x10; 8],
        };
        let json = serde_json::to_string(&tile).unwrap();
        assert_eq!(
            json,
            r#"{"patterns":"ff00000000000081","colors":"1010101010101010"}"#
        );
        let back: EncodedTile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tile);
    }
}
