use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::color::MAX_PALETTE_COLORS;
use crate::cost::CostModel;
use crate::error::ConversionError;
use crate::optimize::MergeStrategy;
use crate::tile::TILE_SIZE;

/// Highest tile count a tile set can address with a one-byte name table entry
pub const MAX_TILE_PATTERNS: usize = 256;

/// Configuration for the image conversion process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tile width in pixels
    pub tile_width: u32,
    /// Tile height in pixels
    pub tile_height: u32,
    /// Number of palette colors to quantize to
    pub num_colors: usize,
    /// Maximum number of unique tile patterns
    pub max_unique_tiles: usize,
    /// Whether to apply dithering
    pub dithering: bool,
    /// Error scaling factor for dithering
    pub dither_factor: f32,
    /// How the tile merge loop searches for the cheapest pair
    pub strategy: MergeStrategy,
    /// Distortion measure driving merge selection
    pub cost_model: CostModel,
    /// Worker threads for the parallel strategy; `None` uses every available core
    pub workers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tile_width: TILE_SIZE as u32,
            tile_height: TILE_SIZE as u32,
            num_colors: MAX_PALETTE_COLORS,
            max_unique_tiles: MAX_TILE_PATTERNS,
            dithering: true,
            dither_factor: 0.75,
            strategy: MergeStrategy::default(),
            cost_model: CostModel::default(),
            workers: None,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file; absent fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConversionError> {
        let reader = BufReader::new(File::open(path)?);
        let config: Config = serde_json::from_reader(reader)?;
        Ok(config)
    }

    /// Reject any value the converter cannot honour
    pub fn validate(&self) -> Result<(), ConversionError> {
        if self.tile_width as usize != TILE_SIZE || self.tile_height as usize != TILE_SIZE {
            return Err(invalid(
                "tile_width/tile_height",
                format!(
                    "tiles must be {TILE_SIZE}x{TILE_SIZE}, got {}x{}",
                    self.tile_width, self.tile_height
                ),
            ));
        }
        if !(1..=MAX_PALETTE_COLORS).contains(&self.num_colors) {
            return Err(invalid(
                "num_colors",
                format!("must be 1 to {MAX_PALETTE_COLORS}, got {}", self.num_colors),
            ));
        }
        if !(1..=MAX_TILE_PATTERNS).contains(&self.max_unique_tiles) {
            return Err(invalid(
                "max_unique_tiles",
                format!(
                    "must be 1 to {MAX_TILE_PATTERNS}, got {}",
                    self.max_unique_tiles
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.dither_factor) {
            return Err(invalid(
                "dither_factor",
                format!("must be within 0.0 and 1.0, got {}", self.dither_factor),
            ));
        }
        if self.workers == Some(0) {
            return Err(invalid("workers", "must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Worker pool size, defaulting to the number of available cores
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

fn invalid(field: &'static str, reason: String) -> ConversionError {
    ConversionError::InvalidConfig { field, reason }
}
