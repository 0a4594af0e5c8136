//! Image conversion module for converting images to tiles and palettes
//!
//! This module drives the whole pipeline: quantize the image onto the
//! hardware palette, encode each 8x8 cell, merge tiles down to the configured
//! limit and remap the grid. It can also render the result back to an image
//! and report how far it drifted from the source.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::{Rgb, RgbImage};
use log::info;
use serde::{Deserialize, Serialize};

use crate::color::Palette;
use crate::config::Config;
use crate::cost::TileCostModel;
use crate::error::ConversionError;
use crate::optimize::{total_distortion, MergeOptimizer, MergeReport};
use crate::quantize::ColorQuantizer;
use crate::remap::{Grid, GridRemapper};
use crate::tile::{extract_blocks, EncodedTile, TileEncoder, TILE_SIZE};

/// Maximum pixel value for PSNR calculation (8-bit color)
const MAX_PIXEL_VALUE: f64 = 255.0;

/// Everything downstream serializers need from one conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilesetData {
    pub config: Config,
    pub palette: Palette,
    pub tiles: Vec<EncodedTile>,
    pub grid: Grid,
    pub report: MergeReport,
}

/// Per-channel reconstruction error of a rendered tile set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub mse: [f64; 3],
    pub psnr: [f64; 3],
    pub psnr_avg: f64,
}

/// Main struct for the image conversion process
pub struct ImageConverter {
    config: Config,
}

impl ImageConverter {
    /// Create a new image converter, rejecting invalid configurations up front
    pub fn new(config: Config) -> Result<Self, ConversionError> {
        config.validate()?;
        Ok(ImageConverter { config })
    }

    /// Read an image from disk and convert it
    pub fn convert_file(&self, path: impl AsRef<Path>) -> Result<TilesetData, ConversionError> {
        let img = image::open(path)?.to_rgb8();
        self.convert(&img)
    }

    /// Run the entire conversion process on a decoded image
    pub fn convert(&self, img: &RgbImage) -> Result<TilesetData, ConversionError> {
        self.check_dimensions(img)?;
        let grid_width = (img.width() / self.config.tile_width) as usize;
        let grid_height = (img.height() / self.config.tile_height) as usize;

        let quantized = ColorQuantizer::new(
            self.config.num_colors,
            self.config.dithering,
            self.config.dither_factor,
        )
        .quantize(img)?;
        let palette_rgb = quantized.palette.to_rgb();

        let encoder = TileEncoder::new(&palette_rgb);
        let cells = extract_blocks(&quantized)?
            .iter()
            .map(|block| encoder.encode_block(block))
            .collect::<Result<Vec<EncodedTile>, ConversionError>>()?;

        let cost = TileCostModel::new(self.config.cost_model, &palette_rgb);
        let optimizer = MergeOptimizer::new(
            cost,
            self.config.max_unique_tiles,
            self.config.strategy,
            self.config.worker_count(),
        );
        let outcome = optimizer.optimize(&cells)?;

        let (tiles, grid) =
            GridRemapper::remap(&outcome.groups, &outcome.cell_groups, grid_width, grid_height)?;

        let report = MergeReport {
            distinct_tiles: outcome.distinct_tiles(),
            merges: outcome.merges,
            final_tiles: tiles.len(),
            total_distortion: total_distortion(&cost, &cells, &tiles, &grid)?,
        };
        info!(
            "Converted {}x{} cells: {} distinct tiles, {} merges, {} final tiles, distortion {}",
            grid_width,
            grid_height,
            report.distinct_tiles,
            report.merges,
            report.final_tiles,
            report.total_distortion
        );

        Ok(TilesetData {
            config: self.config.clone(),
            palette: quantized.palette,
            tiles,
            grid,
            report,
        })
    }

    /// Image must have non-zero width and height that are multiples of the tile size
    fn check_dimensions(&self, img: &RgbImage) -> Result<(), ConversionError> {
        if img.width() == 0
            || img.height() == 0
            || img.width() % self.config.tile_width != 0
            || img.height() % self.config.tile_height != 0
        {
            return Err(ConversionError::InvalidDimensions(
                img.width(),
                img.height(),
                self.config.tile_width,
                self.config.tile_height,
            ));
        }
        Ok(())
    }
}

impl TilesetData {
    /// Render the tile set back to a full image
    pub fn render(&self) -> Result<RgbImage, ConversionError> {
        let palette = self.palette.to_rgb();
        let width = (self.grid.width() * TILE_SIZE) as u32;
        let height = (self.grid.height() * TILE_SIZE) as u32;
        let mut out_img = RgbImage::new(width, height);

        for y in 0..self.grid.height() {
            for x in 0..self.grid.width() {
                let index = self.grid.get(x, y);
                let tile = self.tiles.get(index).ok_or_else(|| {
                    ConversionError::Internal(format!("grid references missing tile {index}"))
                })?;
                let pixels = tile.pixel_colors(&palette)?;
                for (i, &color) in pixels.iter().enumerate() {
                    out_img.put_pixel(
                        (x * TILE_SIZE + i % TILE_SIZE) as u32,
                        (y * TILE_SIZE + i / TILE_SIZE) as u32,
                        color,
                    );
                }
            }
        }

        Ok(out_img)
    }

    /// Write the tile set as pretty-printed JSON
    pub fn write_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConversionError> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

impl QualityMetrics {
    /// Compare a rendered image with the original it was converted from
    pub fn compare(original: &RgbImage, output: &RgbImage) -> Result<Self, ConversionError> {
        if original.dimensions() != output.dimensions() {
            return Err(ConversionError::InvalidDimensions(
                output.width(),
                output.height(),
                original.width(),
                original.height(),
            ));
        }

        let mut squared = [0.0f64; 3];
        for (a, b) in original.pixels().zip(output.pixels()) {
            for c in 0..3 {
                squared[c] += (a[c] as f64 - b[c] as f64).powi(2);
            }
        }

        let pixel_count = (original.width() as f64 * original.height() as f64).max(1.0);
        let mse = squared.map(|s| s / pixel_count);
        let mse_avg = mse.iter().sum::<f64>() / 3.0;

        Ok(QualityMetrics {
            mse,
            psnr: mse.map(psnr),
            psnr_avg: psnr(mse_avg),
        })
    }

    pub fn log(&self) {
        info!("PSNR Quality Metrics (higher is better, 30.0-50.0 is good):");
        info!("  Red channel:   {:6.3} dB", self.psnr[0]);
        info!("  Green channel: {:6.3} dB", self.psnr[1]);
        info!("  Blue channel:  {:6.3} dB", self.psnr[2]);
        info!("  Average PSNR:  {:6.3} dB", self.psnr_avg);
    }
}

/// PSNR = 20 * log10(MAX_PIXEL_VALUE) - 10 * log10(MSE)
fn psnr(mse: f64) -> f64 {
    if mse > 0.0 {
        20.0 * MAX_PIXEL_VALUE.log10() - 10.0 * mse.log10()
    } else {
        f64::INFINITY
    }
}

/// Render a single tile at 1:1 scale, mostly useful for inspection
pub fn render_tile(tile: &EncodedTile, palette: &[Rgb<u8>]) -> Result<RgbImage, ConversionError> {
    let pixels = tile.pixel_colors(palette)?;
    Ok(RgbImage::from_fn(TILE_SIZE as u32, TILE_SIZE as u32, |x, y| {
        pixels[y as usize * TILE_SIZE + x as usize]
    }))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use image::ImageBuffer;

    use super::*;

    #[test]
    fn identical_images_have_infinite_psnr() {
        let img = ImageBuffer::from_pixel(8, 8, Rgb([10, 20, 30]));
        let metrics = QualityMetrics::compare(&img, &img).unwrap();
        assert_eq!(metrics.mse, [0.0; 3]);
        assert!(metrics.psnr_avg.is_infinite());
    }

    #[test]
    fn psnr_matches_known_value() {
        let a = ImageBuffer::from_pixel(4, 4, Rgb([0, 0, 0]));
        let b = ImageBuffer::from_pixel(4, 4, Rgb([255, 0, 0]));
        let metrics = QualityMetrics::compare(&a, &b).unwrap();
        assert_relative_eq!(metrics.mse[0], 255.0 * 255.0);
        assert_relative_eq!(metrics.psnr[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.psnr_avg, 10.0 * 3.0f64.log10(), epsilon = 1e-9);
    }

    #[test]
    fn rejects_misaligned_images() {
        let converter = ImageConverter::new(Config::default()).unwrap();
        let img = ImageBuffer::from_pixel(12, 8, Rgb([0, 0, 0]));
        assert!(matches!(
            converter.convert(&img),
            Err(ConversionError::InvalidDimensions(12, 8, 8, 8))
        ));
    }

    #[test]
    fn render_tile_follows_pattern_bits() {
        let palette = [Rgb([0, 0, 0]), Rgb([255, 255, 255])];
        let tile = EncodedTile {
            patterns: [0b1000_0001; TILE_SIZE],
            colors: [0x10; TILE_SIZE],
        };
        let img = render_tile(&tile, &palette).unwrap();
        assert_eq!(*img.get_pixel(0, 3), Rgb([255, 255, 255]));
        assert_eq!(*img.get_pixel(3, 3), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(7, 0), Rgb([255, 255, 255]));
    }
}
