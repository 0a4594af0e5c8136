//! Convert true-color images into tile sets for video hardware that shows
//! two colors per 8-pixel tile row, from a 512-color palette, with a bounded
//! number of distinct 8x8 patterns.
//!
//! The pipeline is: [`ColorQuantizer`] → [`TileEncoder`] → [`MergeOptimizer`]
//! (scored by [`TileCostModel`]) → [`GridRemapper`]. [`ImageConverter`] runs
//! all of it from a [`Config`].

pub mod color;
pub mod config;
pub mod convert;
pub mod cost;
pub mod error;
pub mod optimize;
pub mod quantize;
pub mod remap;
pub mod tile;

pub use color::{Color, Palette};
pub use config::Config;
pub use convert::{ImageConverter, QualityMetrics, TilesetData};
pub use cost::{CostModel, TileCostModel};
pub use error::ConversionError;
pub use optimize::{MergeOptimizer, MergeOutcome, MergeReport, MergeStrategy, TileGroup};
pub use quantize::{ColorQuantizer, QuantizedImage};
pub use remap::{Grid, GridRemapper};
pub use tile::{EncodedTile, TileEncoder};
