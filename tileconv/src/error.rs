use std::io;

use thiserror::Error;

/// Errors that can occur during image conversion
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Image dimensions {0}x{1} are not non-zero multiples of tile size {2}x{3}")]
    InvalidDimensions(u32, u32, u32, u32),

    #[error("Invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Failed to read image: {0}")]
    ImageReadError(#[from] image::ImageError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Color quantization failed (primary: {primary}; fallback: {fallback})")]
    QuantizationFailed { primary: String, fallback: String },

    #[error("Palette reduction failed: {0}")]
    PaletteReduction(String),

    #[error("Palette index {index} out of range for a palette of {palette_len} colors")]
    PaletteIndexOutOfRange { index: u8, palette_len: usize },

    #[error("Cannot reduce to {target} tiles: no merge candidates left with {active} tiles active")]
    TargetUnreachable { active: usize, target: usize },

    #[error("Internal consistency error: {0}")]
    Internal(String),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
