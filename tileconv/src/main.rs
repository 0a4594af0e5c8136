use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use log::info;

use tileconv::{Config, CostModel, ImageConverter, MergeStrategy, QualityMetrics};

#[derive(Parser, Debug)]
#[command(
    name = "tileconv",
    version,
    about = "Convert an image into a 2-colors-per-row 8x8 tile set"
)]
struct Cli {
    /// Input image path
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// JSON configuration file; flags below override its values
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Number of palette colors (1-16)
    #[arg(long)]
    colors: Option<usize>,

    /// Maximum number of unique tiles (1-256)
    #[arg(long)]
    max_tiles: Option<usize>,

    /// Disable error-diffusion dithering
    #[arg(long)]
    no_dither: bool,

    /// Error scaling factor for dithering
    #[arg(long)]
    dither_factor: Option<f32>,

    /// Merge search strategy
    #[arg(long, value_enum)]
    strategy: Option<MergeStrategy>,

    /// Distortion measure used to pick merges
    #[arg(long, value_enum)]
    cost_model: Option<CostModel>,

    /// Worker threads for the parallel strategy (default: all cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Write the palette, tiles and grid as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Write a PNG rendering of the converted tile set
    #[arg(long, value_hint = ValueHint::FilePath)]
    preview: Option<PathBuf>,
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(v) = cli.colors {
        cfg.num_colors = v;
    }
    if let Some(v) = cli.max_tiles {
        cfg.max_unique_tiles = v;
    }
    if cli.no_dither {
        cfg.dithering = false;
    }
    if let Some(v) = cli.dither_factor {
        cfg.dither_factor = v;
    }
    if let Some(v) = cli.strategy {
        cfg.strategy = v;
    }
    if let Some(v) = cli.cost_model {
        cfg.cost_model = v;
    }
    if cli.workers.is_some() {
        cfg.workers = cli.workers;
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let converter = ImageConverter::new(build_config(&cli)?)?;

    info!("Input image: {}", cli.input.display());
    let img = image::open(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?
        .to_rgb8();
    let data = converter.convert(&img)?;

    let rendered = data.render()?;
    QualityMetrics::compare(&img, &rendered)?.log();

    if let Some(path) = &cli.preview {
        rendered
            .save(path)
            .with_context(|| format!("writing preview {}", path.display()))?;
        info!("Wrote preview to {}", path.display());
    }
    if let Some(path) = &cli.json {
        data.write_json_file(path)?;
        info!("Wrote tile set to {}", path.display());
    }

    Ok(())
}
