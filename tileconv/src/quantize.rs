//! Color reduction onto the hardware color cube.
//!
//! A perceptual median cut proposes the ideal colors, which are then snapped
//! to the 3-bit-per-channel cube and deduplicated. The source image is
//! re-quantized against the snapped palette, optionally with Sierra error
//! diffusion. NeuQuant takes over when median cut cannot produce a palette.

use std::collections::BTreeMap;

use color_quant::NeuQuant;
use image::{Rgb, RgbImage};
use log::{debug, info, warn};

use crate::color::{rgb_distance_sq, Color, Oklab, Palette, MAX_PALETTE_COLORS};
use crate::error::ConversionError;

/// Divisor used for dithering error calculation (sum of the Sierra weights)
const DITHER_ERROR_DIVISOR: f32 = 32.0;
/// NeuQuant sampling factor (1 = every pixel, 30 = fastest)
const NEUQUANT_SAMPLE_FACTOR: i32 = 10;

/// Proposes up to `num_colors` ideal 24-bit colors for an image.
pub trait PaletteReducer: Send + Sync {
    fn name(&self) -> &'static str;

    fn reduce(&self, image: &RgbImage, num_colors: usize) -> Result<Vec<Rgb<u8>>, ConversionError>;
}

/// Weighted median cut in Oklab space
#[derive(Debug, Default, Clone, Copy)]
pub struct MedianCut;

/// A box of histogram entries for median cut subdivision.
struct ColorBox {
    entries: Vec<(Oklab, f32)>,
}

impl ColorBox {
    fn total_weight(&self) -> f32 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    fn ranges(&self) -> [f32; 3] {
        let mut ranges = [0.0; 3];
        for (axis, range) in ranges.iter_mut().enumerate() {
            let (min, max) = self
                .entries
                .iter()
                .map(|(lab, _)| lab.axis(axis))
                .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
            *range = max - min;
        }
        ranges
    }

    /// Larger weighted boxes with more color variation split first
    fn priority(&self) -> f32 {
        let [rl, ra, rb] = self.ranges();
        self.total_weight() * rl.max(ra).max(rb)
    }

    fn centroid(&self) -> Oklab {
        let mut sums = [0.0f32; 3];
        let mut weight = 0.0f32;
        for (lab, w) in &self.entries {
            for (axis, sum) in sums.iter_mut().enumerate() {
                *sum += lab.axis(axis) * w;
            }
            weight += w;
        }
        if weight <= 0.0 {
            return Oklab::new(0.0, 0.0, 0.0);
        }
        Oklab::new(sums[0] / weight, sums[1] / weight, sums[2] / weight)
    }

    /// Split along the widest axis at the weighted median
    fn split(mut self) -> (ColorBox, ColorBox) {
        let [rl, ra, rb] = self.ranges();
        let axis = if rl >= ra && rl >= rb {
            0
        } else if ra >= rb {
            1
        } else {
            2
        };

        self.entries.sort_by(|a, b| a.0.axis(axis).total_cmp(&b.0.axis(axis)));

        let half_weight = self.total_weight() / 2.0;
        let mut accumulated = 0.0f32;
        let mut split_idx = 1;
        for (i, (_, w)) in self.entries.iter().enumerate() {
            accumulated += w;
            if accumulated >= half_weight && i + 1 < self.entries.len() {
                split_idx = i + 1;
                break;
            }
        }
        split_idx = split_idx.clamp(1, self.entries.len() - 1);

        let right = self.entries.split_off(split_idx);
        (self, ColorBox { entries: right })
    }
}

impl PaletteReducer for MedianCut {
    fn name(&self) -> &'static str {
        "median cut"
    }

    fn reduce(&self, image: &RgbImage, num_colors: usize) -> Result<Vec<Rgb<u8>>, ConversionError> {
        // Sorted keys keep the cut deterministic
        let mut histogram: BTreeMap<[u8; 3], usize> = BTreeMap::new();
        for pixel in image.pixels() {
            *histogram.entry(pixel.0).or_default() += 1;
        }

        if histogram.is_empty() {
            return Err(ConversionError::PaletteReduction(
                "image has no pixels".to_string(),
            ));
        }
        if num_colors == 0 {
            return Err(ConversionError::PaletteReduction(
                "zero colors requested".to_string(),
            ));
        }

        if histogram.len() <= num_colors {
            return Ok(histogram.into_keys().map(Rgb).collect());
        }

        let entries = histogram
            .into_iter()
            .map(|(rgb, count)| (Oklab::from_rgb(Rgb(rgb)), count as f32))
            .collect();
        let mut boxes = vec![ColorBox { entries }];

        while boxes.len() < num_colors {
            let best_idx = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.entries.len() >= 2)
                .max_by(|(_, a), (_, b)| a.priority().total_cmp(&b.priority()))
                .map(|(i, _)| i);

            let Some(idx) = best_idx else {
                break;
            };

            let (left, right) = boxes.swap_remove(idx).split();
            boxes.push(left);
            boxes.push(right);
        }

        Ok(boxes.iter().map(|b| b.centroid().to_rgb()).collect())
    }
}

/// Adaptive palette via the NeuQuant neural network quantizer
#[derive(Debug, Clone, Copy)]
pub struct NeuQuantReducer {
    sample_factor: i32,
}

impl Default for NeuQuantReducer {
    fn default() -> Self {
        NeuQuantReducer {
            sample_factor: NEUQUANT_SAMPLE_FACTOR,
        }
    }
}

impl PaletteReducer for NeuQuantReducer {
    fn name(&self) -> &'static str {
        "neuquant"
    }

    fn reduce(&self, image: &RgbImage, num_colors: usize) -> Result<Vec<Rgb<u8>>, ConversionError> {
        if image.width() == 0 || image.height() == 0 || num_colors == 0 {
            return Err(ConversionError::PaletteReduction(format!(
                "cannot build {num_colors} colors from a {}x{} image",
                image.width(),
                image.height()
            )));
        }

        let rgba: Vec<u8> = image
            .pixels()
            .flat_map(|p| [p[0], p[1], p[2], u8::MAX])
            .collect();
        let quantizer = NeuQuant::new(self.sample_factor, num_colors, &rgba);

        Ok(quantizer
            .color_map_rgb()
            .chunks_exact(3)
            .map(|c| Rgb([c[0], c[1], c[2]]))
            .collect())
    }
}

/// An image reduced to palette indices
#[derive(Debug, Clone)]
pub struct QuantizedImage {
    pub width: u32,
    pub height: u32,
    /// Row-major palette indices, one per pixel
    pub indices: Vec<u8>,
    pub palette: Palette,
}

impl QuantizedImage {
    pub fn index_at(&self, x: u32, y: u32) -> u8 {
        self.indices[(y * self.width + x) as usize]
    }
}

/// Reduces true-color images to a small palette snapped to the hardware cube
pub struct ColorQuantizer {
    primary: Box<dyn PaletteReducer>,
    fallback: Box<dyn PaletteReducer>,
    num_colors: usize,
    dithering: bool,
    dither_factor: f32,
}

impl ColorQuantizer {
    /// Median cut with a NeuQuant fallback
    pub fn new(num_colors: usize, dithering: bool, dither_factor: f32) -> Self {
        Self::with_reducers(
            Box::new(MedianCut),
            Box::new(NeuQuantReducer::default()),
            num_colors,
            dithering,
            dither_factor,
        )
    }

    pub fn with_reducers(
        primary: Box<dyn PaletteReducer>,
        fallback: Box<dyn PaletteReducer>,
        num_colors: usize,
        dithering: bool,
        dither_factor: f32,
    ) -> Self {
        ColorQuantizer {
            primary,
            fallback,
            num_colors,
            dithering,
            dither_factor,
        }
    }

    /// Reduce `image` to `num_colors` hardware colors and index every pixel
    pub fn quantize(&self, image: &RgbImage) -> Result<QuantizedImage, ConversionError> {
        if !(1..=MAX_PALETTE_COLORS).contains(&self.num_colors) {
            return Err(ConversionError::InvalidConfig {
                field: "num_colors",
                reason: format!(
                    "must be 1 to {MAX_PALETTE_COLORS}, got {}",
                    self.num_colors
                ),
            });
        }

        let ideal = match self.primary.reduce(image, self.num_colors) {
            Ok(colors) if !colors.is_empty() => colors,
            primary_result => {
                let primary = match primary_result {
                    Err(e) => e.to_string(),
                    Ok(_) => "no colors produced".to_string(),
                };
                warn!(
                    "{} failed ({}), falling back to {}",
                    self.primary.name(),
                    primary,
                    self.fallback.name()
                );
                match self.fallback.reduce(image, self.num_colors) {
                    Ok(colors) if !colors.is_empty() => colors,
                    Ok(_) => {
                        return Err(ConversionError::QuantizationFailed {
                            primary,
                            fallback: "no colors produced".to_string(),
                        })
                    }
                    Err(e) => {
                        return Err(ConversionError::QuantizationFailed {
                            primary,
                            fallback: e.to_string(),
                        })
                    }
                }
            }
        };

        let palette = snap_palette(&ideal, self.num_colors)?;
        debug!("snapped {} ideal colors to {:?}", ideal.len(), palette);

        let indices = self.remap_pixels(image, &palette.to_rgb());
        info!(
            "Quantized {}x{} image to {} colors",
            image.width(),
            image.height(),
            palette.len()
        );

        Ok(QuantizedImage {
            width: image.width(),
            height: image.height(),
            indices,
            palette,
        })
    }

    /// Map each pixel to its nearest palette entry, diffusing error if enabled
    fn remap_pixels(&self, image: &RgbImage, palette: &[Rgb<u8>]) -> Vec<u8> {
        let width = image.width() as usize;
        let height = image.height() as usize;
        let mut indices = Vec::with_capacity(width * height);

        if !self.dithering {
            indices.extend(image.pixels().map(|p| nearest_index(*p, palette) as u8));
            return indices;
        }

        let mut error = vec![[0.0f32; 3]; width * height];
        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let carried = error[y * width + x];
            let color: [f32; 3] =
                std::array::from_fn(|c| (pixel[c] as f32 + carried[c]).clamp(0.0, 255.0));

            let index = nearest_index_f32(color, palette);
            indices.push(index as u8);

            let chosen = palette[index];
            let diff: [f32; 3] = std::array::from_fn(|c| {
                (color[c] - chosen[c] as f32) * self.dither_factor / DITHER_ERROR_DIVISOR
            });
            apply_sierra_dithering(&mut error, diff, x, y, width, height);
        }

        indices
    }
}

/// Snap ideal colors onto the cube, dropping duplicates and topping up from the cube
pub fn snap_palette(ideal: &[Rgb<u8>], num_colors: usize) -> Result<Palette, ConversionError> {
    let mut colors: Vec<Color> = Vec::with_capacity(num_colors);

    for &rgb in ideal {
        if colors.len() == num_colors {
            break;
        }
        let snapped = Color::nearest(rgb);
        if !colors.contains(&snapped) {
            colors.push(snapped);
        }
    }

    for candidate in Color::cube() {
        if colors.len() >= num_colors {
            break;
        }
        if !colors.contains(&candidate) {
            colors.push(candidate);
        }
    }

    Palette::new(colors)
}

/// Index of the nearest palette color; ties keep the lowest index
pub fn nearest_index(color: Rgb<u8>, palette: &[Rgb<u8>]) -> usize {
    let mut min_distance = u32::MAX;
    let mut min_index = 0;

    for (i, &candidate) in palette.iter().enumerate() {
        let distance = rgb_distance_sq(color, candidate);
        if distance < min_distance {
            min_distance = distance;
            min_index = i;
        }
    }

    min_index
}

fn nearest_index_f32(color: [f32; 3], palette: &[Rgb<u8>]) -> usize {
    let mut min_distance = f32::MAX;
    let mut min_index = 0;

    for (i, candidate) in palette.iter().enumerate() {
        let distance: f32 = (0..3)
            .map(|c| {
                let d = color[c] - candidate[c] as f32;
                d * d
            })
            .sum();
        if distance < min_distance {
            min_distance = distance;
            min_index = i;
        }
    }

    min_index
}

/// Spread a pre-scaled quantization error over the Sierra neighbourhood
fn apply_sierra_dithering(
    error: &mut [[f32; 3]],
    diff: [f32; 3],
    x: usize,
    y: usize,
    width: usize,
    height: usize,
) {
    let mut add = |px: usize, py: usize, weight: f32| {
        let cell = &mut error[py * width + px];
        for c in 0..3 {
            cell[c] += diff[c] * weight;
        }
    };

    // Current row
    if x + 1 < width {
        add(x + 1, y, 5.0);
    }
    if x + 2 < width {
        add(x + 2, y, 3.0);
    }

    // Next row
    if y + 1 < height {
        if x > 1 {
            add(x - 2, y + 1, 2.0);
        }
        if x > 0 {
            add(x - 1, y + 1, 4.0);
        }
        add(x, y + 1, 5.0);
        if x + 1 < width {
            add(x + 1, y + 1, 4.0);
        }
        if x + 2 < width {
            add(x + 2, y + 1, 2.0);
        }
    }

    // Two rows below
    if y + 2 < height {
        if x > 0 {
            add(x - 1, y + 2, 2.0);
        }
        add(x, y + 2, 3.0);
        if x + 1 < width {
            add(x + 1, y + 2, 2.0);
        }
    }
}
