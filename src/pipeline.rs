//! The synchronous quantization pipeline:
//! sample -> quantize -> merge -> regions.
//!
//! Everything here runs to completion on the calling thread. The service
//! layer decides which thread that is.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::color::Rgb;
use crate::error::QuantizeError;
use crate::merge::{DEFAULT_MERGE_THRESHOLD, merge_palette};
use crate::quantize::{Algorithm, quantize_cancellable};
use crate::regions::{Region, RegionMap, build_region_map, build_regions, percentage};
use crate::sampler::{ImageData, sample_pixels, sample_pixels_cancellable};

pub const DEFAULT_MAX_COLORS: usize = 8;

/// How many of the most frequent colors [`analyze_image`] reports.
pub const DOMINANT_COLOR_COUNT: usize = 5;

fn default_max_colors() -> usize {
    DEFAULT_MAX_COLORS
}

fn default_merge_threshold() -> f64 {
    DEFAULT_MERGE_THRESHOLD
}

/// Tunables for one quantization run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantizeOptions {
    #[serde(default = "default_max_colors")]
    pub max_colors: usize,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f64,
    /// Fixed seed for k-means++ initialisation; random when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for QuantizeOptions {
    fn default() -> Self {
        Self {
            max_colors: DEFAULT_MAX_COLORS,
            algorithm: Algorithm::default(),
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            seed: None,
        }
    }
}

impl QuantizeOptions {
    pub fn validate(&self) -> Result<(), QuantizeError> {
        if self.max_colors == 0 {
            return Err(QuantizeError::InvalidMaxColors(self.max_colors));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantizeRequest {
    pub image_data: ImageData,
    #[serde(flatten)]
    pub options: QuantizeOptions,
}

impl QuantizeRequest {
    pub fn new(image_data: ImageData, options: QuantizeOptions) -> Self {
        Self {
            image_data,
            options,
        }
    }

    pub fn validate(&self) -> Result<(), QuantizeError> {
        self.image_data.validate()?;
        self.options.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantizeResult {
    pub regions: Vec<Region>,
    pub palette: Vec<Rgb>,
    /// Region index per source pixel; `None` for transparent pixels.
    pub assignments: Vec<Option<usize>>,
    pub region_map: RegionMap,
    pub original_color_count: usize,
    pub final_color_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DominantColor {
    pub hex: String,
    pub pixel_count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
    pub width: u32,
    pub height: u32,
    pub total_pixels: usize,
    pub opaque_pixels: usize,
    pub transparent_pixels: usize,
    pub unique_colors: usize,
    pub dominant_colors: Vec<DominantColor>,
}

/// Run the full pipeline on the current thread.
pub fn quantize_image(request: &QuantizeRequest) -> Result<QuantizeResult, QuantizeError> {
    quantize_image_cancellable(request, &CancelToken::new())
}

/// [`quantize_image`] that stops with [`QuantizeError::Cancelled`] once
/// `cancel` is set. Sampling and clustering poll the token; merging and
/// region building are cheap and run to completion.
pub fn quantize_image_cancellable(
    request: &QuantizeRequest,
    cancel: &CancelToken,
) -> Result<QuantizeResult, QuantizeError> {
    request.validate()?;
    let QuantizeRequest {
        image_data: image,
        options,
    } = request;

    let sample = sample_pixels_cancellable(image, cancel)?;
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let quantized = quantize_cancellable(
        &sample.colors,
        options.max_colors,
        options.algorithm,
        &mut rng,
        cancel,
    )?;
    let merged = merge_palette(&quantized, options.merge_threshold);

    let pixel_regions: Vec<Option<usize>> = sample
        .pixel_colors
        .iter()
        .map(|&c| c.map(|color_idx| merged.assignments[color_idx]))
        .collect();

    Ok(QuantizeResult {
        regions: build_regions(&merged.palette, &pixel_regions),
        final_color_count: merged.palette.len(),
        palette: merged.palette,
        region_map: build_region_map(&pixel_regions, image.width, image.height),
        assignments: pixel_regions,
        original_color_count: sample.colors.len(),
    })
}

/// Pixel and color statistics without any clustering.
pub fn analyze_image(image: &ImageData) -> Result<ImageAnalysis, QuantizeError> {
    analyze_image_cancellable(image, &CancelToken::new())
}

pub fn analyze_image_cancellable(
    image: &ImageData,
    cancel: &CancelToken,
) -> Result<ImageAnalysis, QuantizeError> {
    image.validate()?;
    let sample = sample_pixels_cancellable(image, cancel)?;

    let mut by_count: Vec<_> = sample.colors.iter().collect();
    // Stable sort keeps first-seen order among equal counts.
    by_count.sort_by(|a, b| b.count.cmp(&a.count));

    let dominant_colors = by_count
        .into_iter()
        .take(DOMINANT_COLOR_COUNT)
        .map(|c| DominantColor {
            hex: c.rgb.to_hex(),
            pixel_count: c.count as usize,
            percentage: percentage(c.count as usize, sample.opaque_pixels),
        })
        .collect();

    Ok(ImageAnalysis {
        width: image.width,
        height: image.height,
        total_pixels: image.pixel_count(),
        opaque_pixels: sample.opaque_pixels,
        transparent_pixels: sample.transparent_pixels(),
        unique_colors: sample.colors.len(),
        dominant_colors,
    })
}

/// Degraded stand-in used once the worker channel is gone.
///
/// Opaque pixels are taken in scan order and cut into `max_colors` runs of
/// near-equal length; each run becomes one region colored with its mean.
/// The pixel totals stay exact, the grouping does not reflect color at all.
pub fn fallback_quantize(request: &QuantizeRequest) -> Result<QuantizeResult, QuantizeError> {
    request.validate()?;
    let QuantizeRequest {
        image_data: image,
        options,
    } = request;

    let sample = sample_pixels(image);
    let opaque = sample.opaque_pixels;
    let parts = options.max_colors.min(opaque);

    let mut sums = vec![[0u64; 3]; parts];
    let mut counts = vec![0u64; parts];
    let mut seen = 0usize;
    let pixel_regions: Vec<Option<usize>> = sample
        .pixel_colors
        .iter()
        .map(|&c| {
            c.map(|color_idx| {
                let part = seen * parts / opaque;
                seen += 1;
                let rgb = sample.colors[color_idx].rgb;
                sums[part][0] += rgb.r as u64;
                sums[part][1] += rgb.g as u64;
                sums[part][2] += rgb.b as u64;
                counts[part] += 1;
                part
            })
        })
        .collect();

    let palette: Vec<Rgb> = sums
        .iter()
        .zip(&counts)
        .map(|(sum, &n)| {
            let n = n.max(1) as f64;
            Rgb::from_f64([sum[0] as f64 / n, sum[1] as f64 / n, sum[2] as f64 / n])
        })
        .collect();

    Ok(QuantizeResult {
        regions: build_regions(&palette, &pixel_regions),
        final_color_count: palette.len(),
        palette,
        region_map: build_region_map(&pixel_regions, image.width, image.height),
        assignments: pixel_regions,
        original_color_count: sample.colors.len(),
    })
}
