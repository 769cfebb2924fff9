use std::collections::HashMap;

use crate::cancel::CancelToken;
use crate::color::{ColorCount, Rgb};
use crate::error::QuantizeError;

/// Pixels with alpha below this are treated as background and never counted.
pub const ALPHA_THRESHOLD: u8 = 128;

/// Raw RGBA pixels, row-major, four bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImageData {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ImageData {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, QuantizeError> {
        let image = Self { data, width, height };
        image.validate()?;
        Ok(image)
    }

    /// Reject empty or inconsistent buffers before they are dispatched anywhere.
    pub fn validate(&self) -> Result<(), QuantizeError> {
        if self.width == 0 || self.height == 0 || self.data.is_empty() {
            return Err(QuantizeError::EmptyImage);
        }
        let mismatch = || QuantizeError::DimensionMismatch {
            len: self.data.len(),
            width: self.width,
            height: self.height,
        };
        // `usize` is 32 bits on wasm32, so the product can overflow there.
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(mismatch)?;
        if self.data.len() != expected {
            return Err(mismatch());
        }
        Ok(())
    }

    /// Pixel count of a validated image.
    pub fn pixel_count(&self) -> usize {
        self.data.len() / 4
    }

    /// Decode any format the `image` crate understands into RGBA8.
    pub fn decode(bytes: &[u8]) -> Result<Self, QuantizeError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| QuantizeError::Decode(e.to_string()))?;
        Ok(Self::from(img.to_rgba8()))
    }
}

impl From<image::RgbaImage> for ImageData {
    fn from(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
        }
    }
}

/// Unique opaque colors of an image, in first-seen scan order.
#[derive(Debug, Clone)]
pub struct Sample {
    pub colors: Vec<ColorCount>,
    /// For every source pixel, the index into `colors`, or `None` if transparent.
    pub pixel_colors: Vec<Option<usize>>,
    pub opaque_pixels: usize,
}

impl Sample {
    pub fn transparent_pixels(&self) -> usize {
        self.pixel_colors.len() - self.opaque_pixels
    }
}

/// Scan every pixel and collect exact-match unique colors with their counts.
pub fn sample_pixels(image: &ImageData) -> Sample {
    let mut scan = Scan::new(image);
    for row in rows(image) {
        scan.push_row(row);
    }
    scan.finish()
}

/// [`sample_pixels`], checking `cancel` before every row.
pub fn sample_pixels_cancellable(
    image: &ImageData,
    cancel: &CancelToken,
) -> Result<Sample, QuantizeError> {
    let mut scan = Scan::new(image);
    for row in rows(image) {
        cancel.check()?;
        scan.push_row(row);
    }
    Ok(scan.finish())
}

fn rows(image: &ImageData) -> std::slice::Chunks<'_, u8> {
    let row_len = (image.width as usize).max(1).saturating_mul(4);
    image.data.chunks(row_len)
}

struct Scan {
    index: HashMap<Rgb, usize>,
    colors: Vec<ColorCount>,
    pixel_colors: Vec<Option<usize>>,
    opaque_pixels: usize,
}

impl Scan {
    fn new(image: &ImageData) -> Self {
        Self {
            index: HashMap::new(),
            colors: Vec::new(),
            pixel_colors: Vec::with_capacity(image.data.len() / 4),
            opaque_pixels: 0,
        }
    }

    fn push_row(&mut self, row: &[u8]) {
        for chunk in row.chunks_exact(4) {
            if chunk[3] < ALPHA_THRESHOLD {
                self.pixel_colors.push(None);
                continue;
            }
            let rgb = Rgb::new(chunk[0], chunk[1], chunk[2]);
            let colors = &mut self.colors;
            let idx = *self.index.entry(rgb).or_insert_with(|| {
                colors.push(ColorCount::new(rgb, 0));
                colors.len() - 1
            });
            self.colors[idx].count += 1;
            self.pixel_colors.push(Some(idx));
            self.opaque_pixels += 1;
        }
    }

    fn finish(self) -> Sample {
        Sample {
            colors: self.colors,
            pixel_colors: self.pixel_colors,
            opaque_pixels: self.opaque_pixels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(pixels: &[[u8; 4]], width: u32, height: u32) -> ImageData {
        ImageData::new(pixels.concat(), width, height).unwrap()
    }

    #[test]
    fn counts_unique_colors_in_scan_order() {
        let img = image(
            &[
                [0, 0, 255, 255],
                [255, 0, 0, 255],
                [0, 0, 255, 255],
                [0, 0, 255, 200],
            ],
            2,
            2,
        );
        let sample = sample_pixels(&img);
        assert_eq!(sample.colors.len(), 2);
        assert_eq!(sample.colors[0].rgb, Rgb::new(0, 0, 255));
        assert_eq!(sample.colors[0].count, 3);
        assert_eq!(sample.colors[1].rgb, Rgb::new(255, 0, 0));
        assert_eq!(sample.colors[1].count, 1);
        assert_eq!(sample.pixel_colors, vec![Some(0), Some(1), Some(0), Some(0)]);
        assert_eq!(sample.opaque_pixels, 4);
    }

    #[test]
    fn alpha_below_threshold_is_excluded() {
        let img = image(
            &[
                [10, 10, 10, 127],
                [10, 10, 10, 128],
                [20, 20, 20, 0],
            ],
            3,
            1,
        );
        let sample = sample_pixels(&img);
        assert_eq!(sample.opaque_pixels, 1);
        assert_eq!(sample.transparent_pixels(), 2);
        assert_eq!(sample.colors.len(), 1);
        assert_eq!(sample.pixel_colors, vec![None, Some(0), None]);
    }

    #[test]
    fn near_identical_colors_stay_distinct() {
        let img = image(&[[100, 100, 100, 255], [100, 100, 101, 255]], 2, 1);
        assert_eq!(sample_pixels(&img).colors.len(), 2);
    }

    #[test]
    fn validation_errors() {
        assert!(matches!(
            ImageData::new(vec![], 0, 0),
            Err(QuantizeError::EmptyImage)
        ));
        assert!(matches!(
            ImageData::new(vec![0; 12], 2, 2),
            Err(QuantizeError::DimensionMismatch { len: 12, width: 2, height: 2 })
        ));
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let image = ImageData {
            data: vec![0; 262_144],
            width: 65_536,
            height: 16_385,
        };
        // Wraps to 262144 when the product is computed in 32 bits.
        assert!(matches!(
            image.validate(),
            Err(QuantizeError::DimensionMismatch { len: 262_144, .. })
        ));

        let huge = ImageData {
            data: vec![0; 4],
            width: u32::MAX,
            height: u32::MAX,
        };
        assert!(matches!(
            huge.validate(),
            Err(QuantizeError::DimensionMismatch { len: 4, .. })
        ));
    }

    #[test]
    fn cancelled_scan_stops() {
        let img = image(&[[1, 2, 3, 255], [4, 5, 6, 255]], 1, 2);
        let token = CancelToken::new();
        assert_eq!(sample_pixels_cancellable(&img, &token).unwrap().colors.len(), 2);

        token.cancel();
        assert!(matches!(
            sample_pixels_cancellable(&img, &token),
            Err(QuantizeError::Cancelled)
        ));
    }
}
