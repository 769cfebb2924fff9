use serde::{Deserialize, Serialize};

use crate::color::Rgb;

/// Overlay colors for the region map. Unrelated to the regions' real colors.
pub const DISPLAY_PALETTE: [Rgb; 12] = [
    Rgb::new(0xE6, 0x19, 0x4B),
    Rgb::new(0x3C, 0xB4, 0x4B),
    Rgb::new(0xFF, 0xE1, 0x19),
    Rgb::new(0x43, 0x63, 0xD8),
    Rgb::new(0xF5, 0x82, 0x31),
    Rgb::new(0x91, 0x1E, 0xB4),
    Rgb::new(0x46, 0xF0, 0xF0),
    Rgb::new(0xF0, 0x32, 0xE6),
    Rgb::new(0xBC, 0xF6, 0x0C),
    Rgb::new(0xFA, 0xBE, 0xBE),
    Rgb::new(0x00, 0x80, 0x80),
    Rgb::new(0x9A, 0x63, 0x24),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub avg_color: String,
    pub pixel_count: usize,
    pub percentage: f64,
}

/// RGBA raster with one display color per region, same size as the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionMap {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RegionMap {
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }
}

pub fn region_id(index: usize) -> String {
    format!("region-{}", index + 1)
}

/// Percentage rounded to two decimals; zero when there is nothing opaque.
pub fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 10_000.0 / total as f64).round() / 100.0
}

/// One region per palette entry, counting the opaque pixels assigned to it.
///
/// `pixel_regions` holds a palette index per source pixel, `None` for
/// transparent pixels.
pub fn build_regions(palette: &[Rgb], pixel_regions: &[Option<usize>]) -> Vec<Region> {
    let mut counts = vec![0usize; palette.len()];
    for idx in pixel_regions.iter().flatten() {
        counts[*idx] += 1;
    }
    let total: usize = counts.iter().sum();

    palette
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(i, (color, count))| Region {
            id: region_id(i),
            avg_color: color.to_hex(),
            pixel_count: count,
            percentage: percentage(count, total),
        })
        .collect()
}

pub fn build_region_map(pixel_regions: &[Option<usize>], width: u32, height: u32) -> RegionMap {
    let mut data = Vec::with_capacity(pixel_regions.len() * 4);
    for region in pixel_regions {
        match region {
            Some(idx) => {
                let c = DISPLAY_PALETTE[idx % DISPLAY_PALETTE.len()];
                data.extend_from_slice(&[c.r, c.g, c.b, 255]);
            }
            None => data.extend_from_slice(&[0, 0, 0, 0]),
        }
    }
    RegionMap {
        data,
        width,
        height,
    }
}
