//! Palette reduction.
//!
//! Both strategies take the unique colors produced by the sampler and return
//! at most `k` palette entries together with a dense assignment from every
//! input color to a palette index.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::color::{ColorCount, Rgb, rgb_distance_sq};
use crate::error::QuantizeError;

pub mod kmeans;
pub mod median_cut;

/// Clustering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "kmeans")]
    KMeans,
    #[serde(rename = "median-cut")]
    MedianCut,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::KMeans => "kmeans",
            Algorithm::MedianCut => "median-cut",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = QuantizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kmeans" => Ok(Algorithm::KMeans),
            "median-cut" => Ok(Algorithm::MedianCut),
            other => Err(QuantizeError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// A reduced palette and, for every input color, the palette index it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantization {
    pub palette: Vec<Rgb>,
    pub assignments: Vec<usize>,
}

impl Quantization {
    fn identity(colors: &[ColorCount]) -> Self {
        Self {
            palette: colors.iter().map(|c| c.rgb).collect(),
            assignments: (0..colors.len()).collect(),
        }
    }
}

/// Reduce `colors` to at most `k` palette entries.
///
/// When there are no more unique colors than `k` the input is returned as-is
/// with an identity assignment.
pub fn quantize<R: Rng + ?Sized>(
    colors: &[ColorCount],
    k: usize,
    algorithm: Algorithm,
    rng: &mut R,
) -> Result<Quantization, QuantizeError> {
    quantize_cancellable(colors, k, algorithm, rng, &CancelToken::new())
}

/// [`quantize`] that gives up with [`QuantizeError::Cancelled`] once `cancel` is set.
pub fn quantize_cancellable<R: Rng + ?Sized>(
    colors: &[ColorCount],
    k: usize,
    algorithm: Algorithm,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<Quantization, QuantizeError> {
    if k == 0 {
        return Err(QuantizeError::InvalidMaxColors(k));
    }
    if colors.len() <= k {
        return Ok(Quantization::identity(colors));
    }

    match algorithm {
        Algorithm::KMeans => kmeans::kmeans(colors, k, rng, cancel),
        Algorithm::MedianCut => median_cut::median_cut(colors, k, cancel),
    }
}

/// Index of the palette entry closest to `color` in RGB space.
pub(crate) fn nearest(color: [f64; 3], centroids: &[[f64; 3]]) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f64::INFINITY;
    for (idx, c) in centroids.iter().enumerate() {
        let d = rgb_distance_sq(color, *c);
        if d < best_dist {
            best_dist = d;
            best_idx = idx;
        }
    }
    best_idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn gradient(n: u8) -> Vec<ColorCount> {
        (0..n)
            .map(|i| ColorCount::new(Rgb::new(i.wrapping_mul(7), 255 - i, i / 2), 1 + i as u32 % 5))
            .collect()
    }

    #[test]
    fn identity_when_k_covers_all_colors() {
        let colors = gradient(5);
        for algorithm in [Algorithm::KMeans, Algorithm::MedianCut] {
            let mut rng = StdRng::seed_from_u64(1);
            let q = quantize(&colors, 5, algorithm, &mut rng).unwrap();
            assert_eq!(q.palette, colors.iter().map(|c| c.rgb).collect::<Vec<_>>());
            assert_eq!(q.assignments, vec![0, 1, 2, 3, 4]);

            let q = quantize(&colors, 64, algorithm, &mut rng).unwrap();
            assert_eq!(q.palette.len(), 5);
        }
    }

    #[test]
    fn palette_bounded_and_assignments_in_range() {
        let colors = gradient(120);
        for algorithm in [Algorithm::KMeans, Algorithm::MedianCut] {
            for k in [1, 2, 7, 16] {
                let mut rng = StdRng::seed_from_u64(42);
                let q = quantize(&colors, k, algorithm, &mut rng).unwrap();
                assert!(q.palette.len() <= k, "{algorithm} k={k}");
                assert_eq!(q.assignments.len(), colors.len());
                assert!(q.assignments.iter().all(|&a| a < q.palette.len()));
            }
        }
    }

    #[test]
    fn zero_k_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            quantize(&gradient(3), 0, Algorithm::KMeans, &mut rng),
            Err(QuantizeError::InvalidMaxColors(0))
        );
    }

    #[test]
    fn algorithm_parsing() {
        assert_eq!("kmeans".parse::<Algorithm>().unwrap(), Algorithm::KMeans);
        assert_eq!("median-cut".parse::<Algorithm>().unwrap(), Algorithm::MedianCut);
        assert!(matches!(
            "octree".parse::<Algorithm>(),
            Err(QuantizeError::UnknownAlgorithm(s)) if s == "octree"
        ));
        assert_eq!(serde_json::to_string(&Algorithm::MedianCut).unwrap(), "\"median-cut\"");
    }
}
