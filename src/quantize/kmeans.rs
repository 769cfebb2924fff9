use rand::Rng;

use super::{Quantization, nearest};
use crate::cancel::CancelToken;
use crate::color::{ColorCount, Rgb, rgb_distance_sq};
use crate::error::QuantizeError;

pub const MAX_ITERATIONS: usize = 50;

/// Count-weighted k-means over unique colors in RGB space.
///
/// Centroids are seeded with k-means++ and refined until the assignment
/// vector stops changing or [`MAX_ITERATIONS`] rounds have run. `cancel` is
/// polled once per seed and once per round.
pub fn kmeans<R: Rng + ?Sized>(
    colors: &[ColorCount],
    k: usize,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<Quantization, QuantizeError> {
    let points: Vec<[f64; 3]> = colors.iter().map(|c| c.rgb.as_f64()).collect();
    let mut centroids = seed_plus_plus(&points, k, rng, cancel)?;

    let mut assignments: Vec<usize> = vec![usize::MAX; points.len()];

    for _ in 0..MAX_ITERATIONS {
        cancel.check()?;
        let next: Vec<usize> = points.iter().map(|p| nearest(*p, &centroids)).collect();
        if next == assignments {
            break;
        }
        assignments = next;
        update_centroids(&points, colors, &assignments, &mut centroids);
    }

    Ok(Quantization {
        palette: centroids.into_iter().map(Rgb::from_f64).collect(),
        assignments,
    })
}

/// Move every centroid to the count-weighted mean of its members. A centroid
/// with no members keeps its previous position.
fn update_centroids(
    points: &[[f64; 3]],
    colors: &[ColorCount],
    assignments: &[usize],
    centroids: &mut [[f64; 3]],
) {
    let mut sums = vec![[0.0f64; 3]; centroids.len()];
    let mut weights = vec![0.0f64; centroids.len()];
    for ((p, &cluster), color) in points.iter().zip(assignments).zip(colors) {
        let w = color.count as f64;
        sums[cluster][0] += p[0] * w;
        sums[cluster][1] += p[1] * w;
        sums[cluster][2] += p[2] * w;
        weights[cluster] += w;
    }

    for (i, centroid) in centroids.iter_mut().enumerate() {
        if weights[i] > 0.0 {
            *centroid = [
                sums[i][0] / weights[i],
                sums[i][1] / weights[i],
                sums[i][2] / weights[i],
            ];
        }
    }
}

/// k-means++ seeding: the first centroid is uniform, each later one is drawn
/// with probability proportional to its squared distance from the nearest
/// centroid chosen so far.
fn seed_plus_plus<R: Rng + ?Sized>(
    points: &[[f64; 3]],
    k: usize,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<Vec<[f64; 3]>, QuantizeError> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..points.len())]);

    let mut nearest_sq: Vec<f64> = points
        .iter()
        .map(|p| rgb_distance_sq(*p, centroids[0]))
        .collect();

    while centroids.len() < k {
        cancel.check()?;
        let total: f64 = nearest_sq.iter().sum();
        if total <= 0.0 {
            // Every point already coincides with a centroid.
            break;
        }

        let mut target = rng.random::<f64>() * total;
        let mut chosen = None;
        for (i, &d) in nearest_sq.iter().enumerate() {
            if d <= 0.0 {
                continue;
            }
            chosen = Some(i);
            if target < d {
                break;
            }
            target -= d;
        }
        // `chosen` is the last positive-weight point if rounding ran past the end.
        let Some(idx) = chosen else { break };

        let centroid = points[idx];
        centroids.push(centroid);
        for (p, best) in points.iter().zip(nearest_sq.iter_mut()) {
            let d = rgb_distance_sq(*p, centroid);
            if d < *best {
                *best = d;
            }
        }
    }

    Ok(centroids)
}
