use super::{Quantization, nearest};
use crate::cancel::CancelToken;
use crate::color::{ColorCount, Rgb};
use crate::error::QuantizeError;

/// A bucket of input color indices.
#[derive(Debug, Clone)]
struct Bucket {
    members: Vec<usize>,
}

impl Bucket {
    /// Channel (0 = R, 1 = G, 2 = B) with the widest spread, and that spread.
    fn widest_channel(&self, colors: &[ColorCount]) -> (usize, u8) {
        let mut min = [u8::MAX; 3];
        let mut max = [u8::MIN; 3];
        for &i in &self.members {
            let c = colors[i].rgb;
            for (ch, v) in [c.r, c.g, c.b].into_iter().enumerate() {
                min[ch] = min[ch].min(v);
                max[ch] = max[ch].max(v);
            }
        }

        let mut best = (0, 0u8);
        for ch in 0..3 {
            let range = max[ch].saturating_sub(min[ch]);
            if range > best.1 {
                best = (ch, range);
            }
        }
        best
    }

    /// Sort along `channel` and split at the median index.
    fn split(mut self, channel: usize, colors: &[ColorCount]) -> (Bucket, Bucket) {
        self.members.sort_by_key(|&i| {
            let c = colors[i].rgb;
            [c.r, c.g, c.b][channel]
        });
        let right = self.members.split_off(self.members.len() / 2);
        (self, Bucket { members: right })
    }

    fn centroid(&self, colors: &[ColorCount]) -> [f64; 3] {
        let mut sum = [0.0f64; 3];
        let mut weight = 0.0f64;
        for &i in &self.members {
            let c = colors[i].rgb.as_f64();
            let w = colors[i].count as f64;
            sum[0] += c[0] * w;
            sum[1] += c[1] * w;
            sum[2] += c[2] * w;
            weight += w;
        }
        if weight <= 0.0 {
            return [0.0; 3];
        }
        [sum[0] / weight, sum[1] / weight, sum[2] / weight]
    }
}

/// Classic median cut: keep splitting the bucket with the widest single
/// channel range until there are `k` buckets or nothing left to split.
pub fn median_cut(
    colors: &[ColorCount],
    k: usize,
    cancel: &CancelToken,
) -> Result<Quantization, QuantizeError> {
    let mut buckets = Vec::with_capacity(k);
    buckets.push(Bucket {
        members: (0..colors.len()).collect(),
    });

    while buckets.len() < k {
        cancel.check()?;
        let widest = buckets
            .iter()
            .enumerate()
            .map(|(i, b)| (i, b.widest_channel(colors)))
            .max_by_key(|(_, (_, range))| *range);

        let Some((idx, (channel, range))) = widest else {
            break;
        };
        if range == 0 {
            break;
        }

        let (left, right) = buckets.swap_remove(idx).split(channel, colors);
        buckets.push(left);
        buckets.push(right);
    }

    let centroids: Vec<[f64; 3]> = buckets.iter().map(|b| b.centroid(colors)).collect();
    let palette: Vec<Rgb> = centroids.iter().copied().map(Rgb::from_f64).collect();

    // Assign by nearest rounded palette color, not by bucket membership.
    let rounded: Vec<[f64; 3]> = palette.iter().map(|c| c.as_f64()).collect();
    let assignments = colors
        .iter()
        .map(|c| nearest(c.rgb.as_f64(), &rounded))
        .collect();

    Ok(Quantization {
        palette,
        assignments,
    })
}
