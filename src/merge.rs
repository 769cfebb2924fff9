use palette::Lab;

use crate::color::{Rgb, delta_e};
use crate::quantize::Quantization;

/// Default ΔE below which two palette entries are considered the same color.
pub const DEFAULT_MERGE_THRESHOLD: f64 = 8.0;

/// Disjoint sets over palette indices, stored as a flat parent array.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    pub fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // path compression
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Join the sets of `a` and `b`. The lower index always becomes the root.
    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;
    }
}

/// Collapse palette entries closer than `threshold` ΔE.
///
/// Merged entries keep the color of their lowest-index member; nothing is
/// re-averaged. The output palette only contains entries that are actually
/// referenced, numbered in the order the assignments first reference them.
/// A threshold of zero or below skips the merge and only compacts.
pub fn merge_palette(quantization: &Quantization, threshold: f64) -> Quantization {
    let palette = &quantization.palette;
    let mut sets = UnionFind::new(palette.len());

    if threshold > 0.0 {
        let labs: Vec<Lab> = palette.iter().map(|c| c.to_lab()).collect();
        for i in 0..labs.len() {
            for j in (i + 1)..labs.len() {
                if delta_e(&labs[i], &labs[j]) < threshold {
                    sets.union(i, j);
                }
            }
        }
    }

    let mut remap: Vec<Option<usize>> = vec![None; palette.len()];
    let mut merged: Vec<Rgb> = Vec::new();
    let assignments = quantization
        .assignments
        .iter()
        .map(|&a| {
            let root = sets.find(a);
            *remap[root].get_or_insert_with(|| {
                merged.push(palette[root]);
                merged.len() - 1
            })
        })
        .collect();

    Quantization {
        palette: merged,
        assignments,
    }
}
