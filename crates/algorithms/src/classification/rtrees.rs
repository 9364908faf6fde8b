//! Random trees (bagged CART with random feature subsets)
//!
//! Each tree is grown on a bootstrap sample; at every node a random subset of
//! features is searched for the threshold with the lowest weighted Gini
//! impurity. Leaves store class frequencies, and the forest averages them.

use super::model::{argmax, ModelConfig, ModelSnapshot, StatModel};
use crate::maybe_rayon::*;
use crate::rng::Lcg;
use ndarray::ArrayView2;
use pixclass_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Parameters for [`RandomTrees`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomTreesParams {
    /// Number of trees
    pub n_trees: usize,
    /// Maximum tree depth (root has depth 0)
    pub max_depth: usize,
    /// Nodes with fewer samples become leaves
    pub min_samples_split: usize,
    /// Features tried per split; `None` uses `⌈√n_features⌉`
    pub features_per_split: Option<usize>,
}

impl Default for RandomTreesParams {
    fn default() -> Self {
        Self {
            n_trees: 50,
            max_depth: 12,
            min_samples_split: 4,
            features_per_split: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        distribution: Vec<f32>,
    },
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn leaf(&self, x: &[f32]) -> &[f32] {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Fitted random forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomTrees {
    params: RandomTreesParams,
    n_features: usize,
    n_classes: usize,
    trees: Vec<DecisionTree>,
}

struct Grower<'a> {
    x: ArrayView2<'a, f32>,
    y: &'a [usize],
    n_classes: usize,
    params: &'a RandomTreesParams,
    mtry: usize,
    rng: Lcg,
    nodes: Vec<Node>,
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let t = total as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / t).powi(2)).sum::<f64>()
}

impl Grower<'_> {
    fn distribution(&self, idx: &[usize]) -> Vec<f32> {
        let mut counts = vec![0f32; self.n_classes];
        for &i in idx {
            counts[self.y[i]] += 1.0;
        }
        let n = idx.len().max(1) as f32;
        counts.iter_mut().for_each(|c| *c /= n);
        counts
    }

    /// Best `(feature, threshold, score)` over a random feature subset.
    fn best_split(&mut self, idx: &mut [usize]) -> Option<(usize, f32, f64)> {
        let n_features = self.x.ncols();
        let mut features: Vec<usize> = (0..n_features).collect();
        // Partial Fisher-Yates for the first `mtry` entries
        for i in 0..self.mtry.min(n_features) {
            let j = i + self.rng.below(n_features - i);
            features.swap(i, j);
        }

        let total = idx.len();
        let mut parent = vec![0usize; self.n_classes];
        for &i in idx.iter() {
            parent[self.y[i]] += 1;
        }

        let mut best: Option<(usize, f32, f64)> = None;
        for &f in features.iter().take(self.mtry) {
            idx.sort_by(|&a, &b| self.x[[a, f]].total_cmp(&self.x[[b, f]]));
            let mut left = vec![0usize; self.n_classes];
            for k in 0..total - 1 {
                left[self.y[idx[k]]] += 1;
                let (v, next) = (self.x[[idx[k], f]], self.x[[idx[k + 1], f]]);
                if v == next {
                    continue;
                }
                let right: Vec<usize> = parent.iter().zip(&left).map(|(p, l)| p - l).collect();
                let nl = k + 1;
                let score = (nl as f64 * gini(&left, nl)
                    + (total - nl) as f64 * gini(&right, total - nl))
                    / total as f64;
                if best.is_none_or(|(_, _, s)| score < s) {
                    best = Some((f, v + (next - v) / 2.0, score));
                }
            }
        }
        best
    }

    fn grow(&mut self, idx: &mut [usize], depth: usize) -> usize {
        let node_id = self.nodes.len();
        let distribution = self.distribution(idx);
        self.nodes.push(Node::Leaf {
            distribution: distribution.clone(),
        });

        let pure = distribution.iter().any(|&p| p >= 1.0);
        if pure || depth >= self.params.max_depth || idx.len() < self.params.min_samples_split.max(2) {
            return node_id;
        }
        let Some((feature, threshold, _)) = self.best_split(idx) else {
            return node_id;
        };

        // Partition in place around the threshold
        idx.sort_by_key(|&i| self.x[[i, feature]] > threshold);
        let split_at = idx.partition_point(|&i| self.x[[i, feature]] <= threshold);
        let (l, r) = idx.split_at_mut(split_at);
        let left = self.grow(l, depth + 1);
        let right = self.grow(r, depth + 1);
        self.nodes[node_id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        node_id
    }
}

impl RandomTrees {
    pub const NAME: &'static str = "Random trees";

    pub fn fit(
        params: &RandomTreesParams,
        x: ArrayView2<f32>,
        y: &[usize],
        n_classes: usize,
        seed: u64,
    ) -> Result<Self> {
        if params.n_trees == 0 {
            return Err(Error::invalid_parameter("n_trees", 0, "must be > 0"));
        }
        let (n, n_features) = x.dim();
        let mtry = params
            .features_per_split
            .unwrap_or_else(|| (n_features as f64).sqrt().ceil() as usize)
            .clamp(1, n_features.max(1));

        let trees: Vec<DecisionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = Lcg::new(seed.wrapping_add((t as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)));
                let mut idx: Vec<usize> = (0..n).map(|_| rng.below(n)).collect();
                let mut grower = Grower {
                    x: x.reborrow(),
                    y,
                    n_classes,
                    params,
                    mtry,
                    rng,
                    nodes: Vec::new(),
                };
                grower.grow(&mut idx, 0);
                DecisionTree {
                    nodes: grower.nodes,
                }
            })
            .collect();

        Ok(Self {
            params: params.clone(),
            n_features,
            n_classes,
            trees,
        })
    }

    fn average(&self, x: &[f32]) -> Vec<f32> {
        let mut sum = vec![0f32; self.n_classes];
        for tree in &self.trees {
            for (s, p) in sum.iter_mut().zip(tree.leaf(x)) {
                *s += p;
            }
        }
        let n = self.trees.len().max(1) as f32;
        sum.iter_mut().for_each(|s| *s /= n);
        sum
    }
}

impl StatModel for RandomTrees {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> ModelConfig {
        ModelConfig::RandomTrees(self.params.clone())
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_one(&self, x: &[f32]) -> usize {
        argmax(&self.average(x))
    }

    fn probabilities_one(&self, x: &[f32]) -> Option<Vec<f32>> {
        Some(self.average(x))
    }

    fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::RandomTrees(self.clone())
    }
}
