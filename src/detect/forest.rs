//! Isolation forest outlier scorer.
//!
//! Rare points are separated from the rest of the population by fewer random
//! axis-aligned splits, so their average path length across the ensemble is
//! short and their score `2^(-E[h(x)] / c(n))` is high. The flagging threshold
//! is the `(1 - contamination)` quantile of the training scores.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

use super::{DetectError, OutlierScorer};

const EULER_GAMMA: f64 = 0.577_215_664_9;

#[derive(Debug, Clone)]
pub struct IsolationForest {
    num_trees: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
}

impl Default for IsolationForest {
    /// 50 trees, 5% contamination, fixed seed.
    fn default() -> Self {
        Self {
            num_trees: 50,
            max_samples: 256,
            contamination: 0.05,
            seed: 42,
        }
    }
}

impl IsolationForest {
    pub fn new(
        num_trees: usize,
        max_samples: usize,
        contamination: f64,
        seed: u64,
    ) -> Result<Self, DetectError> {
        if num_trees == 0 {
            return Err(DetectError::EmptyEnsemble);
        }
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(DetectError::InvalidContamination(contamination));
        }
        Ok(Self {
            num_trees,
            max_samples: max_samples.max(1),
            contamination,
            seed,
        })
    }

    /// c(n): average path length of an unsuccessful BST search over n points.
    fn average_path_length(n: usize) -> f64 {
        match n {
            0 | 1 => 0.0,
            2 => 1.0,
            _ => {
                let n = n as f64;
                2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
            }
        }
    }

    /// Fit on `data` and return the anomaly score of every row.
    pub fn fit_scores(&self, data: &[[f64; 2]]) -> Result<Vec<f64>, DetectError> {
        for (record, row) in data.iter().enumerate() {
            if let Some(index) = row.iter().position(|v| !v.is_finite()) {
                return Err(DetectError::InvalidFeature { record, index });
            }
        }
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let sample_size = self.max_samples.min(data.len());
        let normalizer = Self::average_path_length(sample_size);
        if normalizer == 0.0 {
            return Ok(vec![0.5; data.len()]);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let trees: Vec<IsolationTree> = (0..self.num_trees)
            .map(|_| {
                let sample: Vec<[f64; 2]> = index::sample(&mut rng, data.len(), sample_size)
                    .into_iter()
                    .map(|i| data[i])
                    .collect();
                IsolationTree::build(&sample, max_depth, &mut rng)
            })
            .collect();

        Ok(data
            .iter()
            .map(|row| {
                let total: f64 = trees.iter().map(|t| t.path_length(row)).sum();
                let mean_path = total / trees.len() as f64;
                2f64.powf(-mean_path / normalizer)
            })
            .collect())
    }

    fn threshold(&self, scores: &[f64]) -> f64 {
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let pos = (1.0 - self.contamination) * (sorted.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
    }
}

impl OutlierScorer for IsolationForest {
    fn name(&self) -> &str {
        "isolation-forest"
    }

    fn flag(&self, features: &[[f64; 2]]) -> Result<Vec<bool>, DetectError> {
        let scores = self.fit_scores(features)?;
        if scores.is_empty() {
            return Ok(Vec::new());
        }
        let threshold = self.threshold(&scores);
        Ok(scores.iter().map(|s| *s > threshold).collect())
    }
}

#[derive(Debug)]
enum Node {
    Split {
        feature: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build<R: Rng>(samples: &[[f64; 2]], max_depth: usize, rng: &mut R) -> Self {
        Self {
            root: Self::build_node(samples, 0, max_depth, rng),
        }
    }

    fn build_node<R: Rng>(samples: &[[f64; 2]], depth: usize, max_depth: usize, rng: &mut R) -> Node {
        if depth >= max_depth || samples.len() <= 1 {
            return Node::Leaf { size: samples.len() };
        }

        // Only features that still vary inside this node can split it.
        let mut candidates = Vec::with_capacity(2);
        for feature in 0..2 {
            let (min, max) = bounds(samples, feature);
            if max > min {
                candidates.push((feature, min, max));
            }
        }
        if candidates.is_empty() {
            return Node::Leaf { size: samples.len() };
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let value = rng.gen_range(min..max);

        let (left, right): (Vec<[f64; 2]>, Vec<[f64; 2]>) =
            samples.iter().copied().partition(|s| s[feature] < value);

        Node::Split {
            feature,
            value,
            left: Box::new(Self::build_node(&left, depth + 1, max_depth, rng)),
            right: Box::new(Self::build_node(&right, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, row: &[f64; 2]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Leaf { size } => {
                    return depth as f64 + IsolationForest::average_path_length(*size);
                }
                Node::Split {
                    feature,
                    value,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *value { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

fn bounds(samples: &[[f64; 2]], feature: usize) -> (f64, f64) {
    samples.iter().fold((f64::MAX, f64::MIN), |(lo, hi), s| {
        (lo.min(s[feature]), hi.max(s[feature]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(n: usize) -> Vec<[f64; 2]> {
        vec![[200.0, 512.0]; n]
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(IsolationForest::average_path_length(1), 0.0);
        assert_eq!(IsolationForest::average_path_length(2), 1.0);
        let c_10 = IsolationForest::average_path_length(10);
        let c_256 = IsolationForest::average_path_length(256);
        assert!(c_256 > c_10, "c(256)={} should be > c(10)={}", c_256, c_10);
    }

    #[test]
    fn test_identical_population_flags_nothing() {
        let forest = IsolationForest::default();
        let flags = forest.flag(&uniform(40)).unwrap();
        assert_eq!(flags.len(), 40);
        assert!(flags.iter().all(|f| !f));
    }

    #[test]
    fn test_single_outlier_is_flagged() {
        let mut data = uniform(9);
        data.insert(4, [500.0, 98_304.0]);
        let flags = IsolationForest::default().flag(&data).unwrap();
        let flagged: Vec<usize> = flags
            .iter()
            .enumerate()
            .filter(|(_, f)| **f)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![4]);
    }

    #[test]
    fn test_outlier_scores_higher_in_varied_population() {
        let mut data: Vec<[f64; 2]> = (0..200)
            .map(|i| [200.0, 400.0 + (i % 37) as f64 * 3.0])
            .collect();
        data.push([503.0, 250_000.0]);
        let forest = IsolationForest::default();
        let scores = forest.fit_scores(&data).unwrap();
        let outlier = *scores.last().unwrap();
        let max_normal = scores[..200].iter().cloned().fold(f64::MIN, f64::max);
        assert!(outlier > max_normal);
        assert!(*forest.flag(&data).unwrap().last().unwrap());
    }

    #[test]
    fn test_contamination_bounds_flag_count() {
        let data: Vec<[f64; 2]> = (0..100)
            .map(|i| [200.0 + (i % 3) as f64, (i * 97 % 1013) as f64])
            .collect();
        let flags = IsolationForest::default().flag(&data).unwrap();
        let count = flags.iter().filter(|f| **f).count();
        assert!(count <= 5, "flagged {} of 100", count);
    }

    #[test]
    fn test_seeded_scoring_is_deterministic() {
        let data: Vec<[f64; 2]> = (0..64).map(|i| [200.0, (i * i) as f64]).collect();
        let forest = IsolationForest::default();
        assert_eq!(forest.fit_scores(&data).unwrap(), forest.fit_scores(&data).unwrap());
    }

    #[test]
    fn test_degenerate_populations() {
        let forest = IsolationForest::default();
        assert!(forest.flag(&[]).unwrap().is_empty());
        assert_eq!(forest.flag(&[[404.0, 0.0]]).unwrap(), vec![false]);
        assert_eq!(forest.flag(&[[200.0, 1.0], [500.0, 9.0]]).unwrap().len(), 2);
    }

    #[test]
    fn test_non_finite_feature_is_rejected() {
        let err = IsolationForest::default()
            .flag(&[[200.0, 1.0], [f64::NAN, 1.0]])
            .unwrap_err();
        assert!(matches!(err, DetectError::InvalidFeature { record: 1, index: 0 }));
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(matches!(
            IsolationForest::new(50, 256, 0.0, 42),
            Err(DetectError::InvalidContamination(_))
        ));
        assert!(matches!(
            IsolationForest::new(0, 256, 0.05, 42),
            Err(DetectError::EmptyEnsemble)
        ));
    }
}
