use std::collections::VecDeque;

use super::PerformanceMetrics;
use crate::config::{SCORER_BUFFER_SIZE, SCORER_MIN_SAMPLES};

pub const FEATURE_DIM: usize = 8;

/// Smallest standard deviation assumed per feature, in the feature's own
/// unit (ms, req/s, percent, MB). Keeps dimensions that never moved during
/// training from turning measurement noise into an anomaly.
const FEATURE_MIN_STD: [f64; FEATURE_DIM] = [1.0, 1.0, 1.0, 0.1, 0.1, 0.1, 1.0, 1.0];

/// Relative floor on the standard deviation, as a fraction of the mean.
const RELATIVE_MIN_STD: f64 = 0.01;

/// Metric vector fed to anomaly scorers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_DIM]);

impl From<&PerformanceMetrics> for FeatureVector {
    fn from(m: &PerformanceMetrics) -> Self {
        FeatureVector([
            m.response_time.mean,
            m.response_time.p95,
            m.response_time.p99,
            m.throughput.mean,
            m.error_rate,
            m.availability,
            m.resource_usage.cpu_percent,
            m.resource_usage.memory_mb,
        ])
    }
}

/// Learned model of "normal" metric vectors.
pub trait Scorer: Send + Sync {
    /// Record one known-good sample.
    fn add_sample(&mut self, features: FeatureVector);

    /// Rebuild the model from the accumulated samples. Returns false when
    /// there are too few samples to train.
    fn train(&mut self) -> bool;

    /// Anomaly score in `[0, 1]`, or `None` while untrained.
    fn score(&self, features: &FeatureVector) -> Option<f64>;

    fn sample_count(&self) -> usize;
}

#[derive(Debug, Clone)]
struct DiagonalModel {
    mean: [f64; FEATURE_DIM],
    variance: [f64; FEATURE_DIM],
}

/// Diagonal Mahalanobis distance to the mean of the training samples.
pub struct MahalanobisScorer {
    samples: VecDeque<FeatureVector>,
    capacity: usize,
    model: Option<DiagonalModel>,
}

impl Default for MahalanobisScorer {
    fn default() -> Self {
        Self::new(SCORER_BUFFER_SIZE)
    }
}

impl MahalanobisScorer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(SCORER_BUFFER_SIZE)),
            capacity: capacity.max(1),
            model: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }
}

impl Scorer for MahalanobisScorer {
    fn add_sample(&mut self, features: FeatureVector) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(features);
        if self.samples.len() >= SCORER_MIN_SAMPLES {
            self.train();
        }
    }

    fn train(&mut self) -> bool {
        let n = self.samples.len();
        if n < SCORER_MIN_SAMPLES {
            return false;
        }

        let mut mean = [0.0; FEATURE_DIM];
        for s in &self.samples {
            for (acc, v) in mean.iter_mut().zip(s.0) {
                *acc += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n as f64);

        let mut variance = [0.0; FEATURE_DIM];
        for s in &self.samples {
            for d in 0..FEATURE_DIM {
                variance[d] += (s.0[d] - mean[d]).powi(2);
            }
        }
        variance.iter_mut().for_each(|v| *v /= (n - 1) as f64);

        self.model = Some(DiagonalModel { mean, variance });
        true
    }

    fn score(&self, features: &FeatureVector) -> Option<f64> {
        let model = self.model.as_ref()?;
        let d2: f64 = (0..FEATURE_DIM)
            .map(|d| {
                let floor = FEATURE_MIN_STD[d].max(RELATIVE_MIN_STD * model.mean[d].abs());
                let var = model.variance[d].max(floor * floor);
                (features.0[d] - model.mean[d]).powi(2) / var
            })
            .sum();
        Some(1.0 - (-d2 / (2.0 * FEATURE_DIM as f64)).exp())
    }

    fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> FeatureVector {
        let wobble = (i as f64).sin();
        FeatureVector([
            50.0 + wobble * 2.0,
            100.0 + wobble * 5.0,
            150.0 + wobble * 8.0,
            200.0 - wobble * 10.0,
            0.5 + wobble * 0.1,
            99.5 - wobble * 0.1,
            0.0,
            0.0,
        ])
    }

    fn trained() -> MahalanobisScorer {
        let mut scorer = MahalanobisScorer::default();
        for i in 0..50 {
            scorer.add_sample(sample(i));
        }
        scorer
    }

    #[test]
    fn test_untrained_scorer_has_no_signal() {
        let mut scorer = MahalanobisScorer::default();
        for i in 0..SCORER_MIN_SAMPLES - 1 {
            scorer.add_sample(sample(i));
        }
        assert!(!scorer.is_trained());
        assert!(scorer.score(&sample(0)).is_none());
    }

    #[test]
    fn test_trains_once_min_samples_reached() {
        let mut scorer = MahalanobisScorer::default();
        for i in 0..SCORER_MIN_SAMPLES {
            scorer.add_sample(sample(i));
        }
        assert!(scorer.is_trained());
    }

    #[test]
    fn test_normal_sample_scores_low() {
        let scorer = trained();
        let score = scorer.score(&sample(3)).unwrap();
        assert!(score < 0.5, "score {}", score);
    }

    #[test]
    fn test_outlier_scores_high() {
        let scorer = trained();
        let mut outlier = sample(3);
        outlier.0[1] = 400.0;
        outlier.0[4] = 10.0;
        let score = scorer.score(&outlier).unwrap();
        assert!(score > 0.8, "score {}", score);
        assert!(score <= 1.0);
    }

    fn error_free(i: usize) -> FeatureVector {
        let wobble = (i as f64).sin();
        FeatureVector([
            50.0 + wobble * 2.0,
            100.0 + wobble * 5.0,
            150.0 + wobble * 8.0,
            200.0 - wobble * 10.0,
            0.0,
            100.0,
            0.0,
            0.0,
        ])
    }

    #[test]
    fn test_constant_feature_tolerates_tiny_change() {
        let mut scorer = MahalanobisScorer::default();
        for i in 0..20 {
            scorer.add_sample(error_free(i));
        }

        // One failure in ten thousand requests.
        let mut current = error_free(3);
        current.0[4] = 0.01;
        current.0[5] = 99.99;
        let score = scorer.score(&current).unwrap();
        assert!(score < 0.5, "score {}", score);

        let mut failing = error_free(3);
        failing.0[4] = 20.0;
        failing.0[5] = 80.0;
        assert!(scorer.score(&failing).unwrap() > 0.8);
    }

    #[test]
    fn test_ring_buffer_is_bounded() {
        let mut scorer = MahalanobisScorer::new(20);
        for i in 0..100 {
            scorer.add_sample(sample(i));
        }
        assert_eq!(scorer.sample_count(), 20);
    }
}
