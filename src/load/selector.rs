use rand::Rng;

use crate::error::{LoadError, LoadResult};
use crate::scenario::EndpointDefinition;

/// Roulette-wheel selection over endpoint weights.
///
/// The cumulative array is built once per scenario; each draw is a binary
/// search. Zero-weight endpoints occupy an empty slice of the wheel and are
/// never returned.
#[derive(Debug, Clone)]
pub struct WeightedSelector {
    cumulative: Vec<f64>,
    total: f64,
}

impl WeightedSelector {
    pub fn new(endpoints: &[EndpointDefinition]) -> LoadResult<Self> {
        Self::from_weights(endpoints.iter().map(|e| e.weight))
    }

    pub fn from_weights(weights: impl IntoIterator<Item = f64>) -> LoadResult<Self> {
        let mut cumulative = Vec::new();
        let mut total = 0.0;
        for w in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(LoadError::validation(format!("invalid endpoint weight {}", w)));
            }
            total += w;
            cumulative.push(total);
        }
        if total <= 0.0 {
            return Err(LoadError::validation(
                "sum of endpoint weights must be greater than zero",
            ));
        }
        Ok(Self { cumulative, total })
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Index of the next endpoint to hit.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let r = rng.gen::<f64>() * self.total;
        self.index_for(r)
    }

    /// First index whose cumulative weight is >= r, skipping zero-width slots.
    fn index_for(&self, r: f64) -> usize {
        let mut idx = self.cumulative.partition_point(|&c| c < r);
        // r == 0.0 lands on a leading zero-weight slot; walk to the first real one.
        while idx + 1 < self.cumulative.len() && self.width(idx) <= 0.0 {
            idx += 1;
        }
        idx.min(self.cumulative.len() - 1)
    }

    fn width(&self, idx: usize) -> f64 {
        let prev = if idx == 0 { 0.0 } else { self.cumulative[idx - 1] };
        self.cumulative[idx] - prev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_frequencies_converge_to_weights() {
        let selector = WeightedSelector::from_weights([70.0, 20.0, 10.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; 3];
        let draws = 100_000;
        for _ in 0..draws {
            counts[selector.pick(&mut rng)] += 1;
        }
        let targets = [0.70, 0.20, 0.10];
        for (count, target) in counts.iter().zip(targets) {
            let share = *count as f64 / draws as f64;
            assert!((share - target).abs() < 0.02, "share {} vs {}", share, target);
        }
    }

    #[test]
    fn test_single_endpoint_always_selected() {
        let selector = WeightedSelector::from_weights([3.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1_000 {
            assert_eq!(selector.pick(&mut rng), 0);
        }
    }

    #[test]
    fn test_zero_weight_endpoint_never_selected() {
        let selector = WeightedSelector::from_weights([0.0, 5.0, 0.0, 5.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..10_000 {
            let idx = selector.pick(&mut rng);
            assert!(idx == 1 || idx == 3);
        }
        // Boundary draws
        assert_eq!(selector.index_for(0.0), 1);
        assert_eq!(selector.index_for(5.0), 1);
        assert_eq!(selector.index_for(10.0), 3);
    }

    #[test]
    fn test_zero_total_weight_is_rejected() {
        assert!(WeightedSelector::from_weights([0.0, 0.0]).is_err());
        assert!(WeightedSelector::from_weights(Vec::<f64>::new()).is_err());
    }

    #[test]
    fn test_weights_need_not_sum_to_100() {
        let selector = WeightedSelector::from_weights([1.0, 1.0]).unwrap();
        assert_eq!(selector.len(), 2);
        assert_eq!(selector.index_for(0.5), 0);
        assert_eq!(selector.index_for(1.5), 1);
    }
}
