use rand::Rng;
use std::time::Duration;

use crate::config::DEFAULT_RAMP_STEPS;
use crate::scenario::{Distribution, RampStrategy, ThinkTime};

/// Draw one value in `[min, max]` from the given distribution.
pub fn sample_ms<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64, dist: Distribution) -> f64 {
    if max <= min {
        return min;
    }
    match dist {
        Distribution::Uniform => min + rng.gen::<f64>() * (max - min),
        Distribution::Normal => {
            let mean = (min + max) / 2.0;
            let stddev = (max - min) / 6.0;
            (mean + box_muller(rng) * stddev).clamp(min, max)
        }
        Distribution::Exponential => {
            let mean = (min + max) / 2.0;
            let lambda = 1.0 / mean;
            // gen() is in [0, 1); flip it so ln never sees zero.
            let u = 1.0 - rng.gen::<f64>();
            (min - u.ln() / lambda).clamp(min, max)
        }
    }
}

/// Standard normal deviate via the Box–Muller transform.
fn box_muller<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

pub fn sample_think_time<R: Rng + ?Sized>(rng: &mut R, think: &ThinkTime) -> Duration {
    let ms = sample_ms(rng, think.min_ms, think.max_ms, think.distribution);
    Duration::from_secs_f64(ms.max(0.0) / 1000.0)
}

/// Offsets (from the start of the ramp) at which users `1..=users` are
/// spawned, or retired when used for ramp-down. The last user always lands
/// at `duration`.
pub fn ramp_schedule(
    users: usize,
    duration: Duration,
    strategy: RampStrategy,
    steps: Option<u32>,
) -> Vec<Duration> {
    if users == 0 {
        return Vec::new();
    }
    if duration.is_zero() {
        return vec![Duration::ZERO; users];
    }

    match strategy {
        RampStrategy::Linear => (1..=users as u32)
            .map(|k| duration * k / users as u32)
            .collect(),
        RampStrategy::Exponential => {
            if users == 1 {
                return vec![duration];
            }
            let ln_n = (users as f64).ln();
            (1..=users)
                .map(|k| duration.mul_f64((k as f64).ln() / ln_n))
                .collect()
        }
        RampStrategy::Step => {
            let requested = steps.unwrap_or(DEFAULT_RAMP_STEPS).max(1) as usize;
            let batches = requested.min(users);
            let batch_size = users.div_ceil(batches);
            let used_batches = users.div_ceil(batch_size);
            (0..users)
                .map(|k| {
                    let batch = (k / batch_size + 1) as u32;
                    duration * batch / used_batches as u32
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_think_time_bounds_for_every_distribution() {
        let mut rng = StdRng::seed_from_u64(7);
        for dist in [
            Distribution::Uniform,
            Distribution::Normal,
            Distribution::Exponential,
        ] {
            for _ in 0..10_000 {
                let v = sample_ms(&mut rng, 100.0, 500.0, dist);
                assert!((100.0..=500.0).contains(&v), "{:?} produced {}", dist, v);
            }
        }
    }

    #[test]
    fn test_normal_centers_on_midpoint() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 10_000;
        let mean: f64 = (0..n)
            .map(|_| sample_ms(&mut rng, 100.0, 500.0, Distribution::Normal))
            .sum::<f64>()
            / n as f64;
        assert!((mean - 300.0).abs() < 10.0, "mean was {}", mean);
    }

    #[test]
    fn test_degenerate_range_returns_min() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_ms(&mut rng, 250.0, 250.0, Distribution::Exponential), 250.0);
    }

    #[test]
    fn test_think_time_duration() {
        let mut rng = StdRng::seed_from_u64(3);
        let think = ThinkTime {
            min_ms: 100.0,
            max_ms: 200.0,
            distribution: Distribution::Uniform,
        };
        let d = sample_think_time(&mut rng, &think);
        assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
    }

    #[test]
    fn test_linear_ramp_tenth_user_at_ten_seconds() {
        let offsets = ramp_schedule(10, Duration::from_secs(10), RampStrategy::Linear, None);
        assert_eq!(offsets.len(), 10);
        assert_eq!(offsets[0], Duration::from_secs(1));
        let last = offsets[9].as_secs_f64();
        assert!((9.5..=10.5).contains(&last));
    }

    #[test]
    fn test_exponential_ramp_accelerates() {
        let offsets = ramp_schedule(8, Duration::from_secs(8), RampStrategy::Exponential, None);
        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[7], Duration::from_secs(8));
        let first_gap = offsets[1] - offsets[0];
        let last_gap = offsets[7] - offsets[6];
        assert!(first_gap > last_gap);
    }

    #[test]
    fn test_step_ramp_spawns_in_batches() {
        let offsets = ramp_schedule(8, Duration::from_secs(8), RampStrategy::Step, Some(4));
        assert_eq!(offsets[0], offsets[1]);
        assert_eq!(offsets[0], Duration::from_secs(2));
        assert_eq!(offsets[2], Duration::from_secs(4));
        assert_eq!(offsets[7], Duration::from_secs(8));
    }

    #[test]
    fn test_step_ramp_uneven_batches_end_at_duration() {
        let offsets = ramp_schedule(5, Duration::from_secs(6), RampStrategy::Step, Some(4));
        // batch size 2 -> three batches
        assert_eq!(*offsets.last().unwrap(), Duration::from_secs(6));
        assert_eq!(offsets[0], Duration::from_secs(2));
    }

    #[test]
    fn test_zero_duration_spawns_everyone_at_once() {
        let offsets = ramp_schedule(3, Duration::ZERO, RampStrategy::Linear, None);
        assert!(offsets.iter().all(|d| d.is_zero()));
    }
}
