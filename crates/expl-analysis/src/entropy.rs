//! Information statistics over bottleneck activations. All entropies are in
//! bits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntropyStats {
    pub entropy: f64,
    pub usage_entropy: f64,
    /// Mean per-sample entropy; zero when every sample is one-hot.
    pub fractional: f64,
    pub linf: f64,
    pub active_channels: usize,
}

pub fn shannon_bits(weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    weights
        .iter()
        .filter(|w| **w > 0.0)
        .map(|w| {
            let p = w / total;
            -p * p.log2()
        })
        .sum::<f64>()
        .max(0.0)
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

pub fn channel_usage(samples: &[Vec<f64>], channels: usize) -> Vec<f64> {
    let mut usage = vec![0.0; channels];
    if samples.is_empty() {
        return usage;
    }
    for s in samples {
        for (u, v) in usage.iter_mut().zip(s) {
            *u += v;
        }
    }
    let n = samples.len() as f64;
    usage.iter_mut().for_each(|u| *u /= n);
    usage
}

pub fn entropy_stats(samples: &[Vec<f64>], channels: usize) -> EntropyStats {
    if samples.is_empty() || channels == 0 {
        return EntropyStats::default();
    }
    let mut winners = vec![0.0; channels];
    let mut fractional = 0.0;
    let mut linf = 0.0;
    for s in samples {
        let magnitudes: Vec<f64> = s.iter().map(|v| v.abs()).collect();
        let top = argmax(s);
        if top < channels {
            winners[top] += 1.0;
        }
        fractional += shannon_bits(&magnitudes);
        linf += s.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    }
    let n = samples.len() as f64;
    let usage: Vec<f64> = channel_usage(samples, channels)
        .into_iter()
        .map(|u| u.abs())
        .collect();
    EntropyStats {
        entropy: shannon_bits(&winners),
        usage_entropy: shannon_bits(&usage),
        fractional: fractional / n,
        linf: linf / n,
        active_channels: winners.iter().filter(|w| **w > 0.0).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn one_hot_samples_have_no_fractional_entropy() {
        let samples = vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0],
        ];
        let stats = entropy_stats(&samples, 4);
        assert!(close(stats.entropy, 2.0));
        assert!(close(stats.usage_entropy, 2.0));
        assert!(close(stats.fractional, 0.0));
        assert!(close(stats.linf, 1.0));
        assert_eq!(stats.active_channels, 4);
    }

    #[test]
    fn uniform_samples_are_fully_fractional() {
        let samples = vec![vec![0.5, 0.5]; 3];
        let stats = entropy_stats(&samples, 2);
        // ties go to the first channel
        assert!(close(stats.entropy, 0.0));
        assert_eq!(stats.active_channels, 1);
        assert!(close(stats.fractional, 1.0));
        assert!(close(stats.linf, 0.5));
        assert!(close(stats.usage_entropy, 1.0));
    }

    #[test]
    fn empty_input_is_all_zero() {
        assert_eq!(entropy_stats(&[], 4), EntropyStats::default());
        assert_eq!(channel_usage(&[], 2), vec![0.0, 0.0]);
        assert!(close(shannon_bits(&[0.0, 0.0]), 0.0));
    }
}
