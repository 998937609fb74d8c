// SLA
// Copyright (c) 2019 The SLA Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Chooses how to carve a channel's samples into blocks. A dynamic program searches a grid of
//! candidate block lengths for the partitioning that minimizes total estimated bits, using a
//! cheap PARCOR-based entropy proxy rather than a full entropy-coder dry run; an all-silent
//! signal short-circuits straight to a single block, mirroring the reference encoder's silence
//! fast path.

use sla_core::format::{MIN_BLOCK_NUM_SAMPLES, SEARCH_BLOCK_NUM_SAMPLES_DELTA};

use crate::parcor::ParcorAnalyzer;

/// A sample is considered silent if its magnitude is at or below this threshold.
const SILENCE_THRESHOLD: i32 = 0;

/// Length of the leading run of silent samples in `signal`, possibly `0`.
fn leading_silence_run(signal: &[i32]) -> usize {
    signal.iter().take_while(|&&s| s.abs() <= SILENCE_THRESHOLD).count()
}

/// Estimated bits/sample for a window of `len` samples, via a Gaussian entropy estimate of the
/// order-`parcor_order` PARCOR residual variance: `bits/sample ~= 0.5 * log2(2*pi*e*variance)`,
/// floored at a small positive number of bits so silence/near-silence windows don't produce a
/// negative estimate.
fn window_cost_bits(analyzer: &ParcorAnalyzer, window: &[f64], parcor_order: usize) -> f64 {
    const TWO_PI_E: f64 = 2.0 * std::f64::consts::PI * std::f64::consts::E;
    match analyzer.estimate_residual_variance(window, parcor_order) {
        Ok(variance) => (0.5 * (TWO_PI_E * variance).log2()).max(0.1) * window.len() as f64,
        Err(_) => window.len() as f64, // unpredictable window: assume ~1 bit/sample as a fallback
    }
}

/// Searches for the block-length partition of `signal` (a single channel's samples) that
/// minimizes total estimated bits, choosing lengths from the grid
/// `{MIN_BLOCK_NUM_SAMPLES, + SEARCH_BLOCK_NUM_SAMPLES_DELTA, ...}` up to `max_block_samples`.
/// Returns the sequence of block lengths covering every sample of `signal` exactly once; the
/// final block may be shorter than `MIN_BLOCK_NUM_SAMPLES` to exactly reach the end of the
/// signal.
pub fn search_optimal_block_partitions(
    signal: &[i32],
    parcor_order: usize,
    max_block_samples: u32,
) -> Vec<u32> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }

    let min_block = (MIN_BLOCK_NUM_SAMPLES as usize).min(n);

    // "if the first k >= min_block samples are all zero, return a single partition of length k
    // and skip estimation" is a leading-prefix test, not a whole-window test. A silent lead-in
    // followed by non-silent material still takes the fast path for the lead-in.
    let silent_run = leading_silence_run(signal).min(max_block_samples as usize);
    if silent_run >= min_block {
        return vec![silent_run as u32];
    }

    let delta = SEARCH_BLOCK_NUM_SAMPLES_DELTA as usize;
    let max_block = (max_block_samples as usize).max(min_block).min(n.max(min_block));

    let mut candidates = Vec::new();
    let mut len = min_block;
    while len <= max_block {
        candidates.push(len);
        len += delta;
    }
    if candidates.last() != Some(&max_block) && max_block >= min_block {
        candidates.push(max_block);
    }

    let analyzer = ParcorAnalyzer::new(parcor_order);
    let signal_f: Vec<f64> = signal.iter().map(|&v| f64::from(v)).collect();

    // dp[i] = (min estimated cost to cover the first i samples, chosen length of the last block)
    const HEADER_OVERHEAD_BITS: f64 = 64.0;
    let mut dp: Vec<f64> = vec![f64::INFINITY; n + 1];
    let mut choice: Vec<u32> = vec![0; n + 1];
    dp[0] = 0.0;

    for i in 1..=n {
        for &len in &candidates {
            if len > i {
                continue;
            }
            let start = i - len;
            if !dp[start].is_finite() {
                continue;
            }
            let cost =
                dp[start] + HEADER_OVERHEAD_BITS + window_cost_bits(&analyzer, &signal_f[start..i], parcor_order.min(len.saturating_sub(1)).max(1));
            if cost < dp[i] {
                dp[i] = cost;
                choice[i] = len as u32;
            }
        }
        // Always allow a final shorter remainder block reaching exactly the end of the signal,
        // even when no candidate length from the grid lands there.
        if i == n {
            for start in 0..i {
                let len = i - start;
                if candidates.contains(&len) || !dp[start].is_finite() {
                    continue;
                }
                let cost = dp[start]
                    + HEADER_OVERHEAD_BITS
                    + window_cost_bits(&analyzer, &signal_f[start..i], parcor_order.min(len.saturating_sub(1)).max(1));
                if cost < dp[i] {
                    dp[i] = cost;
                    choice[i] = len as u32;
                }
            }
        }
    }

    let mut lengths = Vec::new();
    let mut pos = n;
    while pos > 0 {
        let len = choice[pos] as usize;
        debug_assert!(len > 0 && len <= pos);
        lengths.push(len as u32);
        pos -= len;
    }
    lengths.reverse();
    lengths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_silence_short_circuits_to_a_single_capped_partition() {
        let signal = vec![0i32; 5000];
        let lengths = search_optimal_block_partitions(&signal, 4, 2048);
        assert_eq!(lengths, vec![2048]);
    }

    #[test]
    fn verify_leading_silence_short_circuits_even_with_non_silent_tail() {
        let mut signal = vec![0i32; 2048];
        signal.extend((0..2048).map(|i| (((i as f64) * 0.05).sin() * 8000.0) as i32));
        let lengths = search_optimal_block_partitions(&signal, 4, 4096);
        assert_eq!(lengths, vec![2048]);
    }

    #[test]
    fn verify_short_leading_silence_does_not_short_circuit() {
        // A leading run shorter than MIN_BLOCK_NUM_SAMPLES must not trigger the fast path; the
        // full signal still gets partitioned by the estimator.
        let mut signal = vec![0i32; 4];
        signal.extend((0..6000).map(|i| (((i as f64) * 0.03).sin() * 5000.0) as i32));
        let lengths = search_optimal_block_partitions(&signal, 4, 4096);
        assert_eq!(lengths.iter().sum::<u32>() as usize, signal.len());
        assert!(lengths.len() > 1 || lengths[0] as usize == signal.len());
    }

    #[test]
    fn verify_partition_covers_entire_signal() {
        let n = 6000;
        let signal: Vec<i32> = (0..n).map(|i| (((i as f64) * 0.03).sin() * 5000.0) as i32).collect();
        let lengths = search_optimal_block_partitions(&signal, 4, 4096);
        assert_eq!(lengths.iter().sum::<u32>() as usize, n as usize);
        assert!(!lengths.is_empty());
    }

    #[test]
    fn verify_short_signal_yields_single_remainder_block() {
        let signal = vec![100i32, -50, 75, -25, 10];
        let lengths = search_optimal_block_partitions(&signal, 2, 4096);
        assert_eq!(lengths, vec![5]);
    }
}
