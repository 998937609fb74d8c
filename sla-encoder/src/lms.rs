// SLA
// Copyright (c) 2019 The SLA Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A cascade of sign-sign LMS adaptive filters, the final prediction stage after PARCOR and
//! long-term prediction have removed the bulk of the short-term and periodic structure. Each pass
//! in the cascade adapts on the residual of the previous one and is re-initialized from scratch
//! at the start of every block, matching the short-term-memory design of the other predictor
//! stages.

/// A single sign-sign LMS filter of a fixed order.
struct LmsFilter {
    weights: Vec<i32>,
    history: Vec<i32>,
}

impl LmsFilter {
    fn new(order: usize) -> Self {
        LmsFilter { weights: vec![0i32; order], history: vec![0i32; order] }
    }

    /// Zeroes the filter's weights and history in place, the per-block re-initialization without
    /// reallocating either buffer.
    fn reset(&mut self) {
        self.weights.fill(0);
        self.history.fill(0);
    }

    /// Predicts the next sample from the filter's history, returns the residual, and adapts the
    /// weights by the sign-sign LMS rule before shifting `actual` into the history.
    #[inline]
    fn step(&mut self, actual: i32) -> i32 {
        let mut predicted: i64 = 0;
        for (&w, &h) in self.weights.iter().zip(self.history.iter()) {
            predicted += (i64::from(w) * i64::from(h)) >> 31;
        }
        let residual = actual - (predicted as i32);

        let sign_e = residual.signum();
        for (w, &h) in self.weights.iter_mut().zip(self.history.iter()) {
            *w = w.wrapping_add(sign_e * h.signum());
        }

        self.history.rotate_right(1);
        self.history[0] = actual;

        residual
    }
}

/// A cascade of `num_filters` independent [`LmsFilter`]s, each of `order` taps, run in series:
/// the residual of filter `i` is the input to filter `i + 1`.
pub struct LmsCascade {
    filters: Vec<LmsFilter>,
}

impl LmsCascade {
    pub fn new(order: usize, num_filters: usize) -> Self {
        LmsCascade { filters: (0..num_filters).map(|_| LmsFilter::new(order)).collect() }
    }

    /// Runs `signal` through the cascade, writing the final-stage residual to `residual`. Filter
    /// state is freshly zeroed for every call, matching the per-block re-initialization the
    /// reference encoder performs.
    pub fn predict(&mut self, signal: &[i32], residual: &mut [i32]) {
        for filter in &mut self.filters {
            filter.reset();
        }

        for (i, &x) in signal.iter().enumerate() {
            let mut v = x;
            for filter in &mut self.filters {
                v = filter.step(v);
            }
            residual[i] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cascade_reduces_energy_on_correlated_signal() {
        let n = 2048;
        let signal: Vec<i32> =
            (0..n).map(|i| (((i as f64) * 0.05).sin() * 8000.0) as i32).collect();

        let mut cascade = LmsCascade::new(4, 2);
        let mut residual = vec![0i32; n];
        cascade.predict(&signal, &mut residual);

        let input_energy: f64 = signal.iter().map(|&v| (v as f64).powi(2)).sum();
        // Skip the short adaptation transient at the start of the block.
        let residual_energy: f64 =
            residual.iter().skip(256).map(|&v| (v as f64).powi(2)).sum();
        let input_energy_tail: f64 =
            signal.iter().skip(256).map(|&v| (v as f64).powi(2)).sum();
        assert!(residual_energy < input_energy_tail);
        let _ = input_energy;
    }

    #[test]
    fn verify_reinitializes_between_blocks() {
        let mut cascade = LmsCascade::new(2, 1);
        let a = vec![100i32; 64];
        let mut out_a = vec![0i32; 64];
        cascade.predict(&a, &mut out_a);

        let mut out_a2 = vec![0i32; 64];
        cascade.predict(&a, &mut out_a2);

        assert_eq!(out_a, out_a2);
    }
}
