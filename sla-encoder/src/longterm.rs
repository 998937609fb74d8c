// SLA
// Copyright (c) 2019 The SLA Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Long-term (pitch) prediction: finds a periodic lag in the PARCOR residual and fits a short
//! FIR predictor centered on it, removing the residual periodicity a short-order PARCOR filter
//! cannot reach.

use sla_core::format::{
    LONGTERM_MAX_PERIOD, LONGTERM_MIN_PITCH_THRESHOLD, LONGTERM_NUM_PITCH_CANDIDATES,
};
use sla_core::util::round_away_from_zero;

/// A long-term predictor: a pitch period and a set of quantized FIR coefficients centered on it.
/// `period == 0` means long-term prediction is disabled for this channel/block (no usable
/// periodicity was found, or fitting the coefficients failed).
#[derive(Debug, Clone)]
pub struct LongTermCoefficients {
    pub period: u32,
    /// Quantized taps, in Q1.31 (same top-of-word convention as PARCOR), ordered from the
    /// earliest tap (`n - period - order/2`) to the latest (`n - period + order/2`).
    pub code: Vec<i32>,
}

impl LongTermCoefficients {
    pub fn disabled() -> Self {
        LongTermCoefficients { period: 0, code: Vec::new() }
    }

    pub fn is_enabled(&self) -> bool {
        self.period != 0
    }
}

/// Finds the best pitch period and fits a least-squares FIR predictor of `order + 1` taps
/// centered on it. Owns every scratch buffer the fit needs (normal-equations matrix, per-sample
/// tap vector, quantized coefficient buffer) sized to `max_order + 1` at construction, so
/// [`Self::calculate_coef`] never allocates beyond the one coefficient `Vec` it hands back in the
/// winning [`LongTermCoefficients`].
pub struct LongTermCalculator {
    max_order: usize,
    ata: Vec<Vec<f64>>,
    atb: Vec<f64>,
    x: Vec<f64>,
    taps: Vec<f64>,
    code: Vec<i32>,
}

impl LongTermCalculator {
    pub fn new(max_order: usize) -> Self {
        let max_taps = max_order + 1;
        LongTermCalculator {
            max_order,
            ata: vec![vec![0.0f64; max_taps]; max_taps],
            atb: vec![0.0f64; max_taps],
            x: vec![0.0f64; max_taps],
            taps: vec![0.0f64; max_taps],
            code: vec![0i32; max_taps],
        }
    }

    /// Searches `residual` (the PARCOR stage's output, as `f64` for the least-squares fit) for a
    /// usable pitch period and fits `order + 1` taps around it. Returns
    /// [`LongTermCoefficients::disabled`] rather than an error when no usable period is found or
    /// the fit is singular, matching the locally-recoverable policy long-term prediction failure
    /// gets (the reference encoder simply turns the predictor off for the block).
    pub fn calculate_coef(&mut self, residual: &[f64], order: usize) -> LongTermCoefficients {
        debug_assert!(order <= self.max_order);
        let half = (order / 2) as i64;
        let n = residual.len();
        if n < LONGTERM_MIN_PITCH_THRESHOLD as usize * 2 {
            return LongTermCoefficients::disabled();
        }

        let max_period = (LONGTERM_MAX_PERIOD as usize).min(n / 2);
        let min_period = LONGTERM_MIN_PITCH_THRESHOLD as usize;
        if min_period >= max_period {
            return LongTermCoefficients::disabled();
        }

        let mut candidates: Vec<(usize, f64)> = (min_period..max_period)
            .map(|period| (period, normalized_autocorrelation(residual, period)))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(LONGTERM_NUM_PITCH_CANDIDATES as usize);

        let num_taps = order + 1;
        let mut best: Option<(u32, f64)> = None;
        let mut best_code: Vec<i32> = Vec::new();
        for (period, _score) in candidates {
            if let Some(residual_energy) = self.fit_taps(residual, period, order, half) {
                if best.as_ref().map(|(_, e)| residual_energy < *e).unwrap_or(true) {
                    best = Some((period as u32, residual_energy));
                    best_code = self.code[..num_taps].to_vec();
                }
            }
        }

        match best {
            Some((period, _)) => LongTermCoefficients { period, code: best_code },
            None => LongTermCoefficients::disabled(),
        }
    }

    /// Least-squares fit of `order + 1` taps predicting `residual[n]` from
    /// `residual[n - period - half ..= n - period + half]`, samples before index 0 treated as 0.
    /// Leaves the quantized taps in `self.code[..order + 1]` and returns the resulting residual
    /// energy, or `None` if the normal equations are singular.
    fn fit_taps(&mut self, residual: &[f64], period: usize, order: usize, half: i64) -> Option<f64> {
        let num_taps = order + 1;
        let n = residual.len();
        if n <= period {
            return None;
        }

        let tap_at = |i: usize, j: usize| -> f64 {
            let idx = i as i64 - period as i64 - half + j as i64;
            if idx < 0 || idx as usize >= n {
                0.0
            } else {
                residual[idx as usize]
            }
        };

        for row in &mut self.ata[..num_taps] {
            row[..num_taps].fill(0.0);
        }
        self.atb[..num_taps].fill(0.0);

        for i in period..n {
            for j in 0..num_taps {
                self.taps[j] = tap_at(i, j);
            }
            for a in 0..num_taps {
                self.atb[a] += self.taps[a] * residual[i];
                for b in 0..num_taps {
                    self.ata[a][b] += self.taps[a] * self.taps[b];
                }
            }
        }

        if !solve_linear_system(&mut self.ata[..num_taps], &mut self.atb[..num_taps], &mut self.x[..num_taps]) {
            return None;
        }

        for j in 0..num_taps {
            let scale = f64::from(1u32 << 15);
            let rounded = round_away_from_zero(self.x[j] * scale).clamp(-32768.0, 32767.0) as i32;
            self.code[j] = rounded << 16;
        }

        let mut residual_energy = 0.0;
        for i in period..n {
            let mut predicted = 0.0f64;
            for j in 0..num_taps {
                predicted += self.x[j] * tap_at(i, j);
            }
            let e = residual[i] - predicted;
            residual_energy += e * e;
        }

        Some(residual_energy)
    }
}

fn normalized_autocorrelation(signal: &[f64], lag: usize) -> f64 {
    let n = signal.len();
    if lag >= n {
        return 0.0;
    }
    let mut num = 0.0;
    let mut energy = 0.0;
    for i in lag..n {
        num += signal[i] * signal[i - lag];
        energy += signal[i - lag] * signal[i - lag];
    }
    if energy <= 0.0 {
        0.0
    } else {
        num / energy
    }
}

/// Solves `a * x = b` in place via Gaussian elimination with partial pivoting, writing the
/// solution into `x`. Returns `false` if `a` is (numerically) singular, leaving `x` unspecified.
fn solve_linear_system(a: &mut [Vec<f64>], b: &mut [f64], x: &mut [f64]) -> bool {
    let n = b.len();
    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_val = a[col][col].abs();
        for row in (col + 1)..n {
            if a[row][col].abs() > pivot_val {
                pivot_row = row;
                pivot_val = a[row][col].abs();
            }
        }
        if pivot_val < 1e-12 {
            return false;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    true
}

/// Applies a fitted long-term predictor to an integer residual stream, producing the
/// longer-term residual. Bit-exact: each tap multiply is `i64` arithmetic followed by an
/// arithmetic right shift of 31 bits, matching the PARCOR lattice's fixed-point convention.
pub fn predict(coef: &LongTermCoefficients, order: usize, signal: &[i32], residual: &mut [i32]) {
    if !coef.is_enabled() {
        residual.copy_from_slice(signal);
        return;
    }

    let half = (order / 2) as i64;
    let period = coef.period as i64;
    let n = signal.len() as i64;

    for (i, out) in residual.iter_mut().enumerate() {
        let mut predicted: i64 = 0;
        for (j, &c) in coef.code.iter().enumerate() {
            let idx = i as i64 - period - half + j as i64;
            let tap = if idx < 0 || idx >= n { 0 } else { i64::from(signal[idx as usize]) };
            predicted += (i64::from(c) * tap) >> 31;
        }
        *out = signal[i] - predicted as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_disabled_on_short_signal() {
        let mut calc = LongTermCalculator::new(2);
        let residual: Vec<f64> = vec![0.0; 8];
        let coef = calc.calculate_coef(&residual, 2);
        assert!(!coef.is_enabled());
    }

    #[test]
    fn verify_finds_periodic_signal() {
        let period = 64usize;
        let n = 1024usize;
        let residual: Vec<f64> =
            (0..n).map(|i| ((i % period) as f64 - period as f64 / 2.0)).collect();

        let mut calc = LongTermCalculator::new(2);
        let coef = calc.calculate_coef(&residual, 2);
        assert!(coef.is_enabled());
        // Should lock onto the true period or one of its low multiples/submultiples.
        assert!(coef.period as usize % period == 0 || period % coef.period as usize == 0);
    }

    #[test]
    fn verify_predict_passthrough_when_disabled() {
        let coef = LongTermCoefficients::disabled();
        let signal = vec![1, 2, 3, 4, 5];
        let mut residual = vec![0i32; 5];
        predict(&coef, 2, &signal, &mut residual);
        assert_eq!(residual, signal);
    }
}
