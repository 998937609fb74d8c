// SLA
// Copyright (c) 2019 The SLA Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PARCOR (reflection coefficient) linear prediction: `ParcorAnalyzer` derives coefficients from
//! a windowed double-precision frame via Levinson-Durbin recursion, and `ParcorSynthesizer` runs
//! the corresponding integer lattice filter to turn a signal into a residual (forward/analysis
//! direction) bit-exactly, the direction this encoder always runs it in.

use sla_core::errors::{failed_to_calculate_coef, Result};
use sla_core::format::{PARCOR_COEF_LOW_ORDER_THRESHOLD, PARCOR_QBITS_HIGH, PARCOR_QBITS_LOW};
use sla_core::util::round_away_from_zero;

/// Quantized PARCOR coefficients, one entry per order `1..=order`, each left-shifted so its
/// quantization scale sits at bit 31 (a uniform Q1.31 fixed-point representation), regardless of
/// the per-order quantization width actually used to round it.
#[derive(Debug, Clone)]
pub struct ParcorCoefficients {
    /// `code[i]` is the quantized reflection coefficient for order `i + 1`, in Q1.31.
    pub code: Vec<i32>,
    /// The quantization bit width used for each order (needed to know how many wire bits to
    /// write; the Q1.31 shift itself is uniform).
    pub qbits: Vec<u32>,
}

impl ParcorCoefficients {
    pub fn order(&self) -> usize {
        self.code.len()
    }
}

/// Computes the autocorrelation of `signal` for lags `0..=max_lag`.
fn autocorrelation(signal: &[f64], max_lag: usize) -> Vec<f64> {
    let n = signal.len();
    let mut r = vec![0.0f64; max_lag + 1];
    for (lag, out) in r.iter_mut().enumerate() {
        let mut sum = 0.0;
        for i in lag..n {
            sum += signal[i] * signal[i - lag];
        }
        *out = sum;
    }
    r
}

/// Quantizes a reflection coefficient in `(-1.0, 1.0)` to Q1.31, rounding the magnitude to
/// `qbits` bits of precision before widening back up to the full word.
fn quantize(k: f64, qbits: u32) -> i32 {
    let scale = f64::from(1u32 << (qbits - 1));
    let rounded = round_away_from_zero(k * scale).clamp(-scale, scale - 1.0) as i32;
    rounded << (32 - qbits)
}

/// Derives PARCOR coefficients for `order` from a windowed, double-precision analysis frame via
/// Levinson-Durbin recursion. `k[0]` is fixed at `0.0` by construction (the recursion never
/// produces it; only `k[1..=order]` are returned).
pub struct ParcorAnalyzer {
    max_order: usize,
}

/// Runs the shared Levinson-Durbin recursion, returning `k[1..=order]` and the final prediction
/// error variance. Both [`ParcorAnalyzer::calculate_coef`] and
/// [`ParcorAnalyzer::estimate_residual_variance`] build on this.
fn levinson_durbin(signal: &[f64], order: usize) -> Result<(Vec<f64>, f64)> {
    if order == 0 || signal.is_empty() {
        return failed_to_calculate_coef("order must be positive and signal non-empty");
    }

    let r = autocorrelation(signal, order);
    let mut error = r[0];
    if error <= 0.0 {
        return failed_to_calculate_coef("non-positive zero-lag autocorrelation");
    }

    let mut a = vec![0.0f64; order + 1];
    a[0] = 1.0;
    let mut k_values = vec![0.0f64; order + 1];

    for i in 1..=order {
        let mut acc = r[i];
        for j in 1..i {
            acc += a[j] * r[i - j];
        }
        let k = -acc / error;
        if !k.is_finite() {
            return failed_to_calculate_coef("reflection coefficient is not finite");
        }
        k_values[i] = k;

        let mut new_a = a.clone();
        for j in 1..i {
            new_a[j] = a[j] + k * a[i - j];
        }
        new_a[i] = k;
        a = new_a;

        error *= 1.0 - k * k;
        if error <= 0.0 {
            return failed_to_calculate_coef("prediction error variance collapsed to zero");
        }
    }

    Ok((k_values, error))
}

impl ParcorAnalyzer {
    pub fn new(max_order: usize) -> Self {
        ParcorAnalyzer { max_order }
    }

    /// Runs Levinson-Durbin over `signal`'s autocorrelation up to `order` (`<= max_order`),
    /// returning quantized reflection coefficients. Fails with
    /// [`sla_core::errors::Error::FailedToCalculateCoef`] if the recursion hits a non-positive
    /// prediction-error variance, the numerical breakdown condition the reference encoder treats
    /// as fatal for the call.
    pub fn calculate_coef(&self, signal: &[f64], order: usize) -> Result<ParcorCoefficients> {
        debug_assert!(order <= self.max_order);
        let (k_values, _error) = levinson_durbin(signal, order)?;

        let mut code = Vec::with_capacity(order);
        let mut qbits = Vec::with_capacity(order);
        for (idx, &k) in k_values.iter().enumerate().skip(1) {
            let bits = if (idx as u32) < PARCOR_COEF_LOW_ORDER_THRESHOLD {
                PARCOR_QBITS_LOW
            } else {
                PARCOR_QBITS_HIGH
            };
            code.push(quantize(k.clamp(-0.999_999, 0.999_999), bits));
            qbits.push(bits);
        }

        Ok(ParcorCoefficients { code, qbits })
    }

    /// Estimates the per-sample prediction-error variance an order-`order` PARCOR fit would
    /// leave behind, without quantizing coefficients. Used by the block partition estimator's
    /// cheap cost proxy, where only the resulting entropy estimate matters.
    pub fn estimate_residual_variance(&self, signal: &[f64], order: usize) -> Result<f64> {
        debug_assert!(order <= self.max_order);
        let (_k_values, error) = levinson_durbin(signal, order)?;
        Ok((error / signal.len() as f64).max(1e-9))
    }
}

/// Runs the integer PARCOR lattice filter in the forward (analysis) direction: given a signal and
/// a set of quantized reflection coefficients, produces the residual the coefficients cannot
/// predict away. Bit-exact: every coefficient multiply is `i64` arithmetic followed by an
/// arithmetic right shift of 31 bits, the shift that recovers the original scale regardless of
/// which per-order quantization width was used to build the Q1.31 code.
pub struct ParcorSynthesizer {
    /// Backward-error history, one slot per order, seeded to zero at the start of each block.
    backward: Vec<i64>,
    /// The next sample's backward-error history, built up alongside `backward` and swapped in
    /// once the sample is done; avoids cloning `backward` every sample to snapshot its
    /// pre-update values.
    backward_next: Vec<i64>,
}

impl ParcorSynthesizer {
    pub fn new(max_order: usize) -> Self {
        ParcorSynthesizer {
            backward: vec![0i64; max_order + 1],
            backward_next: vec![0i64; max_order + 1],
        }
    }

    /// Computes the residual of `signal` under the lattice filter described by `coef`, writing
    /// it into `residual` (same length as `signal`).
    pub fn predict(&mut self, coef: &ParcorCoefficients, signal: &[i32], residual: &mut [i32]) {
        let order = coef.order();
        self.backward[..=order].fill(0);
        self.backward_next[..=order].fill(0);

        for (n, (&x, out)) in signal.iter().zip(residual.iter_mut()).enumerate() {
            let mut forward = i64::from(x);
            self.backward_next[0] = i64::from(x);

            for i in 1..=order {
                let k = i64::from(coef.code[i - 1]);
                let b_prev = if n == 0 { 0 } else { self.backward[i - 1] };
                let new_forward = forward - ((k * b_prev) >> 31);
                let new_backward = b_prev - ((k * forward) >> 31);
                self.backward_next[i] = new_backward;
                forward = new_forward;
            }
            *out = forward as i32;
            std::mem::swap(&mut self.backward, &mut self.backward_next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_order_one_predicts_constant_dc() {
        // A constant signal is perfectly predicted by a first-order predictor with k = -1.
        let signal = vec![1000.0f64; 64];
        let analyzer = ParcorAnalyzer::new(4);
        let coef = analyzer.calculate_coef(&signal, 1).unwrap();
        assert_eq!(coef.order(), 1);
        // k ~ -1.0 in Q1.31, so the raw coefficient should be close to i32::MIN.
        assert!(coef.code[0] < -(1i32 << 29));
    }

    #[test]
    fn verify_zero_signal_is_rejected() {
        let signal = vec![0.0f64; 32];
        let analyzer = ParcorAnalyzer::new(4);
        assert!(analyzer.calculate_coef(&signal, 2).is_err());
    }

    #[test]
    fn verify_lattice_residual_reduces_energy_on_predictable_signal() {
        let n = 256;
        let signal_f: Vec<f64> =
            (0..n).map(|i| (i as f64 * 0.1).sin() * 10000.0).collect();
        let signal_i: Vec<i32> = signal_f.iter().map(|&v| v as i32).collect();

        let analyzer = ParcorAnalyzer::new(8);
        let coef = analyzer.calculate_coef(&signal_f, 4).unwrap();

        let mut synth = ParcorSynthesizer::new(8);
        let mut residual = vec![0i32; n];
        synth.predict(&coef, &signal_i, &mut residual);

        let input_energy: f64 = signal_i.iter().map(|&v| (v as f64).powi(2)).sum();
        let residual_energy: f64 = residual.iter().map(|&v| (v as f64).powi(2)).sum();
        assert!(residual_energy < input_energy);
    }
}
