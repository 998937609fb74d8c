// SLA
// Copyright (c) 2019 The SLA Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Orchestrates a single block: per-channel normalization, optional mid/side decorrelation,
//! silence detection, windowing, pre-emphasis, the PARCOR/long-term/LMS predictor cascade, and
//! the exact bit layout written to the stream (sync code, reserved offset/CRC fields, per-channel
//! coefficients and residual payload).

use sla_core::checksum::calculate_crc16;
use sla_core::errors::{insufficient_buffer, invalid_argument, Result};
use sla_core::format::{
    ChProcessMethod, EncodeParameter, WaveFormat, WindowFunctionType, BLOCK_CRC16_CALC_START_OFFSET,
    BLOCK_SYNC_CODE, LONGTERM_PITCH_PERIOD_BITS, LONGTERM_QBITS, PRE_EMPHASIS_COEFFICIENT_SHIFT,
};
use sla_core::io::{BitWriter, SeekOrigin};
use sla_core::util::{
    apply_window, lr_to_ms_double, lr_to_ms_int32, make_blackman_window, make_hann_window,
    make_rectangular_window, make_sin_window, pre_emphasis_double, pre_emphasis_int32,
    sint32_to_uint32,
};

use crate::coder;
use crate::lms::LmsCascade;
use crate::longterm::{self, LongTermCalculator, LongTermCoefficients};
use crate::parcor::{ParcorAnalyzer, ParcorCoefficients, ParcorSynthesizer};

/// Per-channel predictor state, owned for the lifetime of the encoder handle and reused across
/// blocks (the individual predictor stages re-initialize their own adaptive state per call, per
/// the per-block re-initialization policy). Every scratch buffer a block's worth of samples needs
/// (`double`/`int32`/`window`/`residual`/`tmp_residual`/`residual_f`) is sized to
/// `max_block_samples` once here; `process_channel` only ever writes into prefixes of these, so no
/// encoding path past construction allocates.
pub struct ChannelPipeline {
    parcor_analyzer: ParcorAnalyzer,
    parcor_synth: ParcorSynthesizer,
    longterm_calc: LongTermCalculator,
    lms_cascade: LmsCascade,
    window: Vec<f64>,
    double: Vec<f64>,
    int32: Vec<i32>,
    residual: Vec<i32>,
    tmp_residual: Vec<i32>,
    residual_f: Vec<f64>,
}

impl ChannelPipeline {
    pub fn new(
        parcor_order: usize,
        longterm_order: usize,
        lms_order: usize,
        lms_num_filters: usize,
        max_block_samples: usize,
    ) -> Self {
        ChannelPipeline {
            parcor_analyzer: ParcorAnalyzer::new(parcor_order),
            parcor_synth: ParcorSynthesizer::new(parcor_order),
            longterm_calc: LongTermCalculator::new(longterm_order),
            lms_cascade: LmsCascade::new(lms_order, lms_num_filters),
            window: vec![0.0f64; max_block_samples],
            double: vec![0.0f64; max_block_samples],
            int32: vec![0i32; max_block_samples],
            residual: vec![0i32; max_block_samples],
            tmp_residual: vec![0i32; max_block_samples],
            residual_f: vec![0.0f64; max_block_samples],
        }
    }
}

/// The outcome of running one channel's samples through the predictor cascade. The residual
/// itself isn't carried here: on return it always sits in the pipeline's own `residual` buffer
/// (`[..n]`), which the caller reads directly while writing the bitstream.
struct ChannelResult {
    silence: bool,
    parcor: Option<ParcorCoefficients>,
    longterm: Option<LongTermCoefficients>,
}

fn is_all_zero(signal: &[i32]) -> bool {
    signal.iter().all(|&s| s == 0)
}

fn build_window_into(kind: WindowFunctionType, window: &mut [f64]) {
    let num_samples = window.len();
    match kind {
        WindowFunctionType::Rectangular => make_rectangular_window(window),
        WindowFunctionType::Sin => make_sin_window(window, num_samples),
        WindowFunctionType::Hann => make_hann_window(window, num_samples),
        WindowFunctionType::Blackman => make_blackman_window(window, num_samples),
    }
}

/// Runs steps 3-8 of the per-channel pipeline (silence detection through LMS cascade) on the
/// first `n` samples of `pipeline`'s own `double`/`int32` scratch, which the caller has already
/// normalized (and, for stereo, mid/side-decorrelated) in place. The final residual is left in
/// `pipeline.residual[..n]`.
fn process_channel(
    pipeline: &mut ChannelPipeline,
    window_kind: WindowFunctionType,
    parcor_order: usize,
    longterm_order: usize,
    n: usize,
) -> Result<ChannelResult> {
    if is_all_zero(&pipeline.int32[..n]) {
        return Ok(ChannelResult { silence: true, parcor: None, longterm: None });
    }

    build_window_into(window_kind, &mut pipeline.window[..n]);
    apply_window(&pipeline.window[..n], &mut pipeline.double[..n], n);

    pre_emphasis_double(&mut pipeline.double[..n], PRE_EMPHASIS_COEFFICIENT_SHIFT);
    pre_emphasis_int32(&mut pipeline.int32[..n], PRE_EMPHASIS_COEFFICIENT_SHIFT);

    let parcor = pipeline.parcor_analyzer.calculate_coef(&pipeline.double[..n], parcor_order)?;
    pipeline.parcor_synth.predict(&parcor, &pipeline.int32[..n], &mut pipeline.residual[..n]);

    let longterm = if longterm_order > 0 {
        for i in 0..n {
            pipeline.residual_f[i] = f64::from(pipeline.residual[i]);
        }
        let lt = pipeline.longterm_calc.calculate_coef(&pipeline.residual_f[..n], longterm_order);
        if lt.is_enabled() {
            longterm::predict(&lt, longterm_order, &pipeline.residual[..n], &mut pipeline.tmp_residual[..n]);
            std::mem::swap(&mut pipeline.residual, &mut pipeline.tmp_residual);
        }
        Some(lt)
    } else {
        None
    };

    pipeline.lms_cascade.predict(&pipeline.residual[..n], &mut pipeline.tmp_residual[..n]);
    std::mem::swap(&mut pipeline.residual, &mut pipeline.tmp_residual);

    Ok(ChannelResult { silence: false, parcor: Some(parcor), longterm })
}

/// Writes a quantized, top-of-word-shifted coefficient to the bitstream: right-shifts it back
/// down to its native `qbits` width, zig-zag maps it to unsigned, and writes exactly `qbits`
/// bits.
fn write_quantized_coef(bw: &mut BitWriter<'_>, code: i32, qbits: u32) -> Result<()> {
    let raw = code >> (32 - qbits);
    bw.put_bits(qbits, sint32_to_uint32(raw))
}

/// Normalizes raw 32-bit-domain PCM for one channel into the double and downshifted-integer
/// domains §4.7 step 1 describes, writing into the caller-provided scratch slices in place.
fn normalize_channel_into(input: &[i32], bit_per_sample: u32, double: &mut [f64], int32: &mut [i32]) {
    let shift = 32 - bit_per_sample;
    for (idx, &v) in input.iter().enumerate() {
        double[idx] = f64::from(v) * 2f64.powi(-31);
        int32[idx] = v >> shift;
    }
}

/// Encodes one block of `num_samples` samples starting at `offset` into each of `input`'s
/// per-channel slices, writing the result into `data` and returning the number of bytes written.
/// `channels` supplies one [`ChannelPipeline`] per channel, indexed the same way as `input`; the
/// pipelines' own scratch buffers are reused here, so encoding a block allocates nothing beyond
/// what `coder::encode`'s Rice parameter search and the predictor stages' own small
/// coefficient-sized `Vec`s need.
pub fn encode_block(
    channels: &mut [ChannelPipeline],
    wave_format: WaveFormat,
    encode_param: EncodeParameter,
    input: &[&[i32]],
    offset: usize,
    num_samples: u32,
    data: &mut [u8],
) -> Result<u32> {
    let num_channels = wave_format.num_channels as usize;
    if input.len() != num_channels || channels.len() != num_channels {
        return invalid_argument("channel count mismatch between input, pipelines, and wave format");
    }
    if encode_param.ch_process_method == ChProcessMethod::StereoMs && num_channels != 2 {
        return Err(sla_core::errors::Error::InvalidChProcessMethod);
    }

    let n = num_samples as usize;
    for ch in 0..num_channels {
        let src = &input[ch][offset..offset + n];
        normalize_channel_into(
            src,
            wave_format.bit_per_sample,
            &mut channels[ch].double[..n],
            &mut channels[ch].int32[..n],
        );
    }

    if encode_param.ch_process_method == ChProcessMethod::StereoMs {
        let (left, right) = channels.split_at_mut(1);
        lr_to_ms_double(&mut left[0].double[..n], &mut right[0].double[..n], n);
        lr_to_ms_int32(&mut left[0].int32[..n], &mut right[0].int32[..n], n);
    }

    let mut results = Vec::with_capacity(num_channels);
    for ch in 0..num_channels {
        let result = process_channel(
            &mut channels[ch],
            encode_param.window_function_type,
            encode_param.parcor_order as usize,
            encode_param.longterm_order as usize,
            n,
        )?;
        results.push(result);
    }

    let mut bw = BitWriter::new(data);
    bw.put_bits(16, u32::from(BLOCK_SYNC_CODE))?;
    bw.put_bits(32, 0)?; // reserved next-block offset, patched below
    bw.put_bits(16, 0)?; // reserved CRC16, patched below
    bw.put_bits(16, num_samples)?;

    for (ch, result) in results.iter().enumerate() {
        bw.put_bit(result.silence)?;
        if result.silence {
            continue;
        }
        let parcor = result.parcor.as_ref().expect("non-silent channel always has parcor coefficients");
        for (&code, &qbits) in parcor.code.iter().zip(parcor.qbits.iter()) {
            write_quantized_coef(&mut bw, code, qbits)?;
        }

        let longterm = result.longterm.as_ref();
        let has_longterm = longterm.map(LongTermCoefficients::is_enabled).unwrap_or(false);
        bw.put_bit(has_longterm)?;
        if has_longterm {
            let lt = longterm.unwrap();
            bw.put_bits(LONGTERM_PITCH_PERIOD_BITS, lt.period)?;
            for &code in &lt.code {
                write_quantized_coef(&mut bw, code, LONGTERM_QBITS)?;
            }
        }

        coder::encode(&mut bw, &channels[ch].residual[..n])?;
    }

    bw.flush()?;
    let output_size = bw.tell();
    if output_size as usize > data.len() {
        return insufficient_buffer();
    }

    let crc = calculate_crc16(&data[BLOCK_CRC16_CALC_START_OFFSET as usize..output_size as usize]);
    let mut bw = BitWriter::new(data);
    bw.seek(SeekOrigin::Start, 2)?;
    bw.put_bits(32, output_size - 6)?;
    bw.put_bits(16, u32::from(crc))?;

    Ok(output_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_params(max_block: u32) -> EncodeParameter {
        EncodeParameter {
            parcor_order: 4,
            longterm_order: 2,
            lms_order_per_filter: 4,
            num_lms_filter_cascade: 1,
            max_num_block_samples: max_block,
            ch_process_method: ChProcessMethod::Raw,
            window_function_type: WindowFunctionType::Hann,
        }
    }

    #[test]
    fn verify_silent_block_is_tiny() {
        let wf = WaveFormat { num_channels: 1, sampling_rate: 44100, bit_per_sample: 16 };
        let ep = default_params(4096);
        let input = vec![0i32; 2048];
        let channels_input: Vec<&[i32]> = vec![&input];

        let mut pipelines = vec![ChannelPipeline::new(4, 2, 4, 1, 4096)];
        let mut data = vec![0u8; 8192];
        let size = encode_block(&mut pipelines, wf, ep, &channels_input, 0, 2048, &mut data).unwrap();
        assert!(size < 16);
    }

    #[test]
    fn verify_offset_and_crc_integrity() {
        let wf = WaveFormat { num_channels: 1, sampling_rate: 44100, bit_per_sample: 16 };
        let ep = default_params(4096);
        let n = 2048usize;
        let input: Vec<i32> = (0..n).map(|i| (((i as f64) * 0.05).sin() * 16000.0) as i32).collect();
        let channels_input: Vec<&[i32]> = vec![&input];

        let mut pipelines = vec![ChannelPipeline::new(4, 2, 4, 1, 4096)];
        let mut data = vec![0u8; 16384];
        let size = encode_block(&mut pipelines, wf, ep, &channels_input, 0, n as u32, &mut data).unwrap();

        let offset = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
        assert_eq!(offset + 6, size);

        let stored_crc = u16::from_be_bytes([data[6], data[7]]);
        let recomputed = calculate_crc16(&data[8..size as usize]);
        assert_eq!(stored_crc, recomputed);
    }

    #[test]
    fn verify_stereo_ms_rejects_mono() {
        let wf = WaveFormat { num_channels: 1, sampling_rate: 44100, bit_per_sample: 16 };
        let mut ep = default_params(4096);
        ep.ch_process_method = ChProcessMethod::StereoMs;
        let input = vec![0i32; 1024];
        let channels_input: Vec<&[i32]> = vec![&input];
        let mut pipelines = vec![ChannelPipeline::new(4, 2, 4, 1, 4096)];
        let mut data = vec![0u8; 4096];
        assert!(encode_block(&mut pipelines, wf, ep, &channels_input, 0, 1024, &mut data).is_err());
    }
}
