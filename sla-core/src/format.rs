// SLA
// Copyright (c) 2019 The SLA Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-format constants and the plain-data structs that describe a stream: [`WaveFormat`],
//! [`EncodeParameter`], and [`HeaderInfo`].

/// File signature, the first four bytes of every SLA stream: `"SL* "`.
pub const SIGNATURE: [u8; 4] = *b"SL* ";

/// Format version written into the file header.
pub const FORMAT_VERSION: u32 = 1;

/// Total size, in bytes, of the fixed file header (see the field table in the bitstream spec).
pub const HEADER_SIZE: u32 = 39;

/// Byte offset within the header where the CRC16-covered region begins (i.e. the first byte
/// after the CRC16 field itself).
pub const HEADER_CRC16_CALC_START_OFFSET: u32 = 10;

/// Byte offset, within a block, where the CRC16-covered region begins: immediately after the
/// sync code (2 bytes), the reserved offset field (4 bytes), and the CRC16 field itself (2
/// bytes).
pub const BLOCK_CRC16_CALC_START_OFFSET: u32 = 8;

/// Sentinel written into the provisional header's `max_block_size` field before the first pass
/// over the stream discovers the real value.
pub const MAX_BLOCK_SIZE_INVALID: u32 = 0xffff_ffff;

/// The block synchronization code.
pub const BLOCK_SYNC_CODE: u16 = 0xffff;

/// Upper bound on the number of interleaved channels a single encoder handle can ever support.
/// Chosen generously above any real multichannel format; `WaveFormat::num_channels` is still
/// bounded per-instance by the handle's `max_num_channels` capacity.
pub const MAX_CHANNELS: usize = 8;

/// The smallest block length, in samples, the partition estimator is ever allowed to choose
/// (except for a final, shorter remainder block).
pub const MIN_BLOCK_NUM_SAMPLES: u32 = 1024;

/// Granularity, in samples, of the block-partition search grid.
pub const SEARCH_BLOCK_NUM_SAMPLES_DELTA: u32 = 256;

/// PARCOR coefficient orders below this threshold are quantized to 16 bits; orders at or above
/// it are quantized to 8 bits (higher-order reflection coefficients contribute less to
/// prediction gain and tolerate coarser quantization).
pub const PARCOR_COEF_LOW_ORDER_THRESHOLD: u32 = 4;

/// Quantization bit width used for low-order PARCOR coefficients.
pub const PARCOR_QBITS_LOW: u32 = 16;

/// Quantization bit width used for high-order PARCOR coefficients.
pub const PARCOR_QBITS_HIGH: u32 = 8;

/// Fixed-point shift used by the pre-emphasis filter's coefficient, `1 - 2^-shift`.
pub const PRE_EMPHASIS_COEFFICIENT_SHIFT: u32 = 5;

/// Number of candidate pitch periods the long-term predictor evaluates before picking the best.
pub const LONGTERM_NUM_PITCH_CANDIDATES: u32 = 4;

/// Pitch periods at or beyond this value are treated as "no usable periodicity" and long-term
/// prediction is disabled for the channel.
pub const LONGTERM_MAX_PERIOD: u32 = 1024;

/// Pitch periods below this value are rejected: the coefficients' support window would run past
/// the start of the residual buffer.
pub const LONGTERM_MIN_PITCH_THRESHOLD: u32 = 32;

/// PARCOR bit width of the 10-bit pitch period field in the block bitstream.
pub const LONGTERM_PITCH_PERIOD_BITS: u32 = 10;

/// Quantization bit width for long-term predictor coefficients.
pub const LONGTERM_QBITS: u32 = 16;

/// How channels are jointly processed before per-channel prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChProcessMethod {
    /// Each channel is encoded independently.
    Raw = 0,
    /// Stereo mid/side decorrelation; requires exactly two channels.
    StereoMs = 1,
}

impl ChProcessMethod {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ChProcessMethod::Raw),
            1 => Some(ChProcessMethod::StereoMs),
            _ => None,
        }
    }
}

/// Analysis window applied before PARCOR analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunctionType {
    Rectangular = 0,
    Sin = 1,
    Hann = 2,
    Blackman = 3,
}

impl WindowFunctionType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(WindowFunctionType::Rectangular),
            1 => Some(WindowFunctionType::Sin),
            2 => Some(WindowFunctionType::Hann),
            3 => Some(WindowFunctionType::Blackman),
            _ => None,
        }
    }
}

/// Describes the PCM input: channel count, sampling rate, and bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub num_channels: u32,
    pub sampling_rate: u32,
    pub bit_per_sample: u32,
}

/// Tunable parameters of the encoding pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParameter {
    pub parcor_order: u32,
    pub longterm_order: u32,
    pub lms_order_per_filter: u32,
    pub num_lms_filter_cascade: u32,
    pub max_num_block_samples: u32,
    pub ch_process_method: ChProcessMethod,
    pub window_function_type: WindowFunctionType,
}

/// Everything that goes into (and is discovered while writing) the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub wave_format: WaveFormat,
    pub encode_param: EncodeParameter,
    pub num_samples: u32,
    pub num_blocks: u32,
    pub max_block_size: u32,
}

/// The capacities an [`crate`]-consuming encoder handle is created with; runtime configuration
/// via `set_wave_format`/`set_encode_parameter` must fit within these bounds for the lifetime of
/// the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub max_num_channels: u32,
    pub max_num_block_samples: u32,
    pub max_parcor_order: u32,
    pub max_longterm_order: u32,
    pub max_lms_order_per_filter: u32,
}
