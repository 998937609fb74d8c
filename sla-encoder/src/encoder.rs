// SLA
// Copyright (c) 2019 The SLA Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The public encoder handle: [`Encoder`] owns every piece of scratch state a stream encoding
//! session needs (one [`crate::block::ChannelPipeline`] per channel slot), is configured via
//! [`Encoder::set_wave_format`]/[`Encoder::set_encode_parameter`], and drives either a single
//! block ([`Encoder::encode_block`]) or an entire stream ([`Encoder::encode_whole`]).
//!
//! [`Encoder::encode_header`] needs no handle state (the reference encoder exposes it as a free
//! function); it is kept as an associated function here for namespacing only.

use log::{debug, trace, warn};

use sla_core::checksum::calculate_crc16;
use sla_core::errors::{exceed_capacity, insufficient_buffer, invalid_argument, Result};
use sla_core::format::{
    EncodeParameter, EncoderConfig, HeaderInfo, WaveFormat, FORMAT_VERSION,
    HEADER_CRC16_CALC_START_OFFSET, HEADER_SIZE, MAX_BLOCK_SIZE_INVALID, MIN_BLOCK_NUM_SAMPLES,
    SIGNATURE,
};
use sla_core::io::{BitWriter, SeekOrigin};

use crate::block::{self, ChannelPipeline};
use crate::partition;

fn validate_wave_format(config: &EncoderConfig, wf: &WaveFormat) -> Result<()> {
    if wf.num_channels == 0 || wf.num_channels > config.max_num_channels {
        return exceed_capacity("num_channels exceeds the handle's max_num_channels capacity");
    }
    if wf.bit_per_sample == 0 || wf.bit_per_sample > 32 {
        return invalid_argument("bit_per_sample must be in 1..=32");
    }
    if wf.sampling_rate == 0 {
        return invalid_argument("sampling_rate must be non-zero");
    }
    Ok(())
}

fn validate_encode_parameter(config: &EncoderConfig, ep: &EncodeParameter) -> Result<()> {
    if ep.parcor_order > config.max_parcor_order {
        return exceed_capacity("parcor_order exceeds the handle's max_parcor_order capacity");
    }
    if ep.longterm_order > config.max_longterm_order {
        return exceed_capacity("longterm_order exceeds the handle's max_longterm_order capacity");
    }
    if ep.lms_order_per_filter > config.max_lms_order_per_filter {
        return exceed_capacity(
            "lms_order_per_filter exceeds the handle's max_lms_order_per_filter capacity",
        );
    }
    if ep.max_num_block_samples < MIN_BLOCK_NUM_SAMPLES
        || ep.max_num_block_samples > config.max_num_block_samples
    {
        return exceed_capacity(
            "max_num_block_samples must be within [MIN_BLOCK_NUM_SAMPLES, the handle's \
             max_num_block_samples capacity]",
        );
    }
    if ep.max_num_block_samples > 0xffff {
        return invalid_argument("max_num_block_samples must fit the 16-bit wire field");
    }
    Ok(())
}

/// The encoder handle described by §3/§5 of the bitstream spec: single-owner, single-threaded,
/// created once with fixed capacities, configured, then driven repeatedly.
///
/// `Encoder` is intentionally `!Clone`: duplicating the handle would duplicate mutable predictor
/// state two call sites could then race on, exactly the "not reentrant" hazard §5 describes.
/// Parallelism across distinct streams is expressed by constructing more than one `Encoder`.
pub struct Encoder {
    config: EncoderConfig,
    wave_format: Option<WaveFormat>,
    encode_param: Option<EncodeParameter>,
    /// One pipeline per channel slot the handle's capacity allows; rebuilt whenever
    /// [`Self::set_encode_parameter`] changes the predictor orders.
    pipelines: Vec<ChannelPipeline>,
    /// `Cell` is `!Sync`; carrying one structurally opts `Encoder` out of the auto-derived
    /// `Sync` impl, the type-level expression of "not reentrant" in §5 — a `&Encoder` shared
    /// across threads could not be used to call any `&mut self` method anyway, but this also
    /// blocks the narrower case of two threads each holding a distinct `&Encoder` into what they
    /// believe is read-only state.
    _not_sync: std::marker::PhantomData<std::cell::Cell<()>>,
}

impl Encoder {
    /// Creates a handle bounded by `config`. No wave format or encode parameter is configured
    /// yet; [`Self::encode_block`]/[`Self::encode_whole`] fail with
    /// [`sla_core::errors::Error::InvalidArgument`] until both are set.
    pub fn new(config: EncoderConfig) -> Self {
        Encoder {
            config,
            wave_format: None,
            encode_param: None,
            pipelines: Vec::new(),
            _not_sync: std::marker::PhantomData,
        }
    }

    /// Configures the input format. Fails with
    /// [`sla_core::errors::Error::ExceedHandleCapacity`] if `wf.num_channels` exceeds the
    /// capacity this handle was created with.
    pub fn set_wave_format(&mut self, wf: WaveFormat) -> Result<()> {
        validate_wave_format(&self.config, &wf)?;
        self.wave_format = Some(wf);
        Ok(())
    }

    /// Configures the encoding pipeline's tunables and (re)allocates the per-channel predictor
    /// state. Fails with [`sla_core::errors::Error::ExceedHandleCapacity`] if any order exceeds
    /// the capacity this handle was created with.
    pub fn set_encode_parameter(&mut self, ep: EncodeParameter) -> Result<()> {
        validate_encode_parameter(&self.config, &ep)?;
        let max_block_samples = self.config.max_num_block_samples as usize;
        self.pipelines = (0..self.config.max_num_channels as usize)
            .map(|_| {
                ChannelPipeline::new(
                    ep.parcor_order as usize,
                    ep.longterm_order as usize,
                    ep.lms_order_per_filter as usize,
                    ep.num_lms_filter_cascade as usize,
                    max_block_samples,
                )
            })
            .collect();
        self.encode_param = Some(ep);
        Ok(())
    }

    fn require_configured(&self) -> Result<(WaveFormat, EncodeParameter)> {
        match (self.wave_format, self.encode_param) {
            (Some(wf), Some(ep)) => Ok((wf, ep)),
            _ => invalid_argument(
                "encoder is not configured: call set_wave_format and set_encode_parameter first",
            ),
        }
    }

    /// Writes the fixed-size file header described in §6.1 into `data`. Takes no handle state:
    /// every field comes from `header`. Calling this twice with an identical `header` produces
    /// identical bytes (the CRC16 field is a pure function of the bytes that precede it).
    pub fn encode_header(header: &HeaderInfo, data: &mut [u8]) -> Result<()> {
        if (data.len() as u32) < HEADER_SIZE {
            return insufficient_buffer();
        }

        let mut bw = BitWriter::new(data);
        for &byte in &SIGNATURE {
            bw.put_bits(8, u32::from(byte))?;
        }
        bw.put_bits(32, HEADER_SIZE - 8)?;
        bw.put_bits(16, 0)?; // reserved CRC16, patched below
        bw.put_bits(32, FORMAT_VERSION)?;
        bw.put_bits(8, header.wave_format.num_channels)?;
        bw.put_bits(32, header.num_samples)?;
        bw.put_bits(32, header.wave_format.sampling_rate)?;
        bw.put_bits(8, header.wave_format.bit_per_sample)?;
        bw.put_bits(8, header.encode_param.parcor_order)?;
        bw.put_bits(8, header.encode_param.longterm_order)?;
        bw.put_bits(8, header.encode_param.lms_order_per_filter)?;
        bw.put_bits(8, header.encode_param.num_lms_filter_cascade)?;
        bw.put_bits(8, header.encode_param.ch_process_method as u32)?;
        bw.put_bits(32, header.num_blocks)?;
        bw.put_bits(16, header.encode_param.max_num_block_samples)?;
        bw.put_bits(32, header.max_block_size)?;
        bw.flush()?;

        let crc =
            calculate_crc16(&data[HEADER_CRC16_CALC_START_OFFSET as usize..HEADER_SIZE as usize]);
        let mut bw = BitWriter::new(data);
        bw.seek(SeekOrigin::Start, HEADER_CRC16_CALC_START_OFFSET - 2)?;
        bw.put_bits(16, u32::from(crc))?;
        Ok(())
    }

    /// Encodes a single block of `num_samples` samples (one slice per channel in `input`) into
    /// `data`, returning the number of bytes written. See §4.7 for the full per-block pipeline.
    pub fn encode_block(
        &mut self,
        input: &[&[i32]],
        num_samples: u32,
        data: &mut [u8],
    ) -> Result<u32> {
        let (wave_format, encode_param) = self.require_configured()?;
        let num_channels = wave_format.num_channels as usize;
        if input.len() != num_channels {
            return invalid_argument("input channel count does not match the configured wave format");
        }
        block::encode_block(
            &mut self.pipelines[..num_channels],
            wave_format,
            encode_param,
            input,
            0,
            num_samples,
            data,
        )
    }

    /// Encodes an entire stream: a provisional header, then every block the partition estimator
    /// chooses, then the header rewritten with the discovered `num_blocks`/`max_block_size`. See
    /// §4.8.
    pub fn encode_whole(
        &mut self,
        input: &[&[i32]],
        num_samples: u32,
        data: &mut [u8],
    ) -> Result<u32> {
        let (wave_format, encode_param) = self.require_configured()?;
        let num_channels = wave_format.num_channels as usize;
        if input.len() != num_channels {
            return invalid_argument("input channel count does not match the configured wave format");
        }

        debug!(
            "encoding {} samples across {} channel(s) at {} Hz",
            num_samples, num_channels, wave_format.sampling_rate
        );

        let mut provisional = HeaderInfo {
            wave_format,
            encode_param,
            num_samples,
            num_blocks: 0,
            max_block_size: MAX_BLOCK_SIZE_INVALID,
        };
        Self::encode_header(&provisional, data)?;

        let mut cur = HEADER_SIZE as usize;
        let mut offset = 0usize;
        let mut remaining = num_samples as usize;
        let mut num_blocks = 0u32;
        let mut max_block_size = 0u32;
        let max_num_block_samples = encode_param.max_num_block_samples;

        while remaining > 0 {
            let search_max_block = max_num_block_samples.min(remaining as u32);
            let lengths = partition::search_optimal_block_partitions(
                &input[0][offset..offset + search_max_block as usize],
                encode_param.parcor_order as usize,
                search_max_block,
            );

            for len in lengths {
                if remaining == 0 {
                    break;
                }
                let n = len.min(remaining as u32);

                if cur >= data.len() {
                    return insufficient_buffer();
                }
                let size = block::encode_block(
                    &mut self.pipelines[..num_channels],
                    wave_format,
                    encode_param,
                    input,
                    offset,
                    n,
                    &mut data[cur..],
                )?;
                cur += size as usize;
                if cur > data.len() {
                    return insufficient_buffer();
                }

                trace!("block {} encoded {} samples into {} bytes", num_blocks, n, size);
                num_blocks += 1;
                max_block_size = max_block_size.max(size);
                offset += n as usize;
                remaining -= n as usize;
            }
        }

        if num_blocks == 0 {
            warn!("encode_whole produced zero blocks for {} input samples", num_samples);
        }

        provisional.num_blocks = num_blocks;
        provisional.max_block_size = max_block_size;
        Self::encode_header(&provisional, data)?;

        Ok(cur as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand::rngs::SmallRng;
    use sla_core::format::{ChProcessMethod, WindowFunctionType};

    fn test_config() -> EncoderConfig {
        EncoderConfig {
            max_num_channels: 2,
            max_num_block_samples: 4096,
            max_parcor_order: 16,
            max_longterm_order: 4,
            max_lms_order_per_filter: 8,
        }
    }

    fn test_wave_format(num_channels: u32) -> WaveFormat {
        WaveFormat { num_channels, sampling_rate: 44_100, bit_per_sample: 16 }
    }

    fn test_encode_parameter() -> EncodeParameter {
        EncodeParameter {
            parcor_order: 4,
            longterm_order: 2,
            lms_order_per_filter: 4,
            num_lms_filter_cascade: 1,
            max_num_block_samples: 2048,
            ch_process_method: ChProcessMethod::Raw,
            window_function_type: WindowFunctionType::Hann,
        }
    }

    #[test]
    fn verify_set_wave_format_rejects_excess_channels() {
        let mut enc = Encoder::new(test_config());
        assert!(enc.set_wave_format(test_wave_format(3)).is_err());
        assert!(enc.set_wave_format(test_wave_format(2)).is_ok());
    }

    #[test]
    fn verify_set_encode_parameter_rejects_excess_order() {
        let mut enc = Encoder::new(test_config());
        let mut ep = test_encode_parameter();
        ep.parcor_order = 32;
        assert!(enc.set_encode_parameter(ep).is_err());
    }

    #[test]
    fn verify_header_rewrite_is_idempotent() {
        let header = HeaderInfo {
            wave_format: test_wave_format(1),
            encode_param: test_encode_parameter(),
            num_samples: 44_100,
            num_blocks: 11,
            max_block_size: 4096,
        };

        let mut a = vec![0u8; HEADER_SIZE as usize];
        let mut b = vec![0u8; HEADER_SIZE as usize];
        Encoder::encode_header(&header, &mut a).unwrap();
        Encoder::encode_header(&header, &mut b).unwrap();
        assert_eq!(a, b);

        let crc = u16::from_be_bytes([a[8], a[9]]);
        let recomputed = calculate_crc16(&a[HEADER_CRC16_CALC_START_OFFSET as usize..]);
        assert_eq!(crc, recomputed);
    }

    #[test]
    fn verify_header_too_small_buffer_fails() {
        let header = HeaderInfo {
            wave_format: test_wave_format(1),
            encode_param: test_encode_parameter(),
            num_samples: 100,
            num_blocks: 0,
            max_block_size: 0,
        };
        let mut tiny = vec![0u8; HEADER_SIZE as usize - 1];
        assert!(Encoder::encode_header(&header, &mut tiny).is_err());
    }

    #[test]
    fn verify_encode_whole_rewrites_num_blocks_and_max_block_size() {
        let mut enc = Encoder::new(test_config());
        enc.set_wave_format(test_wave_format(1)).unwrap();
        enc.set_encode_parameter(test_encode_parameter()).unwrap();

        let n = 3 * 2048 + 17;
        let input: Vec<i32> =
            (0..n).map(|i| (((i as f64) * 0.02).sin() * 12000.0) as i32).collect();
        let channels: Vec<&[i32]> = vec![&input];

        let mut data = vec![0u8; 1 << 20];
        let size = enc.encode_whole(&channels, n as u32, &mut data).unwrap();
        assert!(size as usize <= data.len());

        let num_blocks = u32::from_be_bytes([data[29], data[30], data[31], data[32]]);
        assert!(num_blocks >= 2);

        let max_block_size = u32::from_be_bytes([data[35], data[36], data[37], data[38]]);
        assert!(max_block_size > 0);
    }

    #[test]
    fn verify_encode_without_configuration_fails() {
        let mut enc = Encoder::new(test_config());
        let input = vec![0i32; 1024];
        let channels: Vec<&[i32]> = vec![&input];
        let mut data = vec![0u8; 8192];
        assert!(enc.encode_block(&channels, 1024, &mut data).is_err());
    }

    #[test]
    fn verify_encodes_stereo_white_noise_round_capacity() {
        // Scenario 3 of the bitstream spec's end-to-end list: stereo white noise should still
        // encode successfully (bit-exactness itself is only checkable with a decoder, which is
        // out of scope here; this exercises the full stereo-MS + predictor-cascade path against
        // the least-predictable input the pipeline will ever see).
        let mut enc = Encoder::new(EncoderConfig {
            max_num_channels: 2,
            max_num_block_samples: 8192,
            max_parcor_order: 16,
            max_longterm_order: 4,
            max_lms_order_per_filter: 8,
        });
        enc.set_wave_format(WaveFormat { num_channels: 2, sampling_rate: 44_100, bit_per_sample: 16 })
            .unwrap();
        let mut ep = test_encode_parameter();
        ep.ch_process_method = ChProcessMethod::StereoMs;
        ep.max_num_block_samples = 8192;
        enc.set_encode_parameter(ep).unwrap();

        let mut rng = SmallRng::seed_from_u64(0x5a1a_d15c_0de5_0001);
        let n = 4096usize;
        let left: Vec<i32> = (0..n).map(|_| rng.gen_range(-20_000..20_000)).collect();
        let right: Vec<i32> = (0..n).map(|_| rng.gen_range(-20_000..20_000)).collect();
        let channels: Vec<&[i32]> = vec![&left, &right];

        let mut data = vec![0u8; 1 << 20];
        let size = enc.encode_whole(&channels, n as u32, &mut data).unwrap();
        assert!(size > HEADER_SIZE);
    }

    #[test]
    fn verify_insufficient_buffer_on_first_block() {
        let mut enc = Encoder::new(test_config());
        enc.set_wave_format(test_wave_format(1)).unwrap();
        enc.set_encode_parameter(test_encode_parameter()).unwrap();

        let input = vec![1i32; 4096];
        let channels: Vec<&[i32]> = vec![&input];
        let mut data = vec![0u8; HEADER_SIZE as usize];
        assert!(enc.encode_whole(&channels, 4096, &mut data).is_err());
    }
}
