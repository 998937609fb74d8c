// SLA
// Copyright (c) 2019 The SLA Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The encoder core of the `"SL* "` lossless audio codec: windowing, mid/side channel
//! decorrelation, pre-emphasis, PARCOR/long-term/LMS cascaded prediction, adaptive Rice entropy
//! coding, a block-partition-size optimizer, and the block/whole-stream encoders that tie them
//! together.
//!
//! This crate implements encoding only; a conforming decoder is a separate, out-of-scope
//! collaborator that consumes the bitstream this crate produces.

mod block;
mod coder;
pub mod encoder;
mod lms;
mod longterm;
mod parcor;
mod partition;

pub use encoder::Encoder;
pub use sla_core::errors::{Error, Result};
pub use sla_core::format::{
    ChProcessMethod, EncodeParameter, EncoderConfig, HeaderInfo, WaveFormat, WindowFunctionType,
};
