// SLA
// Copyright (c) 2019 The SLA Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type returned by every fallible SLA API.

use std::error::Error as StdError;
use std::fmt;

/// `Error` enumerates every way an SLA encoder API call can fail.
///
/// This mirrors the `SLAApiResult` status codes of the reference encoder: encoding never
/// unwinds, every fallible call returns a `Result`, and long-term prediction failure in
/// particular is locally recoverable (it disables itself for the channel and continues);
/// everything else aborts the current call and leaves the output buffer in an undefined state.
#[derive(Debug)]
pub enum Error {
    /// A null/empty input or an internally inconsistent parameter was supplied.
    InvalidArgument(&'static str),
    /// The requested configuration exceeds the capacities the handle was created with.
    ExceedHandleCapacity(&'static str),
    /// The caller-supplied output buffer is too small to hold the encoded data.
    InsufficientBuffer,
    /// `window_function_type` is out of range.
    InvalidWindowFunctionType,
    /// `ch_process_method` is out of range, or incompatible with the channel count.
    InvalidChProcessMethod,
    /// PARCOR analysis hit a numerical breakdown (non-positive prediction error).
    FailedToCalculateCoef(&'static str),
    /// A predictor (PARCOR synthesis, long-term, or LMS) failed to produce a residual.
    FailedToPredict(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::ExceedHandleCapacity(msg) => write!(f, "exceeds handle capacity: {}", msg),
            Error::InsufficientBuffer => write!(f, "insufficient output buffer size"),
            Error::InvalidWindowFunctionType => write!(f, "invalid window function type"),
            Error::InvalidChProcessMethod => write!(f, "invalid channel process method"),
            Error::FailedToCalculateCoef(msg) => {
                write!(f, "failed to calculate coefficients: {}", msg)
            }
            Error::FailedToPredict(msg) => write!(f, "failed to predict: {}", msg),
        }
    }
}

impl StdError for Error {}

/// A specialized `Result` type for SLA encoder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience function to create an invalid argument error.
pub fn invalid_argument<T>(msg: &'static str) -> Result<T> {
    Err(Error::InvalidArgument(msg))
}

/// Convenience function to create a handle-capacity error.
pub fn exceed_capacity<T>(msg: &'static str) -> Result<T> {
    Err(Error::ExceedHandleCapacity(msg))
}

/// Convenience function to create an insufficient-buffer error.
pub fn insufficient_buffer<T>() -> Result<T> {
    Err(Error::InsufficientBuffer)
}

/// Convenience function to create a coefficient-calculation failure.
pub fn failed_to_calculate_coef<T>(msg: &'static str) -> Result<T> {
    Err(Error::FailedToCalculateCoef(msg))
}

/// Convenience function to create a predictor failure.
pub fn failed_to_predict<T>(msg: &'static str) -> Result<T> {
    Err(Error::FailedToPredict(msg))
}
