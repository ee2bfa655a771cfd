// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.265 bitstream parsing: NAL unit location, parameter sets, slice headers
//! and SEI messages.

use thiserror::Error;

pub mod config_record;
pub mod nalu;
pub mod nalu_reader;
pub mod nalu_writer;
pub mod parser;
pub mod profile;
pub mod ptl;
pub mod rps;
pub mod scaling_list;
pub mod sei;
pub mod slice;
pub mod store;
pub mod vui;

/// Errors returned by every parsing operation of this module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Fewer bits or bytes remain than the syntax element requires.
    #[error("not enough data left in the bitstream")]
    Truncated,
    /// A syntax element violates the range mandated for it.
    #[error("value {value} out of range, expected [{min}, {max}]")]
    ValueOutOfRange { value: i64, min: i64, max: i64 },
    /// The two byte NAL unit header could not be read.
    #[error("broken NAL unit header")]
    HeaderBroken,
    /// A referenced parameter set is missing or does not match.
    #[error("broken link to {kind} with id {id}")]
    BrokenLink { kind: &'static str, id: u32 },
    /// No start code was found, more data is needed.
    #[error("no start code found")]
    NoStartCode,
    /// The end of the NAL unit is not in the buffer yet.
    #[error("end of NAL unit not found")]
    NoNalEnd,
    /// Structurally invalid input that is not a plain range violation.
    #[error("broken data: {0}")]
    BrokenData(&'static str),
}

pub type ParseResult<T> = Result<T, ParseError>;

impl ParseError {
    pub(crate) fn out_of_range(value: impl Into<i64>, min: impl Into<i64>, max: impl Into<i64>) -> Self {
        ParseError::ValueOutOfRange {
            value: value.into(),
            min: min.into(),
            max: max.into(),
        }
    }
}
