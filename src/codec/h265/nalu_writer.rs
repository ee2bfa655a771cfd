// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.
use std::io::Write;

use thiserror::Error;

use crate::bitstream_utils::BitWriter;
use crate::bitstream_utils::BitWriterError;
use crate::codec::h265::nalu::NaluHeader;

/// Internal wrapper over [`std::io::Write`] for possible emulation prevention
struct EmulationPrevention<W: Write> {
    out: W,
    prev_bytes: [Option<u8>; 2],

    /// Emulation prevention enabled.
    ep_enabled: bool,
}

impl<W: Write> EmulationPrevention<W> {
    fn new(writer: W, ep_enabled: bool) -> Self {
        Self {
            out: writer,
            prev_bytes: [None; 2],
            ep_enabled,
        }
    }

    fn write_byte(&mut self, curr_byte: u8) -> std::io::Result<()> {
        if self.prev_bytes[1] == Some(0x00) && self.prev_bytes[0] == Some(0x00) && curr_byte <= 0x03
        {
            self.out.write_all(&[0x00, 0x00, 0x03, curr_byte])?;
            self.prev_bytes = [None; 2];
        } else {
            if let Some(byte) = self.prev_bytes[1] {
                self.out.write_all(&[byte])?;
            }

            self.prev_bytes[1] = self.prev_bytes[0];
            self.prev_bytes[0] = Some(curr_byte);
        }

        Ok(())
    }

    /// Writes the two byte H.265 NALU header, optionally preceded by a four
    /// byte start code. Neither goes through emulation prevention.
    fn write_header(&mut self, header: &NaluHeader, start_code: bool) -> NaluWriterResult<()> {
        self.flush()?;

        if start_code {
            self.out.write_all(&[0x00, 0x00, 0x00, 0x01])?;
        }

        self.out.write_all(&[
            (header.type_ as u8 & 0x3f) << 1 | (header.nuh_layer_id >> 5) & 0x1,
            (header.nuh_layer_id & 0x1f) << 3 | (header.nuh_temporal_id_plus1 & 0x7),
        ])?;

        Ok(())
    }

    fn has_data_pending(&self) -> bool {
        self.prev_bytes[0].is_some() || self.prev_bytes[1].is_some()
    }
}

impl<W: Write> Write for EmulationPrevention<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.ep_enabled {
            self.out.write_all(buf)?;
            return Ok(buf.len());
        }

        for byte in buf {
            self.write_byte(*byte)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(byte) = self.prev_bytes[1].take() {
            self.out.write_all(&[byte])?;
        }

        if let Some(byte) = self.prev_bytes[0].take() {
            self.out.write_all(&[byte])?;
        }

        self.out.flush()
    }
}

impl<W: Write> Drop for EmulationPrevention<W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Unable to flush pending bytes {e:?}");
        }
    }
}

#[derive(Error, Debug)]
pub enum NaluWriterError {
    #[error("value increment caused value overflow")]
    Overflow,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    BitWriterError(#[from] BitWriterError),
}

pub type NaluWriterResult<T> = std::result::Result<T, NaluWriterError>;

/// A writer for H.265 bitstreams. It is capable of outputing bitstream with
/// emulation-prevention.
pub struct NaluWriter<W: Write>(BitWriter<EmulationPrevention<W>>);

impl<W: Write> NaluWriter<W> {
    pub fn new(writer: W, ep_enabled: bool) -> Self {
        Self(BitWriter::new(EmulationPrevention::new(writer, ep_enabled)))
    }

    /// Writes fixed bit size integer (up to 32 bit) output with emulation
    /// prevention if enabled. Corresponds to `f(n)` in H.265 spec.
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> NaluWriterResult<usize> {
        self.0
            .write_f(bits, value)
            .map_err(NaluWriterError::BitWriterError)
    }

    /// An alias to [`Self::write_f`] Corresponds to `u(n)` in H.265 spec.
    pub fn write_u<T: Into<u32>>(&mut self, bits: usize, value: T) -> NaluWriterResult<usize> {
        self.write_f(bits, value)
    }

    /// Writes a number in exponential golumb format.
    pub fn write_exp_golumb(&mut self, value: u32) -> NaluWriterResult<()> {
        let value = u64::from(value) + 1;
        let bits = 64 - value.leading_zeros() as usize;
        let zeros = bits - 1;

        if bits > 32 {
            // Only u32::MAX needs 33 bits.
            self.write_f(zeros, 0u32)?;
            self.write_f(1, true)?;
            return self
                .write_f(32, (value & 0xffff_ffff) as u32)
                .map(|_| ());
        }

        self.write_f(zeros, 0u32)?;
        self.write_f(bits, value as u32)?;

        Ok(())
    }

    /// Writes a unsigned integer in exponential golumb format.
    /// Coresponds to `ue(v)` in H.265 spec.
    pub fn write_ue<T: Into<u32>>(&mut self, value: T) -> NaluWriterResult<()> {
        self.write_exp_golumb(value.into())
    }

    /// Writes a signed integer in exponential golumb format.
    /// Coresponds to `se(v)` in H.265 spec.
    pub fn write_se<T: Into<i32>>(&mut self, value: T) -> NaluWriterResult<()> {
        let value: i32 = value.into();
        let abs_value: u32 = value.unsigned_abs();

        if value <= 0 {
            self.write_ue(abs_value.checked_mul(2).ok_or(NaluWriterError::Overflow)?)
        } else {
            self.write_ue(2 * abs_value - 1)
        }
    }

    /// Writes rbsp_trailing_bits(): a stop bit followed by zero bits up to the
    /// next byte boundary.
    pub fn write_trailing_bits(&mut self) -> NaluWriterResult<()> {
        self.write_f(1, true)?;
        while !self.aligned() {
            self.write_f(1, false)?;
        }

        Ok(())
    }

    /// Returns `true` if ['Self`] hold data that wasn't written to [`std::io::Write`]
    pub fn has_data_pending(&self) -> bool {
        self.0.has_data_pending() || self.0.inner().has_data_pending()
    }

    /// Writes a H.265 NALU header, with a leading four byte start code if
    /// `start_code` is set.
    pub fn write_header(&mut self, header: &NaluHeader, start_code: bool) -> NaluWriterResult<()> {
        self.0.flush()?;
        self.0.inner_mut().write_header(header, start_code)?;
        Ok(())
    }

    /// Returns `true` if next bits will be aligned to 8
    pub fn aligned(&self) -> bool {
        !self.0.has_data_pending()
    }

    /// Outputs every cached bit and byte, including the bytes held back for
    /// emulation prevention.
    pub fn flush(&mut self) -> NaluWriterResult<()> {
        self.0.flush()?;
        Ok(())
    }
}
