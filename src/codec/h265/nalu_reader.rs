// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::h265::ParseError;
use crate::codec::h265::ParseResult;

/// A bit reader for h265 RBSPs. It transparently drops emulation-prevention
/// bytes and keeps track of how many of them were seen, so that callers can
/// translate bit positions back to the escaped bitstream.
#[derive(Clone)]
pub struct NaluReader<'a> {
    /// The escaped bytes being read.
    data: &'a [u8],
    /// Index of the next byte of `data` to be loaded.
    next_byte: usize,
    /// Contents of the current byte. First unread bit starting at position 8 -
    /// num_remaining_bits_in_curr_byte.
    curr_byte: u8,
    /// Number of bits remaining in `curr_byte`
    num_remaining_bits_in_curr_byte: usize,
    /// Used in emulation prevention byte detection.
    prev_two_bytes: u16,
    /// Number of emulation prevention bytes (i.e. 0x000003) we found.
    num_epb: usize,
}

fn convert<U: TryFrom<T>, T>(value: T) -> ParseResult<U> {
    U::try_from(value).map_err(|_| ParseError::BrokenData("value does not fit target type"))
}

impl<'a> NaluReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            next_byte: 0,
            curr_byte: 0,
            num_remaining_bits_in_curr_byte: 0,
            prev_two_bytes: 0xffff,
            num_epb: 0,
        }
    }

    /// Read a single bit from the stream.
    pub fn read_bit(&mut self) -> ParseResult<bool> {
        Ok(self.read_bits::<u32>(1)? == 1)
    }

    /// Read up to 32 bits from the stream. Fails with `Truncated` if fewer than
    /// `num_bits` bits are left.
    pub fn read_bits<U: TryFrom<u32>>(&mut self, num_bits: usize) -> ParseResult<U> {
        if num_bits > 32 {
            return Err(ParseError::BrokenData("more than 32 bits requested"));
        }

        if num_bits > self.num_bits_left() {
            return Err(ParseError::Truncated);
        }

        if num_bits == 0 {
            return convert(0u32);
        }

        // An emulation prevention byte ahead may still leave the read short.
        let saved = self.clone();
        let out = match self.read_bits_unchecked(num_bits) {
            Ok(out) => out,
            Err(e) => {
                *self = saved;
                return Err(e);
            }
        };

        convert(out)
    }

    fn read_bits_unchecked(&mut self, num_bits: usize) -> ParseResult<u32> {
        let mut bits_left = num_bits;
        let mut out = 0u64;

        while self.num_remaining_bits_in_curr_byte < bits_left {
            out |= u64::from(self.curr_byte) << (bits_left - self.num_remaining_bits_in_curr_byte);
            bits_left -= self.num_remaining_bits_in_curr_byte;
            self.move_to_next_byte()?;
        }

        out |= u64::from(self.curr_byte >> (self.num_remaining_bits_in_curr_byte - bits_left));
        out &= (1u64 << num_bits) - 1;
        self.num_remaining_bits_in_curr_byte -= bits_left;

        // The mask above guarantees that `out` fits in 32 bits.
        Ok(out as u32)
    }

    /// Read `num_bits` bits and check that the value is within `[min, max]`.
    pub fn read_bits_bounded<U: TryFrom<u32>>(
        &mut self,
        num_bits: usize,
        min: u32,
        max: u32,
    ) -> ParseResult<U> {
        let value = self.read_bits::<u32>(num_bits)?;
        if value < min || value > max {
            return Err(ParseError::out_of_range(value, min, max));
        }

        convert(value)
    }

    /// Skip `num_bits` bits from the stream.
    pub fn skip_bits(&mut self, mut num_bits: usize) -> ParseResult<()> {
        if num_bits > self.num_bits_left() {
            return Err(ParseError::Truncated);
        }

        let saved = self.clone();
        while num_bits > 0 {
            let n = std::cmp::min(num_bits, 32);
            if let Err(e) = self.read_bits_unchecked(n) {
                *self = saved;
                return Err(e);
            }
            num_bits -= n;
        }

        Ok(())
    }

    /// Returns the amount of bits left in the stream, emulation prevention
    /// bytes included.
    pub fn num_bits_left(&self) -> usize {
        (self.data.len() - self.next_byte) * 8 + self.num_remaining_bits_in_curr_byte
    }

    /// Returns the amount of RBSP bits left in the stream, that is without the
    /// emulation prevention bytes still ahead. Scans the rest of the buffer.
    pub fn num_rbsp_bits_left(&self) -> usize {
        let mut prev_two_bytes = self.prev_two_bytes;
        let mut num_epb = 0;

        for &byte in &self.data[self.next_byte..] {
            if prev_two_bytes == 0 && byte == 0x03 {
                num_epb += 1;
                prev_two_bytes = 0xffff;
                continue;
            }

            prev_two_bytes = (prev_two_bytes << 8) | u16::from(byte);
        }

        self.num_bits_left() - num_epb * 8
    }

    /// Returns the number of bits consumed so far, emulation prevention bytes
    /// included.
    pub fn position(&self) -> usize {
        self.next_byte * 8 - self.num_remaining_bits_in_curr_byte
    }

    /// Returns the number of emulation-prevention bytes read so far.
    pub fn num_epb(&self) -> usize {
        self.num_epb
    }

    /// Whether the next bit to be read starts a byte.
    pub fn is_byte_aligned(&self) -> bool {
        self.num_remaining_bits_in_curr_byte % 8 == 0
    }

    /// Whether the stream still has RBSP data. Implements more_rbsp_data(): the
    /// answer is yes as long as the reader has not reached the last set bit of
    /// the buffer, which is the rbsp_stop_one_bit.
    pub fn has_more_rsbp_data(&self) -> bool {
        let Some(last) = self.data.iter().rposition(|&b| b != 0) else {
            return false;
        };

        let stop_bit = last * 8 + 7 - self.data[last].trailing_zeros() as usize;
        self.position() < stop_bit
    }

    /// Reads an unsigned Exp-Golomb coded number, see 9.2.
    pub fn read_ue<U: TryFrom<u32>>(&mut self) -> ParseResult<U> {
        let mut num_bits = 0;

        while !self.read_bit()? {
            num_bits += 1;
            if num_bits > 31 {
                return Err(ParseError::BrokenData("exp-golomb code longer than 32 bits"));
            }
        }

        let value = ((1u32 << num_bits) - 1)
            .checked_add(self.read_bits::<u32>(num_bits)?)
            .ok_or(ParseError::BrokenData("exp-golomb code longer than 32 bits"))?;

        convert(value)
    }

    pub fn read_ue_bounded<U: TryFrom<u32>>(&mut self, min: u32, max: u32) -> ParseResult<U> {
        let ue = self.read_ue::<u32>()?;
        if ue > max || ue < min {
            return Err(ParseError::out_of_range(ue, min, max));
        }

        convert(ue)
    }

    pub fn read_ue_max<U: TryFrom<u32>>(&mut self, max: u32) -> ParseResult<U> {
        self.read_ue_bounded(0, max)
    }

    /// Reads a signed Exp-Golomb coded number. Odd code numbers map to
    /// positive values and even ones to negative values, see 9.2.2.
    pub fn read_se<U: TryFrom<i32>>(&mut self) -> ParseResult<U> {
        let ue = i64::from(self.read_ue::<u32>()?);

        let value = if ue % 2 == 0 { -(ue / 2) } else { ue / 2 + 1 };
        let value = i32::try_from(value)
            .map_err(|_| ParseError::BrokenData("value does not fit target type"))?;

        convert(value)
    }

    pub fn read_se_bounded<U: TryFrom<i32>>(&mut self, min: i32, max: i32) -> ParseResult<U> {
        let se = self.read_se::<i32>()?;
        if se < min || se > max {
            return Err(ParseError::out_of_range(se, min, max));
        }

        convert(se)
    }

    fn get_byte(&mut self) -> ParseResult<u8> {
        let byte = *self.data.get(self.next_byte).ok_or(ParseError::Truncated)?;
        self.next_byte += 1;
        Ok(byte)
    }

    fn move_to_next_byte(&mut self) -> ParseResult<()> {
        let mut byte = self.get_byte()?;

        if self.prev_two_bytes == 0 && byte == 0x03 {
            // We found an epb
            self.num_epb += 1;
            byte = self.get_byte()?;
            // We need another 3 bytes before another epb can happen.
            self.prev_two_bytes = 0xffff;
        }

        self.prev_two_bytes = (self.prev_two_bytes << 8) | u16::from(byte);
        self.num_remaining_bits_in_curr_byte = 8;
        self.curr_byte = byte;
        Ok(())
    }
}
