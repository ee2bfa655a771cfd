// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Location of H.265 NAL units in Annex B and length-prefixed buffers.

use bitreader::BitReader;
use enumn::N;
use log::debug;
use log::warn;

use crate::codec::h265::ParseError;
use crate::codec::h265::ParseResult;

/// Table 7-1 – NAL unit type codes and NAL unit type classes
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NaluType {
    #[default]
    TrailN = 0,
    TrailR = 1,
    TsaN = 2,
    TsaR = 3,
    StsaN = 4,
    StsaR = 5,
    RadlN = 6,
    RadlR = 7,
    RaslN = 8,
    RaslR = 9,
    RsvVclN10 = 10,
    RsvVclR11 = 11,
    RsvVclN12 = 12,
    RsvVclR13 = 13,
    RsvVclN14 = 14,
    RsvVclR15 = 15,
    BlaWLp = 16,
    BlaWRadl = 17,
    BlaNLp = 18,
    IdrWRadl = 19,
    IdrNLp = 20,
    CraNut = 21,
    RsvIrapVcl22 = 22,
    RsvIrapVcl23 = 23,
    RsvVcl24 = 24,
    RsvVcl25 = 25,
    RsvVcl26 = 26,
    RsvVcl27 = 27,
    RsvVcl28 = 28,
    RsvVcl29 = 29,
    RsvVcl30 = 30,
    RsvVcl31 = 31,
    VpsNut = 32,
    SpsNut = 33,
    PpsNut = 34,
    AudNut = 35,
    EosNut = 36,
    EobNut = 37,
    FdNut = 38,
    PrefixSeiNut = 39,
    SuffixSeiNut = 40,
    RsvNvcl41 = 41,
    RsvNvcl42 = 42,
    RsvNvcl43 = 43,
    RsvNvcl44 = 44,
    RsvNvcl45 = 45,
    RsvNvcl46 = 46,
    RsvNvcl47 = 47,
    Unspec48 = 48,
    Unspec49 = 49,
    Unspec50 = 50,
    Unspec51 = 51,
    Unspec52 = 52,
    Unspec53 = 53,
    Unspec54 = 54,
    Unspec55 = 55,
    Unspec56 = 56,
    Unspec57 = 57,
    Unspec58 = 58,
    Unspec59 = 59,
    Unspec60 = 60,
    Unspec61 = 61,
    Unspec62 = 62,
    Unspec63 = 63,
}

impl NaluType {
    /// Whether this is an IDR NALU.
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    /// Whether this is an IRAP NALU.
    pub fn is_irap(&self) -> bool {
        (Self::BlaWLp..=Self::RsvIrapVcl23).contains(self)
    }

    /// Whether this is a BLA NALU.
    pub fn is_bla(&self) -> bool {
        (Self::BlaWLp..=Self::BlaNLp).contains(self)
    }

    /// Whether this is a CRA NALU.
    pub fn is_cra(&self) -> bool {
        matches!(self, Self::CraNut)
    }

    /// Whether this is a RADL NALU.
    pub fn is_radl(&self) -> bool {
        matches!(self, Self::RadlN | Self::RadlR)
    }

    /// Whether this is a RASL NALU.
    pub fn is_rasl(&self) -> bool {
        matches!(self, Self::RaslN | Self::RaslR)
    }

    /// Whether this NALU carries a slice segment.
    pub fn is_slice(&self) -> bool {
        (Self::TrailN..=Self::RaslR).contains(self) || (Self::BlaWLp..=Self::CraNut).contains(self)
    }

    /// Whether this NALU belongs to the VCL class.
    pub fn is_vcl(&self) -> bool {
        *self <= Self::RsvVcl31
    }
}

/// The two byte header that starts every NAL unit, see 7.3.1.2.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NaluHeader {
    /// The NALU type.
    pub type_: NaluType,
    /// Specifies the identifier of the layer to which a VCL NAL unit belongs or
    /// the identifier of a layer to which a non-VCL NAL unit applies.
    pub nuh_layer_id: u8,
    /// Minus 1 specifies a temporal identifier for the NAL unit. The value of
    /// nuh_temporal_id_plus1 shall not be equal to 0.
    pub nuh_temporal_id_plus1: u8,
}

impl NaluHeader {
    /// Size of the header in bytes.
    pub const LEN: usize = 2;

    /// Parse the header from the first two bytes of `data`.
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        let data = data.get(0..Self::LEN).ok_or(ParseError::HeaderBroken)?;
        let mut r = BitReader::new(data);

        // Skip forbidden_zero_bit
        r.skip(1).map_err(|_| ParseError::HeaderBroken)?;

        let type_ = r.read_u8(6).map_err(|_| ParseError::HeaderBroken)?;

        Ok(Self {
            type_: NaluType::n(type_).ok_or(ParseError::HeaderBroken)?,
            nuh_layer_id: r.read_u8(6).map_err(|_| ParseError::HeaderBroken)?,
            nuh_temporal_id_plus1: r.read_u8(3).map_err(|_| ParseError::HeaderBroken)?,
        })
    }

    /// Whether this header type indicates EOS or EOB. These units never carry a
    /// payload.
    pub fn is_end(&self) -> bool {
        matches!(self.type_, NaluType::EosNut | NaluType::EobNut)
    }

    /// The temporal id of the unit, or 0 for the forbidden value of
    /// nuh_temporal_id_plus1.
    pub fn temporal_id(&self) -> u8 {
        self.nuh_temporal_id_plus1.saturating_sub(1)
    }
}

/// A NAL unit located in a borrowed byte buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nalu<'a> {
    pub header: NaluHeader,
    /// The whole buffer the unit was located in.
    pub data: &'a [u8],
    /// Offset of the start code or length prefix.
    pub sc_offset: usize,
    /// Offset of the first header byte.
    pub offset: usize,
    /// Size of the unit, header included.
    pub size: usize,
}

fn find_start_code(data: &[u8]) -> Option<usize> {
    data.windows(3).position(|window| window == [0x00, 0x00, 0x01])
}

impl<'a> Nalu<'a> {
    /// Locate the next Annex B unit starting the search at `offset`, without
    /// looking for its end: the unit is assumed to extend to the end of `data`.
    pub fn next_annexb_unchecked(data: &'a [u8], offset: usize) -> ParseResult<Self> {
        if data.len() < offset.saturating_add(4) {
            debug!("Can't parse, buffer of size {} too small for offset {}", data.len(), offset);
            return Err(ParseError::Truncated);
        }

        let start_code = offset + find_start_code(&data[offset..]).ok_or(ParseError::NoStartCode)?;

        // A complete header must follow the 3 byte start code.
        if data.len() - start_code - 3 < NaluHeader::LEN {
            debug!("Not enough bytes after start code to identify a NAL unit");
            return Err(ParseError::Truncated);
        }

        // If the preceding byte is 00, then we actually have a four byte SC,
        // i.e. 00 00 00 01 Where the first 00 is the "zero_byte()"
        let sc_offset = if start_code > 0 && data[start_code - 1] == 0x00 {
            start_code - 1
        } else {
            start_code
        };

        let nalu_offset = start_code + 3;
        let header = NaluHeader::parse(&data[nalu_offset..])?;

        let size = if header.is_end() {
            NaluHeader::LEN
        } else {
            data.len() - nalu_offset
        };

        Ok(Nalu {
            header,
            data,
            sc_offset,
            offset: nalu_offset,
            size,
        })
    }

    /// Locate the next complete Annex B unit starting the search at `offset`.
    /// The unit ends right before the next start code, trailing zero bytes
    /// excluded, so `NoNalEnd` is returned until the following unit has
    /// arrived.
    pub fn next_annexb(data: &'a [u8], offset: usize) -> ParseResult<Self> {
        let mut nalu = Self::next_annexb_unchecked(data, offset)?;

        // End of sequence and end of bitstream units are exactly 2 bytes.
        if nalu.header.is_end() {
            return Ok(nalu);
        }

        let mut next = match find_start_code(&data[nalu.offset..]) {
            Some(next) => next,
            None => {
                debug!("NAL unit at {} has no end yet", nalu.offset);
                return Err(ParseError::NoNalEnd);
            }
        };

        // The header of the next unit must be there too.
        if data.len() - (nalu.offset + next) < 5 {
            debug!("Not enough bytes to identify the next NAL unit");
            return Err(ParseError::NoNalEnd);
        }

        // Discard trailing_zero_8bits
        while next > 0 && data[nalu.offset + next - 1] == 0x00 {
            next -= 1;
        }

        if next < 3 {
            return Err(ParseError::BrokenData("NAL unit shorter than 3 bytes"));
        }

        nalu.size = next;
        debug!("Complete NAL unit found at {}, size {}", nalu.offset, nalu.size);

        Ok(nalu)
    }

    fn read_length(data: &[u8], offset: usize, nal_length_size: u8) -> ParseResult<usize> {
        if !(1..=4).contains(&nal_length_size) {
            return Err(ParseError::out_of_range(nal_length_size, 1, 4));
        }

        let end = offset
            .checked_add(usize::from(nal_length_size))
            .ok_or(ParseError::BrokenData("offset overflow"))?;
        let field = data.get(offset..end).ok_or(ParseError::Truncated)?;

        Ok(field.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b)))
    }

    /// Locate the unit at `offset` in a buffer where every unit is preceded by
    /// a big endian length field of `nal_length_size` bytes.
    pub fn next_length_prefixed(
        data: &'a [u8],
        offset: usize,
        nal_length_size: u8,
    ) -> ParseResult<Self> {
        let size = Self::read_length(data, offset, nal_length_size)?;
        let nalu_offset = offset + usize::from(nal_length_size);

        if size > data.len() - nalu_offset {
            return Err(ParseError::NoNalEnd);
        }

        if size < NaluHeader::LEN {
            return Err(ParseError::BrokenData("NAL unit shorter than its header"));
        }

        let header = NaluHeader::parse(&data[nalu_offset..])?;

        Ok(Nalu {
            header,
            data,
            sc_offset: offset,
            offset: nalu_offset,
            size,
        })
    }

    /// Like [`Self::next_length_prefixed`], but also splits the unit on start
    /// codes found inside the declared length. Some muxers emit such broken
    /// packets. Returns the units found and the number of bytes consumed from
    /// `offset`.
    pub fn split_length_prefixed(
        data: &'a [u8],
        offset: usize,
        nal_length_size: u8,
    ) -> ParseResult<(Vec<Self>, usize)> {
        let nalu_size = Self::read_length(data, offset, nal_length_size)?;

        if nalu_size < NaluHeader::LEN {
            warn!("too small NAL unit size {}", nalu_size);
            return Err(ParseError::BrokenData("NAL unit shorter than its header"));
        }

        let mut off = offset + usize::from(nal_length_size);
        if nalu_size > data.len() - off {
            warn!("NAL unit size {} larger than remaining data {}", nalu_size, data.len() - off);
            return Err(ParseError::BrokenData("NAL unit larger than buffer"));
        }

        let consumed = nalu_size + usize::from(nal_length_size);
        let mut remaining = nalu_size;
        let mut prefix_size = usize::from(nal_length_size);

        // Drop a trailing start code, it would not be found by the scan below.
        if remaining >= 3 && data[off + remaining - 3..off + remaining] == [0x00, 0x00, 0x01] {
            remaining -= 3;
            if remaining > 0 && data[off + remaining - 1] == 0x00 {
                remaining -= 1;
            }
        }

        let mut nalus = vec![];
        let push = |nalus: &mut Vec<Self>, off: usize, size: usize, prefix: usize| {
            NaluHeader::parse(&data[off..]).map(|header| {
                nalus.push(Nalu {
                    header,
                    data,
                    sc_offset: off - prefix,
                    offset: off,
                    size,
                })
            })
        };

        while remaining >= NaluHeader::LEN {
            // A start code is only meaningful if a header can follow it.
            let start_code = if remaining >= 5 {
                find_start_code(&data[off..off + remaining])
            } else {
                None
            };

            let Some(sc) = start_code else {
                // Last chunk.
                push(&mut nalus, off, remaining, prefix_size)?;
                break;
            };

            if (sc == 2 && data[off + 1] != 0x00) || sc > 2 {
                // Data before the start code is a unit of its own.
                let size = if data[off + sc - 1] == 0x00 { sc - 1 } else { sc };
                push(&mut nalus, off, size, prefix_size)?;
            }

            let skip = sc + 3;
            if skip >= remaining {
                break;
            }

            prefix_size = if sc > 0 && data[off + sc - 1] == 0x00 { 4 } else { 3 };
            remaining -= skip;
            off += skip;
        }

        if nalus.is_empty() {
            warn!("No NAL unit found");
            return Err(ParseError::BrokenData("no NAL unit in length-prefixed packet"));
        }

        Ok((nalus, consumed))
    }

    /// The size of the NAL unit header.
    pub fn header_len(&self) -> usize {
        NaluHeader::LEN
    }

    /// The payload of the unit, header excluded.
    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.offset + NaluHeader::LEN..self.offset + self.size]
    }
}

impl<'a> AsRef<[u8]> for Nalu<'a> {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.size]
    }
}

/// Iterator over the NAL units of a complete Annex B buffer. The last unit
/// extends to the end of the buffer.
pub struct NaluIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = Nalu<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let nalu = match Nalu::next_annexb(self.data, self.offset) {
            Ok(nalu) => nalu,
            Err(ParseError::NoNalEnd) => Nalu::next_annexb_unchecked(self.data, self.offset).ok()?,
            Err(_) => return None,
        };

        self.offset = nalu.offset + nalu.size;
        Some(nalu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // AUD, VPS header, PPS-like payload, EOS.
    const STREAM: [u8; 22] = [
        0x00, 0x00, 0x00, 0x01, 0x46, 0x01, 0x50, // AUD, 4 byte start code
        0x00, 0x00, 0x01, 0x40, 0x01, 0x0c, 0x01, 0x00, // VPS with trailing zero
        0x00, 0x00, 0x01, 0x48, 0x01, // EOS
        0x00, 0x00,
    ];

    #[test]
    fn header_fields() {
        let header = NaluHeader::parse(&[0x42, 0x01]).unwrap();
        assert_eq!(header.type_, NaluType::SpsNut);
        assert_eq!(header.nuh_layer_id, 0);
        assert_eq!(header.nuh_temporal_id_plus1, 1);
        assert_eq!(header.temporal_id(), 0);

        // Unspecified types are still valid headers.
        let header = NaluHeader::parse(&[0x7e, 0x0b]).unwrap();
        assert_eq!(header.type_, NaluType::Unspec63);
        assert_eq!(header.nuh_layer_id, 1);
        assert_eq!(header.nuh_temporal_id_plus1, 3);

        assert_eq!(NaluHeader::parse(&[0x42]), Err(ParseError::HeaderBroken));
    }

    #[test]
    fn type_classes() {
        assert!(NaluType::IdrNLp.is_idr());
        assert!(NaluType::CraNut.is_irap());
        assert!(NaluType::RsvIrapVcl23.is_irap());
        assert!(!NaluType::RsvVcl24.is_irap());
        assert!(NaluType::BlaNLp.is_bla());
        assert!(NaluType::TrailR.is_slice());
        assert!(!NaluType::RsvVclN10.is_slice());
        assert!(NaluType::RsvVcl31.is_vcl());
        assert!(!NaluType::VpsNut.is_vcl());
    }

    #[test]
    fn annexb_units() {
        let aud = Nalu::next_annexb(&STREAM, 0).unwrap();
        assert_eq!(aud.header.type_, NaluType::AudNut);
        assert_eq!(aud.sc_offset, 0);
        assert_eq!(aud.offset, 4);
        assert_eq!(aud.size, 3);

        let vps = Nalu::next_annexb(&STREAM, aud.offset + aud.size).unwrap();
        assert_eq!(vps.header.type_, NaluType::VpsNut);
        assert_eq!(vps.sc_offset, 7);
        assert_eq!(vps.offset, 10);
        // The zero byte before the next start code is not part of the unit.
        assert_eq!(vps.as_ref(), &[0x40, 0x01, 0x0c, 0x01]);
        assert_eq!(vps.payload(), &[0x0c, 0x01]);

        let eos = Nalu::next_annexb(&STREAM, vps.offset + vps.size).unwrap();
        assert_eq!(eos.header.type_, NaluType::EosNut);
        assert_eq!(eos.size, 2);
    }

    #[test]
    fn annexb_errors() {
        assert_eq!(Nalu::next_annexb(&[0x00, 0x00, 0x01], 0), Err(ParseError::Truncated));
        assert_eq!(
            Nalu::next_annexb(&[0x00, 0x00, 0x02, 0x40, 0x01], 0),
            Err(ParseError::NoStartCode)
        );
        assert_eq!(
            Nalu::next_annexb(&[0x00, 0x00, 0x00, 0x01, 0x40], 0),
            Err(ParseError::Truncated)
        );
        // No following start code yet.
        assert_eq!(
            Nalu::next_annexb(&[0x00, 0x00, 0x01, 0x40, 0x01, 0x0c], 0),
            Err(ParseError::NoNalEnd)
        );
        // The next start code is there but its header is not.
        assert_eq!(
            Nalu::next_annexb(&[0x00, 0x00, 0x01, 0x40, 0x01, 0x0c, 0x00, 0x00, 0x01, 0x42], 0),
            Err(ParseError::NoNalEnd)
        );

        let unchecked = Nalu::next_annexb_unchecked(&[0x00, 0x00, 0x01, 0x40, 0x01, 0x0c], 0).unwrap();
        assert_eq!(unchecked.size, 3);
    }

    #[test]
    fn length_prefixed() {
        let data = [0x00, 0x03, 0x40, 0x01, 0x0c, 0x00, 0x04, 0x42, 0x01];

        let vps = Nalu::next_length_prefixed(&data, 0, 2).unwrap();
        assert_eq!(vps.header.type_, NaluType::VpsNut);
        assert_eq!(vps.offset, 2);
        assert_eq!(vps.size, 3);

        assert_eq!(
            Nalu::next_length_prefixed(&data, 5, 2),
            Err(ParseError::NoNalEnd)
        );
        assert_eq!(
            Nalu::next_length_prefixed(&[0x01, 0x40], 0, 1),
            Err(ParseError::BrokenData("NAL unit shorter than its header"))
        );
        assert_eq!(Nalu::next_length_prefixed(&[0x00], 0, 2), Err(ParseError::Truncated));
        assert!(matches!(
            Nalu::next_length_prefixed(&data, 0, 5),
            Err(ParseError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn split_embedded_start_codes() {
        // One length prefix covering a VPS, an embedded 4 byte start code, a
        // SPS and a trailing start code.
        let data = [
            0x00, 0x00, 0x00, 0x0d, // length
            0x40, 0x01, 0x0c, // VPS
            0x00, 0x00, 0x00, 0x01, // start code
            0x42, 0x01, 0x01, // SPS
            0x00, 0x00, 0x01, // trailing start code
            0xaa, // next packet
        ];

        let (nalus, consumed) = Nalu::split_length_prefixed(&data, 0, 4).unwrap();
        assert_eq!(consumed, 17);
        assert_eq!(nalus.len(), 2);

        assert_eq!(nalus[0].header.type_, NaluType::VpsNut);
        assert_eq!(nalus[0].sc_offset, 0);
        assert_eq!(nalus[0].as_ref(), &[0x40, 0x01, 0x0c]);

        assert_eq!(nalus[1].header.type_, NaluType::SpsNut);
        assert_eq!(nalus[1].sc_offset, 7);
        assert_eq!(nalus[1].as_ref(), &[0x42, 0x01, 0x01]);
    }

    #[test]
    fn split_leading_start_code() {
        let data = [0x00, 0x08, 0x00, 0x00, 0x01, 0x44, 0x01, 0xc0, 0x80, 0x00];

        let (nalus, consumed) = Nalu::split_length_prefixed(&data, 0, 2).unwrap();
        assert_eq!(consumed, 10);
        assert_eq!(nalus.len(), 1);
        assert_eq!(nalus[0].header.type_, NaluType::PpsNut);
        assert_eq!(nalus[0].offset, 5);
        assert_eq!(nalus[0].sc_offset, 2);
        assert_eq!(nalus[0].size, 5);
    }

    #[test]
    fn split_errors() {
        assert_eq!(
            Nalu::split_length_prefixed(&[0x01, 0x40], 0, 1),
            Err(ParseError::BrokenData("NAL unit shorter than its header"))
        );
        assert_eq!(
            Nalu::split_length_prefixed(&[0x05, 0x40, 0x01], 0, 1),
            Err(ParseError::BrokenData("NAL unit larger than buffer"))
        );
    }

    #[test]
    fn iterate_stream() {
        let types: Vec<_> = NaluIterator::new(&STREAM).map(|n| n.header.type_).collect();
        assert_eq!(types, vec![NaluType::AudNut, NaluType::VpsNut, NaluType::EosNut]);

        let last = [0x00, 0x00, 0x01, 0x26, 0x01, 0xaf, 0x09];
        let nalus: Vec<_> = NaluIterator::new(&last).collect();
        assert_eq!(nalus.len(), 1);
        assert_eq!(nalus[0].header.type_, NaluType::IdrWRadl);
        assert_eq!(nalus[0].size, 4);
    }
}
