// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! HEVCDecoderConfigurationRecord (`hvcC`) parsing, see ISO/IEC 14496-15
//! 8.3.3.1.
//!
//! The parameter sets carried by the record are located but not parsed. Feed
//! them to [`crate::codec::h265::parser::Parser::parse_nal`] to do so.

use bitreader::BitReader;
use bytes::Buf;
use log::debug;
use log::warn;

use crate::codec::h265::nalu::Nalu;
use crate::codec::h265::nalu::NaluType;
use crate::codec::h265::ptl::ProfileTierLevel;
use crate::codec::h265::ParseError;
use crate::codec::h265::ParseResult;

/// Size of the fixed part of the record, up to and including numOfArrays.
pub const HEADER_LEN: usize = 23;

/// Size of the length field preceding every NAL unit of an array.
const NALU_LENGTH_SIZE: u8 = 2;

/// One entry of the record's NAL unit arrays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaluArray<'a> {
    pub array_completeness: bool,
    pub nal_unit_type: NaluType,
    pub nalus: Vec<Nalu<'a>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoderConfigRecord<'a> {
    /// 1, or 0 as written by some old muxers.
    pub configuration_version: u8,
    /// The general part of the profile, tier and level. Sub-layer information
    /// is not carried by the record.
    pub profile_tier_level: ProfileTierLevel,
    pub inbld_flag: bool,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    /// Frames per 256 seconds, 0 if unspecified.
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: bool,
    pub length_size_minus_one: u8,
    pub nalu_arrays: Vec<NaluArray<'a>>,
}

fn read_u8(r: &mut BitReader, bits: u8) -> ParseResult<u8> {
    r.read_u8(bits).map_err(|_| ParseError::Truncated)
}

fn read_u16(r: &mut BitReader, bits: u8) -> ParseResult<u16> {
    r.read_u16(bits).map_err(|_| ParseError::Truncated)
}

fn read_bool(r: &mut BitReader) -> ParseResult<bool> {
    r.read_bool().map_err(|_| ParseError::Truncated)
}

fn skip(r: &mut BitReader, bits: u64) -> ParseResult<()> {
    r.skip(bits).map_err(|_| ParseError::Truncated)
}

impl<'a> DecoderConfigRecord<'a> {
    /// Parses the record in `data`, locating every NAL unit of its arrays.
    ///
    /// A broken NAL unit is an error, unless it is the very last one of the
    /// record and not a parameter set. In that case the record is returned
    /// without the last array.
    pub fn parse(data: &'a [u8]) -> ParseResult<Self> {
        debug!("parsing \"HEVCDecoderConfigurationRecord\"");

        let header = match data.get(..HEADER_LEN) {
            Some(header) => header,
            None => {
                warn!("hvcC of {} bytes is too small", data.len());
                return Err(ParseError::Truncated);
            }
        };

        let mut record = Self::parse_header(header)?;
        let num_of_arrays = header[HEADER_LEN - 1];
        let mut offset = HEADER_LEN;

        for i in 0..num_of_arrays {
            let mut array_header = data.get(offset..offset + 3).ok_or_else(|| {
                warn!("not enough data for NAL unit array {}", i);
                ParseError::Truncated
            })?;

            let byte = array_header.get_u8();
            let num_nalus = array_header.get_u16();
            offset += 3;

            let nal_unit_type = NaluType::n(byte & 0x3f).ok_or(ParseError::HeaderBroken)?;
            let mut nalus = Vec::with_capacity(usize::from(num_nalus));

            for j in 0..num_nalus {
                match Nalu::next_length_prefixed(data, offset, NALU_LENGTH_SIZE) {
                    Ok(nalu) => {
                        offset = nalu.offset + nalu.size;
                        nalus.push(nalu);
                    }
                    Err(e) => {
                        let last = i + 1 == num_of_arrays && j + 1 == num_nalus;
                        let parameter_set = matches!(
                            nal_unit_type,
                            NaluType::VpsNut | NaluType::SpsNut | NaluType::PpsNut
                        );

                        if last && !parameter_set {
                            warn!(
                                "ignoring broken last NAL unit of type {:?} in array {}: {}",
                                nal_unit_type, i, e
                            );
                            return Ok(record);
                        }

                        warn!("broken NAL unit {} in array {}: {}", j, i, e);
                        return Err(e);
                    }
                }
            }

            record.nalu_arrays.push(NaluArray {
                array_completeness: byte & 0x80 != 0,
                nal_unit_type,
                nalus,
            });
        }

        Ok(record)
    }

    fn parse_header(data: &[u8]) -> ParseResult<Self> {
        let mut r = BitReader::new(data);
        let mut record = DecoderConfigRecord {
            configuration_version: read_u8(&mut r, 8)?,
            ..Default::default()
        };

        match record.configuration_version {
            1 => (),
            0 => warn!("accepting configurationVersion 0"),
            version => {
                warn!("unsupported configurationVersion {}", version);
                return Err(ParseError::out_of_range(version, 0, 1));
            }
        }

        let ptl = &mut record.profile_tier_level;
        ptl.profile_space = read_u8(&mut r, 2)?;
        ptl.tier_flag = read_bool(&mut r)?;
        ptl.profile_idc = read_u8(&mut r, 5)?;
        for flag in ptl.profile_compatibility_flag.iter_mut() {
            *flag = read_bool(&mut r)?;
        }

        ptl.progressive_source_flag = read_bool(&mut r)?;
        ptl.interlaced_source_flag = read_bool(&mut r)?;
        ptl.non_packed_constraint_flag = read_bool(&mut r)?;
        ptl.frame_only_constraint_flag = read_bool(&mut r)?;

        let profile_idc = ptl.profile_idc;
        let compatibility = ptl.profile_compatibility_flag;
        let signals = |idc: u8| profile_idc == idc || compatibility[usize::from(idc)];

        if (4..=11).any(signals) {
            ptl.max_12bit_constraint_flag = read_bool(&mut r)?;
            ptl.max_10bit_constraint_flag = read_bool(&mut r)?;
            ptl.max_8bit_constraint_flag = read_bool(&mut r)?;
            ptl.max_422chroma_constraint_flag = read_bool(&mut r)?;
            ptl.max_420chroma_constraint_flag = read_bool(&mut r)?;
            ptl.max_monochrome_constraint_flag = read_bool(&mut r)?;
            ptl.intra_constraint_flag = read_bool(&mut r)?;
            ptl.one_picture_only_constraint_flag = read_bool(&mut r)?;
            ptl.lower_bit_rate_constraint_flag = read_bool(&mut r)?;

            if [5, 9, 10, 11].into_iter().any(signals) {
                ptl.max_14bit_constraint_flag = read_bool(&mut r)?;
                skip(&mut r, 33)?;
            } else {
                skip(&mut r, 34)?;
            }
        } else if signals(2) {
            skip(&mut r, 7)?;
            ptl.one_picture_only_constraint_flag = read_bool(&mut r)?;
            skip(&mut r, 35)?;
        } else {
            skip(&mut r, 43)?;
        }

        if [1, 2, 3, 4, 5, 9, 11].into_iter().any(signals) {
            record.inbld_flag = read_bool(&mut r)?;
        } else {
            skip(&mut r, 1)?;
        }

        record.profile_tier_level.level_idc = read_u8(&mut r, 8)?;

        skip(&mut r, 4)?;
        record.min_spatial_segmentation_idc = read_u16(&mut r, 12)?;
        skip(&mut r, 6)?;
        record.parallelism_type = read_u8(&mut r, 2)?;
        skip(&mut r, 6)?;
        record.chroma_format_idc = read_u8(&mut r, 2)?;
        skip(&mut r, 5)?;
        record.bit_depth_luma_minus8 = read_u8(&mut r, 3)?;
        skip(&mut r, 5)?;
        record.bit_depth_chroma_minus8 = read_u8(&mut r, 3)?;
        record.avg_frame_rate = read_u16(&mut r, 16)?;
        record.constant_frame_rate = read_u8(&mut r, 2)?;
        record.num_temporal_layers = read_u8(&mut r, 3)?;
        record.temporal_id_nested = read_bool(&mut r)?;
        record.length_size_minus_one = read_u8(&mut r, 2)?;

        if record.length_size_minus_one == 2 {
            warn!("invalid NAL unit length size of 3 bytes");
        }

        Ok(record)
    }

    /// Size of the length field preceding every NAL unit of the stream the
    /// record describes.
    pub fn nal_length_size(&self) -> u8 {
        self.length_size_minus_one + 1
    }

    /// Every NAL unit of the record, in order.
    pub fn nalus(&self) -> impl Iterator<Item = &Nalu<'a>> {
        self.nalu_arrays.iter().flat_map(|array| array.nalus.iter())
    }
}
