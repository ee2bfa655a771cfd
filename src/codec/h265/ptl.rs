// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! profile_tier_level( ) parsing, see 7.3.3.

use enumn::N;

use crate::codec::h265::nalu_reader::NaluReader;
use crate::codec::h265::ParseError;
use crate::codec::h265::ParseResult;

/// Size of every per-sublayer array. sps_max_sub_layers_minus1 and
/// vps_max_sub_layers_minus1 are in the range 0..=6.
pub const MAX_SUB_LAYERS: usize = 8;

/// H265 levels as defined by table A.8.
/// general_level_idc and sub_layer_level_idc[ OpTid ] shall be set equal to a
/// value of 30 times the level number specified in Table A.8
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    #[default]
    L1 = 30,
    L2 = 60,
    L2_1 = 63,
    L3 = 90,
    L3_1 = 93,
    L4 = 120,
    L4_1 = 123,
    L5 = 150,
    L5_1 = 153,
    L5_2 = 156,
    L6 = 180,
    L6_1 = 183,
    L6_2 = 186,
}

/// The profile part of a sub-layer, present when
/// sub_layer_profile_present_flag[ i ] is set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubLayerProfile {
    pub profile_space: u8,
    pub tier_flag: bool,
    pub profile_idc: u8,
    pub profile_compatibility_flag: [bool; 32],
    pub progressive_source_flag: bool,
    pub interlaced_source_flag: bool,
    pub non_packed_constraint_flag: bool,
    pub frame_only_constraint_flag: bool,
    /// Only meaningful when sub_layer_level_present_flag[ i ] is set.
    pub level_idc: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileTierLevel {
    /// Specifies the context for the interpretation of general_profile_idc and
    /// general_profile_compatibility_flag[ j ] for all values of j in the range
    /// of 0 to 31, inclusive.
    pub profile_space: u8,
    /// Specifies the tier context for the interpretation of general_level_idc
    /// as specified in Annex A.
    pub tier_flag: bool,
    /// When general_profile_space is equal to 0, indicates a profile to which
    /// the CVS conforms as specified in Annex A.
    pub profile_idc: u8,
    /// profile_compatibility_flag[ j ] equal to true indicates that the CVS
    /// conforms to the profile indicated by general_profile_idc equal to j.
    pub profile_compatibility_flag: [bool; 32],
    /// Together with `interlaced_source_flag`, the source scan type of the
    /// pictures in the CVS: progressive, interlaced, unknown, or signalled per
    /// picture in a picture timing SEI message when both are set.
    pub progressive_source_flag: bool,
    /// See `progressive_source_flag`.
    pub interlaced_source_flag: bool,
    /// If true, there are no frame packing arrangement SEI messages in the
    /// CVS.
    pub non_packed_constraint_flag: bool,
    /// When true, specifies that field_seq_flag is false.
    pub frame_only_constraint_flag: bool,

    // The constraint flags below are interpreted as specified in Annex A.
    pub max_12bit_constraint_flag: bool,
    pub max_10bit_constraint_flag: bool,
    pub max_8bit_constraint_flag: bool,
    pub max_422chroma_constraint_flag: bool,
    pub max_420chroma_constraint_flag: bool,
    pub max_monochrome_constraint_flag: bool,
    pub intra_constraint_flag: bool,
    pub one_picture_only_constraint_flag: bool,
    pub lower_bit_rate_constraint_flag: bool,
    pub max_14bit_constraint_flag: bool,

    /// Indicates a level to which the CVS conforms as specified in Annex A.
    pub level_idc: u8,

    pub sub_layer_profile_present_flag: [bool; MAX_SUB_LAYERS],
    pub sub_layer_level_present_flag: [bool; MAX_SUB_LAYERS],
    pub sub_layers: [SubLayerProfile; MAX_SUB_LAYERS],
}

impl ProfileTierLevel {
    /// Parses a profile_tier_level( 1, max_sub_layers_minus1 ) structure.
    pub fn parse(r: &mut NaluReader, max_sub_layers_minus1: u8) -> ParseResult<Self> {
        let num_sub_layers = usize::from(max_sub_layers_minus1);
        if num_sub_layers >= MAX_SUB_LAYERS - 1 {
            return Err(ParseError::out_of_range(max_sub_layers_minus1, 0, 6));
        }

        let mut ptl = ProfileTierLevel {
            profile_space: r.read_bits(2)?,
            tier_flag: r.read_bit()?,
            profile_idc: r.read_bits(5)?,
            ..Default::default()
        };

        for flag in ptl.profile_compatibility_flag.iter_mut() {
            *flag = r.read_bit()?;
        }

        ptl.progressive_source_flag = r.read_bit()?;
        ptl.interlaced_source_flag = r.read_bit()?;
        ptl.non_packed_constraint_flag = r.read_bit()?;
        ptl.frame_only_constraint_flag = r.read_bit()?;

        ptl.max_12bit_constraint_flag = r.read_bit()?;
        ptl.max_10bit_constraint_flag = r.read_bit()?;
        ptl.max_8bit_constraint_flag = r.read_bit()?;
        ptl.max_422chroma_constraint_flag = r.read_bit()?;
        ptl.max_420chroma_constraint_flag = r.read_bit()?;
        ptl.max_monochrome_constraint_flag = r.read_bit()?;
        ptl.intra_constraint_flag = r.read_bit()?;
        ptl.one_picture_only_constraint_flag = r.read_bit()?;
        ptl.lower_bit_rate_constraint_flag = r.read_bit()?;
        ptl.max_14bit_constraint_flag = r.read_bit()?;

        // general_reserved_zero_33bits and general_inbld_flag.
        r.skip_bits(34)?;

        ptl.level_idc = r.read_bits(8)?;

        for i in 0..num_sub_layers {
            ptl.sub_layer_profile_present_flag[i] = r.read_bit()?;
            ptl.sub_layer_level_present_flag[i] = r.read_bit()?;
        }

        if num_sub_layers > 0 {
            for _ in num_sub_layers..8 {
                r.skip_bits(2)?; // reserved_zero_2bits
            }
        }

        for i in 0..num_sub_layers {
            let sub_layer = &mut ptl.sub_layers[i];

            if ptl.sub_layer_profile_present_flag[i] {
                sub_layer.profile_space = r.read_bits(2)?;
                sub_layer.tier_flag = r.read_bit()?;
                sub_layer.profile_idc = r.read_bits(5)?;

                for flag in sub_layer.profile_compatibility_flag.iter_mut() {
                    *flag = r.read_bit()?;
                }

                sub_layer.progressive_source_flag = r.read_bit()?;
                sub_layer.interlaced_source_flag = r.read_bit()?;
                sub_layer.non_packed_constraint_flag = r.read_bit()?;
                sub_layer.frame_only_constraint_flag = r.read_bit()?;

                // Constraint flags, reserved bits and sub_layer_inbld_flag.
                r.skip_bits(44)?;
            }

            if ptl.sub_layer_level_present_flag[i] {
                sub_layer.level_idc = r.read_bits(8)?;
            }
        }

        Ok(ptl)
    }

    /// The general level, if `level_idc` is one of Table A.8.
    pub fn level(&self) -> Option<Level> {
        Level::n(self.level_idc)
    }
}
