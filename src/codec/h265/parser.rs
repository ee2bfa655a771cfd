// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parameter set parsing and the [`Parser`] that keeps them around.

use log::debug;
use log::trace;
use log::warn;

use crate::codec::h265::nalu::Nalu;
use crate::codec::h265::nalu::NaluType;
use crate::codec::h265::nalu_reader::NaluReader;
use crate::codec::h265::ptl::ProfileTierLevel;
use crate::codec::h265::ptl::MAX_SUB_LAYERS;
use crate::codec::h265::rps::ShortTermRefPicSet;
use crate::codec::h265::scaling_list::ScalingLists;
use crate::codec::h265::sei::parse_sei;
use crate::codec::h265::sei::SeiMessage;
use crate::codec::h265::slice::SliceHeader;
use crate::codec::h265::store::ParamSetLink;
use crate::codec::h265::store::ParameterSetStore;
use crate::codec::h265::store::MAX_PPS_COUNT;
use crate::codec::h265::store::MAX_SPS_COUNT;
use crate::codec::h265::vui::HrdParams;
use crate::codec::h265::vui::VuiParams;
use crate::codec::h265::ParseError;
use crate::codec::h265::ParseResult;

// Table 6-1, indexed by chroma_format_idc.
const SUB_WIDTH_C: [u32; 4] = [1, 2, 2, 1];
const SUB_HEIGHT_C: [u32; 4] = [1, 2, 1, 1];

/// Size of the tile column and row arrays of a PPS.
pub const MAX_TILE_COLUMNS: usize = 20;
pub const MAX_TILE_ROWS: usize = 22;

fn check_type(nalu: &Nalu, expected: NaluType) -> ParseResult<()> {
    if nalu.header.type_ != expected {
        warn!(
            "Invalid NALU type, expected {:?}, got {:?}",
            expected, nalu.header.type_
        );
        return Err(ParseError::BrokenData("unexpected NAL unit type"));
    }

    Ok(())
}

/// Video parameter set, see 7.3.2.1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vps {
    /// Identifies the VPS for reference by other syntax elements.
    pub id: u8,
    pub base_layer_internal_flag: bool,
    pub base_layer_available_flag: bool,
    /// Plus 1 specifies the maximum allowed number of layers in each CVS
    /// referring to the VPS.
    pub max_layers_minus1: u8,
    /// Plus 1 specifies the maximum number of temporal sub-layers that may be
    /// present in each CVS referring to the VPS.
    pub max_sub_layers_minus1: u8,
    /// When `max_sub_layers_minus1` is greater than 0, specifies whether inter
    /// prediction is additionally restricted for CVSs referring to the VPS.
    pub temporal_id_nesting_flag: bool,
    pub profile_tier_level: ProfileTierLevel,
    pub sub_layer_ordering_info_present_flag: bool,
    pub max_dec_pic_buffering_minus1: [u32; MAX_SUB_LAYERS],
    pub max_num_reorder_pics: [u32; MAX_SUB_LAYERS],
    pub max_latency_increase_plus1: [u32; MAX_SUB_LAYERS],
    /// Maximum allowed value of nuh_layer_id of all NAL units in each CVS
    /// referring to the VPS.
    pub max_layer_id: u8,
    /// Plus 1 specifies the number of layer sets that are specified by the
    /// VPS.
    pub num_layer_sets_minus1: u16,
    pub timing_info_present_flag: bool,
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub poc_proportional_to_timing_flag: bool,
    pub num_ticks_poc_diff_one_minus1: u32,
    /// Number of hrd_parameters( ) syntax structures present in the VPS.
    pub num_hrd_parameters: u16,
    /// Layer set index of each hrd_parameters( ) structure.
    pub hrd_layer_set_idx: Vec<u16>,
    pub cprms_present_flag: Vec<bool>,
    /// The first hrd_parameters( ) structure. The remaining ones are parsed
    /// but not kept.
    pub hrd_params: HrdParams,
    pub extension_flag: bool,
}

impl Vps {
    /// Parses the VPS carried by `nalu`.
    pub fn parse(nalu: &Nalu) -> ParseResult<Self> {
        check_type(nalu, NaluType::VpsNut)?;
        debug!("parsing VPS");

        let mut r = NaluReader::new(nalu.payload());
        let mut vps = Vps {
            id: r.read_bits(4)?,
            base_layer_internal_flag: r.read_bit()?,
            base_layer_available_flag: r.read_bit()?,
            max_layers_minus1: r.read_bits(6)?,
            max_sub_layers_minus1: r.read_bits_bounded(3, 0, 6)?,
            temporal_id_nesting_flag: r.read_bit()?,
            ..Default::default()
        };

        r.skip_bits(16)?; // vps_reserved_0xffff_16bits

        vps.profile_tier_level = ProfileTierLevel::parse(&mut r, vps.max_sub_layers_minus1)?;

        let max = usize::from(vps.max_sub_layers_minus1);
        vps.sub_layer_ordering_info_present_flag = r.read_bit()?;
        let first = if vps.sub_layer_ordering_info_present_flag {
            0
        } else {
            max
        };

        for i in first..=max {
            vps.max_dec_pic_buffering_minus1[i] = r.read_ue_max(u32::MAX - 1)?;
            vps.max_num_reorder_pics[i] = r.read_ue_max(vps.max_dec_pic_buffering_minus1[i])?;
            vps.max_latency_increase_plus1[i] = r.read_ue_max(u32::MAX - 1)?;
        }

        // Lower sub-layers inherit the values of the highest one.
        for i in 0..first {
            vps.max_dec_pic_buffering_minus1[i] = vps.max_dec_pic_buffering_minus1[max];
            vps.max_num_reorder_pics[i] = vps.max_num_reorder_pics[max];
            vps.max_latency_increase_plus1[i] = vps.max_latency_increase_plus1[max];
        }

        vps.max_layer_id = r.read_bits(6)?;
        vps.num_layer_sets_minus1 = r.read_ue_max(1023)?;

        // layer_id_included_flag[ i ][ j ]
        let layer_id_flags =
            usize::from(vps.num_layer_sets_minus1) * (usize::from(vps.max_layer_id) + 1);
        r.skip_bits(layer_id_flags)?;

        vps.timing_info_present_flag = r.read_bit()?;
        if vps.timing_info_present_flag {
            vps.num_units_in_tick = r.read_bits(32)?;
            vps.time_scale = r.read_bits(32)?;
            vps.poc_proportional_to_timing_flag = r.read_bit()?;
            if vps.poc_proportional_to_timing_flag {
                vps.num_ticks_poc_diff_one_minus1 = r.read_ue_max(u32::MAX - 1)?;
            }

            vps.num_hrd_parameters =
                r.read_ue_max(u32::from(vps.num_layer_sets_minus1) + 1)?;

            let min_layer_set_idx = if vps.base_layer_internal_flag { 0 } else { 1 };
            for i in 0..vps.num_hrd_parameters {
                let idx = r.read_ue_bounded(min_layer_set_idx, u32::from(vps.num_layer_sets_minus1))?;
                vps.hrd_layer_set_idx.push(idx);

                let cprms_present_flag = if i > 0 { r.read_bit()? } else { true };
                vps.cprms_present_flag.push(cprms_present_flag);

                let hrd = HrdParams::parse(&mut r, cprms_present_flag, vps.max_sub_layers_minus1)?;
                if i == 0 {
                    vps.hrd_params = hrd;
                }
            }
        }

        vps.extension_flag = r.read_bit()?;

        Ok(vps)
    }
}

/// sps_range_extension( ), see 7.3.2.2.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsRangeExtension {
    pub transform_skip_rotation_enabled_flag: bool,
    pub transform_skip_context_enabled_flag: bool,
    pub implicit_rdpcm_enabled_flag: bool,
    pub explicit_rdpcm_enabled_flag: bool,
    pub extended_precision_processing_flag: bool,
    pub intra_smoothing_disabled_flag: bool,
    /// When set, weighted prediction offsets use the full bit depth range.
    pub high_precision_offsets_enabled_flag: bool,
    pub persistent_rice_adaptation_enabled_flag: bool,
    pub cabac_bypass_alignment_enabled_flag: bool,
}

impl SpsRangeExtension {
    fn parse(r: &mut NaluReader) -> ParseResult<Self> {
        Ok(Self {
            transform_skip_rotation_enabled_flag: r.read_bit()?,
            transform_skip_context_enabled_flag: r.read_bit()?,
            implicit_rdpcm_enabled_flag: r.read_bit()?,
            explicit_rdpcm_enabled_flag: r.read_bit()?,
            extended_precision_processing_flag: r.read_bit()?,
            intra_smoothing_disabled_flag: r.read_bit()?,
            high_precision_offsets_enabled_flag: r.read_bit()?,
            persistent_rice_adaptation_enabled_flag: r.read_bit()?,
            cabac_bypass_alignment_enabled_flag: r.read_bit()?,
        })
    }
}

/// sps_scc_extension( ), see 7.3.2.2.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsSccExtension {
    /// When set, a picture referring to the SPS may be included in a
    /// reference picture list of a slice of the picture itself.
    pub curr_pic_ref_enabled_flag: bool,
    pub palette_mode_enabled_flag: bool,
    pub palette_max_size: u8,
    pub delta_palette_max_predictor_size: u8,
    pub palette_predictor_initializers_present_flag: bool,
    pub num_palette_predictor_initializer_minus1: u8,
    /// One list of entries per colour component.
    pub palette_predictor_initializer: [Vec<u32>; 3],
    pub motion_vector_resolution_control_idc: u8,
    pub intra_boundary_filtering_disabled_flag: bool,
}

impl SpsSccExtension {
    fn parse(
        r: &mut NaluReader,
        chroma_format_idc: u8,
        bit_depth_luma: u8,
        bit_depth_chroma: u8,
    ) -> ParseResult<Self> {
        let mut scc = SpsSccExtension {
            curr_pic_ref_enabled_flag: r.read_bit()?,
            palette_mode_enabled_flag: r.read_bit()?,
            ..Default::default()
        };

        if scc.palette_mode_enabled_flag {
            scc.palette_max_size = r.read_ue_max(64)?;
            scc.delta_palette_max_predictor_size =
                r.read_ue_max(128 - u32::from(scc.palette_max_size))?;
            scc.palette_predictor_initializers_present_flag = r.read_bit()?;

            if scc.palette_predictor_initializers_present_flag {
                let predictor_size = u32::from(scc.palette_max_size)
                    + u32::from(scc.delta_palette_max_predictor_size);
                let max = predictor_size
                    .checked_sub(1)
                    .ok_or_else(|| ParseError::out_of_range(predictor_size, 1, 128))?;
                scc.num_palette_predictor_initializer_minus1 = r.read_ue_max(max)?;

                let num_comps = if chroma_format_idc == 0 { 1 } else { 3 };
                let num_entries = usize::from(scc.num_palette_predictor_initializer_minus1) + 1;
                for (comp, entries) in scc
                    .palette_predictor_initializer
                    .iter_mut()
                    .take(num_comps)
                    .enumerate()
                {
                    let num_bits = if comp == 0 {
                        bit_depth_luma
                    } else {
                        bit_depth_chroma
                    };

                    for _ in 0..num_entries {
                        entries.push(r.read_bits(usize::from(num_bits))?);
                    }
                }
            }
        }

        scc.motion_vector_resolution_control_idc = r.read_bits(2)?;
        scc.intra_boundary_filtering_disabled_flag = r.read_bit()?;

        Ok(scc)
    }
}

/// Sequence parameter set, see 7.3.2.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sps {
    /// Specifies the value of the vps_video_parameter_set_id of the active
    /// VPS.
    pub vps_id: u8,
    /// Plus 1 specifies the maximum number of temporal sub-layers that may be
    /// present in each CVS referring to the SPS.
    pub max_sub_layers_minus1: u8,
    pub temporal_id_nesting_flag: bool,
    pub profile_tier_level: ProfileTierLevel,
    /// Provides an identifier for the SPS for reference by other syntax
    /// elements.
    pub id: u8,
    /// Specifies the chroma sampling relative to the luma sampling as
    /// specified in clause 6.2.
    pub chroma_format_idc: u8,
    /// When set, the three colour components of the 4:4:4 chroma format are
    /// coded separately.
    pub separate_colour_plane_flag: bool,
    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    pub conformance_window_flag: bool,
    pub conf_win_left_offset: u32,
    pub conf_win_right_offset: u32,
    pub conf_win_top_offset: u32,
    pub conf_win_bottom_offset: u32,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    /// Specifies the value of the variable MaxPicOrderCntLsb that is used in
    /// the decoding process for picture order count.
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub sub_layer_ordering_info_present_flag: bool,
    pub max_dec_pic_buffering_minus1: [u8; MAX_SUB_LAYERS],
    pub max_num_reorder_pics: [u8; MAX_SUB_LAYERS],
    pub max_latency_increase_plus1: [u32; MAX_SUB_LAYERS],
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_luma_transform_block_size_minus2: u8,
    pub log2_diff_max_min_luma_transform_block_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub scaling_list_enabled_flag: bool,
    pub scaling_list_data_present_flag: bool,
    /// The lists in use: the parsed ones, or the default ones when scaling
    /// lists are enabled without data.
    pub scaling_list: ScalingLists,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm_enabled_flag: bool,
    pub pcm_sample_bit_depth_luma_minus1: u8,
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub pcm_loop_filter_disabled_flag: bool,
    pub num_short_term_ref_pic_sets: u8,
    pub short_term_ref_pic_set: Vec<ShortTermRefPicSet>,
    pub long_term_ref_pics_present_flag: bool,
    pub num_long_term_ref_pics_sps: u8,
    pub lt_ref_pic_poc_lsb_sps: [u16; 32],
    pub used_by_curr_pic_lt_sps_flag: [bool; 32],
    pub temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
    pub vui_parameters_present_flag: bool,
    pub vui_params: VuiParams,
    pub extension_flag: bool,
    pub range_extension_flag: bool,
    pub multilayer_extension_flag: bool,
    pub three_d_extension_flag: bool,
    pub scc_extension_flag: bool,
    pub extension_4bits: u8,
    pub range_extension: SpsRangeExtension,
    pub scc_extension: SpsSccExtension,

    /// ChromaArrayType, as per 7.4.3.2.1.
    pub chroma_array_type: u8,
    pub width: u32,
    pub height: u32,
    /// The conformance window, in luma samples. Covers the whole picture when
    /// no window is signalled.
    pub crop_rect_x: u32,
    pub crop_rect_y: u32,
    pub crop_rect_width: u32,
    pub crop_rect_height: u32,
    /// Frame rate, 0/1 while unknown. Only set once the SPS is filled.
    pub fps_num: u32,
    pub fps_den: u32,

    /// The VPS this SPS was filled from.
    pub vps_link: Option<ParamSetLink>,
}

impl Sps {
    /// Parses the SPS carried by `nalu`. The VUI is only interpreted if
    /// `parse_vui` is set, otherwise parsing stops at the VUI.
    pub fn parse(nalu: &Nalu, parse_vui: bool) -> ParseResult<Self> {
        check_type(nalu, NaluType::SpsNut)?;
        debug!("parsing SPS");

        let mut r = NaluReader::new(nalu.payload());
        let mut sps = Sps {
            vps_id: r.read_bits(4)?,
            max_sub_layers_minus1: r.read_bits_bounded(3, 0, 6)?,
            temporal_id_nesting_flag: r.read_bit()?,
            fps_den: 1,
            ..Default::default()
        };

        sps.profile_tier_level = ProfileTierLevel::parse(&mut r, sps.max_sub_layers_minus1)?;

        sps.id = r.read_ue_max(MAX_SPS_COUNT as u32 - 1)?;
        sps.chroma_format_idc = r.read_ue_max(3)?;
        if sps.chroma_format_idc == 3 {
            sps.separate_colour_plane_flag = r.read_bit()?;
        }

        sps.pic_width_in_luma_samples = r.read_ue_bounded(1, 16888)?;
        sps.pic_height_in_luma_samples = r.read_ue_bounded(1, 16888)?;

        sps.conformance_window_flag = r.read_bit()?;
        if sps.conformance_window_flag {
            sps.conf_win_left_offset = r.read_ue()?;
            sps.conf_win_right_offset = r.read_ue()?;
            sps.conf_win_top_offset = r.read_ue()?;
            sps.conf_win_bottom_offset = r.read_ue()?;
        }

        sps.bit_depth_luma_minus8 = r.read_ue_max(6)?;
        sps.bit_depth_chroma_minus8 = r.read_ue_max(6)?;
        sps.log2_max_pic_order_cnt_lsb_minus4 = r.read_ue_max(12)?;

        let max = usize::from(sps.max_sub_layers_minus1);
        sps.sub_layer_ordering_info_present_flag = r.read_bit()?;
        let first = if sps.sub_layer_ordering_info_present_flag {
            0
        } else {
            max
        };

        for i in first..=max {
            sps.max_dec_pic_buffering_minus1[i] = r.read_ue_max(16)?;
            sps.max_num_reorder_pics[i] =
                r.read_ue_max(u32::from(sps.max_dec_pic_buffering_minus1[i]))?;
            sps.max_latency_increase_plus1[i] = r.read_ue_max(u32::MAX - 1)?;
        }

        for i in 0..first {
            sps.max_dec_pic_buffering_minus1[i] = sps.max_dec_pic_buffering_minus1[max];
            sps.max_num_reorder_pics[i] = sps.max_num_reorder_pics[max];
            sps.max_latency_increase_plus1[i] = sps.max_latency_increase_plus1[max];
        }

        // CtbLog2SizeY is within 4..=6 for every profile of Annex A.
        sps.log2_min_luma_coding_block_size_minus3 = r.read_ue_max(3)?;
        sps.log2_diff_max_min_luma_coding_block_size = r.read_ue_max(6)?;
        sps.log2_min_luma_transform_block_size_minus2 = r.read_ue_max(3)?;
        sps.log2_diff_max_min_luma_transform_block_size = r.read_ue_max(3)?;
        sps.max_transform_hierarchy_depth_inter = r.read_ue_max(4)?;
        sps.max_transform_hierarchy_depth_intra = r.read_ue_max(4)?;

        sps.scaling_list_enabled_flag = r.read_bit()?;
        if sps.scaling_list_enabled_flag {
            sps.scaling_list_data_present_flag = r.read_bit()?;
            sps.scaling_list = if sps.scaling_list_data_present_flag {
                ScalingLists::parse(&mut r)?
            } else {
                ScalingLists::default_lists()
            };
        }

        sps.amp_enabled_flag = r.read_bit()?;
        sps.sample_adaptive_offset_enabled_flag = r.read_bit()?;

        sps.pcm_enabled_flag = r.read_bit()?;
        if sps.pcm_enabled_flag {
            sps.pcm_sample_bit_depth_luma_minus1 = r.read_bits(4)?;
            sps.pcm_sample_bit_depth_chroma_minus1 = r.read_bits(4)?;
            sps.log2_min_pcm_luma_coding_block_size_minus3 = r.read_ue_max(2)?;
            sps.log2_diff_max_min_pcm_luma_coding_block_size = r.read_ue_max(2)?;
            sps.pcm_loop_filter_disabled_flag = r.read_bit()?;
        }

        sps.num_short_term_ref_pic_sets = r.read_ue_max(64)?;
        let max_dec_pic_buffering_minus1 = sps.max_dec_pic_buffering_minus1[max];
        for i in 0..sps.num_short_term_ref_pic_sets {
            let rps = ShortTermRefPicSet::parse(
                &mut r,
                i,
                sps.num_short_term_ref_pic_sets,
                &sps.short_term_ref_pic_set,
                max_dec_pic_buffering_minus1,
            )?;
            sps.short_term_ref_pic_set.push(rps);
        }

        sps.long_term_ref_pics_present_flag = r.read_bit()?;
        if sps.long_term_ref_pics_present_flag {
            sps.num_long_term_ref_pics_sps = r.read_ue_max(32)?;
            let poc_lsb_bits = usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4;
            for i in 0..usize::from(sps.num_long_term_ref_pics_sps) {
                sps.lt_ref_pic_poc_lsb_sps[i] = r.read_bits(poc_lsb_bits)?;
                sps.used_by_curr_pic_lt_sps_flag[i] = r.read_bit()?;
            }
        }

        sps.temporal_mvp_enabled_flag = r.read_bit()?;
        sps.strong_intra_smoothing_enabled_flag = r.read_bit()?;

        sps.vui_parameters_present_flag = r.read_bit()?;
        if sps.vui_parameters_present_flag {
            if !parse_vui {
                // The extensions come after the VUI and cannot be reached
                // without parsing it.
                debug!("VUI present but not parsed, ignoring the rest of the SPS");
                sps.derive()?;
                return Ok(sps);
            }

            sps.vui_params = VuiParams::parse(&mut r, sps.max_sub_layers_minus1)?;
        }

        sps.extension_flag = r.read_bit()?;
        if sps.extension_flag {
            sps.range_extension_flag = r.read_bit()?;
            sps.multilayer_extension_flag = r.read_bit()?;
            sps.three_d_extension_flag = r.read_bit()?;
            sps.scc_extension_flag = r.read_bit()?;
            sps.extension_4bits = r.read_bits(4)?;
        }

        if sps.range_extension_flag {
            sps.range_extension = SpsRangeExtension::parse(&mut r)?;
        }

        if sps.multilayer_extension_flag {
            warn!("do not support multilayer extension, skip all remaining bits");
        } else if sps.three_d_extension_flag {
            warn!("do not support 3d extension, skip all remaining bits");
        } else if sps.scc_extension_flag {
            sps.scc_extension = SpsSccExtension::parse(
                &mut r,
                sps.chroma_format_idc,
                sps.bit_depth_luma_minus8 + 8,
                sps.bit_depth_chroma_minus8 + 8,
            )?;
        }

        sps.derive()?;
        Ok(sps)
    }

    /// Computes the fields that only depend on the SPS itself.
    fn derive(&mut self) -> ParseResult<()> {
        self.chroma_array_type = if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        };

        self.width = u32::from(self.pic_width_in_luma_samples);
        self.height = u32::from(self.pic_height_in_luma_samples);

        self.crop_rect_x = 0;
        self.crop_rect_y = 0;
        self.crop_rect_width = self.width;
        self.crop_rect_height = self.height;

        if self.conformance_window_flag {
            let idx = usize::from(self.chroma_format_idc).min(SUB_WIDTH_C.len() - 1);
            let crop_unit_x = i64::from(SUB_WIDTH_C[idx]);
            let crop_unit_y = i64::from(SUB_HEIGHT_C[idx]);

            let left = i64::from(self.conf_win_left_offset) * crop_unit_x;
            let right = i64::from(self.conf_win_right_offset) * crop_unit_x;
            let top = i64::from(self.conf_win_top_offset) * crop_unit_y;
            let bottom = i64::from(self.conf_win_bottom_offset) * crop_unit_y;

            if left + right > i64::from(self.width) {
                return Err(ParseError::out_of_range(left + right, 0, self.width));
            }
            if top + bottom > i64::from(self.height) {
                return Err(ParseError::out_of_range(top + bottom, 0, self.height));
            }

            // All of these are bounded by the picture size.
            self.crop_rect_x = left as u32;
            self.crop_rect_y = top as u32;
            self.crop_rect_width = self.width - (left + right) as u32;
            self.crop_rect_height = self.height - (top + bottom) as u32;

            trace!(
                "crop_rectangle x={} y={} width={}, height={}",
                self.crop_rect_x,
                self.crop_rect_y,
                self.crop_rect_width,
                self.crop_rect_height
            );
        }

        Ok(())
    }

    /// Derives the fields that need the VPS the SPS refers to.
    pub(crate) fn fill(&mut self, vps: &Vps) {
        let vui = &self.vui_params;

        if vui.timing_info_present_flag {
            // TODO: derive the frame rate of interlaced streams from the
            // pic_struct of picture timing SEI messages.
            if vui.parsed && !vui.field_seq_flag && !vui.frame_field_info_present_flag {
                self.fps_num = vui.time_scale;
                self.fps_den = vui.num_units_in_tick;
                debug!("framerate {}/{} in VUI", self.fps_num, self.fps_den);
            }
        } else if vps.timing_info_present_flag {
            self.fps_num = vps.time_scale;
            self.fps_den = vps.num_units_in_tick;
            debug!("framerate {}/{} in VPS", self.fps_num, self.fps_den);
        } else {
            debug!("No VUI, unknown framerate");
        }
    }

    /// MinCbLog2SizeY, see (7-10).
    pub fn min_cb_log2_size_y(&self) -> u32 {
        u32::from(self.log2_min_luma_coding_block_size_minus3) + 3
    }

    /// CtbLog2SizeY, see (7-11).
    pub fn ctb_log2_size_y(&self) -> u32 {
        self.min_cb_log2_size_y() + u32::from(self.log2_diff_max_min_luma_coding_block_size)
    }

    /// CtbSizeY, see (7-13).
    pub fn ctb_size_y(&self) -> u32 {
        1 << self.ctb_log2_size_y()
    }

    /// PicWidthInCtbsY, see (7-15).
    pub fn pic_width_in_ctbs_y(&self) -> u32 {
        u32::from(self.pic_width_in_luma_samples).div_ceil(self.ctb_size_y())
    }

    /// PicHeightInCtbsY, see (7-17).
    pub fn pic_height_in_ctbs_y(&self) -> u32 {
        u32::from(self.pic_height_in_luma_samples).div_ceil(self.ctb_size_y())
    }

    /// PicSizeInCtbsY, see (7-19).
    pub fn pic_size_in_ctbs_y(&self) -> u32 {
        self.pic_width_in_ctbs_y() * self.pic_height_in_ctbs_y()
    }

    /// MaxTbLog2SizeY.
    pub fn max_tb_log2_size_y(&self) -> u32 {
        u32::from(self.log2_min_luma_transform_block_size_minus2)
            + 2
            + u32::from(self.log2_diff_max_min_luma_transform_block_size)
    }

    /// BitDepthY, see (7-4).
    pub fn bit_depth_luma(&self) -> u8 {
        self.bit_depth_luma_minus8 + 8
    }

    /// BitDepthC, see (7-6).
    pub fn bit_depth_chroma(&self) -> u8 {
        self.bit_depth_chroma_minus8 + 8
    }

    /// WpOffsetHalfRangeY, see (7-31).
    pub fn wp_offset_half_range_y(&self) -> u32 {
        if self.range_extension.high_precision_offsets_enabled_flag {
            1 << (u32::from(self.bit_depth_luma_minus8) + 7)
        } else {
            1 << 7
        }
    }

    /// WpOffsetHalfRangeC, see (7-32).
    pub fn wp_offset_half_range_c(&self) -> u32 {
        if self.range_extension.high_precision_offsets_enabled_flag {
            1 << (u32::from(self.bit_depth_chroma_minus8) + 7)
        } else {
            1 << 7
        }
    }

    /// The DPB size of the highest sub-layer, minus one.
    pub fn max_dpb_size_minus1(&self) -> u8 {
        self.max_dec_pic_buffering_minus1[usize::from(self.max_sub_layers_minus1)]
    }
}

/// pps_range_extension( ), see 7.3.2.3.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PpsRangeExtension {
    pub log2_max_transform_skip_block_size_minus2: u8,
    pub cross_component_prediction_enabled_flag: bool,
    /// When set, cu_chroma_qp_offset_flag may be present in the transform
    /// unit syntax.
    pub chroma_qp_offset_list_enabled_flag: bool,
    pub diff_cu_chroma_qp_offset_depth: u8,
    pub chroma_qp_offset_list_len_minus1: u8,
    pub cb_qp_offset_list: [i8; 6],
    pub cr_qp_offset_list: [i8; 6],
    pub log2_sao_offset_scale_luma: u8,
    pub log2_sao_offset_scale_chroma: u8,
}

impl PpsRangeExtension {
    fn parse(r: &mut NaluReader, transform_skip_enabled_flag: bool, sps: &Sps) -> ParseResult<Self> {
        let mut ext = PpsRangeExtension::default();

        if transform_skip_enabled_flag {
            ext.log2_max_transform_skip_block_size_minus2 =
                r.read_ue_max(sps.max_tb_log2_size_y() - 2)?;
        }

        ext.cross_component_prediction_enabled_flag = r.read_bit()?;
        ext.chroma_qp_offset_list_enabled_flag = r.read_bit()?;
        if ext.chroma_qp_offset_list_enabled_flag {
            ext.diff_cu_chroma_qp_offset_depth =
                r.read_ue_max(u32::from(sps.log2_diff_max_min_luma_coding_block_size))?;
            ext.chroma_qp_offset_list_len_minus1 = r.read_ue_max(5)?;
            for i in 0..=usize::from(ext.chroma_qp_offset_list_len_minus1) {
                ext.cb_qp_offset_list[i] = r.read_se_bounded(-12, 12)?;
                ext.cr_qp_offset_list[i] = r.read_se_bounded(-12, 12)?;
            }
        }

        // Max(0, BitDepth - 10)
        let max_luma = sps.bit_depth_luma_minus8.saturating_sub(2);
        let max_chroma = sps.bit_depth_chroma_minus8.saturating_sub(2);
        ext.log2_sao_offset_scale_luma = r.read_ue_max(u32::from(max_luma))?;
        ext.log2_sao_offset_scale_chroma = r.read_ue_max(u32::from(max_chroma))?;

        Ok(ext)
    }
}

/// pps_scc_extension( ), see 7.3.2.3.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PpsSccExtension {
    pub curr_pic_ref_enabled_flag: bool,
    pub residual_adaptive_colour_transform_enabled_flag: bool,
    pub slice_act_qp_offsets_present_flag: bool,
    pub act_y_qp_offset_plus5: i8,
    pub act_cb_qp_offset_plus5: i8,
    pub act_cr_qp_offset_plus3: i8,
    pub palette_predictor_initializers_present_flag: bool,
    pub num_palette_predictor_initializers: u8,
    pub monochrome_palette_flag: bool,
    pub luma_bit_depth_entry_minus8: u8,
    pub chroma_bit_depth_entry_minus8: u8,
    /// One list of entries per colour component.
    pub palette_predictor_initializer: [Vec<u32>; 3],
}

impl PpsSccExtension {
    fn parse(r: &mut NaluReader, sps: &Sps) -> ParseResult<Self> {
        let mut scc = PpsSccExtension {
            curr_pic_ref_enabled_flag: r.read_bit()?,
            residual_adaptive_colour_transform_enabled_flag: r.read_bit()?,
            ..Default::default()
        };

        if scc.residual_adaptive_colour_transform_enabled_flag {
            scc.slice_act_qp_offsets_present_flag = r.read_bit()?;
            scc.act_y_qp_offset_plus5 = r.read_se_bounded(-7, 17)?;
            scc.act_cb_qp_offset_plus5 = r.read_se_bounded(-7, 17)?;
            scc.act_cr_qp_offset_plus3 = r.read_se_bounded(-9, 15)?;
        }

        scc.palette_predictor_initializers_present_flag = r.read_bit()?;
        if scc.palette_predictor_initializers_present_flag {
            let max = u32::from(sps.scc_extension.palette_max_size)
                + u32::from(sps.scc_extension.delta_palette_max_predictor_size);
            scc.num_palette_predictor_initializers = r.read_ue_max(max)?;

            if scc.num_palette_predictor_initializers > 0 {
                scc.monochrome_palette_flag = r.read_bit()?;
                // Must match the SPS bit depths.
                let luma = u32::from(sps.bit_depth_luma_minus8);
                scc.luma_bit_depth_entry_minus8 = r.read_ue_bounded(luma, luma)?;
                if !scc.monochrome_palette_flag {
                    let chroma = u32::from(sps.bit_depth_chroma_minus8);
                    scc.chroma_bit_depth_entry_minus8 = r.read_ue_bounded(chroma, chroma)?;
                }

                let num_comps = if scc.monochrome_palette_flag { 1 } else { 3 };
                let num_entries = usize::from(scc.num_palette_predictor_initializers);
                for comp in 0..num_comps {
                    let num_bits = if comp == 0 {
                        scc.luma_bit_depth_entry_minus8 + 8
                    } else {
                        scc.chroma_bit_depth_entry_minus8 + 8
                    };

                    for _ in 0..num_entries {
                        let entry = r.read_bits(usize::from(num_bits))?;
                        scc.palette_predictor_initializer[comp].push(entry);
                    }
                }
            }
        }

        Ok(scc)
    }
}

/// Picture parameter set, see 7.3.2.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pps {
    /// Identifies the PPS for reference by other syntax elements.
    pub id: u8,
    /// Specifies the value of sps_seq_parameter_set_id for the active SPS.
    pub sps_id: u8,
    pub dependent_slice_segments_enabled_flag: bool,
    pub output_flag_present_flag: bool,
    /// Number of extra slice header bits that are present in the slice header
    /// RBSP for coded pictures referring to the PPS.
    pub num_extra_slice_header_bits: u8,
    pub sign_data_hiding_enabled_flag: bool,
    pub cabac_init_present_flag: bool,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    /// Plus 26 specifies the initial value of SliceQpY for each slice
    /// referring to the PPS.
    pub init_qp_minus26: i8,
    pub constrained_intra_pred_flag: bool,
    pub transform_skip_enabled_flag: bool,
    pub cu_qp_delta_enabled_flag: bool,
    pub diff_cu_qp_delta_depth: u8,
    pub cb_qp_offset: i8,
    pub cr_qp_offset: i8,
    pub slice_chroma_qp_offsets_present_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_flag: bool,
    pub transquant_bypass_enabled_flag: bool,
    pub tiles_enabled_flag: bool,
    pub entropy_coding_sync_enabled_flag: bool,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    /// When set, tile column boundaries and likewise tile row boundaries are
    /// distributed uniformly across the picture.
    pub uniform_spacing_flag: bool,
    /// Width of every tile column in CTBs, minus 1. Derived when spacing is
    /// uniform.
    pub column_width_minus1: [u32; MAX_TILE_COLUMNS],
    /// Height of every tile row in CTBs, minus 1. Derived when spacing is
    /// uniform.
    pub row_height_minus1: [u32; MAX_TILE_ROWS],
    pub loop_filter_across_tiles_enabled_flag: bool,
    pub loop_filter_across_slices_enabled_flag: bool,
    pub deblocking_filter_control_present_flag: bool,
    pub deblocking_filter_override_enabled_flag: bool,
    pub deblocking_filter_disabled_flag: bool,
    pub beta_offset_div2: i8,
    pub tc_offset_div2: i8,
    pub scaling_list_data_present_flag: bool,
    /// The lists in use. When the PPS carries none, they are taken from the
    /// SPS while filling.
    pub scaling_list: ScalingLists,
    pub lists_modification_present_flag: bool,
    pub log2_parallel_merge_level_minus2: u8,
    pub slice_segment_header_extension_present_flag: bool,
    pub extension_flag: bool,
    pub range_extension_flag: bool,
    pub multilayer_extension_flag: bool,
    pub three_d_extension_flag: bool,
    pub scc_extension_flag: bool,
    pub extension_4bits: u8,
    pub range_extension: PpsRangeExtension,
    pub scc_extension: PpsSccExtension,

    pub pic_width_in_ctbs_y: u32,
    pub pic_height_in_ctbs_y: u32,

    /// The SPS this PPS was filled from.
    pub sps_link: Option<ParamSetLink>,
}

fn lookup_sps(store: &ParameterSetStore, sps_id: u8) -> ParseResult<&Sps> {
    store.get_sps(sps_id).ok_or_else(|| {
        warn!("couldn't find associated sequence parameter set with id: {}", sps_id);
        ParseError::BrokenLink {
            kind: "SPS",
            id: u32::from(sps_id),
        }
    })
}

impl Pps {
    /// Parses the PPS carried by `nalu`. Tiles and extensions need the SPS
    /// the PPS refers to, which is looked up in `store`.
    pub fn parse(nalu: &Nalu, store: &ParameterSetStore) -> ParseResult<Self> {
        check_type(nalu, NaluType::PpsNut)?;
        debug!("parsing PPS");

        let mut r = NaluReader::new(nalu.payload());
        let mut pps = Pps {
            id: r.read_ue_max(MAX_PPS_COUNT as u32 - 1)?,
            sps_id: r.read_ue_max(MAX_SPS_COUNT as u32 - 1)?,
            uniform_spacing_flag: true,
            loop_filter_across_tiles_enabled_flag: true,
            ..Default::default()
        };

        pps.dependent_slice_segments_enabled_flag = r.read_bit()?;
        pps.output_flag_present_flag = r.read_bit()?;
        pps.num_extra_slice_header_bits = r.read_bits(3)?;
        pps.sign_data_hiding_enabled_flag = r.read_bit()?;
        pps.cabac_init_present_flag = r.read_bit()?;

        pps.num_ref_idx_l0_default_active_minus1 = r.read_ue_max(14)?;
        pps.num_ref_idx_l1_default_active_minus1 = r.read_ue_max(14)?;

        // The lowest value is reached with the largest bit depth, the exact
        // bound is checked when the PPS is filled.
        pps.init_qp_minus26 = r.read_se_bounded(-(26 + 6 * 8), 25)?;

        pps.constrained_intra_pred_flag = r.read_bit()?;
        pps.transform_skip_enabled_flag = r.read_bit()?;
        pps.cu_qp_delta_enabled_flag = r.read_bit()?;
        if pps.cu_qp_delta_enabled_flag {
            pps.diff_cu_qp_delta_depth = r.read_ue_max(6)?;
        }

        pps.cb_qp_offset = r.read_se_bounded(-12, 12)?;
        pps.cr_qp_offset = r.read_se_bounded(-12, 12)?;

        pps.slice_chroma_qp_offsets_present_flag = r.read_bit()?;
        pps.weighted_pred_flag = r.read_bit()?;
        pps.weighted_bipred_flag = r.read_bit()?;
        pps.transquant_bypass_enabled_flag = r.read_bit()?;
        pps.tiles_enabled_flag = r.read_bit()?;
        pps.entropy_coding_sync_enabled_flag = r.read_bit()?;

        if pps.tiles_enabled_flag {
            let sps = lookup_sps(store, pps.sps_id)?;
            pps.parse_tiles(&mut r, sps)?;
        }

        pps.loop_filter_across_slices_enabled_flag = r.read_bit()?;
        pps.deblocking_filter_control_present_flag = r.read_bit()?;
        if pps.deblocking_filter_control_present_flag {
            pps.deblocking_filter_override_enabled_flag = r.read_bit()?;
            pps.deblocking_filter_disabled_flag = r.read_bit()?;
            if !pps.deblocking_filter_disabled_flag {
                pps.beta_offset_div2 = r.read_se_bounded(-6, 6)?;
                pps.tc_offset_div2 = r.read_se_bounded(-6, 6)?;
            }
        }

        pps.scaling_list_data_present_flag = r.read_bit()?;
        if pps.scaling_list_data_present_flag {
            pps.scaling_list = ScalingLists::parse(&mut r)?;
        }

        pps.lists_modification_present_flag = r.read_bit()?;
        pps.log2_parallel_merge_level_minus2 = r.read_ue_max(4)?;
        pps.slice_segment_header_extension_present_flag = r.read_bit()?;

        pps.extension_flag = r.read_bit()?;
        if pps.extension_flag {
            pps.range_extension_flag = r.read_bit()?;
            pps.multilayer_extension_flag = r.read_bit()?;
            pps.three_d_extension_flag = r.read_bit()?;
            pps.scc_extension_flag = r.read_bit()?;
            pps.extension_4bits = r.read_bits(4)?;
        }

        if pps.range_extension_flag {
            let sps = lookup_sps(store, pps.sps_id)?;
            pps.range_extension =
                PpsRangeExtension::parse(&mut r, pps.transform_skip_enabled_flag, sps)?;
        }

        if pps.multilayer_extension_flag {
            warn!("do not support multilayer extension, skip all remaining bits");
        } else if pps.three_d_extension_flag {
            warn!("do not support 3d extension, skip all remaining bits");
        } else if pps.scc_extension_flag {
            let sps = lookup_sps(store, pps.sps_id)?;
            pps.scc_extension = PpsSccExtension::parse(&mut r, sps)?;
        }

        Ok(pps)
    }

    /// Parses the tile layout. A mix of the RBSP syntax and 6.5.1.
    fn parse_tiles(&mut self, r: &mut NaluReader, sps: &Sps) -> ParseResult<()> {
        let width = sps.pic_width_in_ctbs_y();
        let height = sps.pic_height_in_ctbs_y();
        self.pic_width_in_ctbs_y = width;
        self.pic_height_in_ctbs_y = height;

        let num_tile_columns_minus1: u32 = r.read_ue_max(width.saturating_sub(1))?;
        let num_tile_rows_minus1: u32 = r.read_ue_max(height.saturating_sub(1))?;

        if num_tile_columns_minus1 as usize >= MAX_TILE_COLUMNS {
            warn!("Invalid \"num_tile_columns_minus1\" {}", num_tile_columns_minus1);
            return Err(ParseError::out_of_range(
                num_tile_columns_minus1,
                0,
                MAX_TILE_COLUMNS as i64 - 1,
            ));
        }

        if num_tile_rows_minus1 as usize >= MAX_TILE_ROWS {
            warn!("Invalid \"num_tile_rows_minus1\" {}", num_tile_rows_minus1);
            return Err(ParseError::out_of_range(
                num_tile_rows_minus1,
                0,
                MAX_TILE_ROWS as i64 - 1,
            ));
        }

        // Both fit, checked above.
        self.num_tile_columns_minus1 = num_tile_columns_minus1 as u8;
        self.num_tile_rows_minus1 = num_tile_rows_minus1 as u8;

        self.uniform_spacing_flag = r.read_bit()?;

        let num_columns = usize::from(self.num_tile_columns_minus1) + 1;
        let num_rows = usize::from(self.num_tile_rows_minus1) + 1;

        if self.uniform_spacing_flag {
            uniform_spacing(&mut self.column_width_minus1[..num_columns], width);
            uniform_spacing(&mut self.row_height_minus1[..num_rows], height);
        } else {
            explicit_spacing(r, &mut self.column_width_minus1[..num_columns], width)?;
            explicit_spacing(r, &mut self.row_height_minus1[..num_rows], height)?;
        }

        self.loop_filter_across_tiles_enabled_flag = r.read_bit()?;

        Ok(())
    }

    /// Derives the fields that need the SPS the PPS refers to and checks the
    /// values whose bounds depend on it.
    pub(crate) fn fill(&mut self, sps: &Sps) -> ParseResult<()> {
        let broken_link = ParseError::BrokenLink {
            kind: "SPS",
            id: u32::from(sps.id),
        };

        // (7-5)
        let qp_bd_offset_y = 6 * i32::from(sps.bit_depth_luma_minus8);
        if i32::from(self.init_qp_minus26) < -(26 + qp_bd_offset_y) {
            warn!("init_qp_minus26 {} too small for the SPS bit depth", self.init_qp_minus26);
            return Err(broken_link);
        }

        if self.cu_qp_delta_enabled_flag
            && self.diff_cu_qp_delta_depth > sps.log2_diff_max_min_luma_coding_block_size
        {
            warn!("diff_cu_qp_delta_depth {} too large", self.diff_cu_qp_delta_depth);
            return Err(broken_link);
        }

        self.pic_width_in_ctbs_y = sps.pic_width_in_ctbs_y();
        self.pic_height_in_ctbs_y = sps.pic_height_in_ctbs_y();

        if sps.scaling_list_enabled_flag && !self.scaling_list_data_present_flag {
            self.scaling_list = sps.scaling_list.clone();
        }

        Ok(())
    }

    /// Number of tiles in the picture.
    pub fn num_tiles(&self) -> u32 {
        (u32::from(self.num_tile_columns_minus1) + 1) * (u32::from(self.num_tile_rows_minus1) + 1)
    }
}

/// (6-3) and (6-4): split `size` CTBs evenly among the tiles.
fn uniform_spacing(sizes_minus1: &mut [u32], size: u32) {
    let n = sizes_minus1.len() as u32;
    for (i, s) in (0u32..).zip(sizes_minus1.iter_mut()) {
        *s = ((i + 1) * size / n).saturating_sub(i * size / n + 1);
    }
}

/// Reads all the tile sizes but the last one, which gets what is left of
/// `size`.
fn explicit_spacing(r: &mut NaluReader, sizes_minus1: &mut [u32], size: u32) -> ParseResult<()> {
    let Some((last, explicit)) = sizes_minus1.split_last_mut() else {
        return Ok(());
    };

    let mut left = size
        .checked_sub(1)
        .ok_or(ParseError::BrokenData("picture has no CTB"))?;

    for s in explicit {
        *s = r.read_ue()?;
        left = s
            .checked_add(1)
            .and_then(|used| left.checked_sub(used))
            .ok_or(ParseError::BrokenData("tiles larger than the picture"))?;
    }

    *last = left;
    Ok(())
}

/// Options of a [`Parser`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParserConfig {
    /// Whether to interpret the VUI of SPSs.
    pub parse_vui: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { parse_vui: true }
    }
}

/// A H.265 stream parser. Keeps the parameter sets of the stream, so that
/// slice headers and SEI messages referring to them can be parsed.
#[derive(Clone, Debug, Default)]
pub struct Parser {
    store: ParameterSetStore,
    config: ParserConfig,
}

impl Parser {
    pub fn with_config(config: ParserConfig) -> Self {
        Self {
            store: Default::default(),
            config,
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn store(&self) -> &ParameterSetStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ParameterSetStore {
        &mut self.store
    }

    /// Parses a VPS NALU and stores it.
    pub fn parse_vps(&mut self, nalu: &Nalu) -> ParseResult<&Vps> {
        let vps = Vps::parse(nalu).map_err(|e| {
            warn!("error parsing \"Video parameter set\": {}", e);
            e
        })?;

        debug!("adding video parameter set with id: {} to array", vps.id);
        self.store.put_vps(vps)
    }

    /// Parses a SPS NALU and stores it.
    pub fn parse_sps(&mut self, nalu: &Nalu) -> ParseResult<&Sps> {
        let sps = Sps::parse(nalu, self.config.parse_vui).map_err(|e| {
            warn!("error parsing \"Sequence parameter set\": {}", e);
            e
        })?;

        debug!("adding sequence parameter set with id: {} to array", sps.id);
        self.store.put_sps(sps)
    }

    /// Parses a PPS NALU and stores it.
    pub fn parse_pps(&mut self, nalu: &Nalu) -> ParseResult<&Pps> {
        let pps = Pps::parse(nalu, &self.store).map_err(|e| {
            warn!("error parsing \"Picture parameter set\": {}", e);
            e
        })?;

        debug!("adding picture parameter set with id: {} to array", pps.id);
        self.store.put_pps(pps)
    }

    /// Updates the stored parameter sets from any parameter set NALU. Other
    /// NALUs are ignored.
    pub fn parse_nal(&mut self, nalu: &Nalu) -> ParseResult<()> {
        match nalu.header.type_ {
            NaluType::VpsNut => self.parse_vps(nalu).map(|_| ()),
            NaluType::SpsNut => self.parse_sps(nalu).map(|_| ()),
            NaluType::PpsNut => self.parse_pps(nalu).map(|_| ()),
            _ => {
                debug!("not parsing NAL unit of type {:?}", nalu.header.type_);
                Ok(())
            }
        }
    }

    /// Parses the header of a slice segment NALU. The PPS it refers to is
    /// filled first.
    pub fn parse_slice_header(&mut self, nalu: &Nalu) -> ParseResult<SliceHeader> {
        SliceHeader::parse(nalu, &mut self.store)
    }

    /// Parses all the messages of a SEI NALU.
    pub fn parse_sei(&self, nalu: &Nalu) -> ParseResult<Vec<SeiMessage>> {
        parse_sei(nalu, &self.store)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::h265::nalu::NaluHeader;
    use crate::codec::h265::nalu_writer::NaluWriter;
    use crate::codec::h265::ptl::tests::main_ptl;
    use crate::codec::h265::ptl::tests::write_ptl;
    use crate::codec::h265::rps::tests::write_direct_rps;
    use crate::codec::h265::scaling_list::DEFAULT_SCALING_LIST_0;
    use crate::codec::h265::scaling_list::DEFAULT_SCALING_LIST_1;
    use crate::codec::h265::scaling_list::DEFAULT_SCALING_LIST_2;

    pub(crate) type TestWriter<'a> = NaluWriter<&'a mut Vec<u8>>;

    /// Builds an Annex B NAL unit of type `type_`, whose RBSP is written by
    /// `body` and closed with rbsp_trailing_bits( ).
    pub(crate) fn nal_buffer(type_: NaluType, body: impl FnOnce(&mut TestWriter)) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut w = NaluWriter::new(&mut buf, true);
            let header = NaluHeader {
                type_,
                nuh_layer_id: 0,
                nuh_temporal_id_plus1: 1,
            };
            w.write_header(&header, true).unwrap();
            body(&mut w);
            w.write_trailing_bits().unwrap();
        }
        buf
    }

    pub(crate) fn nalu(buf: &[u8]) -> Nalu {
        Nalu::next_annexb_unchecked(buf, 0).unwrap()
    }

    pub(crate) fn write_vps(id: u8, timing: Option<(u32, u32)>) -> Vec<u8> {
        nal_buffer(NaluType::VpsNut, |w| {
            w.write_u(4, id).unwrap();
            w.write_u(1, true).unwrap(); // base_layer_internal_flag
            w.write_u(1, true).unwrap(); // base_layer_available_flag
            w.write_u(6, 0u32).unwrap(); // max_layers_minus1
            w.write_u(3, 0u32).unwrap(); // max_sub_layers_minus1
            w.write_u(1, true).unwrap(); // temporal_id_nesting_flag
            w.write_u(16, 0xffffu32).unwrap();
            write_ptl(w, &main_ptl(), 0);
            w.write_u(1, true).unwrap(); // sub_layer_ordering_info_present_flag
            w.write_ue(4u32).unwrap();
            w.write_ue(2u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_u(6, 0u32).unwrap(); // max_layer_id
            w.write_ue(0u32).unwrap(); // num_layer_sets_minus1
            match timing {
                Some((num_units_in_tick, time_scale)) => {
                    w.write_u(1, true).unwrap();
                    w.write_u(32, num_units_in_tick).unwrap();
                    w.write_u(32, time_scale).unwrap();
                    w.write_u(1, false).unwrap(); // poc_proportional_to_timing_flag
                    w.write_ue(0u32).unwrap(); // num_hrd_parameters
                }
                None => {
                    w.write_u(1, false).unwrap();
                }
            }
            w.write_u(1, false).unwrap(); // vps_extension_flag
        })
    }

    /// A direct short-term RPS: negative then positive (delta, used) pairs.
    pub(crate) type DirectRps = (Vec<(u32, bool)>, Vec<(u32, bool)>);

    /// The knobs of the SPS written by [`write_sps`].
    #[derive(Clone, Debug)]
    pub(crate) struct SpsBits {
        pub id: u8,
        pub vps_id: u8,
        pub chroma_format_idc: u8,
        pub separate_colour_plane: bool,
        pub width: u32,
        pub height: u32,
        pub conformance_window: Option<[u32; 4]>,
        pub bit_depth_luma_minus8: u8,
        pub bit_depth_chroma_minus8: u8,
        pub log2_max_pic_order_cnt_lsb_minus4: u8,
        pub max_dec_pic_buffering_minus1: u8,
        pub log2_diff_max_min_luma_coding_block_size: u8,
        pub scaling_list_enabled: bool,
        pub sample_adaptive_offset_enabled: bool,
        pub short_term_ref_pic_sets: Vec<DirectRps>,
        pub long_term_ref_pics: Option<Vec<(u16, bool)>>,
        pub temporal_mvp_enabled: bool,
        pub vui_timing: Option<(u32, u32)>,
        pub vui_field_seq: bool,
        pub range_extension: Option<SpsRangeExtension>,
        pub scc_palette_entries: Option<u8>,
        pub scc_motion_vector_resolution_control_idc: u8,
    }

    impl Default for SpsBits {
        fn default() -> Self {
            Self {
                id: 0,
                vps_id: 0,
                chroma_format_idc: 1,
                separate_colour_plane: false,
                width: 1920,
                height: 1088,
                conformance_window: Some([0, 0, 0, 4]),
                bit_depth_luma_minus8: 0,
                bit_depth_chroma_minus8: 0,
                log2_max_pic_order_cnt_lsb_minus4: 4,
                max_dec_pic_buffering_minus1: 4,
                log2_diff_max_min_luma_coding_block_size: 3,
                scaling_list_enabled: false,
                sample_adaptive_offset_enabled: true,
                short_term_ref_pic_sets: vec![],
                long_term_ref_pics: None,
                temporal_mvp_enabled: true,
                vui_timing: None,
                vui_field_seq: false,
                range_extension: None,
                scc_palette_entries: None,
                scc_motion_vector_resolution_control_idc: 0,
            }
        }
    }

    pub(crate) fn write_sps(bits: &SpsBits) -> Vec<u8> {
        nal_buffer(NaluType::SpsNut, |w| {
            w.write_u(4, bits.vps_id).unwrap();
            w.write_u(3, 0u32).unwrap(); // max_sub_layers_minus1
            w.write_u(1, true).unwrap(); // temporal_id_nesting_flag
            write_ptl(w, &main_ptl(), 0);
            w.write_ue(bits.id).unwrap();
            w.write_ue(bits.chroma_format_idc).unwrap();
            if bits.chroma_format_idc == 3 {
                w.write_u(1, bits.separate_colour_plane).unwrap();
            }
            w.write_ue(bits.width).unwrap();
            w.write_ue(bits.height).unwrap();

            w.write_u(1, bits.conformance_window.is_some()).unwrap();
            if let Some(offsets) = bits.conformance_window {
                for offset in offsets {
                    w.write_ue(offset).unwrap();
                }
            }

            w.write_ue(bits.bit_depth_luma_minus8).unwrap();
            w.write_ue(bits.bit_depth_chroma_minus8).unwrap();
            w.write_ue(bits.log2_max_pic_order_cnt_lsb_minus4).unwrap();
            w.write_u(1, true).unwrap(); // sub_layer_ordering_info_present_flag
            w.write_ue(bits.max_dec_pic_buffering_minus1).unwrap();
            w.write_ue(0u32).unwrap(); // max_num_reorder_pics
            w.write_ue(0u32).unwrap(); // max_latency_increase_plus1

            w.write_ue(0u32).unwrap(); // log2_min_luma_coding_block_size_minus3
            w.write_ue(bits.log2_diff_max_min_luma_coding_block_size).unwrap();
            w.write_ue(0u32).unwrap(); // log2_min_luma_transform_block_size_minus2
            w.write_ue(3u32).unwrap(); // log2_diff_max_min_luma_transform_block_size
            w.write_ue(1u32).unwrap(); // max_transform_hierarchy_depth_inter
            w.write_ue(1u32).unwrap(); // max_transform_hierarchy_depth_intra

            w.write_u(1, bits.scaling_list_enabled).unwrap();
            if bits.scaling_list_enabled {
                w.write_u(1, false).unwrap(); // sps_scaling_list_data_present_flag
            }

            w.write_u(1, true).unwrap(); // amp_enabled_flag
            w.write_u(1, bits.sample_adaptive_offset_enabled).unwrap();
            w.write_u(1, false).unwrap(); // pcm_enabled_flag

            w.write_ue(bits.short_term_ref_pic_sets.len() as u32).unwrap();
            for (i, (negative, positive)) in bits.short_term_ref_pic_sets.iter().enumerate() {
                write_direct_rps(w, i as u8, negative, positive);
            }

            w.write_u(1, bits.long_term_ref_pics.is_some()).unwrap();
            if let Some(lt) = &bits.long_term_ref_pics {
                w.write_ue(lt.len() as u32).unwrap();
                for &(poc_lsb, used) in lt {
                    w.write_u(usize::from(bits.log2_max_pic_order_cnt_lsb_minus4) + 4, poc_lsb)
                        .unwrap();
                    w.write_u(1, used).unwrap();
                }
            }

            w.write_u(1, bits.temporal_mvp_enabled).unwrap();
            w.write_u(1, true).unwrap(); // strong_intra_smoothing_enabled_flag

            w.write_u(1, bits.vui_timing.is_some()).unwrap();
            if let Some((num_units_in_tick, time_scale)) = bits.vui_timing {
                w.write_u(1, false).unwrap(); // aspect_ratio_info_present_flag
                w.write_u(1, false).unwrap(); // overscan_info_present_flag
                w.write_u(1, false).unwrap(); // video_signal_type_present_flag
                w.write_u(1, false).unwrap(); // chroma_loc_info_present_flag
                w.write_u(1, false).unwrap(); // neutral_chroma_indication_flag
                w.write_u(1, bits.vui_field_seq).unwrap();
                w.write_u(1, false).unwrap(); // frame_field_info_present_flag
                w.write_u(1, false).unwrap(); // default_display_window_flag
                w.write_u(1, true).unwrap(); // vui_timing_info_present_flag
                w.write_u(32, num_units_in_tick).unwrap();
                w.write_u(32, time_scale).unwrap();
                w.write_u(1, false).unwrap(); // vui_poc_proportional_to_timing_flag
                w.write_u(1, false).unwrap(); // vui_hrd_parameters_present_flag
                w.write_u(1, false).unwrap(); // bitstream_restriction_flag
            }

            let scc = bits.scc_palette_entries.is_some()
                || bits.scc_motion_vector_resolution_control_idc != 0;
            let extension = bits.range_extension.is_some() || scc;
            w.write_u(1, extension).unwrap();
            if extension {
                w.write_u(1, bits.range_extension.is_some()).unwrap();
                w.write_u(1, false).unwrap(); // sps_multilayer_extension_flag
                w.write_u(1, false).unwrap(); // sps_3d_extension_flag
                w.write_u(1, scc).unwrap();
                w.write_u(4, 0u32).unwrap();
            }

            if let Some(ext) = &bits.range_extension {
                for flag in [
                    ext.transform_skip_rotation_enabled_flag,
                    ext.transform_skip_context_enabled_flag,
                    ext.implicit_rdpcm_enabled_flag,
                    ext.explicit_rdpcm_enabled_flag,
                    ext.extended_precision_processing_flag,
                    ext.intra_smoothing_disabled_flag,
                    ext.high_precision_offsets_enabled_flag,
                    ext.persistent_rice_adaptation_enabled_flag,
                    ext.cabac_bypass_alignment_enabled_flag,
                ] {
                    w.write_u(1, flag).unwrap();
                }
            }

            if scc {
                w.write_u(1, false).unwrap(); // sps_curr_pic_ref_enabled_flag
                w.write_u(1, bits.scc_palette_entries.is_some()).unwrap();
                if let Some(entries) = bits.scc_palette_entries {
                    w.write_ue(4u32).unwrap(); // palette_max_size
                    w.write_ue(2u32).unwrap(); // delta_palette_max_predictor_size
                    w.write_u(1, true).unwrap(); // initializers present
                    w.write_ue(entries - 1).unwrap();
                    let num_comps = if bits.chroma_format_idc == 0 { 1 } else { 3 };
                    for comp in 0..num_comps {
                        let num_bits = if comp == 0 {
                            bits.bit_depth_luma_minus8 + 8
                        } else {
                            bits.bit_depth_chroma_minus8 + 8
                        };
                        for i in 0..u32::from(entries) {
                            w.write_u(usize::from(num_bits), 10 * i + comp).unwrap();
                        }
                    }
                }
                w.write_u(2, bits.scc_motion_vector_resolution_control_idc).unwrap();
                w.write_u(1, false).unwrap(); // intra_boundary_filtering_disabled_flag
            }
        })
    }

    /// Explicit tile layout for [`PpsBits`], the sizes of all but the last
    /// column and row.
    #[derive(Clone, Debug, Default)]
    pub(crate) struct TileBits {
        pub num_tile_columns_minus1: u32,
        pub num_tile_rows_minus1: u32,
        pub explicit: Option<(Vec<u32>, Vec<u32>)>,
    }

    /// The knobs of the PPS written by [`write_pps`].
    #[derive(Clone, Debug, Default)]
    pub(crate) struct PpsBits {
        pub id: u8,
        pub sps_id: u8,
        pub dependent_slice_segments_enabled: bool,
        pub output_flag_present: bool,
        pub num_extra_slice_header_bits: u8,
        pub cabac_init_present: bool,
        pub num_ref_idx_default_active_minus1: [u8; 2],
        pub init_qp_minus26: i32,
        pub transform_skip_enabled: bool,
        pub diff_cu_qp_delta_depth: Option<u8>,
        pub slice_chroma_qp_offsets_present: bool,
        pub weighted_pred: bool,
        pub weighted_bipred: bool,
        pub tiles: Option<TileBits>,
        pub entropy_coding_sync: bool,
        pub loop_filter_across_slices: bool,
        /// override enabled, disabled, beta_offset_div2, tc_offset_div2
        pub deblocking: Option<(bool, bool, i32, i32)>,
        pub lists_modification_present: bool,
        pub slice_segment_header_extension_present: bool,
        /// (cb, cr) chroma QP offset lists of the range extension.
        pub chroma_qp_offset_lists: Option<Vec<(i32, i32)>>,
        pub act_qp_offsets: Option<[i32; 3]>,
    }

    pub(crate) fn write_pps(bits: &PpsBits) -> Vec<u8> {
        nal_buffer(NaluType::PpsNut, |w| {
            w.write_ue(bits.id).unwrap();
            w.write_ue(bits.sps_id).unwrap();
            w.write_u(1, bits.dependent_slice_segments_enabled).unwrap();
            w.write_u(1, bits.output_flag_present).unwrap();
            w.write_u(3, bits.num_extra_slice_header_bits).unwrap();
            w.write_u(1, false).unwrap(); // sign_data_hiding_enabled_flag
            w.write_u(1, bits.cabac_init_present).unwrap();
            w.write_ue(bits.num_ref_idx_default_active_minus1[0]).unwrap();
            w.write_ue(bits.num_ref_idx_default_active_minus1[1]).unwrap();
            w.write_se(bits.init_qp_minus26).unwrap();
            w.write_u(1, false).unwrap(); // constrained_intra_pred_flag
            w.write_u(1, bits.transform_skip_enabled).unwrap();
            w.write_u(1, bits.diff_cu_qp_delta_depth.is_some()).unwrap();
            if let Some(depth) = bits.diff_cu_qp_delta_depth {
                w.write_ue(depth).unwrap();
            }
            w.write_se(0).unwrap(); // pps_cb_qp_offset
            w.write_se(0).unwrap(); // pps_cr_qp_offset
            w.write_u(1, bits.slice_chroma_qp_offsets_present).unwrap();
            w.write_u(1, bits.weighted_pred).unwrap();
            w.write_u(1, bits.weighted_bipred).unwrap();
            w.write_u(1, false).unwrap(); // transquant_bypass_enabled_flag
            w.write_u(1, bits.tiles.is_some()).unwrap();
            w.write_u(1, bits.entropy_coding_sync).unwrap();

            if let Some(tiles) = &bits.tiles {
                w.write_ue(tiles.num_tile_columns_minus1).unwrap();
                w.write_ue(tiles.num_tile_rows_minus1).unwrap();
                w.write_u(1, tiles.explicit.is_none()).unwrap();
                if let Some((columns, rows)) = &tiles.explicit {
                    for &c in columns {
                        w.write_ue(c).unwrap();
                    }
                    for &r in rows {
                        w.write_ue(r).unwrap();
                    }
                }
                w.write_u(1, true).unwrap(); // loop_filter_across_tiles_enabled_flag
            }

            w.write_u(1, bits.loop_filter_across_slices).unwrap();
            w.write_u(1, bits.deblocking.is_some()).unwrap();
            if let Some((override_enabled, disabled, beta, tc)) = bits.deblocking {
                w.write_u(1, override_enabled).unwrap();
                w.write_u(1, disabled).unwrap();
                if !disabled {
                    w.write_se(beta).unwrap();
                    w.write_se(tc).unwrap();
                }
            }

            w.write_u(1, false).unwrap(); // pps_scaling_list_data_present_flag
            w.write_u(1, bits.lists_modification_present).unwrap();
            w.write_ue(0u32).unwrap(); // log2_parallel_merge_level_minus2
            w.write_u(1, bits.slice_segment_header_extension_present).unwrap();

            let range = bits.chroma_qp_offset_lists.is_some();
            let scc = bits.act_qp_offsets.is_some();
            w.write_u(1, range || scc).unwrap();
            if range || scc {
                w.write_u(1, range).unwrap();
                w.write_u(1, false).unwrap(); // pps_multilayer_extension_flag
                w.write_u(1, false).unwrap(); // pps_3d_extension_flag
                w.write_u(1, scc).unwrap();
                w.write_u(4, 0u32).unwrap();
            }

            if let Some(lists) = &bits.chroma_qp_offset_lists {
                if bits.transform_skip_enabled {
                    w.write_ue(1u32).unwrap(); // log2_max_transform_skip_block_size_minus2
                }
                w.write_u(1, false).unwrap(); // cross_component_prediction_enabled_flag
                w.write_u(1, true).unwrap(); // chroma_qp_offset_list_enabled_flag
                w.write_ue(1u32).unwrap(); // diff_cu_chroma_qp_offset_depth
                w.write_ue(lists.len() as u32 - 1).unwrap();
                for &(cb, cr) in lists {
                    w.write_se(cb).unwrap();
                    w.write_se(cr).unwrap();
                }
                w.write_ue(0u32).unwrap(); // log2_sao_offset_scale_luma
                w.write_ue(0u32).unwrap(); // log2_sao_offset_scale_chroma
            }

            if let Some([y, cb, cr]) = bits.act_qp_offsets {
                w.write_u(1, false).unwrap(); // pps_curr_pic_ref_enabled_flag
                w.write_u(1, true).unwrap(); // residual_adaptive_colour_transform_enabled_flag
                w.write_u(1, true).unwrap(); // pps_slice_act_qp_offsets_present_flag
                w.write_se(y).unwrap();
                w.write_se(cb).unwrap();
                w.write_se(cr).unwrap();
                w.write_u(1, false).unwrap(); // palette initializers present
            }
        })
    }

    /// A parser holding VPS 0, SPS `sps` and PPS `pps`.
    pub(crate) fn parser_with(sps: &SpsBits, pps: &PpsBits) -> Parser {
        let mut parser = Parser::default();
        parser.parse_vps(&nalu(&write_vps(0, None))).unwrap();
        parser.parse_sps(&nalu(&write_sps(sps))).unwrap();
        parser.parse_pps(&nalu(&write_pps(pps))).unwrap();
        parser
    }

    #[test]
    fn minimal_vps() {
        let buf = nal_buffer(NaluType::VpsNut, |w| {
            w.write_u(16, 0u32).unwrap(); // id, flags, max_layers, sub_layers, nesting
            w.write_u(16, 0u32).unwrap(); // vps_reserved_0xffff_16bits
            write_ptl(w, &ProfileTierLevel::default(), 0);
            w.write_u(1, false).unwrap(); // sub_layer_ordering_info_present_flag
            w.write_ue(0u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_u(6, 0u32).unwrap();
            w.write_ue(0u32).unwrap();
            w.write_u(1, false).unwrap(); // vps_timing_info_present_flag
            w.write_u(1, false).unwrap(); // vps_extension_flag
        });
        assert_eq!(&buf[4..6], &[0x40, 0x01]);

        let mut parser = Parser::default();
        let vps = parser.parse_vps(&nalu(&buf)).unwrap();
        assert_eq!(vps.id, 0);
        assert_eq!(vps.max_sub_layers_minus1, 0);
        assert_eq!(vps.max_layers_minus1, 0);
        assert!(!vps.temporal_id_nesting_flag);
        assert!(parser.store().get_vps(0).is_some());
        assert_eq!(parser.store().last_vps().map(|v| v.id), Some(0));
    }

    #[test]
    fn minimal_vps_bytes() {
        // Header of a VPS, then zeros up to the end of an all zero PTL.
        let mut payload = vec![0x00, 0x00, 0x00, 0x01, 0x40, 0x01];
        payload.extend_from_slice(&[0x00; 16]);
        // Ordering info flag 0 with three ue(0), max_layer_id 0,
        // num_layer_sets_minus1 ue(0), no timing, no extension, stop bit.
        payload.extend_from_slice(&[0b0111_0000, 0b0010_0100]);

        let mut parser = Parser::default();
        let vps = parser.parse_vps(&nalu(&payload)).unwrap();
        assert_eq!(vps.id, 0);
        assert_eq!(vps.max_sub_layers_minus1, 0);
    }

    #[test]
    fn vps_sub_layers_and_hrd() {
        let mut ptl = main_ptl();
        ptl.level_idc = 93;
        let buf = nal_buffer(NaluType::VpsNut, |w| {
            w.write_u(4, 3u32).unwrap();
            w.write_u(1, true).unwrap();
            w.write_u(1, true).unwrap();
            w.write_u(6, 0u32).unwrap();
            w.write_u(3, 2u32).unwrap(); // max_sub_layers_minus1
            w.write_u(1, false).unwrap();
            w.write_u(16, 0xffffu32).unwrap();
            write_ptl(w, &ptl, 2);
            w.write_u(1, false).unwrap(); // only the highest sub-layer
            w.write_ue(5u32).unwrap();
            w.write_ue(3u32).unwrap();
            w.write_ue(7u32).unwrap();
            w.write_u(6, 1u32).unwrap(); // max_layer_id
            w.write_ue(1u32).unwrap(); // num_layer_sets_minus1
            w.write_u(2, 0b11u32).unwrap(); // layer_id_included_flag
            w.write_u(1, true).unwrap(); // vps_timing_info_present_flag
            w.write_u(32, 1001u32).unwrap();
            w.write_u(32, 60000u32).unwrap();
            w.write_u(1, true).unwrap();
            w.write_ue(1u32).unwrap(); // num_ticks_poc_diff_one_minus1
            w.write_ue(1u32).unwrap(); // vps_num_hrd_parameters
            w.write_ue(1u32).unwrap(); // hrd_layer_set_idx
            // hrd_parameters( ) without NAL or VCL parameters.
            w.write_u(1, false).unwrap();
            w.write_u(1, false).unwrap();
            for _ in 0..3 {
                w.write_u(1, true).unwrap(); // fixed_pic_rate_general_flag
                w.write_ue(0u32).unwrap(); // elemental_duration_in_tc_minus1
                w.write_ue(0u32).unwrap(); // cpb_cnt_minus1
            }
            w.write_u(1, false).unwrap(); // vps_extension_flag
        });

        let vps = Vps::parse(&nalu(&buf)).unwrap();
        assert_eq!(vps.id, 3);
        assert_eq!(vps.max_sub_layers_minus1, 2);
        assert_eq!(vps.profile_tier_level.level_idc, 93);
        assert_eq!(vps.max_dec_pic_buffering_minus1[..3], [5, 5, 5]);
        assert_eq!(vps.max_num_reorder_pics[..3], [3, 3, 3]);
        assert_eq!(vps.max_latency_increase_plus1[..3], [7, 7, 7]);
        assert_eq!(vps.max_layer_id, 1);
        assert_eq!(vps.num_layer_sets_minus1, 1);
        assert!(vps.timing_info_present_flag);
        assert_eq!(vps.num_units_in_tick, 1001);
        assert_eq!(vps.time_scale, 60000);
        assert_eq!(vps.num_ticks_poc_diff_one_minus1, 1);
        assert_eq!(vps.num_hrd_parameters, 1);
        assert_eq!(vps.hrd_layer_set_idx, vec![1]);
        assert_eq!(vps.cprms_present_flag, vec![true]);
        assert!(vps.hrd_params.fixed_pic_rate_within_cvs_flag[2]);
        assert!(!vps.extension_flag);
    }

    #[test]
    fn vps_rejects_too_many_sub_layers() {
        let buf = nal_buffer(NaluType::VpsNut, |w| {
            w.write_u(4, 0u32).unwrap();
            w.write_u(2, 0b11u32).unwrap();
            w.write_u(6, 0u32).unwrap();
            w.write_u(3, 7u32).unwrap();
            w.write_u(1, false).unwrap();
        });

        let mut parser = Parser::default();
        assert_eq!(
            parser.parse_vps(&nalu(&buf)),
            Err(ParseError::out_of_range(7, 0, 6))
        );
        assert!(parser.store().get_vps(0).is_none());
    }

    #[test]
    fn wrong_nal_type() {
        let buf = write_vps(0, None);
        assert_eq!(
            Sps::parse(&nalu(&buf), true),
            Err(ParseError::BrokenData("unexpected NAL unit type"))
        );
    }

    #[test]
    fn sps_fields_and_crop() {
        let bits = SpsBits {
            id: 2,
            short_term_ref_pic_sets: vec![
                (vec![(1, true)], vec![]),
                (vec![(1, true), (1, true)], vec![(2, false)]),
            ],
            long_term_ref_pics: Some(vec![(5, true), (9, false)]),
            ..Default::default()
        };

        let sps = Sps::parse(&nalu(&write_sps(&bits)), true).unwrap();
        assert_eq!(sps.id, 2);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!(sps.chroma_array_type, 1);
        assert_eq!((sps.width, sps.height), (1920, 1088));
        assert_eq!(
            (sps.crop_rect_x, sps.crop_rect_y, sps.crop_rect_width, sps.crop_rect_height),
            (0, 0, 1920, 1080)
        );
        assert_eq!(sps.profile_tier_level, main_ptl());
        assert_eq!(sps.log2_max_pic_order_cnt_lsb_minus4, 4);
        assert_eq!(sps.max_dpb_size_minus1(), 4);
        assert_eq!(sps.ctb_size_y(), 64);
        assert_eq!(sps.pic_width_in_ctbs_y(), 30);
        assert_eq!(sps.pic_height_in_ctbs_y(), 17);
        assert_eq!(sps.pic_size_in_ctbs_y(), 510);
        assert_eq!(sps.max_tb_log2_size_y(), 5);

        assert_eq!(sps.num_short_term_ref_pic_sets, 2);
        assert_eq!(sps.short_term_ref_pic_set.len(), 2);
        let second = &sps.short_term_ref_pic_set[1];
        assert_eq!(second.delta_poc_s0[..2], [-1, -2]);
        assert_eq!(second.delta_poc_s1[0], 2);
        assert_eq!(second.num_delta_pocs, 3);

        assert!(sps.long_term_ref_pics_present_flag);
        assert_eq!(sps.num_long_term_ref_pics_sps, 2);
        assert_eq!(sps.lt_ref_pic_poc_lsb_sps[..2], [5, 9]);
        assert_eq!(sps.used_by_curr_pic_lt_sps_flag[..2], [true, false]);
        assert!(sps.temporal_mvp_enabled_flag);
        assert!(!sps.vui_parameters_present_flag);
        assert_eq!((sps.fps_num, sps.fps_den), (0, 1));
        assert!(sps.vps_link.is_none());
    }

    #[test]
    fn sps_chroma_array_type_with_separate_planes() {
        let bits = SpsBits {
            chroma_format_idc: 3,
            separate_colour_plane: true,
            conformance_window: Some([1, 1, 1, 1]),
            ..Default::default()
        };

        let sps = Sps::parse(&nalu(&write_sps(&bits)), true).unwrap();
        assert!(sps.separate_colour_plane_flag);
        assert_eq!(sps.chroma_array_type, 0);
        // 4:4:4 crops in units of one sample.
        assert_eq!((sps.crop_rect_width, sps.crop_rect_height), (1918, 1086));
    }

    #[test]
    fn sps_conformance_window_larger_than_picture() {
        let bits = SpsBits {
            width: 16,
            conformance_window: Some([4, 5, 0, 0]),
            ..Default::default()
        };

        assert_eq!(
            Sps::parse(&nalu(&write_sps(&bits)), true),
            Err(ParseError::out_of_range(18, 0, 16))
        );
    }

    #[test]
    fn sps_width_out_of_range() {
        let bits = SpsBits {
            width: 16889,
            ..Default::default()
        };

        assert_eq!(
            Sps::parse(&nalu(&write_sps(&bits)), true),
            Err(ParseError::out_of_range(16889, 1, 16888))
        );
    }

    #[test]
    fn sps_extensions() {
        let range_extension = SpsRangeExtension {
            implicit_rdpcm_enabled_flag: true,
            high_precision_offsets_enabled_flag: true,
            cabac_bypass_alignment_enabled_flag: true,
            ..Default::default()
        };
        let bits = SpsBits {
            bit_depth_luma_minus8: 2,
            bit_depth_chroma_minus8: 2,
            range_extension: Some(range_extension.clone()),
            scc_palette_entries: Some(2),
            scc_motion_vector_resolution_control_idc: 2,
            ..Default::default()
        };

        let sps = Sps::parse(&nalu(&write_sps(&bits)), true).unwrap();
        assert!(sps.extension_flag);
        assert!(sps.range_extension_flag);
        assert!(sps.scc_extension_flag);
        assert_eq!(sps.range_extension, range_extension);
        assert_eq!(sps.wp_offset_half_range_y(), 1 << 9);
        assert_eq!(sps.wp_offset_half_range_c(), 1 << 9);

        let scc = &sps.scc_extension;
        assert!(scc.palette_mode_enabled_flag);
        assert_eq!(scc.palette_max_size, 4);
        assert_eq!(scc.delta_palette_max_predictor_size, 2);
        assert_eq!(scc.num_palette_predictor_initializer_minus1, 1);
        assert_eq!(scc.palette_predictor_initializer[0], vec![0, 10]);
        assert_eq!(scc.palette_predictor_initializer[2], vec![2, 12]);
        assert_eq!(scc.motion_vector_resolution_control_idc, 2);
    }

    #[test]
    fn sps_vui_frame_rate() {
        let bits = SpsBits {
            vui_timing: Some((1001, 30000)),
            ..Default::default()
        };
        let sps_buf = write_sps(&bits);

        let mut parser = Parser::default();
        let sps = parser.parse_sps(&nalu(&sps_buf)).unwrap();
        assert!(sps.vui_params.parsed);
        assert_eq!(sps.vui_params.time_scale, 30000);

        // The frame rate needs the VPS.
        assert_eq!(
            parser.store_mut().fill_sps(0),
            Err(ParseError::BrokenLink { kind: "VPS", id: 0 })
        );

        parser.parse_vps(&nalu(&write_vps(0, Some((1, 25))))).unwrap();
        parser.store_mut().fill_sps(0).unwrap();
        let sps = parser.store().get_sps(0).unwrap();
        assert_eq!((sps.fps_num, sps.fps_den), (30000, 1001));
        assert_eq!(sps.vps_link, parser.store().vps_link(0));
    }

    #[test]
    fn sps_field_sequence_frame_rate_unknown() {
        let bits = SpsBits {
            vui_timing: Some((1001, 30000)),
            vui_field_seq: true,
            ..Default::default()
        };

        let mut parser = Parser::default();
        parser.parse_vps(&nalu(&write_vps(0, Some((1, 25))))).unwrap();
        parser.parse_sps(&nalu(&write_sps(&bits))).unwrap();
        parser.store_mut().fill_sps(0).unwrap();
        let sps = parser.store().get_sps(0).unwrap();
        assert_eq!((sps.fps_num, sps.fps_den), (0, 1));
    }

    #[test]
    fn sps_without_vui_parsing() {
        let bits = SpsBits {
            vui_timing: Some((1001, 30000)),
            range_extension: Some(SpsRangeExtension {
                high_precision_offsets_enabled_flag: true,
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut parser = Parser::with_config(ParserConfig { parse_vui: false });
        parser.parse_vps(&nalu(&write_vps(0, Some((1, 25))))).unwrap();
        let sps = parser.parse_sps(&nalu(&write_sps(&bits))).unwrap();
        assert!(sps.vui_parameters_present_flag);
        assert!(!sps.vui_params.parsed);
        assert!(!sps.range_extension_flag);
        assert_eq!(sps.crop_rect_height, 1080);

        // Falls back to the VPS timing.
        parser.store_mut().fill_sps(0).unwrap();
        let sps = parser.store().get_sps(0).unwrap();
        assert_eq!((sps.fps_num, sps.fps_den), (25, 1));
    }

    #[test]
    fn pps_fields() {
        let pps_bits = PpsBits {
            id: 7,
            dependent_slice_segments_enabled: true,
            num_extra_slice_header_bits: 2,
            num_ref_idx_default_active_minus1: [2, 1],
            init_qp_minus26: -4,
            diff_cu_qp_delta_depth: Some(1),
            weighted_pred: true,
            loop_filter_across_slices: true,
            deblocking: Some((true, false, -3, 2)),
            ..Default::default()
        };

        let parser = parser_with(&SpsBits::default(), &pps_bits);
        let pps = parser.store().get_pps(7).unwrap();
        assert_eq!(pps.sps_id, 0);
        assert!(pps.dependent_slice_segments_enabled_flag);
        assert_eq!(pps.num_extra_slice_header_bits, 2);
        assert_eq!(pps.num_ref_idx_l0_default_active_minus1, 2);
        assert_eq!(pps.num_ref_idx_l1_default_active_minus1, 1);
        assert_eq!(pps.init_qp_minus26, -4);
        assert!(pps.cu_qp_delta_enabled_flag);
        assert_eq!(pps.diff_cu_qp_delta_depth, 1);
        assert!(pps.weighted_pred_flag);
        assert!(!pps.tiles_enabled_flag);
        assert!(pps.uniform_spacing_flag);
        assert!(pps.loop_filter_across_tiles_enabled_flag);
        assert!(pps.deblocking_filter_override_enabled_flag);
        assert_eq!((pps.beta_offset_div2, pps.tc_offset_div2), (-3, 2));
        assert_eq!(parser.store().last_pps().map(|p| p.id), Some(7));
    }

    #[test]
    fn pps_uniform_tiles() {
        let pps_bits = PpsBits {
            tiles: Some(TileBits {
                num_tile_columns_minus1: 3,
                num_tile_rows_minus1: 2,
                explicit: None,
            }),
            ..Default::default()
        };

        let parser = parser_with(&SpsBits::default(), &pps_bits);
        let pps = parser.store().get_pps(0).unwrap();
        assert_eq!(pps.num_tiles(), 12);
        assert_eq!(pps.column_width_minus1[..4], [6, 7, 6, 7]);
        assert_eq!(pps.row_height_minus1[..3], [4, 5, 5]);

        let width: u32 = pps.column_width_minus1[..4].iter().map(|w| w + 1).sum();
        let height: u32 = pps.row_height_minus1[..3].iter().map(|h| h + 1).sum();
        assert_eq!(width, pps.pic_width_in_ctbs_y);
        assert_eq!(height, pps.pic_height_in_ctbs_y);
    }

    #[test]
    fn pps_explicit_tiles() {
        let pps_bits = PpsBits {
            tiles: Some(TileBits {
                num_tile_columns_minus1: 2,
                num_tile_rows_minus1: 1,
                explicit: Some((vec![9, 4], vec![3])),
            }),
            ..Default::default()
        };

        let parser = parser_with(&SpsBits::default(), &pps_bits);
        let pps = parser.store().get_pps(0).unwrap();
        assert!(!pps.uniform_spacing_flag);
        assert_eq!(pps.column_width_minus1[..3], [9, 4, 14]);
        assert_eq!(pps.row_height_minus1[..2], [3, 12]);
    }

    #[test]
    fn pps_tiles_wider_than_picture() {
        let pps_bits = PpsBits {
            tiles: Some(TileBits {
                num_tile_columns_minus1: 1,
                num_tile_rows_minus1: 0,
                explicit: Some((vec![30], vec![])),
            }),
            ..Default::default()
        };

        let mut parser = parser_with(&SpsBits::default(), &PpsBits::default());
        assert_eq!(
            parser.parse_pps(&nalu(&write_pps(&pps_bits))),
            Err(ParseError::BrokenData("tiles larger than the picture"))
        );
    }

    #[test]
    fn pps_tiles_need_sps() {
        let _ = env_logger::try_init();

        let pps_bits = PpsBits {
            sps_id: 3,
            tiles: Some(TileBits::default()),
            ..Default::default()
        };

        let mut parser = Parser::default();
        assert_eq!(
            parser.parse_pps(&nalu(&write_pps(&pps_bits))),
            Err(ParseError::BrokenLink { kind: "SPS", id: 3 })
        );

        // Without tiles or extensions the SPS is only needed when filling.
        let pps_bits = PpsBits {
            sps_id: 3,
            ..Default::default()
        };
        parser.parse_pps(&nalu(&write_pps(&pps_bits))).unwrap();
    }

    #[test]
    fn pps_range_and_scc_extensions() {
        let pps_bits = PpsBits {
            transform_skip_enabled: true,
            chroma_qp_offset_lists: Some(vec![(-3, 4), (5, -6)]),
            act_qp_offsets: Some([-7, 17, 15]),
            ..Default::default()
        };

        let parser = parser_with(&SpsBits::default(), &pps_bits);
        let pps = parser.store().get_pps(0).unwrap();
        assert!(pps.range_extension_flag);
        assert!(pps.scc_extension_flag);

        let range = &pps.range_extension;
        assert_eq!(range.log2_max_transform_skip_block_size_minus2, 1);
        assert!(range.chroma_qp_offset_list_enabled_flag);
        assert_eq!(range.diff_cu_chroma_qp_offset_depth, 1);
        assert_eq!(range.chroma_qp_offset_list_len_minus1, 1);
        assert_eq!(range.cb_qp_offset_list[..2], [-3, 5]);
        assert_eq!(range.cr_qp_offset_list[..2], [4, -6]);

        let scc = &pps.scc_extension;
        assert!(scc.residual_adaptive_colour_transform_enabled_flag);
        assert!(scc.slice_act_qp_offsets_present_flag);
        assert_eq!(
            (scc.act_y_qp_offset_plus5, scc.act_cb_qp_offset_plus5, scc.act_cr_qp_offset_plus3),
            (-7, 17, 15)
        );
    }

    #[test]
    fn scaling_list_defaults_on_fill() {
        let sps_bits = SpsBits {
            scaling_list_enabled: true,
            ..Default::default()
        };

        let mut parser = parser_with(&sps_bits, &PpsBits::default());
        assert!(!parser.store().get_pps(0).unwrap().scaling_list_data_present_flag);

        parser.store_mut().fill_pps(0).unwrap();
        let lists = &parser.store().get_pps(0).unwrap().scaling_list;
        for m in 0..6 {
            assert_eq!(lists.scaling_list_4x4[m], DEFAULT_SCALING_LIST_0);
            let expected = if m < 3 {
                DEFAULT_SCALING_LIST_1
            } else {
                DEFAULT_SCALING_LIST_2
            };
            assert_eq!(lists.scaling_list_8x8[m], expected);
            assert_eq!(lists.scaling_list_16x16[m], expected);
            assert_eq!(lists.scaling_list_dc_coef_minus8_16x16[m], 8);
        }
        assert_eq!(lists.scaling_list_32x32[0], DEFAULT_SCALING_LIST_1);
        assert_eq!(lists.scaling_list_32x32[1], DEFAULT_SCALING_LIST_2);
        assert_eq!(lists.scaling_list_dc_coef_minus8_32x32, [8, 8]);
    }

    #[test]
    fn pps_fill_checks() {
        // 8 bit luma only allows init_qp_minus26 down to -26.
        let pps_bits = PpsBits {
            init_qp_minus26: -30,
            ..Default::default()
        };
        let mut parser = parser_with(&SpsBits::default(), &pps_bits);
        assert_eq!(
            parser.store_mut().fill_pps(0),
            Err(ParseError::BrokenLink { kind: "SPS", id: 0 })
        );

        let pps_bits = PpsBits {
            diff_cu_qp_delta_depth: Some(4),
            ..Default::default()
        };
        let mut parser = parser_with(&SpsBits::default(), &pps_bits);
        assert_eq!(
            parser.store_mut().fill_pps(0),
            Err(ParseError::BrokenLink { kind: "SPS", id: 0 })
        );

        let pps_bits = PpsBits {
            diff_cu_qp_delta_depth: Some(3),
            ..Default::default()
        };
        let mut parser = parser_with(&SpsBits::default(), &pps_bits);
        parser.store_mut().fill_pps(0).unwrap();
        let pps = parser.store().get_pps(0).unwrap();
        assert_eq!((pps.pic_width_in_ctbs_y, pps.pic_height_in_ctbs_y), (30, 17));
        assert_eq!(pps.sps_link, parser.store().sps_link(0));
    }

    #[test]
    fn parse_nal_dispatches_parameter_sets() {
        let _ = env_logger::try_init();

        let mut stream = write_vps(1, None);
        stream.extend(write_sps(&SpsBits {
            vps_id: 1,
            ..Default::default()
        }));
        stream.extend(nal_buffer(NaluType::AudNut, |w| {
            w.write_u(3, 0u32).unwrap();
        }));
        stream.extend(write_pps(&PpsBits::default()));

        let mut parser = Parser::default();
        let mut offset = 0;
        while let Ok(nalu) = Nalu::next_annexb(&stream, offset) {
            parser.parse_nal(&nalu).unwrap();
            offset = nalu.offset + nalu.size;
        }
        // The last unit runs to the end of the buffer.
        let last = Nalu::next_annexb_unchecked(&stream, offset).unwrap();
        parser.parse_nal(&last).unwrap();

        assert!(parser.store().get_vps(1).is_some());
        assert!(parser.store().get_sps(0).is_some());
        assert!(parser.store().get_pps(0).is_some());
        parser.store_mut().fill_pps(0).unwrap();
    }
}
