// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VUI and HRD parameters, see Annex E.

use log::warn;

use crate::codec::h265::nalu_reader::NaluReader;
use crate::codec::h265::ptl::MAX_SUB_LAYERS;
use crate::codec::h265::ParseResult;

/// Maximum value of cpb_cnt_minus1 plus one.
pub const MAX_CPB_COUNT: usize = 32;

const EXTENDED_SAR: u8 = 255;

/// Table E-1 – Meaning of sample aspect ratio indicator.
const ASPECT_RATIOS: [(u32, u32); 17] = [
    (0, 0),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

/// sub_layer_hrd_parameters( ), see E.2.3.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubLayerHrdParams {
    // NOTE: The value of CpbCnt is cpb_cnt_minus1[i] + 1, and cpb_cnt_minus1
    // ranges from 0..=31
    /// bit_rate_value_minus1[ i ] (together with bit_rate_scale) specifies the
    /// maximum input bit rate for the i-th CPB when the CPB operates at the
    /// access unit level
    pub bit_rate_value_minus1: [u32; MAX_CPB_COUNT],
    /// cpb_size_value_minus1[ i ] is used together with cpb_size_scale to
    /// specify the i-th CPB size when the CPB operates at the access unit
    /// level.
    pub cpb_size_value_minus1: [u32; MAX_CPB_COUNT],
    /// cpb_size_du_value_minus1[ i ] is used together with cpb_size_du_scale to
    /// specify the i-th CPB size when the CPB operates at sub-picture level.
    pub cpb_size_du_value_minus1: [u32; MAX_CPB_COUNT],
    /// bit_rate_du_value_minus1[ i ] (together with bit_rate_scale) specifies
    /// the maximum input bit rate for the i-th CPB when the CPB operates at the
    /// sub-picture level.
    pub bit_rate_du_value_minus1: [u32; MAX_CPB_COUNT],
    /// cbr_flag[ i ] not set specifies that to decode this CVS by the HRD using
    /// the i-th CPB specification, the hypothetical stream scheduler operates
    /// in an intermittent bit rate mode.
    pub cbr_flag: [bool; MAX_CPB_COUNT],
}

impl Default for SubLayerHrdParams {
    fn default() -> Self {
        Self {
            bit_rate_value_minus1: [0; MAX_CPB_COUNT],
            cpb_size_value_minus1: [0; MAX_CPB_COUNT],
            cpb_size_du_value_minus1: [0; MAX_CPB_COUNT],
            bit_rate_du_value_minus1: [0; MAX_CPB_COUNT],
            cbr_flag: [false; MAX_CPB_COUNT],
        }
    }
}

impl SubLayerHrdParams {
    fn parse(
        &mut self,
        r: &mut NaluReader,
        cpb_cnt_minus1: u32,
        sub_pic_hrd_params_present_flag: bool,
    ) -> ParseResult<()> {
        for i in 0..=cpb_cnt_minus1 as usize {
            self.bit_rate_value_minus1[i] = r.read_ue_max(u32::MAX - 1)?;
            self.cpb_size_value_minus1[i] = r.read_ue_max(u32::MAX - 1)?;

            if sub_pic_hrd_params_present_flag {
                self.cpb_size_du_value_minus1[i] = r.read_ue_max(u32::MAX - 1)?;
                self.bit_rate_du_value_minus1[i] = r.read_ue_max(u32::MAX - 1)?;
            }

            self.cbr_flag[i] = r.read_bit()?;
        }

        Ok(())
    }
}

/// hrd_parameters( ), see E.2.2.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HrdParams {
    /// When set, specifies that NAL HRD parameters (pertaining to the Type II
    /// bitstream conformance point) are present in the hrd_parameters( ) syntax
    /// structure.
    pub nal_hrd_parameters_present_flag: bool,
    /// When set, specifies that VCL HRD parameters (pertaining to the Type I
    /// bitstream conformance point) are present in the hrd_parameters( ) syntax
    /// structure.
    pub vcl_hrd_parameters_present_flag: bool,
    /// When set, specifies that sub-picture level HRD parameters are present
    /// and the HRD may operate at access unit level or sub-picture level.
    pub sub_pic_hrd_params_present_flag: bool,
    /// Used to specify the clock sub-tick.
    pub tick_divisor_minus2: u8,
    pub du_cpb_removal_delay_increment_length_minus1: u8,
    pub sub_pic_cpb_params_in_pic_timing_sei_flag: bool,
    pub dpb_output_delay_du_length_minus1: u8,
    /// Together with bit_rate_value_minus1[ i ], specifies the maximum input
    /// bit rate of the i-th CPB.
    pub bit_rate_scale: u8,
    /// Together with cpb_size_value_minus1[ i ], specifies the CPB size of
    /// the i-th CPB.
    pub cpb_size_scale: u8,
    /// Together with cpb_size_du_value_minus1[ i ], specifies the CPB size of
    /// the i-th CPB when the CPB operates at sub-picture level.
    pub cpb_size_du_scale: u8,
    /// Length minus one, in bits, of the initial CPB removal delay and offset
    /// fields of the buffering period SEI message.
    pub initial_cpb_removal_delay_length_minus1: u8,
    /// Length minus one, in bits, of cpb_delay_offset and
    /// au_cpb_removal_delay_minus1.
    pub au_cpb_removal_delay_length_minus1: u8,
    /// Length minus one, in bits, of dpb_delay_offset and
    /// pic_dpb_output_delay.
    pub dpb_output_delay_length_minus1: u8,
    pub fixed_pic_rate_general_flag: [bool; MAX_SUB_LAYERS],
    pub fixed_pic_rate_within_cvs_flag: [bool; MAX_SUB_LAYERS],
    pub elemental_duration_in_tc_minus1: [u32; MAX_SUB_LAYERS],
    pub low_delay_hrd_flag: [bool; MAX_SUB_LAYERS],
    /// cpb_cnt_minus1[ i ] plus 1 specifies the number of alternative CPB
    /// specifications in the bitstream of the CVS when HighestTid is equal to
    /// i.
    pub cpb_cnt_minus1: [u32; MAX_SUB_LAYERS],
    /// One slot per sub-layer. NAL and VCL parameters are read into the same
    /// slot, one after the other, so the VCL values win when both are
    /// present.
    pub sublayer_hrd_params: [SubLayerHrdParams; MAX_SUB_LAYERS],
}

impl Default for HrdParams {
    fn default() -> Self {
        Self {
            nal_hrd_parameters_present_flag: false,
            vcl_hrd_parameters_present_flag: false,
            sub_pic_hrd_params_present_flag: false,
            tick_divisor_minus2: 0,
            du_cpb_removal_delay_increment_length_minus1: 0,
            sub_pic_cpb_params_in_pic_timing_sei_flag: false,
            dpb_output_delay_du_length_minus1: 0,
            bit_rate_scale: 0,
            cpb_size_scale: 0,
            cpb_size_du_scale: 0,
            initial_cpb_removal_delay_length_minus1: 23,
            au_cpb_removal_delay_length_minus1: 23,
            dpb_output_delay_length_minus1: 23,
            fixed_pic_rate_general_flag: Default::default(),
            fixed_pic_rate_within_cvs_flag: Default::default(),
            elemental_duration_in_tc_minus1: Default::default(),
            low_delay_hrd_flag: Default::default(),
            cpb_cnt_minus1: Default::default(),
            sublayer_hrd_params: Default::default(),
        }
    }
}

impl HrdParams {
    pub fn parse(
        r: &mut NaluReader,
        common_inf_present_flag: bool,
        max_sub_layers_minus1: u8,
    ) -> ParseResult<Self> {
        let mut hrd = HrdParams::default();

        if common_inf_present_flag {
            hrd.nal_hrd_parameters_present_flag = r.read_bit()?;
            hrd.vcl_hrd_parameters_present_flag = r.read_bit()?;

            if hrd.nal_hrd_parameters_present_flag || hrd.vcl_hrd_parameters_present_flag {
                hrd.sub_pic_hrd_params_present_flag = r.read_bit()?;

                if hrd.sub_pic_hrd_params_present_flag {
                    hrd.tick_divisor_minus2 = r.read_bits(8)?;
                    hrd.du_cpb_removal_delay_increment_length_minus1 = r.read_bits(5)?;
                    hrd.sub_pic_cpb_params_in_pic_timing_sei_flag = r.read_bit()?;
                    hrd.dpb_output_delay_du_length_minus1 = r.read_bits(5)?;
                }

                hrd.bit_rate_scale = r.read_bits(4)?;
                hrd.cpb_size_scale = r.read_bits(4)?;

                if hrd.sub_pic_hrd_params_present_flag {
                    hrd.cpb_size_du_scale = r.read_bits(4)?;
                }

                hrd.initial_cpb_removal_delay_length_minus1 = r.read_bits(5)?;
                hrd.au_cpb_removal_delay_length_minus1 = r.read_bits(5)?;
                hrd.dpb_output_delay_length_minus1 = r.read_bits(5)?;
            }
        }

        let num_sub_layers = usize::from(max_sub_layers_minus1) + 1;
        for i in 0..num_sub_layers.min(MAX_SUB_LAYERS) {
            hrd.fixed_pic_rate_general_flag[i] = r.read_bit()?;
            if !hrd.fixed_pic_rate_general_flag[i] {
                hrd.fixed_pic_rate_within_cvs_flag[i] = r.read_bit()?;
            } else {
                // Inferred to be 1.
                hrd.fixed_pic_rate_within_cvs_flag[i] = true;
            }

            if hrd.fixed_pic_rate_within_cvs_flag[i] {
                hrd.elemental_duration_in_tc_minus1[i] = r.read_ue_max(2047)?;
            } else {
                hrd.low_delay_hrd_flag[i] = r.read_bit()?;
            }

            if !hrd.low_delay_hrd_flag[i] {
                hrd.cpb_cnt_minus1[i] = r.read_ue_max(31)?;
            }

            let cpb_cnt_minus1 = hrd.cpb_cnt_minus1[i];
            let sub_pic = hrd.sub_pic_hrd_params_present_flag;

            if hrd.nal_hrd_parameters_present_flag {
                hrd.sublayer_hrd_params[i].parse(r, cpb_cnt_minus1, sub_pic)?;
            }

            if hrd.vcl_hrd_parameters_present_flag {
                hrd.sublayer_hrd_params[i].parse(r, cpb_cnt_minus1, sub_pic)?;
            }
        }

        Ok(hrd)
    }
}

/// vui_parameters( ), see E.2.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VuiParams {
    /// Set once the VUI was fully parsed. A SPS may signal VUI that was not
    /// parsed, see `ParserConfig::parse_vui`.
    pub parsed: bool,

    pub aspect_ratio_info_present_flag: bool,
    /// Specifies the value of the sample aspect ratio of the luma samples.
    pub aspect_ratio_idc: u8,
    /// Horizontal size of the sample aspect ratio (in arbitrary units).
    pub sar_width: u16,
    /// Vertical size of the sample aspect ratio (in the same arbitrary units
    /// as sar_width).
    pub sar_height: u16,
    /// Sample aspect ratio derived from `aspect_ratio_idc` or the explicit
    /// SAR.
    pub par_n: u32,
    pub par_d: u32,

    pub overscan_info_present_flag: bool,
    pub overscan_appropriate_flag: bool,

    pub video_signal_type_present_flag: bool,
    /// Table E-2. Defaults to 5, unspecified video format.
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_description_present_flag: bool,
    /// Table E-3. Defaults to 2, unspecified.
    pub colour_primaries: u8,
    /// Table E-4. Defaults to 2, unspecified.
    pub transfer_characteristics: u8,
    /// Table E-5. Defaults to 2, unspecified.
    pub matrix_coefficients: u8,

    pub chroma_loc_info_present_flag: bool,
    pub chroma_sample_loc_type_top_field: u32,
    pub chroma_sample_loc_type_bottom_field: u32,

    pub neutral_chroma_indication_flag: bool,
    /// When set, indicates that the CVS conveys pictures that represent
    /// fields.
    pub field_seq_flag: bool,
    /// When set, picture timing SEI messages carry pic_struct and friends.
    pub frame_field_info_present_flag: bool,

    pub default_display_window_flag: bool,
    pub def_disp_win_left_offset: u32,
    pub def_disp_win_right_offset: u32,
    pub def_disp_win_top_offset: u32,
    pub def_disp_win_bottom_offset: u32,

    pub timing_info_present_flag: bool,
    /// The number of time units of a clock operating at the frequency
    /// time_scale Hz that corresponds to one increment (called a clock tick)
    /// of a clock tick counter.
    pub num_units_in_tick: u32,
    /// The number of time units that pass in one second.
    pub time_scale: u32,
    pub poc_proportional_to_timing_flag: bool,
    pub num_ticks_poc_diff_one_minus1: u32,
    pub hrd_parameters_present_flag: bool,
    pub hrd: HrdParams,

    pub bitstream_restriction_flag: bool,
    pub tiles_fixed_structure_flag: bool,
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub restricted_ref_pic_lists_flag: bool,
    pub min_spatial_segmentation_idc: u32,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_min_cu_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
}

impl Default for VuiParams {
    fn default() -> Self {
        Self {
            parsed: false,
            aspect_ratio_info_present_flag: false,
            aspect_ratio_idc: 0,
            sar_width: 0,
            sar_height: 0,
            par_n: 0,
            par_d: 0,
            overscan_info_present_flag: false,
            overscan_appropriate_flag: false,
            video_signal_type_present_flag: false,
            video_format: 5,
            video_full_range_flag: false,
            colour_description_present_flag: false,
            colour_primaries: 2,
            transfer_characteristics: 2,
            matrix_coefficients: 2,
            chroma_loc_info_present_flag: false,
            chroma_sample_loc_type_top_field: 0,
            chroma_sample_loc_type_bottom_field: 0,
            neutral_chroma_indication_flag: false,
            field_seq_flag: false,
            frame_field_info_present_flag: false,
            default_display_window_flag: false,
            def_disp_win_left_offset: 0,
            def_disp_win_right_offset: 0,
            def_disp_win_top_offset: 0,
            def_disp_win_bottom_offset: 0,
            timing_info_present_flag: false,
            num_units_in_tick: 0,
            time_scale: 0,
            poc_proportional_to_timing_flag: false,
            num_ticks_poc_diff_one_minus1: 0,
            hrd_parameters_present_flag: false,
            hrd: HrdParams::default(),
            bitstream_restriction_flag: false,
            tiles_fixed_structure_flag: false,
            motion_vectors_over_pic_boundaries_flag: true,
            restricted_ref_pic_lists_flag: false,
            min_spatial_segmentation_idc: 0,
            max_bytes_per_pic_denom: 2,
            max_bits_per_min_cu_denom: 1,
            log2_max_mv_length_horizontal: 15,
            log2_max_mv_length_vertical: 15,
        }
    }
}

impl VuiParams {
    /// Parses the VUI of a SPS with `max_sub_layers_minus1` sub-layers.
    pub fn parse(r: &mut NaluReader, max_sub_layers_minus1: u8) -> ParseResult<Self> {
        let mut vui = VuiParams::default();

        vui.aspect_ratio_info_present_flag = r.read_bit()?;
        if vui.aspect_ratio_info_present_flag {
            vui.aspect_ratio_idc = r.read_bits(8)?;
            if vui.aspect_ratio_idc == EXTENDED_SAR {
                vui.sar_width = r.read_bits(16)?;
                vui.sar_height = r.read_bits(16)?;
                vui.par_n = u32::from(vui.sar_width);
                vui.par_d = u32::from(vui.sar_height);
            } else if let Some(&(par_n, par_d)) = ASPECT_RATIOS.get(usize::from(vui.aspect_ratio_idc))
            {
                vui.par_n = par_n;
                vui.par_d = par_d;
            }
        }

        vui.overscan_info_present_flag = r.read_bit()?;
        if vui.overscan_info_present_flag {
            vui.overscan_appropriate_flag = r.read_bit()?;
        }

        vui.video_signal_type_present_flag = r.read_bit()?;
        if vui.video_signal_type_present_flag {
            vui.video_format = r.read_bits(3)?;
            vui.video_full_range_flag = r.read_bit()?;
            vui.colour_description_present_flag = r.read_bit()?;
            if vui.colour_description_present_flag {
                vui.colour_primaries = r.read_bits(8)?;
                vui.transfer_characteristics = r.read_bits(8)?;
                vui.matrix_coefficients = r.read_bits(8)?;
            }
        }

        vui.chroma_loc_info_present_flag = r.read_bit()?;
        if vui.chroma_loc_info_present_flag {
            vui.chroma_sample_loc_type_top_field = r.read_ue_max(5)?;
            vui.chroma_sample_loc_type_bottom_field = r.read_ue_max(5)?;
        }

        vui.neutral_chroma_indication_flag = r.read_bit()?;
        vui.field_seq_flag = r.read_bit()?;
        vui.frame_field_info_present_flag = r.read_bit()?;
        vui.default_display_window_flag = r.read_bit()?;

        if vui.default_display_window_flag {
            vui.def_disp_win_left_offset = r.read_ue()?;
            vui.def_disp_win_right_offset = r.read_ue()?;
            vui.def_disp_win_top_offset = r.read_ue()?;
            vui.def_disp_win_bottom_offset = r.read_ue()?;
        }

        vui.timing_info_present_flag = r.read_bit()?;
        if vui.timing_info_present_flag {
            vui.num_units_in_tick = r.read_bits(32)?;
            if vui.num_units_in_tick == 0 {
                warn!("num_units_in_tick = 0 detected in stream (incompliant to H.265 E.2.1)");
            }

            vui.time_scale = r.read_bits(32)?;
            if vui.time_scale == 0 {
                warn!("time_scale = 0 detected in stream (incompliant to H.265 E.2.1)");
            }

            vui.poc_proportional_to_timing_flag = r.read_bit()?;
            if vui.poc_proportional_to_timing_flag {
                vui.num_ticks_poc_diff_one_minus1 = r.read_ue_max(u32::MAX - 1)?;
            }

            vui.hrd_parameters_present_flag = r.read_bit()?;
            if vui.hrd_parameters_present_flag {
                vui.hrd = HrdParams::parse(r, true, max_sub_layers_minus1)?;
            }
        }

        vui.bitstream_restriction_flag = r.read_bit()?;
        if vui.bitstream_restriction_flag {
            vui.tiles_fixed_structure_flag = r.read_bit()?;
            vui.motion_vectors_over_pic_boundaries_flag = r.read_bit()?;
            vui.restricted_ref_pic_lists_flag = r.read_bit()?;
            vui.min_spatial_segmentation_idc = r.read_ue_max(4096)?;
            vui.max_bytes_per_pic_denom = r.read_ue_max(16)?;
            vui.max_bits_per_min_cu_denom = r.read_ue_max(16)?;
            vui.log2_max_mv_length_horizontal = r.read_ue_max(16)?;
            vui.log2_max_mv_length_vertical = r.read_ue_max(15)?;
        }

        vui.parsed = true;
        Ok(vui)
    }
}
