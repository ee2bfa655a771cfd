// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Slice segment headers, see 7.3.6.

use std::fmt;

use enumn::N;
use log::debug;
use log::warn;

use crate::codec::h265::nalu::Nalu;
use crate::codec::h265::nalu_reader::NaluReader;
use crate::codec::h265::parser::Pps;
use crate::codec::h265::parser::Sps;
use crate::codec::h265::rps::ShortTermRefPicSet;
use crate::codec::h265::store::ParameterSetStore;
use crate::codec::h265::store::MAX_PPS_COUNT;
use crate::codec::h265::ParseError;
use crate::codec::h265::ParseResult;

/// Maximum number of entries of a reference picture list.
pub const MAX_REF_IDX_ACTIVE: usize = 15;

/// Maximum number of long-term pictures signalled in a slice header.
pub const MAX_LONG_TERM_PICS: usize = 32;

/// See table 7-7 in the H.265 specification.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum SliceType {
    #[default]
    B = 0,
    P = 1,
    I = 2,
}

impl SliceType {
    /// Whether this is a P slice. See table 7-7 in the specification.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-7 in the specification.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-7 in the specification.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }
}

impl fmt::Display for SliceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SliceType::B => "B",
            SliceType::P => "P",
            SliceType::I => "I",
        };
        f.write_str(s)
    }
}

/// ref_pic_lists_modification( ), see 7.3.6.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicListModification {
    pub ref_pic_list_modification_flag_l0: bool,
    /// Index of the picture of RefPicListTemp0 placed at each position of
    /// RefPicList0.
    pub list_entry_l0: [u32; MAX_REF_IDX_ACTIVE],
    pub ref_pic_list_modification_flag_l1: bool,
    pub list_entry_l1: [u32; MAX_REF_IDX_ACTIVE],
}

/// pred_weight_table( ), see 7.3.6.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    /// Base 2 logarithm of the denominator for all luma weighting factors.
    pub luma_log2_weight_denom: u8,
    /// Difference of the base 2 logarithm of the denominator for all chroma
    /// weighting factors.
    pub delta_chroma_log2_weight_denom: i8,

    pub luma_weight_l0_flag: [bool; MAX_REF_IDX_ACTIVE],
    pub chroma_weight_l0_flag: [bool; MAX_REF_IDX_ACTIVE],
    pub delta_luma_weight_l0: [i8; MAX_REF_IDX_ACTIVE],
    pub luma_offset_l0: [i32; MAX_REF_IDX_ACTIVE],
    pub delta_chroma_weight_l0: [[i8; 2]; MAX_REF_IDX_ACTIVE],
    pub delta_chroma_offset_l0: [[i32; 2]; MAX_REF_IDX_ACTIVE],

    /* B slices only */
    pub luma_weight_l1_flag: [bool; MAX_REF_IDX_ACTIVE],
    pub chroma_weight_l1_flag: [bool; MAX_REF_IDX_ACTIVE],
    pub delta_luma_weight_l1: [i8; MAX_REF_IDX_ACTIVE],
    pub luma_offset_l1: [i32; MAX_REF_IDX_ACTIVE],
    pub delta_chroma_weight_l1: [[i8; 2]; MAX_REF_IDX_ACTIVE],
    pub delta_chroma_offset_l1: [[i32; 2]; MAX_REF_IDX_ACTIVE],
}

/// The weights of one reference picture list, as read by
/// [`PredWeightTable::parse_list`].
struct WeightList<'a> {
    luma_weight_flag: &'a mut [bool; MAX_REF_IDX_ACTIVE],
    chroma_weight_flag: &'a mut [bool; MAX_REF_IDX_ACTIVE],
    delta_luma_weight: &'a mut [i8; MAX_REF_IDX_ACTIVE],
    luma_offset: &'a mut [i32; MAX_REF_IDX_ACTIVE],
    delta_chroma_weight: &'a mut [[i8; 2]; MAX_REF_IDX_ACTIVE],
    delta_chroma_offset: &'a mut [[i32; 2]; MAX_REF_IDX_ACTIVE],
}

impl PredWeightTable {
    fn parse(r: &mut NaluReader, sps: &Sps, hdr: &SliceHeader) -> ParseResult<Self> {
        debug!("parsing \"Prediction weight table\"");

        let mut pwt = PredWeightTable {
            luma_log2_weight_denom: r.read_ue_max(7)?,
            ..Default::default()
        };

        let chroma = sps.chroma_array_type != 0;
        if chroma {
            let denom = i32::from(pwt.luma_log2_weight_denom);
            pwt.delta_chroma_log2_weight_denom = r.read_se_bounded(-denom, 7 - denom)?;
        }

        let num_l0 = usize::from(hdr.num_ref_idx_l0_active_minus1) + 1;
        let l0 = WeightList {
            luma_weight_flag: &mut pwt.luma_weight_l0_flag,
            chroma_weight_flag: &mut pwt.chroma_weight_l0_flag,
            delta_luma_weight: &mut pwt.delta_luma_weight_l0,
            luma_offset: &mut pwt.luma_offset_l0,
            delta_chroma_weight: &mut pwt.delta_chroma_weight_l0,
            delta_chroma_offset: &mut pwt.delta_chroma_offset_l0,
        };
        Self::parse_list(r, sps, chroma, num_l0, l0)?;

        if hdr.type_.is_b() {
            let num_l1 = usize::from(hdr.num_ref_idx_l1_active_minus1) + 1;
            let l1 = WeightList {
                luma_weight_flag: &mut pwt.luma_weight_l1_flag,
                chroma_weight_flag: &mut pwt.chroma_weight_l1_flag,
                delta_luma_weight: &mut pwt.delta_luma_weight_l1,
                luma_offset: &mut pwt.luma_offset_l1,
                delta_chroma_weight: &mut pwt.delta_chroma_weight_l1,
                delta_chroma_offset: &mut pwt.delta_chroma_offset_l1,
            };
            Self::parse_list(r, sps, chroma, num_l1, l1)?;
        }

        Ok(pwt)
    }

    fn parse_list(
        r: &mut NaluReader,
        sps: &Sps,
        chroma: bool,
        num_entries: usize,
        list: WeightList,
    ) -> ParseResult<()> {
        // (7-56)
        let luma_range = sps.wp_offset_half_range_y() as i32;
        let chroma_range = 4 * sps.wp_offset_half_range_c() as i32;

        for flag in list.luma_weight_flag.iter_mut().take(num_entries) {
            *flag = r.read_bit()?;
        }

        if chroma {
            for flag in list.chroma_weight_flag.iter_mut().take(num_entries) {
                *flag = r.read_bit()?;
            }
        }

        for i in 0..num_entries {
            if list.luma_weight_flag[i] {
                list.delta_luma_weight[i] = r.read_se_bounded(-128, 127)?;
                list.luma_offset[i] = r.read_se_bounded(-luma_range, luma_range - 1)?;
            }

            if list.chroma_weight_flag[i] {
                for j in 0..2 {
                    list.delta_chroma_weight[i][j] = r.read_se_bounded(-128, 127)?;
                    list.delta_chroma_offset[i][j] =
                        r.read_se_bounded(-chroma_range, chroma_range - 1)?;
                }
            }
        }

        Ok(())
    }
}

/// Ceil(Log2(value)), 0 for values up to 1.
fn ceil_log2(value: u32) -> usize {
    if value <= 1 {
        0
    } else {
        (32 - (value - 1).leading_zeros()) as usize
    }
}

/// A H.265 slice segment header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_slice_segment_in_pic_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    /// The PPS in use, also giving the SPS and VPS through the store.
    pub pps_id: u8,
    pub dependent_slice_segment_flag: bool,
    /// Address of the first CTB of the slice segment, in raster scan.
    pub segment_address: u32,
    /// The syntax elements below are only present in independent slice
    /// segments.
    pub type_: SliceType,
    pub pic_output_flag: bool,
    pub colour_plane_id: u8,
    pub pic_order_cnt_lsb: u16,
    pub short_term_ref_pic_set_sps_flag: bool,
    /// The set signalled in the slice header itself, when
    /// `short_term_ref_pic_set_sps_flag` is not set.
    pub short_term_ref_pic_set: ShortTermRefPicSet,
    pub short_term_ref_pic_set_idx: u8,
    pub num_long_term_sps: u8,
    pub num_long_term_pics: u8,
    pub lt_idx_sps: [u8; MAX_LONG_TERM_PICS],
    pub poc_lsb_lt: [u16; MAX_LONG_TERM_PICS],
    pub used_by_curr_pic_lt_flag: [bool; MAX_LONG_TERM_PICS],
    pub delta_poc_msb_present_flag: [bool; MAX_LONG_TERM_PICS],
    pub delta_poc_msb_cycle_lt: [u32; MAX_LONG_TERM_PICS],
    pub temporal_mvp_enabled_flag: bool,
    pub sao_luma_flag: bool,
    pub sao_chroma_flag: bool,
    pub num_ref_idx_active_override_flag: bool,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub ref_pic_list_modification: RefPicListModification,
    pub mvd_l1_zero_flag: bool,
    pub cabac_init_flag: bool,
    pub collocated_from_l0_flag: bool,
    pub collocated_ref_idx: u8,
    pub pred_weight_table: PredWeightTable,
    pub five_minus_max_num_merge_cand: u8,
    pub use_integer_mv_flag: bool,
    pub qp_delta: i8,
    pub cb_qp_offset: i8,
    pub cr_qp_offset: i8,
    pub slice_act_y_qp_offset: i8,
    pub slice_act_cb_qp_offset: i8,
    pub slice_act_cr_qp_offset: i8,
    pub cu_chroma_qp_offset_enabled_flag: bool,
    pub deblocking_filter_override_flag: bool,
    pub deblocking_filter_disabled_flag: bool,
    pub beta_offset_div2: i8,
    pub tc_offset_div2: i8,
    pub loop_filter_across_slices_enabled_flag: bool,
    pub num_entry_point_offsets: u32,
    pub offset_len_minus1: u8,
    pub entry_point_offset_minus1: Vec<u32>,

    /// NumPicTotalCurr, see (7-55).
    pub num_poc_total_curr: u32,
    /// Size of the short-term RPS of the slice header in bits, emulation
    /// prevention bytes excluded.
    pub short_term_ref_pic_set_size: u32,
    /// Size of the long-term reference picture part of the slice header in
    /// bits, emulation prevention bytes excluded.
    pub long_term_ref_pic_set_size: u32,
    /// Size of the slice header in bits, emulation prevention bytes included.
    pub header_size: u32,
    /// Number of emulation prevention bytes in the slice header.
    pub n_emulation_prevention_bytes: u32,
}

impl SliceHeader {
    /// Parses the slice segment header of `nalu`. The PPS it refers to and
    /// its SPS are filled in `store` first.
    pub fn parse(nalu: &Nalu, store: &mut ParameterSetStore) -> ParseResult<Self> {
        if !nalu.header.type_.is_slice() {
            warn!("{:?} is not a slice segment", nalu.header.type_);
            return Err(ParseError::BrokenData("not a slice segment NAL unit"));
        }

        debug!("parsing \"Slice header\"");

        let mut r = NaluReader::new(nalu.payload());
        let mut hdr = SliceHeader {
            first_slice_segment_in_pic_flag: r.read_bit()?,
            ..Default::default()
        };

        if nalu.header.type_.is_irap() {
            hdr.no_output_of_prior_pics_flag = r.read_bit()?;
        }

        hdr.pps_id = r.read_ue_max(MAX_PPS_COUNT as u32 - 1)?;
        if store.get_pps(hdr.pps_id).is_none() {
            warn!(
                "couldn't find associated picture parameter set with id: {}",
                hdr.pps_id
            );
            return Err(ParseError::BrokenLink {
                kind: "PPS",
                id: u32::from(hdr.pps_id),
            });
        }

        store.fill_pps(hdr.pps_id).map_err(|e| {
            warn!("couldn't fill pps id: {}", hdr.pps_id);
            e
        })?;

        let store: &ParameterSetStore = store;
        let broken_pps = ParseError::BrokenLink {
            kind: "PPS",
            id: u32::from(hdr.pps_id),
        };
        let pps = store.get_pps(hdr.pps_id).ok_or(broken_pps)?;
        let sps = store.get_sps(pps.sps_id).ok_or_else(|| {
            warn!("couldn't find associated sequence parameter set with id: {}", pps.sps_id);
            ParseError::BrokenLink {
                kind: "SPS",
                id: u32::from(pps.sps_id),
            }
        })?;

        hdr.parse_body(&mut r, nalu, sps, pps).map_err(|e| {
            warn!("error parsing \"Slice header\": {}", e);
            e
        })?;

        Ok(hdr)
    }

    fn parse_body(
        &mut self,
        r: &mut NaluReader,
        nalu: &Nalu,
        sps: &Sps,
        pps: &Pps,
    ) -> ParseResult<()> {
        // Inferred when absent.
        self.pic_output_flag = true;
        self.collocated_from_l0_flag = true;
        self.deblocking_filter_disabled_flag = pps.deblocking_filter_disabled_flag;
        self.beta_offset_div2 = pps.beta_offset_div2;
        self.tc_offset_div2 = pps.tc_offset_div2;
        self.loop_filter_across_slices_enabled_flag = pps.loop_filter_across_slices_enabled_flag;

        if !self.first_slice_segment_in_pic_flag {
            if pps.dependent_slice_segments_enabled_flag {
                self.dependent_slice_segment_flag = r.read_bit()?;
            }

            let pic_size_in_ctbs_y = pps.pic_width_in_ctbs_y * pps.pic_height_in_ctbs_y;
            self.segment_address = r.read_bits_bounded(
                ceil_log2(pic_size_in_ctbs_y),
                0,
                pic_size_in_ctbs_y.saturating_sub(1),
            )?;
        }

        if !self.dependent_slice_segment_flag {
            self.parse_independent(r, nalu, sps, pps)?;
        }

        if pps.tiles_enabled_flag || pps.entropy_coding_sync_enabled_flag {
            let num_tile_columns = u32::from(pps.num_tile_columns_minus1) + 1;
            let num_tile_rows = u32::from(pps.num_tile_rows_minus1) + 1;

            let max = if !pps.tiles_enabled_flag {
                pps.pic_height_in_ctbs_y - 1
            } else if !pps.entropy_coding_sync_enabled_flag {
                num_tile_columns * num_tile_rows - 1
            } else {
                num_tile_columns * pps.pic_height_in_ctbs_y - 1
            };

            self.num_entry_point_offsets = r.read_ue_max(max)?;
            if self.num_entry_point_offsets > 0 {
                self.offset_len_minus1 = r.read_ue_max(31)?;
                let num_bits = usize::from(self.offset_len_minus1) + 1;
                for _ in 0..self.num_entry_point_offsets {
                    self.entry_point_offset_minus1.push(r.read_bits(num_bits)?);
                }
            }
        }

        if pps.slice_segment_header_extension_present_flag {
            let len: usize = r.read_ue_max(256)?;
            r.skip_bits(8 * len)?;
        }

        // byte_alignment( )
        r.skip_bits(1)?;
        while !r.is_byte_aligned() {
            r.skip_bits(1)?;
        }

        self.header_size = r.position() as u32;
        self.n_emulation_prevention_bytes = r.num_epb() as u32;

        Ok(())
    }

    fn parse_independent(
        &mut self,
        r: &mut NaluReader,
        nalu: &Nalu,
        sps: &Sps,
        pps: &Pps,
    ) -> ParseResult<()> {
        r.skip_bits(usize::from(pps.num_extra_slice_header_bits))?;

        let slice_type: u8 = r.read_ue_max(63)?;
        self.type_ = SliceType::n(slice_type).ok_or_else(|| {
            warn!("Invalid slice_type {}", slice_type);
            ParseError::out_of_range(slice_type, 0, 2)
        })?;

        if pps.output_flag_present_flag {
            self.pic_output_flag = r.read_bit()?;
        }

        if sps.separate_colour_plane_flag {
            self.colour_plane_id = r.read_bits(2)?;
        }

        let mut used_by_curr_pic_lt = [false; MAX_LONG_TERM_PICS];

        if !nalu.header.type_.is_idr() {
            let poc_lsb_bits = usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4;
            self.pic_order_cnt_lsb = r.read_bits(poc_lsb_bits)?;

            self.short_term_ref_pic_set_sps_flag = r.read_bit()?;
            if !self.short_term_ref_pic_set_sps_flag {
                let pos = r.position();
                let epb = r.num_epb();

                self.short_term_ref_pic_set = ShortTermRefPicSet::parse(
                    r,
                    sps.num_short_term_ref_pic_sets,
                    sps.num_short_term_ref_pic_sets,
                    &sps.short_term_ref_pic_set,
                    sps.max_dpb_size_minus1(),
                )?;

                self.short_term_ref_pic_set_size =
                    ((r.position() - pos) - 8 * (r.num_epb() - epb)) as u32;
            } else if sps.num_short_term_ref_pic_sets == 0 {
                warn!("slice refers to a short-term RPS of a SPS without any");
                return Err(ParseError::out_of_range(0, 1, 64));
            } else if sps.num_short_term_ref_pic_sets > 1 {
                let num_sets = u32::from(sps.num_short_term_ref_pic_sets);
                self.short_term_ref_pic_set_idx =
                    r.read_bits_bounded(ceil_log2(num_sets), 0, num_sets - 1)?;
            }

            if sps.long_term_ref_pics_present_flag {
                self.parse_long_term(r, sps, &mut used_by_curr_pic_lt)?;
            }

            if sps.temporal_mvp_enabled_flag {
                self.temporal_mvp_enabled_flag = r.read_bit()?;
            }
        }

        if sps.sample_adaptive_offset_enabled_flag {
            self.sao_luma_flag = r.read_bit()?;
            if sps.chroma_array_type != 0 {
                self.sao_chroma_flag = r.read_bit()?;
            }
        }

        if self.type_.is_p() || self.type_.is_b() {
            self.parse_inter(r, sps, pps, &used_by_curr_pic_lt)?;
        }

        self.qp_delta = r.read_se_bounded(-87, 77)?;
        if pps.slice_chroma_qp_offsets_present_flag {
            self.cb_qp_offset = r.read_se_bounded(-12, 12)?;
            self.cr_qp_offset = r.read_se_bounded(-12, 12)?;
        }

        if pps.scc_extension.slice_act_qp_offsets_present_flag {
            self.slice_act_y_qp_offset = r.read_se_bounded(-12, 12)?;
            self.slice_act_cb_qp_offset = r.read_se_bounded(-12, 12)?;
            self.slice_act_cr_qp_offset = r.read_se_bounded(-12, 12)?;
        }

        if pps.range_extension.chroma_qp_offset_list_enabled_flag {
            self.cu_chroma_qp_offset_enabled_flag = r.read_bit()?;
        }

        if pps.deblocking_filter_override_enabled_flag {
            self.deblocking_filter_override_flag = r.read_bit()?;
        }

        if self.deblocking_filter_override_flag {
            self.deblocking_filter_disabled_flag = r.read_bit()?;
            if !self.deblocking_filter_disabled_flag {
                self.beta_offset_div2 = r.read_se_bounded(-6, 6)?;
                self.tc_offset_div2 = r.read_se_bounded(-6, 6)?;
            }
        }

        if pps.loop_filter_across_slices_enabled_flag
            && (self.sao_luma_flag || self.sao_chroma_flag || !self.deblocking_filter_disabled_flag)
        {
            self.loop_filter_across_slices_enabled_flag = r.read_bit()?;
        }

        Ok(())
    }

    fn parse_long_term(
        &mut self,
        r: &mut NaluReader,
        sps: &Sps,
        used_by_curr_pic_lt: &mut [bool; MAX_LONG_TERM_PICS],
    ) -> ParseResult<()> {
        let pos = r.position();
        let epb = r.num_epb();

        if sps.num_long_term_ref_pics_sps > 0 {
            self.num_long_term_sps = r.read_ue_max(u32::from(sps.num_long_term_ref_pics_sps))?;
        }

        self.num_long_term_pics = r.read_ue_max(16)?;

        let num_long_term = usize::from(self.num_long_term_sps) + usize::from(self.num_long_term_pics);
        if num_long_term > MAX_LONG_TERM_PICS {
            return Err(ParseError::out_of_range(
                num_long_term as u32,
                0,
                MAX_LONG_TERM_PICS as u32,
            ));
        }

        let num_lt_sps = u32::from(sps.num_long_term_ref_pics_sps);
        let poc_lsb_bits = usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4;

        for i in 0..num_long_term {
            if i < usize::from(self.num_long_term_sps) {
                if num_lt_sps > 1 {
                    self.lt_idx_sps[i] = r.read_bits_bounded(ceil_log2(num_lt_sps), 0, num_lt_sps - 1)?;
                }
                used_by_curr_pic_lt[i] =
                    sps.used_by_curr_pic_lt_sps_flag[usize::from(self.lt_idx_sps[i])];
            } else {
                self.poc_lsb_lt[i] = r.read_bits(poc_lsb_bits)?;
                self.used_by_curr_pic_lt_flag[i] = r.read_bit()?;
                used_by_curr_pic_lt[i] = self.used_by_curr_pic_lt_flag[i];
            }

            self.delta_poc_msb_present_flag[i] = r.read_bit()?;
            if self.delta_poc_msb_present_flag[i] {
                self.delta_poc_msb_cycle_lt[i] = r.read_ue()?;
            }
        }

        self.long_term_ref_pic_set_size = ((r.position() - pos) - 8 * (r.num_epb() - epb)) as u32;

        Ok(())
    }

    fn parse_inter(
        &mut self,
        r: &mut NaluReader,
        sps: &Sps,
        pps: &Pps,
        used_by_curr_pic_lt: &[bool; MAX_LONG_TERM_PICS],
    ) -> ParseResult<()> {
        self.num_ref_idx_active_override_flag = r.read_bit()?;
        if self.num_ref_idx_active_override_flag {
            self.num_ref_idx_l0_active_minus1 = r.read_ue_max(14)?;
            if self.type_.is_b() {
                self.num_ref_idx_l1_active_minus1 = r.read_ue_max(14)?;
            }
        } else {
            self.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
            self.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
        }

        let num_long_term = usize::from(self.num_long_term_sps) + usize::from(self.num_long_term_pics);
        let num_lt_used = used_by_curr_pic_lt[..num_long_term].iter().filter(|&&u| u).count();
        let num_st_used = self.st_rps(sps).map_or(0, |rps| rps.num_used_by_curr_pic());
        self.num_poc_total_curr = num_st_used + num_lt_used as u32;

        if pps.lists_modification_present_flag && self.num_poc_total_curr > 1 {
            self.parse_ref_pic_list_modification(r)?;
        }

        if self.type_.is_b() {
            self.mvd_l1_zero_flag = r.read_bit()?;
        }

        if pps.cabac_init_present_flag {
            self.cabac_init_flag = r.read_bit()?;
        }

        if self.temporal_mvp_enabled_flag {
            if self.type_.is_b() {
                self.collocated_from_l0_flag = r.read_bit()?;
            }

            let max = if self.collocated_from_l0_flag {
                self.num_ref_idx_l0_active_minus1
            } else {
                self.num_ref_idx_l1_active_minus1
            };

            if max > 0 {
                self.collocated_ref_idx = r.read_ue_max(u32::from(max))?;
            }
        }

        if (pps.weighted_pred_flag && self.type_.is_p())
            || (pps.weighted_bipred_flag && self.type_.is_b())
        {
            self.pred_weight_table = PredWeightTable::parse(r, sps, self)?;
        }

        self.five_minus_max_num_merge_cand = r.read_ue_max(4)?;

        if sps.scc_extension.motion_vector_resolution_control_idc == 2 {
            self.use_integer_mv_flag = r.read_bit()?;
        }

        Ok(())
    }

    fn parse_ref_pic_list_modification(&mut self, r: &mut NaluReader) -> ParseResult<()> {
        let num_bits = ceil_log2(self.num_poc_total_curr);
        let max = self.num_poc_total_curr - 1;
        let rplm = &mut self.ref_pic_list_modification;

        rplm.ref_pic_list_modification_flag_l0 = r.read_bit()?;
        if rplm.ref_pic_list_modification_flag_l0 {
            let num_entries = usize::from(self.num_ref_idx_l0_active_minus1) + 1;
            for entry in rplm.list_entry_l0.iter_mut().take(num_entries) {
                *entry = r.read_bits_bounded(num_bits, 0, max)?;
            }
        }

        if self.type_.is_b() {
            rplm.ref_pic_list_modification_flag_l1 = r.read_bit()?;
            if rplm.ref_pic_list_modification_flag_l1 {
                let num_entries = usize::from(self.num_ref_idx_l1_active_minus1) + 1;
                for entry in rplm.list_entry_l1.iter_mut().take(num_entries) {
                    *entry = r.read_bits_bounded(num_bits, 0, max)?;
                }
            }
        }

        Ok(())
    }

    /// The short-term RPS used by the slice: its own one, or the one of `sps`
    /// it selects.
    pub fn st_rps<'a>(&'a self, sps: &'a Sps) -> Option<&'a ShortTermRefPicSet> {
        if self.short_term_ref_pic_set_sps_flag {
            sps.short_term_ref_pic_set
                .get(usize::from(self.short_term_ref_pic_set_idx))
        } else {
            Some(&self.short_term_ref_pic_set)
        }
    }

    /// Offset of the slice data in the RBSP, in bytes.
    pub fn slice_data_byte_offset(&self) -> u32 {
        self.header_size / 8 - self.n_emulation_prevention_bytes
    }
}
