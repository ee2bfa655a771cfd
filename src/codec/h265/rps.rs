// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::h265::nalu_reader::NaluReader;
use crate::codec::h265::ParseError;
use crate::codec::h265::ParseResult;

/// Maximum number of entries of each list of a short-term RPS, bounded by
/// sps_max_dec_pic_buffering_minus1 + 1.
pub const MAX_DELTA_POCS: usize = 16;

// 7.4.3.2.1:
// num_short_term_ref_pic_sets specifies the number of st_ref_pic_set( ) syntax
// structures included in the SPS. The value of num_short_term_ref_pic_sets
// shall be in the range of 0 to 64, inclusive.
// NOTE 5 – A decoder should allocate memory for a total number of
// num_short_term_ref_pic_sets + 1 st_ref_pic_set( ) syntax structures since
// there may be a st_ref_pic_set( ) syntax structure directly signalled in the
// slice headers of a current picture.
pub const MAX_SHORT_TERM_REF_PIC_SETS: usize = 65;

/// st_ref_pic_set( stRpsIdx ), see 7.3.7.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShortTermRefPicSet {
    /// When set, specifies that the stRpsIdx-th candidate short-term RPS is
    /// predicted from another candidate short-term RPS, which is referred to as
    /// the source candidate short-term RPS.
    pub inter_ref_pic_set_prediction_flag: bool,
    /// delta_idx_minus1 plus 1 specifies the difference between the value of
    /// stRpsIdx and the index, into the list of the candidate short-term RPSs
    /// specified in the SPS, of the source candidate short-term RPS.
    pub delta_idx_minus1: u8,
    /// delta_rps_sign and abs_delta_rps_minus1 together specify the value of
    /// the variable deltaRps.
    pub delta_rps_sign: bool,
    /// See `delta_rps_sign`.
    pub abs_delta_rps_minus1: u16,
    /// NumDeltaPocs of the source candidate, when predicted.
    pub num_delta_pocs_of_ref_rps_idx: u8,

    /// Same as NumNegativePics in the H.265 specification.
    pub num_negative_pics: u8,
    /// Same as NumPositivePics in the H.265 specification.
    pub num_positive_pics: u8,
    /// Same as NumDeltaPocs in the H.265 specification.
    pub num_delta_pocs: u8,
    /// Same as DeltaPocS0 in the H.265 specification.
    pub delta_poc_s0: [i32; MAX_DELTA_POCS],
    /// Same as DeltaPocS1 in the H.265 specification.
    pub delta_poc_s1: [i32; MAX_DELTA_POCS],
    /// Same as UsedByCurrPicS0 in the H.265 specification.
    pub used_by_curr_pic_s0: [bool; MAX_DELTA_POCS],
    /// Same as UsedByCurrPicS1 in the H.265 specification.
    pub used_by_curr_pic_s1: [bool; MAX_DELTA_POCS],
}

/// Appends to one of the two lists of a RPS being derived by prediction.
struct ListBuilder<'a> {
    delta_poc: &'a mut [i32; MAX_DELTA_POCS],
    used: &'a mut [bool; MAX_DELTA_POCS],
    len: usize,
}

impl ListBuilder<'_> {
    fn push(&mut self, delta_poc: i32, used: bool) -> ParseResult<()> {
        if self.len >= MAX_DELTA_POCS {
            return Err(ParseError::BrokenData("predicted RPS has too many entries"));
        }

        self.delta_poc[self.len] = delta_poc;
        self.used[self.len] = used;
        self.len += 1;
        Ok(())
    }
}

impl ShortTermRefPicSet {
    /// Parses the `st_rps_idx`-th short-term RPS. `sets` holds the sets
    /// parsed before it in the SPS, `num_short_term_ref_pic_sets` is the SPS
    /// value, so that `st_rps_idx == num_short_term_ref_pic_sets` for a set
    /// coded in a slice header. `max_dec_pic_buffering_minus1` bounds the
    /// number of entries, it is the SPS value for the highest sub-layer.
    pub fn parse(
        r: &mut NaluReader,
        st_rps_idx: u8,
        num_short_term_ref_pic_sets: u8,
        sets: &[ShortTermRefPicSet],
        max_dec_pic_buffering_minus1: u8,
    ) -> ParseResult<Self> {
        let mut rps = ShortTermRefPicSet::default();

        if st_rps_idx != 0 {
            rps.inter_ref_pic_set_prediction_flag = r.read_bit()?;
        }

        if rps.inter_ref_pic_set_prediction_flag {
            if st_rps_idx == num_short_term_ref_pic_sets {
                rps.delta_idx_minus1 = r.read_ue_max(u32::from(st_rps_idx) - 1)?;
            }

            rps.delta_rps_sign = r.read_bit()?;
            rps.abs_delta_rps_minus1 = r.read_ue_max(32767)?;

            // (7-59)
            let ref_rps_idx = usize::from(st_rps_idx - (rps.delta_idx_minus1 + 1));
            // (7-60)
            let abs_delta_rps = i32::from(rps.abs_delta_rps_minus1) + 1;
            let delta_rps = if rps.delta_rps_sign {
                -abs_delta_rps
            } else {
                abs_delta_rps
            };

            let ref_rps = sets.get(ref_rps_idx).ok_or(ParseError::BrokenLink {
                kind: "short-term RPS",
                id: ref_rps_idx as u32,
            })?;
            rps.num_delta_pocs_of_ref_rps_idx = ref_rps.num_delta_pocs;

            let num_delta_pocs = usize::from(ref_rps.num_delta_pocs);
            let mut used_by_curr_pic_flag = [false; MAX_DELTA_POCS + 1];
            let mut use_delta_flag = [true; MAX_DELTA_POCS + 1];

            for j in 0..=num_delta_pocs {
                used_by_curr_pic_flag[j] = r.read_bit()?;
                if !used_by_curr_pic_flag[j] {
                    use_delta_flag[j] = r.read_bit()?;
                }
            }

            let num_negative = usize::from(ref_rps.num_negative_pics);
            let num_positive = usize::from(ref_rps.num_positive_pics);

            // (7-61)
            let mut s0 = ListBuilder {
                delta_poc: &mut rps.delta_poc_s0,
                used: &mut rps.used_by_curr_pic_s0,
                len: 0,
            };

            for j in (0..num_positive).rev() {
                let d_poc = ref_rps.delta_poc_s1[j] + delta_rps;
                if d_poc < 0 && use_delta_flag[num_negative + j] {
                    s0.push(d_poc, used_by_curr_pic_flag[num_negative + j])?;
                }
            }

            if delta_rps < 0 && use_delta_flag[num_delta_pocs] {
                s0.push(delta_rps, used_by_curr_pic_flag[num_delta_pocs])?;
            }

            for j in 0..num_negative {
                let d_poc = ref_rps.delta_poc_s0[j] + delta_rps;
                if d_poc < 0 && use_delta_flag[j] {
                    s0.push(d_poc, used_by_curr_pic_flag[j])?;
                }
            }

            let num_negative_pics = s0.len;

            // (7-62)
            let mut s1 = ListBuilder {
                delta_poc: &mut rps.delta_poc_s1,
                used: &mut rps.used_by_curr_pic_s1,
                len: 0,
            };

            for j in (0..num_negative).rev() {
                let d_poc = ref_rps.delta_poc_s0[j] + delta_rps;
                if d_poc > 0 && use_delta_flag[j] {
                    s1.push(d_poc, used_by_curr_pic_flag[j])?;
                }
            }

            if delta_rps > 0 && use_delta_flag[num_delta_pocs] {
                s1.push(delta_rps, used_by_curr_pic_flag[num_delta_pocs])?;
            }

            for j in 0..num_positive {
                let d_poc = ref_rps.delta_poc_s1[j] + delta_rps;
                if d_poc > 0 && use_delta_flag[num_negative + j] {
                    s1.push(d_poc, used_by_curr_pic_flag[num_negative + j])?;
                }
            }

            let num_positive_pics = s1.len;

            if num_negative_pics + num_positive_pics > MAX_DELTA_POCS {
                return Err(ParseError::BrokenData("predicted RPS has too many entries"));
            }

            rps.num_negative_pics = num_negative_pics as u8;
            rps.num_positive_pics = num_positive_pics as u8;
        } else {
            let max_dec_pic_buffering_minus1 =
                u32::from(max_dec_pic_buffering_minus1).min(MAX_DELTA_POCS as u32 - 1);

            rps.num_negative_pics = r.read_ue_max(max_dec_pic_buffering_minus1)?;
            rps.num_positive_pics =
                r.read_ue_max(max_dec_pic_buffering_minus1 - u32::from(rps.num_negative_pics))?;

            for i in 0..usize::from(rps.num_negative_pics) {
                let delta_poc_s0_minus1: i32 = r.read_ue_max(32767)?;
                rps.used_by_curr_pic_s0[i] = r.read_bit()?;

                let prev = if i == 0 { 0 } else { rps.delta_poc_s0[i - 1] };
                // (7-67), (7-69)
                rps.delta_poc_s0[i] = prev - (delta_poc_s0_minus1 + 1);
            }

            for i in 0..usize::from(rps.num_positive_pics) {
                let delta_poc_s1_minus1: i32 = r.read_ue_max(32767)?;
                rps.used_by_curr_pic_s1[i] = r.read_bit()?;

                let prev = if i == 0 { 0 } else { rps.delta_poc_s1[i - 1] };
                // (7-68), (7-70)
                rps.delta_poc_s1[i] = prev + delta_poc_s1_minus1 + 1;
            }
        }

        // (7-71)
        rps.num_delta_pocs = rps.num_negative_pics + rps.num_positive_pics;

        Ok(rps)
    }

    /// Number of pictures of the set used by the current picture.
    pub fn num_used_by_curr_pic(&self) -> u32 {
        let s0 = &self.used_by_curr_pic_s0[..usize::from(self.num_negative_pics)];
        let s1 = &self.used_by_curr_pic_s1[..usize::from(self.num_positive_pics)];
        s0.iter().chain(s1).filter(|&&used| used).count() as u32
    }
}
