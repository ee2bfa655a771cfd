// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Supplemental enhancement information, see 7.3.5 and Annex D.

use byteorder::BigEndian;
use byteorder::WriteBytesExt;
use enumn::N;
use log::debug;
use log::warn;
use thiserror::Error;

use crate::codec::h265::nalu::Nalu;
use crate::codec::h265::nalu::NaluHeader;
use crate::codec::h265::nalu::NaluType;
use crate::codec::h265::nalu_reader::NaluReader;
use crate::codec::h265::nalu_writer::NaluWriter;
use crate::codec::h265::nalu_writer::NaluWriterError;
use crate::codec::h265::parser::Sps;
use crate::codec::h265::store::ParameterSetStore;
use crate::codec::h265::store::MAX_SPS_COUNT;
use crate::codec::h265::vui::MAX_CPB_COUNT;
use crate::codec::h265::ParseError;
use crate::codec::h265::ParseResult;

/// The payload types with a dedicated syntax in this module.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SeiPayloadType {
    BufferingPeriod = 0,
    PicTiming = 1,
    RegisteredUserData = 4,
    UserDataUnregistered = 5,
    RecoveryPoint = 6,
    TimeCode = 136,
    MasteringDisplayColourVolume = 137,
    ContentLightLevel = 144,
}

/// buffering_period( ), see D.2.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferingPeriod {
    /// The SPS that is active for the coded picture associated with the
    /// buffering period.
    pub sps_id: u8,
    pub irap_cpb_params_present_flag: bool,
    pub cpb_delay_offset: u32,
    pub dpb_delay_offset: u32,
    pub concatenation_flag: bool,
    pub au_cpb_removal_delay_delta_minus1: u32,

    pub nal_initial_cpb_removal_delay: [u32; MAX_CPB_COUNT],
    pub nal_initial_cpb_removal_offset: [u32; MAX_CPB_COUNT],
    pub nal_initial_alt_cpb_removal_delay: [u32; MAX_CPB_COUNT],
    pub nal_initial_alt_cpb_removal_offset: [u32; MAX_CPB_COUNT],

    pub vcl_initial_cpb_removal_delay: [u32; MAX_CPB_COUNT],
    pub vcl_initial_cpb_removal_offset: [u32; MAX_CPB_COUNT],
    pub vcl_initial_alt_cpb_removal_delay: [u32; MAX_CPB_COUNT],
    pub vcl_initial_alt_cpb_removal_offset: [u32; MAX_CPB_COUNT],
}

/// The initial CPB removal delays of one of the NAL or VCL HRDs.
struct InitialCpbRemoval<'a> {
    delay: &'a mut [u32; MAX_CPB_COUNT],
    offset: &'a mut [u32; MAX_CPB_COUNT],
    alt_delay: &'a mut [u32; MAX_CPB_COUNT],
    alt_offset: &'a mut [u32; MAX_CPB_COUNT],
}

impl InitialCpbRemoval<'_> {
    fn parse(
        self,
        r: &mut NaluReader,
        num_cpbs: usize,
        num_bits: usize,
        alt: bool,
    ) -> ParseResult<()> {
        for i in 0..num_cpbs {
            self.delay[i] = r.read_bits(num_bits)?;
            self.offset[i] = r.read_bits(num_bits)?;
            if alt {
                self.alt_delay[i] = r.read_bits(num_bits)?;
                self.alt_offset[i] = r.read_bits(num_bits)?;
            }
        }

        Ok(())
    }
}

impl BufferingPeriod {
    fn parse(r: &mut NaluReader, store: &ParameterSetStore) -> ParseResult<Self> {
        debug!("parsing \"Buffering period\"");

        let mut bp = BufferingPeriod {
            sps_id: r.read_ue_max(MAX_SPS_COUNT as u32 - 1)?,
            ..Default::default()
        };

        let sps = store.get_sps(bp.sps_id).ok_or_else(|| {
            warn!(
                "couldn't find associated sequence parameter set with id: {}",
                bp.sps_id
            );
            ParseError::BrokenLink {
                kind: "SPS",
                id: u32::from(bp.sps_id),
            }
        })?;

        if !sps.vui_parameters_present_flag || !sps.vui_params.parsed {
            return Ok(bp);
        }

        let hrd = &sps.vui_params.hrd;

        if !hrd.sub_pic_hrd_params_present_flag {
            bp.irap_cpb_params_present_flag = r.read_bit()?;
        }

        if bp.irap_cpb_params_present_flag {
            bp.cpb_delay_offset = r.read_bits(usize::from(hrd.au_cpb_removal_delay_length_minus1) + 1)?;
            bp.dpb_delay_offset = r.read_bits(usize::from(hrd.dpb_output_delay_length_minus1) + 1)?;
        }

        bp.concatenation_flag = r.read_bit()?;
        bp.au_cpb_removal_delay_delta_minus1 =
            r.read_bits(usize::from(hrd.au_cpb_removal_delay_length_minus1) + 1)?;

        let num_bits = usize::from(hrd.initial_cpb_removal_delay_length_minus1) + 1;
        let num_cpbs = (hrd.cpb_cnt_minus1[0] as usize + 1).min(MAX_CPB_COUNT);
        let alt = hrd.sub_pic_hrd_params_present_flag || bp.irap_cpb_params_present_flag;

        if hrd.nal_hrd_parameters_present_flag {
            InitialCpbRemoval {
                delay: &mut bp.nal_initial_cpb_removal_delay,
                offset: &mut bp.nal_initial_cpb_removal_offset,
                alt_delay: &mut bp.nal_initial_alt_cpb_removal_delay,
                alt_offset: &mut bp.nal_initial_alt_cpb_removal_offset,
            }
            .parse(r, num_cpbs, num_bits, alt)?;
        }

        if hrd.vcl_hrd_parameters_present_flag {
            InitialCpbRemoval {
                delay: &mut bp.vcl_initial_cpb_removal_delay,
                offset: &mut bp.vcl_initial_cpb_removal_offset,
                alt_delay: &mut bp.vcl_initial_alt_cpb_removal_delay,
                alt_offset: &mut bp.vcl_initial_alt_cpb_removal_offset,
            }
            .parse(r, num_cpbs, num_bits, alt)?;
        }

        Ok(bp)
    }
}

/// pic_timing( ), see D.2.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PicTiming {
    /// See table D.2.
    pub pic_struct: u8,
    /// 0: interlaced, 1: progressive, 2: unknown.
    pub source_scan_type: u8,
    pub duplicate_flag: bool,

    pub au_cpb_removal_delay_minus1: u32,
    pub pic_dpb_output_delay: u32,
    pub pic_dpb_output_du_delay: u32,
    pub num_decoding_units_minus1: u32,
    pub du_common_cpb_removal_delay_flag: bool,
    pub du_common_cpb_removal_delay_increment_minus1: u32,
    /// One entry per decoding unit.
    pub num_nalus_in_du_minus1: Vec<u32>,
    /// One entry per decoding unit, the last one is always 0.
    pub du_cpb_removal_delay_increment_minus1: Vec<u32>,
}

impl PicTiming {
    fn parse(r: &mut NaluReader, sps: &Sps) -> ParseResult<Self> {
        debug!("parsing \"Picture timing\"");

        let ptl = &sps.profile_tier_level;
        let mut pt = PicTiming {
            source_scan_type: match (ptl.progressive_source_flag, ptl.interlaced_source_flag) {
                (false, true) => 0,
                (true, false) => 1,
                _ => 2,
            },
            ..Default::default()
        };

        if !sps.vui_parameters_present_flag || !sps.vui_params.parsed {
            return Ok(pt);
        }

        let vui = &sps.vui_params;
        if vui.frame_field_info_present_flag {
            pt.pic_struct = r.read_bits(4)?;
            pt.source_scan_type = r.read_bits(2)?;
            pt.duplicate_flag = r.read_bit()?;
        }

        if !vui.hrd_parameters_present_flag {
            return Ok(pt);
        }

        let hrd = &vui.hrd;
        pt.au_cpb_removal_delay_minus1 =
            r.read_bits(usize::from(hrd.au_cpb_removal_delay_length_minus1) + 1)?;
        pt.pic_dpb_output_delay = r.read_bits(usize::from(hrd.dpb_output_delay_length_minus1) + 1)?;

        if hrd.sub_pic_hrd_params_present_flag {
            pt.pic_dpb_output_du_delay =
                r.read_bits(usize::from(hrd.dpb_output_delay_du_length_minus1) + 1)?;
        }

        if hrd.sub_pic_hrd_params_present_flag && hrd.sub_pic_cpb_params_in_pic_timing_sei_flag {
            let increment_bits = usize::from(hrd.du_cpb_removal_delay_increment_length_minus1) + 1;

            pt.num_decoding_units_minus1 =
                r.read_ue_max(sps.pic_size_in_ctbs_y().saturating_sub(1))?;
            pt.du_common_cpb_removal_delay_flag = r.read_bit()?;
            if pt.du_common_cpb_removal_delay_flag {
                pt.du_common_cpb_removal_delay_increment_minus1 = r.read_bits(increment_bits)?;
            }

            let num_units = pt.num_decoding_units_minus1 as usize + 1;
            pt.num_nalus_in_du_minus1 = Vec::with_capacity(num_units);
            pt.du_cpb_removal_delay_increment_minus1 = vec![0; num_units];

            for i in 0..num_units {
                pt.num_nalus_in_du_minus1.push(r.read_ue()?);
                if !pt.du_common_cpb_removal_delay_flag && i + 1 < num_units {
                    pt.du_cpb_removal_delay_increment_minus1[i] = r.read_bits(increment_bits)?;
                }
            }
        }

        Ok(pt)
    }
}

/// recovery_point( ), see D.2.8.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryPoint {
    pub recovery_poc_cnt: i32,
    pub exact_match_flag: bool,
    pub broken_link_flag: bool,
}

impl RecoveryPoint {
    fn parse(r: &mut NaluReader, sps: &Sps) -> ParseResult<Self> {
        debug!("parsing \"Recovery point\"");

        let max_pic_order_cnt_lsb = 1i32 << (sps.log2_max_pic_order_cnt_lsb_minus4 + 4);

        Ok(RecoveryPoint {
            recovery_poc_cnt: r.read_se_bounded(-max_pic_order_cnt_lsb / 2, max_pic_order_cnt_lsb - 1)?,
            exact_match_flag: r.read_bit()?,
            broken_link_flag: r.read_bit()?,
        })
    }
}

/// user_data_registered_itu_t_t35( ), see D.2.6.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisteredUserData {
    pub country_code: u8,
    /// Only meaningful when `country_code` is 0xff.
    pub country_code_extension: u8,
    pub data: Vec<u8>,
}

impl RegisteredUserData {
    fn parse(r: &mut NaluReader, mut payload_size: usize) -> ParseResult<Self> {
        debug!("parsing \"Registered user data\"");

        if payload_size < 2 {
            warn!("Too small payload size {}", payload_size);
            return Err(ParseError::BrokenData("registered user data payload too small"));
        }

        let mut rud = RegisteredUserData {
            country_code: r.read_bits(8)?,
            ..Default::default()
        };
        payload_size -= 1;

        if rud.country_code == 0xff {
            rud.country_code_extension = r.read_bits(8)?;
            payload_size -= 1;
        }

        if payload_size < 1 {
            warn!("No more remaining payload data to store");
            return Err(ParseError::BrokenData("registered user data without data"));
        }

        rud.data = read_bytes(r, payload_size)?;
        Ok(rud)
    }

    fn payload_size(&self) -> usize {
        let extension = usize::from(self.country_code == 0xff);
        1 + extension + self.data.len()
    }

    fn write<W: std::io::Write>(&self, w: &mut NaluWriter<W>) -> Result<(), NaluWriterError> {
        w.write_u(8, self.country_code)?;
        if self.country_code == 0xff {
            w.write_u(8, self.country_code_extension)?;
        }
        write_bytes(w, &self.data)
    }
}

/// user_data_unregistered( ), see D.2.7.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserDataUnregistered {
    pub uuid: [u8; 16],
    pub data: Vec<u8>,
}

impl UserDataUnregistered {
    fn parse(r: &mut NaluReader, payload_size: usize) -> ParseResult<Self> {
        debug!("parsing \"User data unregistered\"");

        if payload_size < 17 {
            warn!("Too small payload size {}", payload_size);
            return Err(ParseError::BrokenData("unregistered user data payload too small"));
        }

        let mut udu = UserDataUnregistered::default();
        for byte in udu.uuid.iter_mut() {
            *byte = r.read_bits(8)?;
        }
        udu.data = read_bytes(r, payload_size - 16)?;

        Ok(udu)
    }

    fn write<W: std::io::Write>(&self, w: &mut NaluWriter<W>) -> Result<(), NaluWriterError> {
        write_bytes(w, &self.uuid)?;
        write_bytes(w, &self.data)
    }
}

/// Maximum number of clock timestamps in a time code.
pub const MAX_CLOCK_TS: usize = 3;

/// time_code( ), see D.2.27.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeCode {
    pub num_clock_ts: u8,
    pub clock_timestamp_flag: [bool; MAX_CLOCK_TS],
    pub units_field_based_flag: [bool; MAX_CLOCK_TS],
    pub counting_type: [u8; MAX_CLOCK_TS],
    pub full_timestamp_flag: [bool; MAX_CLOCK_TS],
    pub discontinuity_flag: [bool; MAX_CLOCK_TS],
    pub cnt_dropped_flag: [bool; MAX_CLOCK_TS],
    pub n_frames: [u16; MAX_CLOCK_TS],
    pub seconds_flag: [bool; MAX_CLOCK_TS],
    pub seconds_value: [u8; MAX_CLOCK_TS],
    pub minutes_flag: [bool; MAX_CLOCK_TS],
    pub minutes_value: [u8; MAX_CLOCK_TS],
    pub hours_flag: [bool; MAX_CLOCK_TS],
    pub hours_value: [u8; MAX_CLOCK_TS],
    pub time_offset_length: [u8; MAX_CLOCK_TS],
    pub time_offset_value: [i32; MAX_CLOCK_TS],
}

impl TimeCode {
    fn parse(r: &mut NaluReader) -> ParseResult<Self> {
        debug!("parsing \"Time code\"");

        let mut tc = TimeCode {
            num_clock_ts: r.read_bits(2)?,
            ..Default::default()
        };

        for i in 0..usize::from(tc.num_clock_ts) {
            tc.clock_timestamp_flag[i] = r.read_bit()?;
            if !tc.clock_timestamp_flag[i] {
                continue;
            }

            tc.units_field_based_flag[i] = r.read_bit()?;
            tc.counting_type[i] = r.read_bits(5)?;
            tc.full_timestamp_flag[i] = r.read_bit()?;
            tc.discontinuity_flag[i] = r.read_bit()?;
            tc.cnt_dropped_flag[i] = r.read_bit()?;
            tc.n_frames[i] = r.read_bits(9)?;

            if tc.full_timestamp_flag[i] {
                tc.seconds_flag[i] = true;
                tc.seconds_value[i] = r.read_bits_bounded(6, 0, 59)?;
                tc.minutes_flag[i] = true;
                tc.minutes_value[i] = r.read_bits_bounded(6, 0, 59)?;
                tc.hours_flag[i] = true;
                tc.hours_value[i] = r.read_bits_bounded(5, 0, 23)?;
            } else {
                tc.seconds_flag[i] = r.read_bit()?;
                if tc.seconds_flag[i] {
                    tc.seconds_value[i] = r.read_bits_bounded(6, 0, 59)?;
                    tc.minutes_flag[i] = r.read_bit()?;
                    if tc.minutes_flag[i] {
                        tc.minutes_value[i] = r.read_bits_bounded(6, 0, 59)?;
                        tc.hours_flag[i] = r.read_bit()?;
                        if tc.hours_flag[i] {
                            tc.hours_value[i] = r.read_bits_bounded(5, 0, 23)?;
                        }
                    }
                }
            }

            tc.time_offset_length[i] = r.read_bits(5)?;
            let len = u32::from(tc.time_offset_length[i]);
            if len > 0 {
                // i(v), two's complement.
                let raw: u32 = r.read_bits(len as usize)?;
                tc.time_offset_value[i] = ((raw << (32 - len)) as i32) >> (32 - len);
            }
        }

        Ok(tc)
    }

    /// Size of the syntax in bits, without the alignment bits.
    fn size_in_bits(&self) -> usize {
        let mut bits = 2;

        for i in 0..usize::from(self.num_clock_ts).min(MAX_CLOCK_TS) {
            bits += 1;
            if !self.clock_timestamp_flag[i] {
                continue;
            }

            bits += 18;
            if self.full_timestamp_flag[i] {
                bits += 17;
            } else {
                bits += 1;
                if self.seconds_flag[i] {
                    bits += 7;
                    if self.minutes_flag[i] {
                        bits += 7;
                        if self.hours_flag[i] {
                            bits += 5;
                        }
                    }
                }
            }

            bits += 5 + usize::from(self.time_offset_length[i]);
        }

        bits
    }

    fn write<W: std::io::Write>(&self, w: &mut NaluWriter<W>) -> Result<(), NaluWriterError> {
        w.write_u(2, self.num_clock_ts)?;

        for i in 0..usize::from(self.num_clock_ts).min(MAX_CLOCK_TS) {
            w.write_u(1, self.clock_timestamp_flag[i])?;
            if !self.clock_timestamp_flag[i] {
                continue;
            }

            w.write_u(1, self.units_field_based_flag[i])?;
            w.write_u(5, self.counting_type[i])?;
            w.write_u(1, self.full_timestamp_flag[i])?;
            w.write_u(1, self.discontinuity_flag[i])?;
            w.write_u(1, self.cnt_dropped_flag[i])?;
            w.write_u(9, self.n_frames[i])?;

            if self.full_timestamp_flag[i] {
                w.write_u(6, self.seconds_value[i])?;
                w.write_u(6, self.minutes_value[i])?;
                w.write_u(5, self.hours_value[i])?;
            } else {
                w.write_u(1, self.seconds_flag[i])?;
                if self.seconds_flag[i] {
                    w.write_u(6, self.seconds_value[i])?;
                    w.write_u(1, self.minutes_flag[i])?;
                    if self.minutes_flag[i] {
                        w.write_u(6, self.minutes_value[i])?;
                        w.write_u(1, self.hours_flag[i])?;
                        if self.hours_flag[i] {
                            w.write_u(5, self.hours_value[i])?;
                        }
                    }
                }
            }

            let len = usize::from(self.time_offset_length[i]);
            w.write_u(5, self.time_offset_length[i])?;
            if len > 0 {
                let mask = u32::MAX >> (32 - len);
                w.write_u(len, self.time_offset_value[i] as u32 & mask)?;
            }
        }

        Ok(())
    }
}

/// mastering_display_colour_volume( ), see D.2.28.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MasteringDisplayColourVolume {
    pub display_primaries_x: [u16; 3],
    pub display_primaries_y: [u16; 3],
    pub white_point_x: u16,
    pub white_point_y: u16,
    pub max_display_mastering_luminance: u32,
    pub min_display_mastering_luminance: u32,
}

impl MasteringDisplayColourVolume {
    /// Size of the payload in bytes.
    const SIZE: usize = 24;

    fn parse(r: &mut NaluReader) -> ParseResult<Self> {
        debug!("parsing \"Mastering display colour volume\"");

        let mut mdcv = MasteringDisplayColourVolume::default();
        for i in 0..3 {
            mdcv.display_primaries_x[i] = r.read_bits(16)?;
            mdcv.display_primaries_y[i] = r.read_bits(16)?;
        }

        mdcv.white_point_x = r.read_bits(16)?;
        mdcv.white_point_y = r.read_bits(16)?;
        mdcv.max_display_mastering_luminance = r.read_bits(32)?;
        mdcv.min_display_mastering_luminance = r.read_bits(32)?;

        Ok(mdcv)
    }

    fn write<W: std::io::Write>(&self, w: &mut NaluWriter<W>) -> Result<(), NaluWriterError> {
        for i in 0..3 {
            w.write_u(16, self.display_primaries_x[i])?;
            w.write_u(16, self.display_primaries_y[i])?;
        }

        w.write_u(16, self.white_point_x)?;
        w.write_u(16, self.white_point_y)?;
        w.write_u(32, self.max_display_mastering_luminance)?;
        w.write_u(32, self.min_display_mastering_luminance)?;
        Ok(())
    }
}

/// content_light_level_info( ), see D.2.35.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentLightLevel {
    pub max_content_light_level: u16,
    pub max_pic_average_light_level: u16,
}

impl ContentLightLevel {
    /// Size of the payload in bytes.
    const SIZE: usize = 4;

    fn parse(r: &mut NaluReader) -> ParseResult<Self> {
        debug!("parsing \"Content light level\"");

        Ok(ContentLightLevel {
            max_content_light_level: r.read_bits(16)?,
            max_pic_average_light_level: r.read_bits(16)?,
        })
    }

    fn write<W: std::io::Write>(&self, w: &mut NaluWriter<W>) -> Result<(), NaluWriterError> {
        w.write_u(16, self.max_content_light_level)?;
        w.write_u(16, self.max_pic_average_light_level)?;
        Ok(())
    }
}

/// The payload of a SEI message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeiPayload {
    BufferingPeriod(BufferingPeriod),
    PicTiming(PicTiming),
    RegisteredUserData(RegisteredUserData),
    UserDataUnregistered(UserDataUnregistered),
    RecoveryPoint(RecoveryPoint),
    TimeCode(TimeCode),
    MasteringDisplayColourVolume(MasteringDisplayColourVolume),
    ContentLightLevel(ContentLightLevel),
    /// A payload that was skipped, with its payload type. All suffix SEI
    /// payloads end up here.
    Unknown(u32),
}

impl SeiPayload {
    /// The payloadType of this payload.
    pub fn payload_type(&self) -> u32 {
        let type_ = match self {
            SeiPayload::BufferingPeriod(_) => SeiPayloadType::BufferingPeriod,
            SeiPayload::PicTiming(_) => SeiPayloadType::PicTiming,
            SeiPayload::RegisteredUserData(_) => SeiPayloadType::RegisteredUserData,
            SeiPayload::UserDataUnregistered(_) => SeiPayloadType::UserDataUnregistered,
            SeiPayload::RecoveryPoint(_) => SeiPayloadType::RecoveryPoint,
            SeiPayload::TimeCode(_) => SeiPayloadType::TimeCode,
            SeiPayload::MasteringDisplayColourVolume(_) => {
                SeiPayloadType::MasteringDisplayColourVolume
            }
            SeiPayload::ContentLightLevel(_) => SeiPayloadType::ContentLightLevel,
            SeiPayload::Unknown(payload_type) => return *payload_type,
        };

        type_ as u32
    }
}

/// A single sei_message( ), see 7.3.5.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeiMessage {
    /// payloadSize as signalled, in bytes.
    pub payload_size: u32,
    pub payload: SeiPayload,
}

impl SeiMessage {
    pub fn payload_type(&self) -> u32 {
        self.payload.payload_type()
    }
}

fn read_bytes(r: &mut NaluReader, len: usize) -> ParseResult<Vec<u8>> {
    if len * 8 > r.num_rbsp_bits_left() {
        return Err(ParseError::Truncated);
    }

    let mut data = Vec::with_capacity(len);
    for _ in 0..len {
        data.push(r.read_bits(8)?);
    }

    Ok(data)
}

fn write_bytes<W: std::io::Write>(w: &mut NaluWriter<W>, data: &[u8]) -> Result<(), NaluWriterError> {
    for &byte in data {
        w.write_u(8, byte)?;
    }

    Ok(())
}

/// Reads the 0xff escaped values coding payloadType and payloadSize.
fn read_escaped(r: &mut NaluReader) -> ParseResult<u32> {
    let mut value = 0u32;
    loop {
        let byte: u32 = r.read_bits(8)?;
        value = value.saturating_add(byte);
        if byte != 0xff {
            return Ok(value);
        }
    }
}

fn write_escaped<W: std::io::Write>(
    w: &mut NaluWriter<W>,
    mut value: usize,
) -> Result<(), NaluWriterError> {
    while value >= 0xff {
        w.write_u(8, 0xffu32)?;
        value -= 0xff;
    }

    w.write_u(8, value as u32)?;
    Ok(())
}

fn parse_sei_message(
    r: &mut NaluReader,
    nal_type: NaluType,
    store: &ParameterSetStore,
) -> ParseResult<SeiMessage> {
    debug!("parsing \"Sei message\"");

    let payload_type = read_escaped(r)?;
    let payload_size = read_escaped(r)?;

    // The declared size is not trusted.
    let payload_bits = (payload_size as usize)
        .saturating_mul(8)
        .min(r.num_rbsp_bits_left());
    let payload_start = r.position();
    let payload_epb = r.num_epb();
    let payload_read = |r: &NaluReader| {
        (r.position() - payload_start) - 8 * (r.num_epb() - payload_epb)
    };

    debug!(
        "SEI message received: payloadType {}, payloadSize = {} bits",
        payload_type, payload_bits
    );

    let last_sps = || {
        store.last_sps().ok_or_else(|| {
            warn!("didn't get the associated sequence parameter set for the current access unit");
            ParseError::BrokenData("SEI message without an active SPS")
        })
    };

    let type_ = match nal_type {
        NaluType::PrefixSeiNut => SeiPayloadType::n(payload_type),
        _ => None,
    };

    let payload = match type_ {
        Some(SeiPayloadType::BufferingPeriod) => {
            SeiPayload::BufferingPeriod(BufferingPeriod::parse(r, store)?)
        }
        Some(SeiPayloadType::PicTiming) => SeiPayload::PicTiming(PicTiming::parse(r, last_sps()?)?),
        Some(SeiPayloadType::RegisteredUserData) => {
            SeiPayload::RegisteredUserData(RegisteredUserData::parse(r, payload_bits / 8)?)
        }
        Some(SeiPayloadType::UserDataUnregistered) => {
            SeiPayload::UserDataUnregistered(UserDataUnregistered::parse(r, payload_bits / 8)?)
        }
        Some(SeiPayloadType::RecoveryPoint) => {
            SeiPayload::RecoveryPoint(RecoveryPoint::parse(r, last_sps()?)?)
        }
        Some(SeiPayloadType::TimeCode) => SeiPayload::TimeCode(TimeCode::parse(r)?),
        Some(SeiPayloadType::MasteringDisplayColourVolume) => {
            SeiPayload::MasteringDisplayColourVolume(MasteringDisplayColourVolume::parse(r)?)
        }
        Some(SeiPayloadType::ContentLightLevel) => {
            SeiPayload::ContentLightLevel(ContentLightLevel::parse(r)?)
        }
        None => {
            r.skip_bits(payload_bits)?;
            SeiPayload::Unknown(payload_type)
        }
    };

    // reserved_payload_extension_data and payload alignment are not
    // interpreted.
    while !r.is_byte_aligned() || payload_read(r) < payload_bits {
        r.skip_bits(1)?;
        while !r.is_byte_aligned() {
            r.skip_bits(1)?;
        }
    }

    Ok(SeiMessage {
        payload_size,
        payload,
    })
}

/// Parses every SEI message of a prefix or suffix SEI NAL unit. Buffering
/// periods resolve their SPS by id, picture timing and recovery points use
/// the last SPS stored in `store`.
pub fn parse_sei(nalu: &Nalu, store: &ParameterSetStore) -> ParseResult<Vec<SeiMessage>> {
    if !matches!(
        nalu.header.type_,
        NaluType::PrefixSeiNut | NaluType::SuffixSeiNut
    ) {
        warn!("{:?} is not a SEI NAL unit", nalu.header.type_);
        return Err(ParseError::BrokenData("not a SEI NAL unit"));
    }

    debug!("parsing SEI nal");

    let mut r = NaluReader::new(nalu.payload());
    let mut messages = Vec::new();

    loop {
        let message = parse_sei_message(&mut r, nalu.header.type_, store).map_err(|e| {
            warn!("error parsing \"Sei message\": {}", e);
            e
        })?;
        messages.push(message);

        if !r.has_more_rsbp_data() {
            break;
        }
    }

    Ok(messages)
}

/// How a NAL unit built by [`create_sei_nalu`] is framed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NaluFraming {
    /// Preceded by a start code of 3 or 4 bytes.
    AnnexB { start_code_len: u8 },
    /// Preceded by a big endian length of 1 to 4 bytes.
    LengthPrefixed { length_size: u8 },
}

#[derive(Error, Debug)]
pub enum SeiWriterError {
    #[error("invalid framing {0:?}")]
    InvalidFraming(NaluFraming),
    #[error("invalid NAL unit header: layer {0}, temporal id plus 1 {1}")]
    InvalidHeader(u8, u8),
    #[error("no SEI message could be written")]
    NoData,
    #[error("NAL unit of {0} bytes does not fit the length field")]
    TooLarge(usize),
    #[error(transparent)]
    Writer(#[from] NaluWriterError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SeiWriterResult<T> = std::result::Result<T, SeiWriterError>;

/// Builds a prefix SEI NAL unit carrying `messages`. Registered and
/// unregistered user data, time codes, mastering display colour volumes and
/// content light levels are written, other payloads are skipped.
pub fn create_sei_nalu(
    layer_id: u8,
    temporal_id_plus1: u8,
    framing: NaluFraming,
    messages: &[SeiPayload],
) -> SeiWriterResult<Vec<u8>> {
    match framing {
        NaluFraming::AnnexB { start_code_len: 3 | 4 } => (),
        NaluFraming::LengthPrefixed { length_size: 1..=4 } => (),
        _ => return Err(SeiWriterError::InvalidFraming(framing)),
    }

    if layer_id > 63 || !(1..=7).contains(&temporal_id_plus1) {
        return Err(SeiWriterError::InvalidHeader(layer_id, temporal_id_plus1));
    }

    debug!("Create SEI nal from array, len: {}", messages.len());

    let mut nalu = Vec::new();
    let mut written = 0;
    {
        let mut w = NaluWriter::new(&mut nalu, true);
        let header = NaluHeader {
            type_: NaluType::PrefixSeiNut,
            nuh_layer_id: layer_id,
            nuh_temporal_id_plus1: temporal_id_plus1,
        };
        w.write_header(&header, false)?;

        for message in messages {
            let mut need_align = false;
            let payload_size = match message {
                SeiPayload::RegisteredUserData(rud) => rud.payload_size(),
                SeiPayload::UserDataUnregistered(udu) => 16 + udu.data.len(),
                SeiPayload::TimeCode(tc) => {
                    let bits = tc.size_in_bits();
                    need_align = bits % 8 != 0;
                    bits.div_ceil(8)
                }
                SeiPayload::MasteringDisplayColourVolume(_) => MasteringDisplayColourVolume::SIZE,
                SeiPayload::ContentLightLevel(_) => ContentLightLevel::SIZE,
                _ => {
                    debug!("Unsupported SEI type {}", message.payload_type());
                    continue;
                }
            };

            write_escaped(&mut w, message.payload_type() as usize)?;
            write_escaped(&mut w, payload_size)?;

            match message {
                SeiPayload::RegisteredUserData(rud) => rud.write(&mut w)?,
                SeiPayload::UserDataUnregistered(udu) => udu.write(&mut w)?,
                SeiPayload::TimeCode(tc) => tc.write(&mut w)?,
                SeiPayload::MasteringDisplayColourVolume(mdcv) => mdcv.write(&mut w)?,
                SeiPayload::ContentLightLevel(cll) => cll.write(&mut w)?,
                _ => (),
            }

            // payload_bit_equal_to_one and payload_bit_equal_to_zero
            if need_align {
                w.write_trailing_bits()?;
            }

            written += 1;
        }

        w.write_trailing_bits()?;
        w.flush()?;
    }

    if written == 0 {
        warn!("No written sei data");
        return Err(SeiWriterError::NoData);
    }

    let mut out = Vec::with_capacity(nalu.len() + 4);
    match framing {
        NaluFraming::AnnexB { start_code_len } => {
            out.extend(std::iter::repeat(0).take(usize::from(start_code_len) - 1));
            out.push(1);
        }
        NaluFraming::LengthPrefixed { length_size } => {
            let max = (1u64 << (8 * u32::from(length_size))) - 1;
            if nalu.len() as u64 > max {
                return Err(SeiWriterError::TooLarge(nalu.len()));
            }
            out.write_uint::<BigEndian>(nalu.len() as u64, usize::from(length_size))?;
        }
    }
    out.extend_from_slice(&nalu);

    Ok(out)
}
