// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Classification of general_profile_idc and the general constraint flags
//! into a named profile, see Annex A, G, H and I.

use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use enumn::N;
use log::info;
use thiserror::Error;

use crate::codec::h265::parser::Sps;
use crate::codec::h265::ptl::ProfileTierLevel;

/// general_profile_idc values.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ProfileIdc {
    Main = 1,
    Main10 = 2,
    MainStillPicture = 3,
    FormatRangeExtension = 4,
    HighThroughput = 5,
    MultiviewMain = 6,
    ScalableMain = 7,
    ThreeDMain = 8,
    ScreenContentCoding = 9,
    ScalableFormatRangeExtension = 10,
    HighThroughputScreenContentCoding = 11,
}

impl ProfileIdc {
    /// Every known value, in ascending order.
    pub const ALL: [ProfileIdc; 11] = [
        ProfileIdc::Main,
        ProfileIdc::Main10,
        ProfileIdc::MainStillPicture,
        ProfileIdc::FormatRangeExtension,
        ProfileIdc::HighThroughput,
        ProfileIdc::MultiviewMain,
        ProfileIdc::ScalableMain,
        ProfileIdc::ThreeDMain,
        ProfileIdc::ScreenContentCoding,
        ProfileIdc::ScalableFormatRangeExtension,
        ProfileIdc::HighThroughputScreenContentCoding,
    ];

    /// Whether the profiles of this family may use the 14 bit constraint.
    fn allows_14bit(self) -> bool {
        matches!(
            self,
            ProfileIdc::HighThroughput
                | ProfileIdc::ScreenContentCoding
                | ProfileIdc::ScalableFormatRangeExtension
                | ProfileIdc::HighThroughputScreenContentCoding
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Profile {
    Main,
    Main10,
    MainStillPicture,
    Monochrome,
    Monochrome12,
    Monochrome16,
    Main12,
    Main422_10,
    Main422_12,
    Main444,
    Main444_10,
    Main444_12,
    MainIntra,
    Main10Intra,
    Main12Intra,
    Main422_10Intra,
    Main422_12Intra,
    Main444Intra,
    Main444_10Intra,
    Main444_12Intra,
    Main444_16Intra,
    Main444StillPicture,
    Main444_16StillPicture,
    Monochrome10,
    HighThroughput444,
    HighThroughput444_10,
    HighThroughput444_14,
    HighThroughput444_16Intra,
    ScreenExtendedMain,
    ScreenExtendedMain10,
    ScreenExtendedMain444,
    ScreenExtendedMain444_10,
    ScreenExtendedHighThroughput444,
    ScreenExtendedHighThroughput444_10,
    ScreenExtendedHighThroughput444_14,
    MultiviewMain,
    ScalableMain,
    ScalableMain10,
    ScalableMonochrome,
    ScalableMonochrome12,
    ScalableMonochrome16,
    ScalableMain444,
    ThreeDMain,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown H.265 profile name {0:?}")]
pub struct UnknownProfile(pub String);

impl Profile {
    pub const ALL: [Profile; 43] = [
        Profile::Main,
        Profile::Main10,
        Profile::MainStillPicture,
        Profile::Monochrome,
        Profile::Monochrome12,
        Profile::Monochrome16,
        Profile::Main12,
        Profile::Main422_10,
        Profile::Main422_12,
        Profile::Main444,
        Profile::Main444_10,
        Profile::Main444_12,
        Profile::MainIntra,
        Profile::Main10Intra,
        Profile::Main12Intra,
        Profile::Main422_10Intra,
        Profile::Main422_12Intra,
        Profile::Main444Intra,
        Profile::Main444_10Intra,
        Profile::Main444_12Intra,
        Profile::Main444_16Intra,
        Profile::Main444StillPicture,
        Profile::Main444_16StillPicture,
        Profile::Monochrome10,
        Profile::HighThroughput444,
        Profile::HighThroughput444_10,
        Profile::HighThroughput444_14,
        Profile::HighThroughput444_16Intra,
        Profile::ScreenExtendedMain,
        Profile::ScreenExtendedMain10,
        Profile::ScreenExtendedMain444,
        Profile::ScreenExtendedMain444_10,
        Profile::ScreenExtendedHighThroughput444,
        Profile::ScreenExtendedHighThroughput444_10,
        Profile::ScreenExtendedHighThroughput444_14,
        Profile::MultiviewMain,
        Profile::ScalableMain,
        Profile::ScalableMain10,
        Profile::ScalableMonochrome,
        Profile::ScalableMonochrome12,
        Profile::ScalableMonochrome16,
        Profile::ScalableMain444,
        Profile::ThreeDMain,
    ];

    /// The lowercase, dash separated name of the profile.
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Main => "main",
            Profile::Main10 => "main-10",
            Profile::MainStillPicture => "main-still-picture",
            Profile::Monochrome => "monochrome",
            Profile::Monochrome12 => "monochrome-12",
            Profile::Monochrome16 => "monochrome-16",
            Profile::Main12 => "main-12",
            Profile::Main422_10 => "main-422-10",
            Profile::Main422_12 => "main-422-12",
            Profile::Main444 => "main-444",
            Profile::Main444_10 => "main-444-10",
            Profile::Main444_12 => "main-444-12",
            Profile::MainIntra => "main-intra",
            Profile::Main10Intra => "main-10-intra",
            Profile::Main12Intra => "main-12-intra",
            Profile::Main422_10Intra => "main-422-10-intra",
            Profile::Main422_12Intra => "main-422-12-intra",
            Profile::Main444Intra => "main-444-intra",
            Profile::Main444_10Intra => "main-444-10-intra",
            Profile::Main444_12Intra => "main-444-12-intra",
            Profile::Main444_16Intra => "main-444-16-intra",
            Profile::Main444StillPicture => "main-444-still-picture",
            Profile::Main444_16StillPicture => "main-444-16-still-picture",
            Profile::Monochrome10 => "monochrome-10",
            Profile::HighThroughput444 => "high-throughput-444",
            Profile::HighThroughput444_10 => "high-throughput-444-10",
            Profile::HighThroughput444_14 => "high-throughput-444-14",
            Profile::HighThroughput444_16Intra => "high-throughput-444-16-intra",
            Profile::ScreenExtendedMain => "screen-extended-main",
            Profile::ScreenExtendedMain10 => "screen-extended-main-10",
            Profile::ScreenExtendedMain444 => "screen-extended-main-444",
            Profile::ScreenExtendedMain444_10 => "screen-extended-main-444-10",
            Profile::ScreenExtendedHighThroughput444 => "screen-extended-high-throughput-444",
            Profile::ScreenExtendedHighThroughput444_10 => {
                "screen-extended-high-throughput-444-10"
            }
            Profile::ScreenExtendedHighThroughput444_14 => {
                "screen-extended-high-throughput-444-14"
            }
            Profile::MultiviewMain => "multiview-main",
            Profile::ScalableMain => "scalable-main",
            Profile::ScalableMain10 => "scalable-main-10",
            Profile::ScalableMonochrome => "scalable-monochrome",
            Profile::ScalableMonochrome12 => "scalable-monochrome-12",
            Profile::ScalableMonochrome16 => "scalable-monochrome-16",
            Profile::ScalableMain444 => "scalable-main-444",
            Profile::ThreeDMain => "3d-main",
        }
    }

    /// Returns the best matching profile for `ptl`, or `None` if neither
    /// general_profile_idc nor any compatibility flag leads to one.
    pub fn from_ptl(ptl: &ProfileTierLevel) -> Option<Profile> {
        Self::candidates(ptl).into_iter().next()
    }

    /// Returns every profile `ptl` is compatible with. The profile indicated
    /// by general_profile_idc comes first, followed by the ones signalled in
    /// general_profile_compatibility_flag in ascending order.
    pub fn candidates(ptl: &ProfileTierLevel) -> Vec<Profile> {
        let mut profiles = Vec::new();
        let idc = ProfileIdc::n(ptl.profile_idc);

        if let Some(profile) = idc.and_then(|idc| profile_for_idc(idc, ptl)) {
            profiles.push(profile);
        }

        for candidate in ProfileIdc::ALL {
            if !profiles.is_empty() && Some(candidate) == idc {
                continue;
            }

            if !ptl.profile_compatibility_flag[candidate as usize] {
                continue;
            }

            if let Some(profile) = profile_for_idc(candidate, ptl) {
                profiles.push(profile);
            }
        }

        profiles
    }

    /// Returns the profile of `sps`, checking the signalled profiles against
    /// its chroma format and bit depths. When nothing signalled fits, the
    /// constraint flags are derived from the SPS itself and classified again.
    pub fn from_sps(sps: &Sps) -> Option<Profile> {
        let luma = sps.bit_depth_luma();
        let chroma = sps.bit_depth_chroma();

        let fits = |profile: &Profile| match profile {
            Profile::Main | Profile::MainStillPicture => {
                sps.chroma_format_idc == 1 && luma == 8 && chroma == 8
            }
            Profile::Main10 => {
                sps.chroma_format_idc == 1 && (8..=10).contains(&luma) && (8..=10).contains(&chroma)
            }
            _ => true,
        };

        if let Some(profile) = Self::candidates(&sps.profile_tier_level)
            .into_iter()
            .find(fits)
        {
            return Some(profile);
        }

        let mut ptl = sps.profile_tier_level.clone();

        let (mono, c420, c422) = match sps.chroma_format_idc {
            0 => (true, true, true),
            1 => (false, true, true),
            2 => (false, false, true),
            _ => (false, false, false),
        };
        ptl.max_monochrome_constraint_flag = mono;
        ptl.max_420chroma_constraint_flag = c420;
        ptl.max_422chroma_constraint_flag = c422;

        let depth = luma.max(chroma);
        ptl.max_8bit_constraint_flag = depth <= 8;
        ptl.max_10bit_constraint_flag = depth <= 10;
        ptl.max_12bit_constraint_flag = depth <= 12;

        let allows_14bit = ProfileIdc::n(ptl.profile_idc).is_some_and(ProfileIdc::allows_14bit)
            || ProfileIdc::ALL
                .iter()
                .any(|idc| idc.allows_14bit() && ptl.profile_compatibility_flag[*idc as usize]);
        ptl.max_14bit_constraint_flag = allows_14bit && depth <= 14;

        Self::from_ptl(&ptl)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Profile::ALL
            .into_iter()
            .find(|profile| profile.as_str() == s)
            .ok_or_else(|| UnknownProfile(s.to_string()))
    }
}

/// A profile of a family sharing one general_profile_idc, told apart by the
/// general constraint flags.
struct ExtensionProfile {
    profile: Profile,
    /// Required values of max_14bit, max_12bit, max_10bit, max_8bit,
    /// max_422chroma, max_420chroma, max_monochrome, intra and
    /// one_picture_only, in this order.
    constraints: [u8; 9],
    lower_bit_rate: bool,
    /// Preferred among approximate matches with the same number of extra
    /// constraints.
    priority: u8,
}

const fn ext(
    profile: Profile,
    constraints: [u8; 9],
    lower_bit_rate: bool,
    priority: u8,
) -> ExtensionProfile {
    ExtensionProfile {
        profile,
        constraints,
        lower_bit_rate,
        priority,
    }
}

#[rustfmt::skip]
const FORMAT_RANGE_EXTENSION_PROFILES: &[ExtensionProfile] = &[
    ext(Profile::Monochrome,             [0, 1, 1, 1, 1, 1, 1, 0, 0], true, 0),
    ext(Profile::Monochrome10,           [0, 1, 1, 0, 1, 1, 1, 0, 0], true, 1),
    ext(Profile::Monochrome12,           [0, 1, 0, 0, 1, 1, 1, 0, 0], true, 2),
    ext(Profile::Monochrome16,           [0, 0, 0, 0, 1, 1, 1, 0, 0], true, 3),
    ext(Profile::Main12,                 [0, 1, 0, 0, 1, 1, 0, 0, 0], true, 4),
    ext(Profile::Main422_10,             [0, 1, 1, 0, 1, 0, 0, 0, 0], true, 5),
    ext(Profile::Main422_12,             [0, 1, 0, 0, 1, 0, 0, 0, 0], true, 6),
    ext(Profile::Main444,                [0, 1, 1, 1, 0, 0, 0, 0, 0], true, 7),
    ext(Profile::Main444_10,             [0, 1, 1, 0, 0, 0, 0, 0, 0], true, 8),
    ext(Profile::Main444_12,             [0, 1, 0, 0, 0, 0, 0, 0, 0], true, 9),
    ext(Profile::MainIntra,              [0, 1, 1, 1, 1, 1, 0, 1, 0], false, 10),
    ext(Profile::Main10Intra,            [0, 1, 1, 0, 1, 1, 0, 1, 0], false, 11),
    ext(Profile::Main12Intra,            [0, 1, 0, 0, 1, 1, 0, 1, 0], false, 12),
    ext(Profile::Main422_10Intra,        [0, 1, 1, 0, 1, 0, 0, 1, 0], false, 13),
    ext(Profile::Main422_12Intra,        [0, 1, 0, 0, 1, 0, 0, 1, 0], false, 14),
    ext(Profile::Main444Intra,           [0, 1, 1, 1, 0, 0, 0, 1, 0], false, 15),
    ext(Profile::Main444_10Intra,        [0, 1, 1, 0, 0, 0, 0, 1, 0], false, 16),
    ext(Profile::Main444_12Intra,        [0, 1, 0, 0, 0, 0, 0, 1, 0], false, 17),
    ext(Profile::Main444_16Intra,        [0, 0, 0, 0, 0, 0, 0, 1, 0], false, 18),
    ext(Profile::Main444StillPicture,    [0, 1, 1, 1, 0, 0, 0, 1, 1], false, 19),
    ext(Profile::Main444_16StillPicture, [0, 0, 0, 0, 0, 0, 0, 1, 1], false, 20),
];

#[rustfmt::skip]
const THREE_D_PROFILES: &[ExtensionProfile] = &[
    ext(Profile::ThreeDMain, [0, 1, 1, 1, 1, 1, 0, 0, 0], true, 0),
];

#[rustfmt::skip]
const MULTIVIEW_PROFILES: &[ExtensionProfile] = &[
    ext(Profile::MultiviewMain, [0, 1, 1, 1, 1, 1, 0, 0, 0], true, 0),
];

#[rustfmt::skip]
const SCALABLE_PROFILES: &[ExtensionProfile] = &[
    ext(Profile::ScalableMain,   [0, 1, 1, 1, 1, 1, 0, 0, 0], true, 0),
    ext(Profile::ScalableMain10, [0, 1, 1, 0, 1, 1, 0, 0, 0], true, 1),
];

#[rustfmt::skip]
const HIGH_THROUGHPUT_PROFILES: &[ExtensionProfile] = &[
    ext(Profile::HighThroughput444,         [1, 1, 1, 1, 0, 0, 0, 0, 0], true, 0),
    ext(Profile::HighThroughput444_10,      [1, 1, 1, 0, 0, 0, 0, 0, 0], true, 1),
    ext(Profile::HighThroughput444_14,      [1, 0, 0, 0, 0, 0, 0, 0, 0], true, 2),
    ext(Profile::HighThroughput444_16Intra, [0, 0, 0, 0, 0, 0, 0, 1, 0], false, 3),
];

#[rustfmt::skip]
const SCREEN_CONTENT_CODING_PROFILES: &[ExtensionProfile] = &[
    ext(Profile::ScreenExtendedMain,       [1, 1, 1, 1, 1, 1, 0, 0, 0], true, 0),
    ext(Profile::ScreenExtendedMain10,     [1, 1, 1, 0, 1, 1, 0, 0, 0], true, 1),
    ext(Profile::ScreenExtendedMain444,    [1, 1, 1, 1, 0, 0, 0, 0, 0], true, 2),
    ext(Profile::ScreenExtendedMain444_10, [1, 1, 1, 0, 0, 0, 0, 0, 0], true, 3),
];

#[rustfmt::skip]
const SCALABLE_FORMAT_RANGE_EXTENSION_PROFILES: &[ExtensionProfile] = &[
    ext(Profile::ScalableMonochrome,   [1, 1, 1, 1, 1, 1, 1, 0, 0], true, 0),
    ext(Profile::ScalableMonochrome12, [1, 1, 0, 0, 1, 1, 1, 0, 0], true, 1),
    ext(Profile::ScalableMonochrome16, [0, 0, 0, 0, 1, 1, 1, 0, 0], true, 2),
    ext(Profile::ScalableMain444,      [1, 1, 1, 1, 0, 0, 0, 0, 0], true, 3),
];

#[rustfmt::skip]
const HIGH_THROUGHPUT_SCREEN_CONTENT_CODING_PROFILES: &[ExtensionProfile] = &[
    ext(Profile::ScreenExtendedHighThroughput444,    [1, 1, 1, 1, 0, 0, 0, 0, 0], true, 0),
    ext(Profile::ScreenExtendedHighThroughput444_10, [1, 1, 1, 0, 0, 0, 0, 0, 0], true, 1),
    ext(Profile::ScreenExtendedHighThroughput444_14, [1, 0, 0, 0, 0, 0, 0, 0, 0], true, 2),
];

fn profile_for_idc(idc: ProfileIdc, ptl: &ProfileTierLevel) -> Option<Profile> {
    let family = match idc {
        ProfileIdc::Main => return Some(Profile::Main),
        ProfileIdc::Main10 => return Some(Profile::Main10),
        ProfileIdc::MainStillPicture => return Some(Profile::MainStillPicture),
        ProfileIdc::FormatRangeExtension => FORMAT_RANGE_EXTENSION_PROFILES,
        ProfileIdc::HighThroughput => HIGH_THROUGHPUT_PROFILES,
        ProfileIdc::MultiviewMain => MULTIVIEW_PROFILES,
        ProfileIdc::ScalableMain => SCALABLE_PROFILES,
        ProfileIdc::ThreeDMain => THREE_D_PROFILES,
        ProfileIdc::ScreenContentCoding => SCREEN_CONTENT_CODING_PROFILES,
        ProfileIdc::ScalableFormatRangeExtension => SCALABLE_FORMAT_RANGE_EXTENSION_PROFILES,
        ProfileIdc::HighThroughputScreenContentCoding => {
            HIGH_THROUGHPUT_SCREEN_CONTENT_CODING_PROFILES
        }
    };

    match_extension_profile(family, ptl)
}

fn constraint_flags(ptl: &ProfileTierLevel) -> [bool; 9] {
    [
        ptl.max_14bit_constraint_flag,
        ptl.max_12bit_constraint_flag,
        ptl.max_10bit_constraint_flag,
        ptl.max_8bit_constraint_flag,
        ptl.max_422chroma_constraint_flag,
        ptl.max_420chroma_constraint_flag,
        ptl.max_monochrome_constraint_flag,
        ptl.intra_constraint_flag,
        ptl.one_picture_only_constraint_flag,
    ]
}

/// A candidate is ruled out when it requires a flag the stream does not set.
/// Flags the stream sets beyond what a candidate requires are counted, and
/// the first exact match wins. Otherwise the candidate with the fewest extra
/// flags is picked, the highest priority breaking ties.
fn match_extension_profile(
    family: &[ExtensionProfile],
    ptl: &ProfileTierLevel,
) -> Option<Profile> {
    let flags = constraint_flags(ptl);
    let mut approximate = Vec::new();

    for candidate in family {
        if candidate.lower_bit_rate && !ptl.lower_bit_rate_constraint_flag {
            continue;
        }

        let mut extra = 0u32;
        let mut ruled_out = false;
        for (&required, &present) in candidate.constraints.iter().zip(flags.iter()) {
            let required = required != 0;
            if required == present {
                continue;
            }

            if required {
                ruled_out = true;
                break;
            }
            extra += 1;
        }

        if ruled_out {
            continue;
        }

        if extra == 0 {
            return Some(candidate.profile);
        }

        approximate.push((candidate, extra));
    }

    let (best, extra) = approximate
        .into_iter()
        .min_by_key(|(candidate, extra)| (*extra, Reverse(candidate.priority)))?;

    info!(
        "no exact profile match for profile_idc {}, using {} with {} extra constraints",
        ptl.profile_idc, best.profile, extra
    );

    Some(best.profile)
}
