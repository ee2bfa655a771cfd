// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsing of H.265/HEVC elementary streams: NAL unit location, parameter
//! sets, slice segment headers and SEI messages, plus the small amount of
//! bitstream writing needed to produce SEI NAL units.

pub mod bitstream_utils;
pub mod codec;
