// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! scaling_list_data( ), see 7.3.4, and conversions between the scan orders
//! quantization matrices are expressed in.

use crate::codec::h265::nalu_reader::NaluReader;
use crate::codec::h265::ParseResult;

// From Table 7-5.
pub const DEFAULT_SCALING_LIST_0: [u8; 16] = [16; 16];

// From Table 7-6. Default list of the 8x8 and 16x16 matrices with matrixId 0
// to 2 and of the 32x32 matrix with matrixId 0.
pub const DEFAULT_SCALING_LIST_1: [u8; 64] = [
    16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 16, 17, 16, 17, 18, 17, 18, 18, 17, 18, 21, 19, 20,
    21, 20, 19, 21, 24, 22, 22, 24, 24, 22, 22, 24, 25, 25, 27, 30, 27, 25, 25, 29, 31, 35, 35, 31,
    29, 36, 41, 44, 41, 36, 47, 54, 54, 47, 65, 70, 65, 88, 88, 115,
];

// From Table 7-6. Default list of the 8x8 and 16x16 matrices with matrixId 3
// to 5 and of the 32x32 matrix with matrixId 1.
pub const DEFAULT_SCALING_LIST_2: [u8; 64] = [
    16, 16, 16, 16, 16, 16, 16, 16, 16, 16, 17, 17, 17, 17, 17, 18, 18, 18, 18, 18, 18, 20, 20, 20,
    20, 20, 20, 20, 24, 24, 24, 24, 24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 28, 28, 28, 28, 28,
    28, 33, 33, 33, 33, 33, 41, 41, 41, 41, 54, 54, 54, 71, 71, 91,
];

const ZIGZAG_4X4: [u8; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

const ZIGZAG_8X8: [u8; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27, 20,
    13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58, 59,
    52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

const UPRIGHT_DIAGONAL_4X4: [u8; 16] = [0, 4, 1, 8, 5, 2, 12, 9, 6, 3, 13, 10, 7, 14, 11, 15];

const UPRIGHT_DIAGONAL_8X8: [u8; 64] = [
    0, 8, 1, 16, 9, 2, 24, 17, 10, 3, 32, 25, 18, 11, 4, 40, 33, 26, 19, 12, 5, 48, 41, 34, 27, 20,
    13, 6, 56, 49, 42, 35, 28, 21, 14, 7, 57, 50, 43, 36, 29, 22, 15, 58, 51, 44, 37, 30, 23, 59,
    52, 45, 38, 31, 60, 53, 46, 39, 61, 54, 47, 62, 55, 63,
];

/// `scan[i]` is the raster position of the i-th coefficient in scan order.
fn scan_from_raster<const N: usize>(quant: &[u8; N], scan: &[u8; N]) -> [u8; N] {
    let mut out = [0; N];
    for (dst, &pos) in out.iter_mut().zip(scan.iter()) {
        *dst = quant[usize::from(pos)];
    }
    out
}

fn raster_from_scan<const N: usize>(quant: &[u8; N], scan: &[u8; N]) -> [u8; N] {
    let mut out = [0; N];
    for (&src, &pos) in quant.iter().zip(scan.iter()) {
        out[usize::from(pos)] = src;
    }
    out
}

/// Converts a 4x4 quantization matrix from raster to zigzag scan order.
pub fn zigzag_from_raster_4x4(quant: &[u8; 16]) -> [u8; 16] {
    scan_from_raster(quant, &ZIGZAG_4X4)
}

/// Converts a 4x4 quantization matrix from zigzag to raster scan order.
pub fn raster_from_zigzag_4x4(quant: &[u8; 16]) -> [u8; 16] {
    raster_from_scan(quant, &ZIGZAG_4X4)
}

/// Converts an 8x8 quantization matrix from raster to zigzag scan order. Also
/// applies to the 16x16 and 32x32 matrices, which are coded at 8x8
/// granularity.
pub fn zigzag_from_raster_8x8(quant: &[u8; 64]) -> [u8; 64] {
    scan_from_raster(quant, &ZIGZAG_8X8)
}

/// Converts an 8x8 quantization matrix from zigzag to raster scan order.
pub fn raster_from_zigzag_8x8(quant: &[u8; 64]) -> [u8; 64] {
    raster_from_scan(quant, &ZIGZAG_8X8)
}

/// Converts a 4x4 quantization matrix from raster to up-right diagonal scan
/// order.
pub fn upright_diagonal_from_raster_4x4(quant: &[u8; 16]) -> [u8; 16] {
    scan_from_raster(quant, &UPRIGHT_DIAGONAL_4X4)
}

/// Converts a 4x4 quantization matrix from up-right diagonal to raster scan
/// order.
pub fn raster_from_upright_diagonal_4x4(quant: &[u8; 16]) -> [u8; 16] {
    raster_from_scan(quant, &UPRIGHT_DIAGONAL_4X4)
}

/// Converts an 8x8 quantization matrix from raster to up-right diagonal scan
/// order.
pub fn upright_diagonal_from_raster_8x8(quant: &[u8; 64]) -> [u8; 64] {
    scan_from_raster(quant, &UPRIGHT_DIAGONAL_8X8)
}

/// Converts an 8x8 quantization matrix from up-right diagonal to raster scan
/// order.
pub fn raster_from_upright_diagonal_8x8(quant: &[u8; 64]) -> [u8; 64] {
    raster_from_scan(quant, &UPRIGHT_DIAGONAL_8X8)
}

/// The quantization matrices of a SPS or PPS. Coefficients are stored in the
/// order they are coded, i.e. up-right diagonal scan order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalingLists {
    /// plus 8 specifies the value of the variable ScalingFactor[ 2 ][ matrixId
    /// ] [ 0 ][ 0 ] for the scaling list for the 16x16 size.
    pub scaling_list_dc_coef_minus8_16x16: [i16; 6],
    /// plus 8 specifies the value of the variable ScalingFactor[ 3 ][ matrixId
    /// ][ 0 ][ 0 ] for the scaling list for the 32x32 size.
    pub scaling_list_dc_coef_minus8_32x32: [i16; 2],
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
    pub scaling_list_16x16: [[u8; 64]; 6],
    pub scaling_list_32x32: [[u8; 64]; 2],
}

impl Default for ScalingLists {
    fn default() -> Self {
        Self {
            scaling_list_dc_coef_minus8_16x16: Default::default(),
            scaling_list_dc_coef_minus8_32x32: Default::default(),
            scaling_list_4x4: Default::default(),
            scaling_list_8x8: [[0; 64]; 6],
            scaling_list_16x16: [[0; 64]; 6],
            scaling_list_32x32: [[0; 64]; 2],
        }
    }
}

impl ScalingLists {
    /// The lists used when scaling lists are enabled but neither the SPS nor
    /// the PPS carry them.
    pub fn default_lists() -> Self {
        let mut lists = Self::default();
        for size_id in 0..4 {
            for matrix_id in 0..num_matrices(size_id) {
                lists.fill_default(size_id, matrix_id);
            }
        }
        lists
    }

    /// Parses scaling_list_data( ).
    pub fn parse(r: &mut NaluReader) -> ParseResult<Self> {
        let mut lists = Self::default();

        for size_id in 0..4 {
            for matrix_id in 0..num_matrices(size_id) {
                let scaling_list_pred_mode_flag = r.read_bit()?;

                if !scaling_list_pred_mode_flag {
                    let delta: usize = r.read_ue_max(matrix_id as u32)?;

                    if delta == 0 {
                        lists.fill_default(size_id, matrix_id);
                    } else {
                        // (7-42)
                        lists.copy_from(size_id, matrix_id, matrix_id - delta);
                    }
                } else {
                    let mut next_coef = 8i32;

                    if size_id > 1 {
                        let dc = r.read_se_bounded::<i16>(-7, 247)?;
                        lists.set_dc(size_id, matrix_id, dc);
                        next_coef = i32::from(dc) + 8;
                    }

                    for coef in lists.list_mut(size_id, matrix_id) {
                        let delta = r.read_se_bounded::<i32>(-128, 127)?;
                        next_coef = (next_coef + delta + 256) % 256;
                        *coef = next_coef as u8;
                    }
                }
            }
        }

        Ok(lists)
    }

    fn list_mut(&mut self, size_id: usize, matrix_id: usize) -> &mut [u8] {
        match size_id {
            0 => &mut self.scaling_list_4x4[matrix_id],
            1 => &mut self.scaling_list_8x8[matrix_id],
            2 => &mut self.scaling_list_16x16[matrix_id],
            _ => &mut self.scaling_list_32x32[matrix_id],
        }
    }

    fn set_dc(&mut self, size_id: usize, matrix_id: usize, dc: i16) {
        match size_id {
            2 => self.scaling_list_dc_coef_minus8_16x16[matrix_id] = dc,
            3 => self.scaling_list_dc_coef_minus8_32x32[matrix_id] = dc,
            _ => (),
        }
    }

    fn fill_default(&mut self, size_id: usize, matrix_id: usize) {
        let default: &[u8] = match size_id {
            0 => &DEFAULT_SCALING_LIST_0,
            1 | 2 if matrix_id <= 2 => &DEFAULT_SCALING_LIST_1,
            3 if matrix_id == 0 => &DEFAULT_SCALING_LIST_1,
            _ => &DEFAULT_SCALING_LIST_2,
        };

        self.list_mut(size_id, matrix_id).copy_from_slice(default);
        // Inferred value of scaling_list_dc_coef_minus8.
        self.set_dc(size_id, matrix_id, 8);
    }

    fn copy_from(&mut self, size_id: usize, matrix_id: usize, ref_matrix_id: usize) {
        match size_id {
            0 => self.scaling_list_4x4[matrix_id] = self.scaling_list_4x4[ref_matrix_id],
            1 => self.scaling_list_8x8[matrix_id] = self.scaling_list_8x8[ref_matrix_id],
            2 => {
                self.scaling_list_16x16[matrix_id] = self.scaling_list_16x16[ref_matrix_id];
                self.scaling_list_dc_coef_minus8_16x16[matrix_id] =
                    self.scaling_list_dc_coef_minus8_16x16[ref_matrix_id];
            }
            _ => {
                self.scaling_list_32x32[matrix_id] = self.scaling_list_32x32[ref_matrix_id];
                self.scaling_list_dc_coef_minus8_32x32[matrix_id] =
                    self.scaling_list_dc_coef_minus8_32x32[ref_matrix_id];
            }
        }
    }
}

/// 32x32 matrices only exist for intra and inter luma.
fn num_matrices(size_id: usize) -> usize {
    if size_id == 3 {
        2
    } else {
        6
    }
}
