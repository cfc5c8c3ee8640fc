//! Column expansion for transposed convolution.
//!
//! Output pixel `oy` receives input row `iy` through kernel row `ky` when
//! `oy + pad_top - ky * dilation_h == iy * stride_h`. The gather form used
//! here visits, for every output position and kernel tap, the single input
//! pixel (if any) that contributes to it; taps that land between input pixels
//! or outside the input read as zero. No input element is ever read out of
//! bounds.
//!
//! The tap-to-source mapping depends only on the shape, so it is computed
//! once into a [`GatherTable`].

use crate::param::DeconvParams;

/// Sentinel for "this tap contributes the zero padding value".
const NONE: usize = usize::MAX;

/// Source coordinates for every (kernel tap, output coordinate) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherTable {
    /// `rows[ky * dst_height + oy]` = input row or `NONE`.
    rows: Vec<usize>,
    /// `cols[kx * dst_width + ox]` = input column or `NONE`.
    cols: Vec<usize>,
    src_height: usize,
    src_width: usize,
    dst_height: usize,
    dst_width: usize,
    kernel_h: usize,
    kernel_w: usize,
}

fn axis_map(
    kernel: usize,
    dst: usize,
    src: usize,
    stride: usize,
    dilation: usize,
    pad_begin: usize,
) -> Vec<usize> {
    let mut map = Vec::with_capacity(kernel * dst);
    for kk in 0..kernel {
        let shift = kk * dilation;
        for o in 0..dst {
            let t = o + pad_begin;
            let src_idx = if t >= shift && (t - shift) % stride == 0 {
                let i = (t - shift) / stride;
                if i < src {
                    i
                } else {
                    NONE
                }
            } else {
                NONE
            };
            map.push(src_idx);
        }
    }
    map
}

impl GatherTable {
    pub fn new(params: &DeconvParams) -> Self {
        GatherTable {
            rows: axis_map(
                params.kernel_h,
                params.dst_height,
                params.src_height,
                params.stride_h,
                params.dilation_h,
                params.pad_top,
            ),
            cols: axis_map(
                params.kernel_w,
                params.dst_width,
                params.src_width,
                params.stride_w,
                params.dilation_w,
                params.pad_left,
            ),
            src_height: params.src_height,
            src_width: params.src_width,
            dst_height: params.dst_height,
            dst_width: params.dst_width,
            kernel_h: params.kernel_h,
            kernel_w: params.kernel_w,
        }
    }

    #[inline]
    fn row(&self, ky: usize, oy: usize) -> Option<usize> {
        let r = self.rows[ky * self.dst_height + oy];
        (r != NONE).then_some(r)
    }

    #[inline]
    fn col_map(&self, kx: usize) -> &[usize] {
        &self.cols[kx * self.dst_width..(kx + 1) * self.dst_width]
    }

    /// Number of input pixels feeding output `(oy, ox)`.
    pub fn contributions(&self, oy: usize, ox: usize) -> usize {
        let ys = (0..self.kernel_h).filter(|&ky| self.row(ky, oy).is_some()).count();
        let xs = (0..self.kernel_w)
            .filter(|&kx| self.col_map(kx)[ox] != NONE)
            .count();
        ys * xs
    }

    /// Channel-first expansion of `channels` consecutive input planes.
    ///
    /// `src` holds `channels x src_height x src_width` values; `col` receives
    /// a row-major `K x (dst_height * dst_width)` matrix with row index
    /// `ci * Kh * Kw + ky * Kw + kx`.
    pub fn expand_chw(&self, src: &[f32], channels: usize, col: &mut [f32]) {
        let plane_len = self.src_height * self.src_width;
        let n = self.dst_height * self.dst_width;
        debug_assert!(src.len() >= channels * plane_len);
        debug_assert!(col.len() >= channels * self.kernel_h * self.kernel_w * n);

        let mut rows = col.chunks_exact_mut(n);
        for plane in src.chunks_exact(plane_len).take(channels) {
            for ky in 0..self.kernel_h {
                for kx in 0..self.kernel_w {
                    let Some(out) = rows.next() else { return };
                    let xs = self.col_map(kx);
                    for (oy, out_row) in out.chunks_exact_mut(self.dst_width).enumerate() {
                        match self.row(ky, oy) {
                            None => out_row.fill(0.0),
                            Some(iy) => {
                                let src_row = &plane[iy * self.src_width..][..self.src_width];
                                for (o, &ix) in out_row.iter_mut().zip(xs) {
                                    *o = if ix == NONE { 0.0 } else { src_row[ix] };
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Channel-last expansion of channels `first..first + channels` of one
    /// image.
    ///
    /// `src` holds `src_height x src_width x stride_c` values; `col` receives
    /// a row-major `(dst_height * dst_width) x K` matrix with column index
    /// `(ky * Kw + kx) * channels + ci`.
    pub fn expand_hwc(
        &self,
        src: &[f32],
        stride_c: usize,
        first: usize,
        channels: usize,
        col: &mut [f32],
    ) {
        let k = self.kernel_h * self.kernel_w * channels;
        debug_assert!(first + channels <= stride_c);
        debug_assert!(src.len() >= self.src_height * self.src_width * stride_c);
        debug_assert!(col.len() >= self.dst_height * self.dst_width * k);

        let mut rows = col.chunks_exact_mut(k);
        for oy in 0..self.dst_height {
            for ox in 0..self.dst_width {
                let Some(row) = rows.next() else { return };
                let mut taps = row.chunks_exact_mut(channels);
                for ky in 0..self.kernel_h {
                    let iy = self.row(ky, oy);
                    for kx in 0..self.kernel_w {
                        let Some(seg) = taps.next() else { return };
                        let ix = self.col_map(kx)[ox];
                        match iy {
                            Some(iy) if ix != NONE => {
                                let at = (iy * self.src_width + ix) * stride_c + first;
                                seg.copy_from_slice(&src[at..at + channels]);
                            }
                            _ => seg.fill(0.0),
                        }
                    }
                }
            }
        }
    }
}
