//! Buffer sizing.
//!
//! Everything a [`Deconvolution`](crate::Deconvolution) allocates is sized
//! here, once, from the validated parameters and the chosen backend. Forward
//! calls never allocate.

use gemmconv_gemm::{BackendKind, GemmBackend};
use gemmconv_kernel::Layout;

use crate::param::{DeconvParams, GemmDims};

/// Element counts of every buffer an operator owns. All buffers hold `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferPlan {
    pub dims: GemmDims,
    /// Images multiplied together by one GEMM call.
    pub merge: usize,
    /// Dense repacked weights for the plain backend (all groups); 0 when packed.
    pub weight_len: usize,
    /// Backend-packed weights; 0 for the plain backend.
    pub packed_weight_len: usize,
    /// Column-expanded input for one GEMM call.
    pub col_len: usize,
    /// Dense GEMM output for one call.
    pub out_len: usize,
}

const F32_BYTES: usize = std::mem::size_of::<f32>();

impl BufferPlan {
    pub fn weight_bytes(&self) -> usize {
        self.weight_len * F32_BYTES
    }

    pub fn packed_weight_bytes(&self) -> usize {
        self.packed_weight_len * F32_BYTES
    }

    /// Column buffer plus output slice.
    pub fn scratch_bytes(&self) -> usize {
        (self.col_len + self.out_len) * F32_BYTES
    }

    pub fn total_bytes(&self) -> usize {
        self.weight_bytes() + self.packed_weight_bytes() + self.scratch_bytes()
    }
}

/// Number of images to fold into one GEMM's `M` dimension.
///
/// Only channel-last, ungrouped operators can merge: consecutive images are
/// then consecutive row blocks of both the column buffer and the output. The
/// result is the largest divisor of `batch` keeping `M * merge` within
/// `max_merge_rows`, and at least 1.
pub fn merge_factor(params: &DeconvParams, dims: &GemmDims, max_merge_rows: usize) -> usize {
    if params.layout != Layout::ChannelLast || params.group != 1 || params.batch == 1 {
        return 1;
    }
    (1..=params.batch)
        .rev()
        .find(|&d| params.batch % d == 0 && dims.m * d <= max_merge_rows)
        .unwrap_or(1)
}

/// Size every buffer for `params` running on `backend`.
pub fn plan_buffers(
    params: &DeconvParams,
    dims: GemmDims,
    backend: &dyn GemmBackend,
    merge: usize,
) -> BufferPlan {
    let GemmDims { m, n, k } = dims;
    let merged_m = m * merge;
    // One `Cout/G x K` (or `K x Cout/G`) block per group.
    let (weight_len, packed_weight_len) = match backend.kind() {
        BackendKind::Plain => (params.group * params.dst_channels_per_group() * k, 0),
        BackendKind::Packed => (0, backend.buffer_len(merged_m, n, k)),
    };
    BufferPlan {
        dims,
        merge,
        weight_len,
        packed_weight_len,
        col_len: k * m.max(n) * merge,
        out_len: m * n * merge,
    }
}
