//! Weight repacking.
//!
//! Canonical weights arrive in the loader's layout:
//!
//! - channel-first: `[Cin, Cout/G, Kh, Kw]`
//! - channel-last: `[Kh, Kw, Cin, Cout/G]`
//!
//! and are rewritten once into the operand the chosen backend consumes.

use gemmconv_gemm::{BackendKind, GemmBackend};
use gemmconv_kernel::Layout;

use crate::param::DeconvParams;
use crate::plan::BufferPlan;
use crate::{DeconvError, Result};

/// Elements in a canonical weight tensor for `params`.
pub fn canonical_weight_len(params: &DeconvParams) -> usize {
    params.src_channels * params.dst_channels_per_group() * params.kernel_area()
}

/// Rewrites canonical weights into a backend's operand layout.
///
/// - plain, channel-first: per group the `Cout/G x K` matrix
///   `A_g[co][ci*Kh*Kw + ky*Kw + kx] = W[g*Cin/G + ci][co][ky][kx]`
/// - plain, channel-last: per group the `K x Cout/G` matrix
///   `B_g[(ky*Kw + kx)*Cin/G + ci][co] = W[ky][kx][g*Cin/G + ci][co]`
/// - packed (channel-last, one group): the canonical tensor already is the
///   `K x Cout` matrix and is handed to [`GemmBackend::reorder_b`].
///
/// The output is a pure function of the canonical weights.
#[derive(Debug, Clone, Copy)]
pub struct WeightRepacker<'a> {
    params: &'a DeconvParams,
    plan: &'a BufferPlan,
    backend: &'a dyn GemmBackend,
}

impl<'a> WeightRepacker<'a> {
    pub fn new(params: &'a DeconvParams, plan: &'a BufferPlan, backend: &'a dyn GemmBackend) -> Self {
        WeightRepacker {
            params,
            plan,
            backend,
        }
    }

    pub fn canonical_len(&self) -> usize {
        canonical_weight_len(self.params)
    }

    /// Elements the repacked weights occupy.
    pub fn packed_len(&self) -> usize {
        self.plan.weight_len + self.plan.packed_weight_len
    }

    /// Repack `canonical` into `packed`. Both lengths are checked before
    /// anything is written.
    pub fn repack(&self, canonical: &[f32], packed: &mut [f32]) -> Result<()> {
        if canonical.len() != self.canonical_len() {
            return Err(DeconvError::BufferMismatch {
                what: "weights",
                expected: self.canonical_len(),
                got: canonical.len(),
            });
        }
        if packed.len() < self.packed_len() {
            return Err(DeconvError::BufferMismatch {
                what: "packed weights",
                expected: self.packed_len(),
                got: packed.len(),
            });
        }

        let p = self.params;
        let dims = self.plan.dims;
        match (self.backend.kind(), p.layout) {
            (BackendKind::Packed, _) => {
                self.backend.reorder_b(
                    dims.m * self.plan.merge,
                    dims.n,
                    dims.k,
                    canonical,
                    dims.n,
                    &mut packed[..self.plan.packed_weight_len],
                )?;
            }
            (BackendKind::Plain, Layout::ChannelFirst) => {
                let cin_g = p.src_channels_per_group();
                let cout_g = p.dst_channels_per_group();
                let area = p.kernel_area();
                let k = dims.k;
                for g in 0..p.group {
                    let a_g = &mut packed[g * cout_g * k..(g + 1) * cout_g * k];
                    for ci in 0..cin_g {
                        let w_ci = &canonical[(g * cin_g + ci) * cout_g * area..][..cout_g * area];
                        for co in 0..cout_g {
                            a_g[co * k + ci * area..][..area]
                                .copy_from_slice(&w_ci[co * area..(co + 1) * area]);
                        }
                    }
                }
            }
            (BackendKind::Plain, Layout::ChannelLast) => {
                let cin = p.src_channels;
                let cin_g = p.src_channels_per_group();
                let cout_g = p.dst_channels_per_group();
                let k = dims.k;
                for g in 0..p.group {
                    let b_g = &mut packed[g * k * cout_g..(g + 1) * k * cout_g];
                    for tap in 0..p.kernel_area() {
                        for ci in 0..cin_g {
                            let src = &canonical[(tap * cin + g * cin_g + ci) * cout_g..][..cout_g];
                            b_g[(tap * cin_g + ci) * cout_g..][..cout_g].copy_from_slice(src);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
