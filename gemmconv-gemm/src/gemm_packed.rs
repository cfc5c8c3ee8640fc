//! Packed/callback GEMM backend.
//!
//! `B` is reorganised once by [`GemmBackend::reorder_b`] into column panels
//! of `NR` values per row of `K`:
//!
//! ```text
//! packed[p*K*NR + kk*NR + jj] = B[kk*ldb + p*NR + jj]   (zero past column N)
//! ```
//!
//! `run` then sweeps `MR x NR` register tiles, reading each panel
//! sequentially. Tile shapes are const generics so the accumulator block
//! lives in registers; the sweep itself runs under [`dispatch`] so it is
//! compiled for the best instruction set detected at runtime.

use gemmconv_kernel::simd::dispatch;
use gemmconv_kernel::SimdLevel;

use crate::backend::{prepare_common, BackendKind, GemmBackend, Rhs};
use crate::tile::{packed_b_len, KernelRequest, KernelTile, TileShape};
use crate::util::check_matrix;
use crate::{GemmError, Result};

/// Backend that multiplies against a pre-packed right-hand operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedGemm {
    level: SimdLevel,
    tile: KernelTile,
    shape: TileShape,
}

impl PackedGemm {
    pub fn new(level: SimdLevel, request: KernelRequest) -> Self {
        let tile = request.resolve(level);
        PackedGemm {
            level,
            tile,
            shape: tile.shape(level),
        }
    }

    pub fn tile(&self) -> KernelTile {
        self.tile
    }

    pub fn shape(&self) -> TileShape {
        self.shape
    }

    pub fn level(&self) -> SimdLevel {
        self.level
    }
}

impl GemmBackend for PackedGemm {
    fn kind(&self) -> BackendKind {
        BackendKind::Packed
    }

    fn name(&self) -> &'static str {
        match self.tile {
            KernelTile::F2 => "packed-f2",
            KernelTile::F3 => "packed-f3",
        }
    }

    /// The panel layout does not depend on `m`.
    fn buffer_len(&self, _m: usize, n: usize, k: usize) -> usize {
        packed_b_len(n, k, self.shape)
    }

    fn reorder_b(
        &self,
        _m: usize,
        n: usize,
        k: usize,
        b: &[f32],
        ldb: usize,
        packed: &mut [f32],
    ) -> Result<()> {
        check_matrix("b", b.len(), k, n, ldb)?;
        let needed = packed_b_len(n, k, self.shape);
        if packed.len() < needed {
            return Err(GemmError::OperandTooShort {
                operand: "packed b",
                needed,
                len: packed.len(),
            });
        }
        if needed == 0 {
            return Ok(());
        }

        let nr = self.shape.nr;
        for (p, panel) in packed[..needed].chunks_exact_mut(k * nr).enumerate() {
            let j0 = p * nr;
            let cols = nr.min(n - j0);
            for (kk, dst) in panel.chunks_exact_mut(nr).enumerate() {
                let src = kk * ldb + j0;
                dst[..cols].copy_from_slice(&b[src..src + cols]);
                dst[cols..].fill(0.0);
            }
        }
        Ok(())
    }

    fn run(
        &self,
        m: usize,
        n: usize,
        k: usize,
        a: &[f32],
        lda: usize,
        b: Rhs<'_>,
        c: &mut [f32],
        ldc: usize,
    ) -> Result<()> {
        let packed = match b {
            Rhs::Packed(p) => p,
            Rhs::Dense { .. } => {
                return Err(GemmError::RhsKind {
                    backend: BackendKind::Packed.name(),
                    got: "dense",
                })
            }
        };
        let needed = packed_b_len(n, k, self.shape);
        if packed.len() < needed {
            return Err(GemmError::OperandTooShort {
                operand: "packed b",
                needed,
                len: packed.len(),
            });
        }
        if !prepare_common(m, n, k, a, lda, c, ldc)? {
            return Ok(());
        }

        let packed = &packed[..needed];
        match (self.shape.mr, self.shape.nr) {
            (6, 8) => dispatch(|| sweep::<6, 8>(m, n, k, a, lda, packed, c, ldc)),
            (6, 16) => dispatch(|| sweep::<6, 16>(m, n, k, a, lda, packed, c, ldc)),
            (6, 32) => dispatch(|| sweep::<6, 32>(m, n, k, a, lda, packed, c, ldc)),
            (4, 12) => dispatch(|| sweep::<4, 12>(m, n, k, a, lda, packed, c, ldc)),
            (4, 24) => dispatch(|| sweep::<4, 24>(m, n, k, a, lda, packed, c, ldc)),
            (4, 48) => dispatch(|| sweep::<4, 48>(m, n, k, a, lda, packed, c, ldc)),
            (mr, nr) => sweep_dyn(mr, nr, m, n, k, a, lda, packed, c, ldc),
        }
        Ok(())
    }
}

/// Multiply validated operands tile by tile. Each output element is summed
/// in ascending `k` order starting from zero.
#[inline(always)]
#[allow(clippy::too_many_arguments)]
fn sweep<const MR: usize, const NR: usize>(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    lda: usize,
    packed: &[f32],
    c: &mut [f32],
    ldc: usize,
) {
    for (p, panel) in packed.chunks_exact(k * NR).enumerate() {
        let j0 = p * NR;
        let cols = NR.min(n - j0);
        let mut i0 = 0;
        while i0 < m {
            let rows = MR.min(m - i0);
            let mut acc = [[0.0f32; NR]; MR];
            for (kk, b_row) in panel.chunks_exact(NR).enumerate() {
                for (r, acc_row) in acc.iter_mut().enumerate().take(rows) {
                    let av = a[(i0 + r) * lda + kk];
                    for (x, &bv) in acc_row.iter_mut().zip(b_row) {
                        *x += av * bv;
                    }
                }
            }
            for (r, acc_row) in acc.iter().enumerate().take(rows) {
                let off = (i0 + r) * ldc + j0;
                c[off..off + cols].copy_from_slice(&acc_row[..cols]);
            }
            i0 += MR;
        }
    }
}

/// Runtime-shaped fallback of [`sweep`] for tile shapes outside the menu.
#[allow(clippy::too_many_arguments)]
fn sweep_dyn(
    mr: usize,
    nr: usize,
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    lda: usize,
    packed: &[f32],
    c: &mut [f32],
    ldc: usize,
) {
    log::trace!("packed gemm: no specialised {mr}x{nr} kernel");
    let mut acc = vec![0.0f32; mr * nr];
    for (p, panel) in packed.chunks_exact(k * nr).enumerate() {
        let j0 = p * nr;
        let cols = nr.min(n - j0);
        let mut i0 = 0;
        while i0 < m {
            let rows = mr.min(m - i0);
            acc.fill(0.0);
            for (kk, b_row) in panel.chunks_exact(nr).enumerate() {
                for (r, acc_row) in acc.chunks_exact_mut(nr).enumerate().take(rows) {
                    let av = a[(i0 + r) * lda + kk];
                    for (x, &bv) in acc_row.iter_mut().zip(b_row) {
                        *x += av * bv;
                    }
                }
            }
            for (r, acc_row) in acc.chunks_exact(nr).enumerate().take(rows) {
                let off = (i0 + r) * ldc + j0;
                c[off..off + cols].copy_from_slice(&acc_row[..cols]);
            }
            i0 += mr;
        }
    }
}
