//! GEMM backend abstraction.
//!
//! This module defines the [`GemmBackend`] strategy trait that operators call
//! through, the [`GemmKernel`] trait for compile-time plain kernels, the
//! [`ActiveKernel`] type alias that picks one of them from Cargo features,
//! and [`select_backend`], the single point of runtime backend selection.

use std::fmt;

use gemmconv_kernel::{simd_level, SimdLevel};

use crate::gemm_packed::PackedGemm;
use crate::tile::KernelRequest;
use crate::util::check_matrix;
use crate::{GemmError, Result};

/// Which family a backend belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Dense `B`, no preprocessing.
    Plain,
    /// `B` reorganised once by [`GemmBackend::reorder_b`].
    Packed,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Plain => "plain",
            BackendKind::Packed => "packed",
        }
    }
}

/// Caller's backend preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendPreference {
    /// Packed when the CPU and operator configuration allow it.
    #[default]
    Auto,
    /// Always plain.
    Plain,
    /// Packed whenever eligible. Falls back to plain (never an error)
    /// otherwise, and says why at `debug` level where `Auto` stays at `trace`.
    Packed,
}

/// Right-hand operand of a GEMM call.
#[derive(Debug, Clone, Copy)]
pub enum Rhs<'a> {
    /// Row-major `K x N` matrix with leading dimension `ld`.
    Dense { data: &'a [f32], ld: usize },
    /// Output of [`GemmBackend::reorder_b`] for the same `N` and `K`.
    Packed(&'a [f32]),
}

impl Rhs<'_> {
    fn kind_name(&self) -> &'static str {
        match self {
            Rhs::Dense { .. } => "dense",
            Rhs::Packed(_) => "packed",
        }
    }
}

/// Strategy interface for `C = A * B` on row-major f32 matrices.
///
/// `A` is `M x K` with leading dimension `lda`, `C` is `M x N` with leading
/// dimension `ldc` and is fully overwritten (no accumulation). Operand
/// lengths and leading dimensions are validated before any arithmetic.
pub trait GemmBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &'static str;

    /// Number of f32 elements [`reorder_b`](Self::reorder_b) needs for a
    /// `K x N` operand used with up to `m` rows of `A`. Zero when the backend
    /// does not pack. Non-decreasing in each of `m`, `n` and `k`.
    fn buffer_len(&self, m: usize, n: usize, k: usize) -> usize;

    /// Reorganise the row-major `K x N` matrix `b` (leading dimension `ldb`)
    /// into `packed`, which must hold at least `buffer_len(m, n, k)` values.
    ///
    /// Pure function of its inputs: calling it twice with the same `b` leaves
    /// `packed` bitwise identical.
    fn reorder_b(
        &self,
        m: usize,
        n: usize,
        k: usize,
        b: &[f32],
        ldb: usize,
        packed: &mut [f32],
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<()>;
}

/// Compile-time plain GEMM kernel.
///
/// Implementations may assume operands were validated: `a` spans `m x k`
/// with `lda`, `b` spans `k x n` with `ldb`, `c` spans `m x n` with `ldc`,
/// and `m`, `n`, `k` are all non-zero.
pub trait GemmKernel {
    const NAME: &'static str;

    #[allow(clippy::too_many_arguments)]
    fn gemm_nn(
        m: usize,
        n: usize,
        k: usize,
        a: &[f32],
        lda: usize,
        b: &[f32],
        ldb: usize,
        c: &mut [f32],
        ldc: usize,
    );
}

/// Plain kernel using the [`faer`] library.
#[cfg(feature = "faer")]
pub struct FaerKernel;

/// Fallback plain kernel using explicit loops (no external library).
#[allow(dead_code)]
pub struct NaiveKernel;

/// The plain kernel, selected by Cargo features.
///
/// - `faer` -> [`FaerKernel`]
/// - otherwise -> [`NaiveKernel`]
#[cfg(feature = "faer")]
pub type ActiveKernel = FaerKernel;

#[cfg(not(feature = "faer"))]
pub type ActiveKernel = NaiveKernel;

/// Validate `A` and `C`, and handle the degenerate shapes every backend
/// treats the same way. Returns `false` when there is nothing left to do.
pub(crate) fn prepare_common(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    lda: usize,
    c: &mut [f32],
    ldc: usize,
) -> Result<bool> {
    check_matrix("a", a.len(), m, k, lda)?;
    check_matrix("c", c.len(), m, n, ldc)?;
    if m == 0 || n == 0 {
        return Ok(false);
    }
    if k == 0 {
        // Empty inner product.
        for row in c.chunks_mut(ldc).take(m) {
            row[..n].fill(0.0);
        }
        return Ok(false);
    }
    Ok(true)
}

/// Plain backend: dense `B`, no preprocessing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainGemm;

impl GemmBackend for PlainGemm {
    fn kind(&self) -> BackendKind {
        BackendKind::Plain
    }

    fn name(&self) -> &'static str {
        ActiveKernel::NAME
    }

    fn buffer_len(&self, _m: usize, _n: usize, _k: usize) -> usize {
        0
    }

    fn reorder_b(
        &self,
        _m: usize,
        _n: usize,
        _k: usize,
        _b: &[f32],
        _ldb: usize,
        _packed: &mut [f32],
    ) -> Result<()> {
        Err(GemmError::NoPacking {
            backend: BackendKind::Plain.name(),
        })
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
        let Rhs::Dense { data: b, ld: ldb } = b else {
            return Err(GemmError::RhsKind {
                backend: BackendKind::Plain.name(),
                got: b.kind_name(),
            });
        };
        check_matrix("b", b.len(), k, n, ldb)?;
        if !prepare_common(m, n, k, a, lda, c, ldc)? {
            return Ok(());
        }
        ActiveKernel::gemm_nn(m, n, k, a, lda, b, ldb, c, ldc);
        Ok(())
    }
}

/// Choose the backend for one operator, using the detected CPU capability.
///
/// `eligible` reports whether the operator's static configuration can use a
/// packed right-hand operand at all. The choice never fails: whenever packed
/// is not possible the plain backend is returned.
pub fn select_backend(
    preference: BackendPreference,
    eligible: bool,
    kernel: KernelRequest,
) -> Box<dyn GemmBackend> {
    select_backend_for(simd_level(), preference, eligible, kernel)
}

/// [`select_backend`] with an explicit CPU capability level.
pub fn select_backend_for(
    level: SimdLevel,
    preference: BackendPreference,
    eligible: bool,
    kernel: KernelRequest,
) -> Box<dyn GemmBackend> {
    if preference == BackendPreference::Plain {
        log::debug!("gemm backend: plain (requested)");
        return Box::new(PlainGemm);
    }
    if let Some(reason) = packed_blocker(level, eligible) {
        // Explicit packed requests report the fallback at debug level.
        if preference == BackendPreference::Packed {
            log::debug!("gemm backend: packed requested, using plain ({reason})");
        } else {
            log::trace!("gemm backend: plain ({reason})");
        }
        return Box::new(PlainGemm);
    }
    let packed = PackedGemm::new(level, kernel);
    log::debug!("gemm backend: {} on {}", packed.name(), level.name());
    Box::new(packed)
}

/// Why packed kernels cannot be used, or `None` when they can.
pub fn packed_blocker(level: SimdLevel, eligible: bool) -> Option<&'static str> {
    if !level.has_vector_unit() {
        Some("no vector unit for packed kernels")
    } else if !eligible {
        Some("operator configuration cannot use packed weights")
    } else {
        None
    }
}

/// Accept a caller-supplied backend for one operator.
///
/// Plain-kind backends are always kept. A packed-kind backend is kept only
/// when the operator is `eligible`; otherwise the built-in plain backend
/// replaces it, as automatic selection would.
pub fn accept_backend(backend: Box<dyn GemmBackend>, eligible: bool) -> Box<dyn GemmBackend> {
    if backend.kind() == BackendKind::Packed && !eligible {
        log::debug!(
            "gemm backend: {} cannot serve this operator, using plain",
            backend.name()
        );
        return Box::new(PlainGemm);
    }
    log::debug!("gemm backend: {} (caller supplied)", backend.name());
    backend
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_rejects_packed_rhs() {
        let a = [1.0f32; 4];
        let mut c = [0.0f32; 4];
        let err = PlainGemm
            .run(2, 2, 2, &a, 2, Rhs::Packed(&[0.0; 8]), &mut c, 2)
            .unwrap_err();
        assert_eq!(
            err,
            GemmError::RhsKind {
                backend: "plain",
                got: "packed"
            }
        );
        assert!(PlainGemm.reorder_b(2, 2, 2, &a, 2, &mut c).is_err());
        assert_eq!(PlainGemm.buffer_len(100, 100, 100), 0);
    }

    #[test]
    fn test_plain_validates_before_writing() {
        let a = [1.0f32; 6];
        let b = [1.0f32; 5];
        let mut c = [7.0f32; 4];
        let err = PlainGemm
            .run(2, 2, 3, &a, 3, Rhs::Dense { data: &b, ld: 2 }, &mut c, 2)
            .unwrap_err();
        assert!(matches!(err, GemmError::OperandTooShort { operand: "b", .. }));
        assert_eq!(c, [7.0; 4]);
    }

    #[test]
    fn test_plain_k_zero_clears_output() {
        let mut c = [5.0f32; 6];
        PlainGemm
            .run(2, 2, 0, &[], 0, Rhs::Dense { data: &[], ld: 2 }, &mut c, 3)
            .unwrap();
        assert_eq!(c, [0.0, 0.0, 5.0, 0.0, 0.0, 5.0]);
    }

    #[test]
    fn test_plain_respects_leading_dimensions() {
        // A is 2x2 inside a 2x3 buffer, C is 2x2 inside a 2x4 buffer.
        let a = [1.0f32, 2.0, 99.0, 3.0, 4.0, 99.0];
        let b = [1.0f32, 0.0, 0.0, 1.0];
        let mut c = [-1.0f32; 8];
        PlainGemm
            .run(2, 2, 2, &a, 3, Rhs::Dense { data: &b, ld: 2 }, &mut c, 4)
            .unwrap();
        assert_eq!(c, [1.0, 2.0, -1.0, -1.0, 3.0, 4.0, -1.0, -1.0]);
    }

    #[test]
    fn test_select_backend_rules() {
        let pick = |level, pref, eligible| {
            select_backend_for(level, pref, eligible, KernelRequest::Any).kind()
        };
        use BackendPreference::*;
        assert_eq!(pick(SimdLevel::Avx2, Auto, true), BackendKind::Packed);
        assert_eq!(pick(SimdLevel::Neon, Packed, true), BackendKind::Packed);
        assert_eq!(pick(SimdLevel::Avx2, Plain, true), BackendKind::Plain);
        assert_eq!(pick(SimdLevel::Avx2, Auto, false), BackendKind::Plain);
        assert_eq!(pick(SimdLevel::Scalar, Auto, true), BackendKind::Plain);
        assert_eq!(pick(SimdLevel::Scalar, Packed, true), BackendKind::Plain);
        assert_eq!(pick(SimdLevel::Avx2, Packed, false), BackendKind::Plain);
    }

    #[test]
    fn test_packed_blocker_reasons() {
        assert_eq!(packed_blocker(SimdLevel::Avx2, true), None);
        assert!(packed_blocker(SimdLevel::Scalar, true)
            .unwrap()
            .contains("vector unit"));
        assert!(packed_blocker(SimdLevel::Sse, false)
            .unwrap()
            .contains("configuration"));
    }

    #[test]
    fn test_accept_backend_keeps_eligible_and_plain() {
        let packed = || -> Box<dyn GemmBackend> {
            Box::new(PackedGemm::new(SimdLevel::Avx2, KernelRequest::F2))
        };
        assert_eq!(accept_backend(packed(), true).name(), "packed-f2");
        assert_eq!(accept_backend(packed(), false).kind(), BackendKind::Plain);
        assert_eq!(
            accept_backend(Box::new(PlainGemm), false).kind(),
            BackendKind::Plain
        );
    }
}
