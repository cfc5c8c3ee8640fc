//! faer-backed plain GEMM.
//!
//! Wraps the row-major operands as faer views (row stride = leading
//! dimension, column stride = 1) and calls
//! `faer::linalg::matmul::matmul_with_conj` single-threaded.

use faer::linalg::matmul::matmul_with_conj;
use faer::mat::{MatMut, MatRef};
use faer::{Accum, Conj, Par};

use crate::backend::{FaerKernel, GemmKernel};

impl GemmKernel for FaerKernel {
    const NAME: &'static str = "plain-faer";

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
    ) {
        debug_assert!(a.len() >= (m - 1) * lda + k);
        debug_assert!(b.len() >= (k - 1) * ldb + n);
        debug_assert!(c.len() >= (m - 1) * ldc + n);

        // SAFETY: the caller validated that every operand spans its
        // `rows x cols` extent with the given leading dimension, and `c` is
        // borrowed mutably so it cannot alias `a` or `b`.
        unsafe {
            let a_mat: MatRef<'_, f32> = MatRef::from_raw_parts(a.as_ptr(), m, k, lda as isize, 1);
            let b_mat: MatRef<'_, f32> = MatRef::from_raw_parts(b.as_ptr(), k, n, ldb as isize, 1);
            let c_mat: MatMut<'_, f32> =
                MatMut::from_raw_parts_mut(c.as_mut_ptr(), m, n, ldc as isize, 1);
            matmul_with_conj(
                c_mat,
                Accum::Replace,
                a_mat,
                Conj::No,
                b_mat,
                Conj::No,
                1.0f32,
                Par::Seq,
            );
        }
    }
}
