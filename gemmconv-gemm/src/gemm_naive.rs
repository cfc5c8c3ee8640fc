//! Plain GEMM using explicit loops.
//!
//! Row-major `i-k-j` order: the innermost loop walks one row of `B` and one
//! row of `C` contiguously, and each output element accumulates its products
//! in ascending `k` order starting from zero.

use crate::backend::{GemmKernel, NaiveKernel};

impl GemmKernel for NaiveKernel {
    const NAME: &'static str = "plain-naive";

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
        for i in 0..m {
            let c_row = &mut c[i * ldc..i * ldc + n];
            c_row.fill(0.0);
            let a_row = &a[i * lda..i * lda + k];
            for (kk, &av) in a_row.iter().enumerate() {
                let b_row = &b[kk * ldb..kk * ldb + n];
                for (cv, &bv) in c_row.iter_mut().zip(b_row) {
                    *cv += av * bv;
                }
            }
        }
    }
}
