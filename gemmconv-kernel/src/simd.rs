//! Runtime SIMD dispatch and vectorized row kernels.
//!
//! With the `simd` feature enabled, [`dispatch`] runs its closure through
//! `pulp::Arch`, which selects the widest instruction set detected at
//! runtime and lets the compiler vectorize the inlined body for it. Without
//! the feature everything runs as portable scalar code.

#[inline(always)]
pub fn dispatch<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(feature = "simd")]
    {
        pulp::Arch::new().dispatch(f)
    }
    #[cfg(not(feature = "simd"))]
    {
        f()
    }
}

#[inline(always)]
pub fn dispatch_if_large<R>(len: usize, f: impl FnOnce() -> R) -> R {
    // Short rows stay on the caller's code path.
    if len >= 64 {
        dispatch(f)
    } else {
        f()
    }
}

/// Bias term added to every element of a row.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RowBias<'a> {
    None,
    /// One value for the whole row (channel-first rows).
    Uniform(f32),
    /// One value per element (channel-last rows); same length as the row.
    PerLane(&'a [f32]),
}

/// Slope used on the negative side of a leaky rectifier.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RowSlope<'a> {
    Uniform(f32),
    PerLane(&'a [f32]),
}

/// Piecewise-linear operation applied after the bias.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RowOp<'a> {
    Identity,
    /// `y` limited to `[lower, upper]`; NaN stays NaN.
    Clamp { lower: f32, upper: f32 },
    /// `y >= 0 ? y : slope * y`.
    Leaky(RowSlope<'a>),
}

/// Clamp that lets NaN through instead of snapping it to a bound.
#[inline(always)]
pub(crate) fn clamp(x: f32, lower: f32, upper: f32) -> f32 {
    if x < lower {
        lower
    } else if x > upper {
        upper
    } else {
        x
    }
}

#[inline(always)]
fn leaky(x: f32, slope: f32) -> f32 {
    if x >= 0.0 {
        x
    } else {
        slope * x
    }
}

/// Add `bias` to `row` and apply `op`, in place.
pub(crate) fn apply_row(row: &mut [f32], bias: RowBias<'_>, op: RowOp<'_>) {
    if let RowBias::PerLane(b) = bias {
        debug_assert_eq!(b.len(), row.len());
    }
    if let RowOp::Leaky(RowSlope::PerLane(s)) = op {
        debug_assert_eq!(s.len(), row.len());
    }

    #[cfg(feature = "simd")]
    {
        if row.len() >= 16 {
            pulp::Arch::new().dispatch(simd_impls::RowKernel { row, bias, op });
            return;
        }
    }
    apply_row_scalar(row, bias, op);
}

fn apply_row_scalar(row: &mut [f32], bias: RowBias<'_>, op: RowOp<'_>) {
    match bias {
        RowBias::None => {}
        RowBias::Uniform(b) => row.iter_mut().for_each(|x| *x += b),
        RowBias::PerLane(b) => row.iter_mut().zip(b).for_each(|(x, &b)| *x += b),
    }
    match op {
        RowOp::Identity => {}
        RowOp::Clamp { lower, upper } => row.iter_mut().for_each(|x| *x = clamp(*x, lower, upper)),
        RowOp::Leaky(RowSlope::Uniform(s)) => row.iter_mut().for_each(|x| *x = leaky(*x, s)),
        RowOp::Leaky(RowSlope::PerLane(s)) => {
            row.iter_mut().zip(s).for_each(|(x, &s)| *x = leaky(*x, s));
        }
    }
}

#[cfg(feature = "simd")]
mod simd_impls {
    use super::{apply_row_scalar, RowBias, RowOp, RowSlope};
    use pulp::{Simd, WithSimd};

    pub(super) struct RowKernel<'a> {
        pub(super) row: &'a mut [f32],
        pub(super) bias: RowBias<'a>,
        pub(super) op: RowOp<'a>,
    }

    impl<'a> WithSimd for RowKernel<'a> {
        type Output = ();

        #[inline(always)]
        fn with_simd<S: Simd>(self, simd: S) -> Self::Output {
            let RowKernel { row, bias, op } = self;
            let (head, tail) = S::as_mut_simd_f32s(row);

            // Tails are handed to the scalar path with the matching bias and
            // slope tails so both halves see identical arithmetic.
            let (bias_tail, op_tail);
            match bias {
                RowBias::None => bias_tail = RowBias::None,
                RowBias::Uniform(b) => {
                    let bv = simd.splat_f32s(b);
                    for x in head.iter_mut() {
                        *x = simd.add_f32s(*x, bv);
                    }
                    bias_tail = RowBias::Uniform(b);
                }
                RowBias::PerLane(b) => {
                    let (b_head, b_tail) = S::as_simd_f32s(b);
                    for (x, &bv) in head.iter_mut().zip(b_head) {
                        *x = simd.add_f32s(*x, bv);
                    }
                    bias_tail = RowBias::PerLane(b_tail);
                }
            }

            match op {
                RowOp::Identity => op_tail = RowOp::Identity,
                RowOp::Clamp { lower, upper } => {
                    let lo = simd.splat_f32s(lower);
                    let hi = simd.splat_f32s(upper);
                    // Compare-and-select keeps NaN lanes: both comparisons are false.
                    for x in head.iter_mut() {
                        let y = simd.select_f32s_m32s(simd.less_than_f32s(*x, lo), lo, *x);
                        *x = simd.select_f32s_m32s(simd.greater_than_f32s(y, hi), hi, y);
                    }
                    op_tail = RowOp::Clamp { lower, upper };
                }
                RowOp::Leaky(RowSlope::Uniform(s)) => {
                    let zero = simd.splat_f32s(0.0);
                    let sv = simd.splat_f32s(s);
                    for x in head.iter_mut() {
                        let keep = simd.greater_than_or_equal_f32s(*x, zero);
                        *x = simd.select_f32s_m32s(keep, *x, simd.mul_f32s(sv, *x));
                    }
                    op_tail = RowOp::Leaky(RowSlope::Uniform(s));
                }
                RowOp::Leaky(RowSlope::PerLane(s)) => {
                    let zero = simd.splat_f32s(0.0);
                    let (s_head, s_tail) = S::as_simd_f32s(s);
                    for (x, &sv) in head.iter_mut().zip(s_head) {
                        let keep = simd.greater_than_or_equal_f32s(*x, zero);
                        *x = simd.select_f32s_m32s(keep, *x, simd.mul_f32s(sv, *x));
                    }
                    op_tail = RowOp::Leaky(RowSlope::PerLane(s_tail));
                }
            }

            apply_row_scalar(tail, bias_tail, op_tail);
        }
    }
}
