//! The public operator handle.
//!
//! A [`Deconvolution`] is built once per layer: shape validation, backend
//! selection, buffer planning and weight repacking all happen at
//! construction, so [`forward`](Deconvolution::forward) only expands, multiplies
//! and finishes.

use std::fmt;

use gemmconv_gemm::{accept_backend, select_backend, BackendKind, GemmBackend};
use gemmconv_kernel::Layout;

use crate::config::DeconvOptions;
use crate::executor::{ConvolutionExecutor, Scratch};
use crate::im2col::GatherTable;
use crate::param::{DeconvDescriptor, DeconvParams, GemmDims};
use crate::plan::{merge_factor, plan_buffers, BufferPlan};
use crate::repack::WeightRepacker;
use crate::{DeconvError, Result};

/// A ready-to-run transposed convolution.
///
/// Owns its validated parameters, the selected GEMM backend, the repacked
/// weights and all scratch memory. [`forward`](Self::forward) and
/// [`set_weights`](Self::set_weights) take `&mut self`, so one instance never
/// runs two calls at once; distinct instances share nothing mutable and can
/// run on different threads.
pub struct Deconvolution {
    params: DeconvParams,
    dims: GemmDims,
    plan: BufferPlan,
    backend: Box<dyn GemmBackend>,
    table: GatherTable,
    weights: Vec<f32>,
    bias: Option<Vec<f32>>,
    scratch: Scratch,
}

impl Deconvolution {
    /// Build an operator with [`DeconvOptions::from_env`].
    ///
    /// `weights` are canonical (`[Cin, Cout/G, Kh, Kw]` for channel-first,
    /// `[Kh, Kw, Cin, Cout/G]` for channel-last); `bias` has one value per
    /// output channel, or is absent for zero bias.
    pub fn new(desc: &DeconvDescriptor, weights: &[f32], bias: Option<&[f32]>) -> Result<Self> {
        Self::with_options(desc, weights, bias, &DeconvOptions::from_env())
    }

    pub fn with_options(
        desc: &DeconvDescriptor,
        weights: &[f32],
        bias: Option<&[f32]>,
        options: &DeconvOptions,
    ) -> Result<Self> {
        let params = DeconvParams::new(desc)?;
        let backend = select_backend(options.backend, packed_eligible(&params), options.kernel);
        Self::build(params, backend, weights, bias, options)
    }

    /// Build an operator around a caller-supplied GEMM backend.
    ///
    /// `options.backend` is not consulted. A packed-kind backend is only used
    /// for channel-last operators with one group; for any other configuration
    /// the built-in plain backend takes its place.
    pub fn with_backend(
        desc: &DeconvDescriptor,
        weights: &[f32],
        bias: Option<&[f32]>,
        backend: Box<dyn GemmBackend>,
        options: &DeconvOptions,
    ) -> Result<Self> {
        let params = DeconvParams::new(desc)?;
        let backend = accept_backend(backend, packed_eligible(&params));
        Self::build(params, backend, weights, bias, options)
    }

    fn build(
        params: DeconvParams,
        backend: Box<dyn GemmBackend>,
        weights: &[f32],
        bias: Option<&[f32]>,
        options: &DeconvOptions,
    ) -> Result<Self> {
        let dims = GemmDims::new(&params);
        let merge = merge_factor(&params, &dims, options.max_merge_rows);
        let plan = plan_buffers(&params, dims, backend.as_ref(), merge);
        log::debug!(
            "deconv {}: {:?}, backend {}, merge {}, weights {} B, scratch {} B",
            params.layout.name(),
            dims,
            backend.name(),
            merge,
            plan.weight_bytes() + plan.packed_weight_bytes(),
            plan.scratch_bytes()
        );

        let mut op = Deconvolution {
            table: GatherTable::new(&params),
            weights: vec![0.0; plan.weight_len + plan.packed_weight_len],
            scratch: Scratch::new(&plan),
            bias: None,
            params,
            dims,
            plan,
            backend,
        };
        op.set_weights(weights, bias)?;
        Ok(op)
    }

    /// Replace weights and bias, repacking them for the backend. Nothing is
    /// changed when either has the wrong length.
    pub fn set_weights(&mut self, weights: &[f32], bias: Option<&[f32]>) -> Result<()> {
        if let Some(b) = bias {
            if b.len() != self.params.dst_channels {
                return Err(DeconvError::BufferMismatch {
                    what: "bias",
                    expected: self.params.dst_channels,
                    got: b.len(),
                });
            }
        }
        WeightRepacker::new(&self.params, &self.plan, self.backend.as_ref())
            .repack(weights, &mut self.weights)?;
        self.bias = bias.map(<[f32]>::to_vec);
        log::trace!("deconv weights repacked for {}", self.backend.name());
        Ok(())
    }

    /// Run the operator: `src` and `dst` are dense tensors in the operator's
    /// layout with exactly [`src_len`](Self::src_len) and
    /// [`dst_len`](Self::dst_len) elements.
    ///
    /// Size mismatches are reported before anything is written. On any other
    /// error `dst` may be partially written and should be discarded.
    pub fn forward(&mut self, src: &[f32], dst: &mut [f32]) -> Result<()> {
        ConvolutionExecutor {
            params: &self.params,
            plan: &self.plan,
            table: &self.table,
            backend: self.backend.as_ref(),
            weights: &self.weights,
            bias: self.bias.as_deref(),
        }
        .run(src, dst, &mut self.scratch)
    }

    pub fn params(&self) -> &DeconvParams {
        &self.params
    }

    pub fn dims(&self) -> GemmDims {
        self.dims
    }

    pub fn plan(&self) -> &BufferPlan {
        &self.plan
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn merge(&self) -> usize {
        self.plan.merge
    }

    pub fn src_len(&self) -> usize {
        self.params.src_len()
    }

    pub fn dst_len(&self) -> usize {
        self.params.dst_len()
    }

    pub fn dst_shape(&self) -> [usize; 4] {
        self.params.dst_shape()
    }
}

/// Packed right-hand operands need the whole `K x Cout` weight matrix in one
/// piece: channel-last with a single group.
fn packed_eligible(params: &DeconvParams) -> bool {
    params.layout == Layout::ChannelLast && params.group == 1
}

impl fmt::Debug for Deconvolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deconvolution")
            .field("layout", &self.params.layout)
            .field("dims", &self.dims)
            .field("backend", &self.backend.name())
            .field("merge", &self.plan.merge)
            .field("activation", &self.params.activation.kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemmconv_gemm::{BackendPreference, KernelRequest, PackedGemm, PlainGemm, Rhs};
    use gemmconv_kernel::SimdLevel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Plain GEMM that counts its calls.
    #[derive(Debug, Default)]
    struct CountingGemm {
        calls: Arc<AtomicUsize>,
    }

    impl GemmBackend for CountingGemm {
        fn kind(&self) -> BackendKind {
            BackendKind::Plain
        }

        fn name(&self) -> &'static str {
            "counting"
        }

        fn buffer_len(&self, m: usize, n: usize, k: usize) -> usize {
            PlainGemm.buffer_len(m, n, k)
        }

        fn reorder_b(
            &self,
            m: usize,
            n: usize,
            k: usize,
            b: &[f32],
            ldb: usize,
            packed: &mut [f32],
        ) -> gemmconv_gemm::Result<()> {
            PlainGemm.reorder_b(m, n, k, b, ldb, packed)
        }

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
        ) -> gemmconv_gemm::Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            PlainGemm.run(m, n, k, a, lda, b, c, ldc)
        }
    }

    fn desc(layout: Layout) -> DeconvDescriptor {
        DeconvDescriptor {
            batch: 2,
            src_channels: 2,
            src_height: 3,
            src_width: 3,
            dst_channels: 3,
            kernel: [2, 2],
            stride: [2, 2],
            layout,
            ..Default::default()
        }
    }

    #[test]
    fn test_construction_rejects_wrong_weight_len() {
        let d = desc(Layout::ChannelFirst);
        assert!(matches!(
            Deconvolution::new(&d, &[0.0; 5], None),
            Err(DeconvError::BufferMismatch { what: "weights", .. })
        ));
        assert!(matches!(
            Deconvolution::new(&d, &[0.0; 24], Some(&[0.0f32; 2][..])),
            Err(DeconvError::BufferMismatch { what: "bias", .. })
        ));
    }

    #[test]
    fn test_forward_rejects_wrong_tensor_len_without_writing() {
        let mut op = Deconvolution::new(&desc(Layout::ChannelFirst), &[1.0; 24], None).unwrap();
        let src = vec![1.0; op.src_len()];
        let mut dst = vec![-5.0; op.dst_len() + 1];
        assert!(matches!(
            op.forward(&src, &mut dst),
            Err(DeconvError::BufferMismatch { what: "dst", .. })
        ));
        assert!(dst.iter().all(|&x| x == -5.0));
        let mut dst = vec![-5.0; op.dst_len()];
        assert!(matches!(
            op.forward(&src[1..], &mut dst),
            Err(DeconvError::BufferMismatch { what: "src", .. })
        ));
        assert!(dst.iter().all(|&x| x == -5.0));
    }

    #[test]
    fn test_failed_set_weights_keeps_old_weights() {
        let d = desc(Layout::ChannelLast);
        let mut op = Deconvolution::new(&d, &[1.0; 24], None).unwrap();
        let src = vec![1.0; op.src_len()];
        let mut before = vec![0.0; op.dst_len()];
        op.forward(&src, &mut before).unwrap();
        assert!(op.set_weights(&[2.0; 23], None).is_err());
        assert!(op.set_weights(&[2.0; 24], Some(&[1.0f32][..])).is_err());
        let mut after = vec![0.0; op.dst_len()];
        op.forward(&src, &mut after).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_accessors_and_plain_preference() {
        let opts = DeconvOptions {
            backend: BackendPreference::Plain,
            ..Default::default()
        };
        let op = Deconvolution::with_options(&desc(Layout::ChannelLast), &[0.0; 24], None, &opts)
            .unwrap();
        assert_eq!(op.backend_kind(), BackendKind::Plain);
        assert_eq!(op.dst_shape(), [2, 6, 6, 3]);
        assert_eq!(op.dims(), GemmDims { m: 36, n: 3, k: 8 });
        assert_eq!(op.merge(), 2);
        assert_eq!(op.src_len(), 36);
        assert_eq!(op.dst_len(), 216);
        assert_eq!(op.plan().merge, 2);
        assert!(format!("{op:?}").contains("Deconvolution"));
    }

    #[test]
    fn test_caller_supplied_backend_is_used() {
        for layout in [Layout::ChannelFirst, Layout::ChannelLast] {
            let d = desc(layout);
            let weights: Vec<f32> = (0..24).map(|i| i as f32 * 0.1 - 1.0).collect();
            let calls = Arc::new(AtomicUsize::new(0));
            let backend = Box::new(CountingGemm {
                calls: Arc::clone(&calls),
            });
            let opts = DeconvOptions::default();
            let mut op = Deconvolution::with_backend(&d, &weights, None, backend, &opts).unwrap();
            assert_eq!(op.backend_name(), "counting");
            let mut reference = Deconvolution::with_options(&d, &weights, None, &opts).unwrap();

            let src: Vec<f32> = (0..op.src_len()).map(|i| (i % 5) as f32 - 2.0).collect();
            let mut got = vec![0.0; op.dst_len()];
            let mut want = vec![0.0; op.dst_len()];
            op.forward(&src, &mut got).unwrap();
            reference.forward(&src, &mut want).unwrap();
            for (g, w) in got.iter().zip(&want) {
                approx::assert_relative_eq!(*g, *w, epsilon = 1e-5);
            }
            // Two images: one call each for channel-first, one merged call for channel-last.
            let expected = match layout {
                Layout::ChannelFirst => 2,
                Layout::ChannelLast => 1,
            };
            assert_eq!(calls.load(Ordering::Relaxed), expected);
        }
    }

    #[test]
    fn test_caller_supplied_packed_backend_needs_eligible_operator() {
        let packed = || Box::new(PackedGemm::new(SimdLevel::Avx2, KernelRequest::F3));
        let opts = DeconvOptions::default();
        let last = desc(Layout::ChannelLast);
        let op = Deconvolution::with_backend(&last, &[1.0; 24], None, packed(), &opts).unwrap();
        assert_eq!(op.backend_name(), "packed-f3");
        let first = desc(Layout::ChannelFirst);
        let op = Deconvolution::with_backend(&first, &[1.0; 24], None, packed(), &opts).unwrap();
        assert_eq!(op.backend_kind(), BackendKind::Plain);
    }

    #[test]
    fn test_deconvolution_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Deconvolution>();
    }
}
