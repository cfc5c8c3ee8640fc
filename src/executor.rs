//! Per-call deconvolution pipeline.
//!
//! One forward call walks `ColumnExpand -> MatMul -> Epilogue` for every
//! (batch chunk, group) slice:
//!
//! - channel-first: `C[Cout/G x HW] = A_g * cols`, written straight into the
//!   group's channel planes of the output.
//! - channel-last, one group: `C[merge*HW x Cout] = cols * B`, written straight
//!   into `merge` consecutive output images.
//! - channel-last, several groups: `C[HW x Cout/G] = cols * B_g` lands in the
//!   output staging slice and is scattered into the interleaved channels.
//!
//! Shape checks happen before the first slice; nothing is written when they
//! fail.

use gemmconv_gemm::{BackendKind, GemmBackend, Rhs};
use gemmconv_kernel::{bias_and_activation, Layout};

use crate::im2col::GatherTable;
use crate::param::DeconvParams;
use crate::plan::BufferPlan;
use crate::{DeconvError, Result};

/// Reusable per-operator scratch, sized once by the [`BufferPlan`].
#[derive(Debug, Clone, Default)]
pub struct Scratch {
    col: Vec<f32>,
    out: Vec<f32>,
}

impl Scratch {
    pub fn new(plan: &BufferPlan) -> Self {
        Scratch {
            col: vec![0.0; plan.col_len],
            out: vec![0.0; plan.out_len],
        }
    }
}

/// Borrowed view of everything a forward call reads.
#[derive(Debug, Clone, Copy)]
pub struct ConvolutionExecutor<'a> {
    pub params: &'a DeconvParams,
    pub plan: &'a BufferPlan,
    pub table: &'a GatherTable,
    pub backend: &'a dyn GemmBackend,
    /// Output of the weight repacker.
    pub weights: &'a [f32],
    pub bias: Option<&'a [f32]>,
}

impl ConvolutionExecutor<'_> {
    /// Reject tensors that do not match the planned shapes.
    pub fn check(&self, src: &[f32], dst: &[f32], scratch: &Scratch) -> Result<()> {
        let checks = [
            ("src", self.params.src_len(), src.len()),
            ("dst", self.params.dst_len(), dst.len()),
            ("column scratch", self.plan.col_len, scratch.col.len()),
            ("output scratch", self.plan.out_len, scratch.out.len()),
        ];
        for (what, expected, got) in checks {
            if expected != got {
                return Err(DeconvError::BufferMismatch {
                    what,
                    expected,
                    got,
                });
            }
        }
        Ok(())
    }

    pub fn run(&self, src: &[f32], dst: &mut [f32], scratch: &mut Scratch) -> Result<()> {
        self.check(src, dst, scratch)?;
        log::trace!(
            "deconv forward: {} {:?} merge {} via {}",
            self.params.layout.name(),
            self.plan.dims,
            self.plan.merge,
            self.backend.name()
        );
        match self.params.layout {
            Layout::ChannelFirst => self.run_channel_first(src, dst, scratch),
            Layout::ChannelLast if self.params.group == 1 => {
                self.run_channel_last(src, dst, scratch)
            }
            Layout::ChannelLast => self.run_channel_last_grouped(src, dst, scratch),
        }
    }

    fn rhs<'w>(&self, dense: &'w [f32], ld: usize) -> Rhs<'w> {
        match self.backend.kind() {
            BackendKind::Plain => Rhs::Dense { data: dense, ld },
            BackendKind::Packed => Rhs::Packed(dense),
        }
    }

    fn run_channel_first(&self, src: &[f32], dst: &mut [f32], scratch: &mut Scratch) -> Result<()> {
        let p = self.params;
        let dims = self.plan.dims;
        let (m, n, k) = (dims.m, dims.n, dims.k);
        let cin_g = p.src_channels_per_group();
        let src_image = p.src_channels * p.src_spatial();
        let dst_image = p.dst_channels * p.dst_spatial();
        let pointwise = p.is_pointwise();

        for (src_b, dst_b) in src
            .chunks_exact(src_image)
            .zip(dst.chunks_exact_mut(dst_image))
        {
            for (g, c) in dst_b.chunks_exact_mut(m * n).enumerate() {
                let src_g = &src_b[g * cin_g * p.src_spatial()..][..cin_g * p.src_spatial()];
                let a = &self.weights[g * m * k..(g + 1) * m * k];
                let b = if pointwise {
                    Rhs::Dense { data: src_g, ld: n }
                } else {
                    self.table.expand_chw(src_g, cin_g, &mut scratch.col[..k * n]);
                    Rhs::Dense {
                        data: &scratch.col[..k * n],
                        ld: n,
                    }
                };
                self.backend.run(m, n, k, a, k, b, c, n)?;
                bias_and_activation(
                    c,
                    Layout::ChannelFirst,
                    m,
                    n,
                    g * m,
                    self.bias,
                    &p.activation,
                );
            }
        }
        Ok(())
    }

    fn run_channel_last(&self, src: &[f32], dst: &mut [f32], scratch: &mut Scratch) -> Result<()> {
        let p = self.params;
        let dims = self.plan.dims;
        let (m, n, k) = (dims.m, dims.n, dims.k);
        let merge = self.plan.merge;
        let rows = m * merge;
        let src_image = p.src_spatial() * p.src_channels;
        let b = self.rhs(self.weights, n);

        for (src_chunk, c) in src
            .chunks_exact(src_image * merge)
            .zip(dst.chunks_exact_mut(rows * n))
        {
            let a: &[f32] = if p.is_pointwise() {
                src_chunk
            } else {
                for (img, col) in src_chunk
                    .chunks_exact(src_image)
                    .zip(scratch.col.chunks_exact_mut(m * k))
                {
                    self.table.expand_hwc(img, p.src_channels, 0, p.src_channels, col);
                }
                &scratch.col[..rows * k]
            };
            self.backend.run(rows, n, k, a, k, b, c, n)?;
            bias_and_activation(c, Layout::ChannelLast, n, rows, 0, self.bias, &p.activation);
        }
        Ok(())
    }

    fn run_channel_last_grouped(
        &self,
        src: &[f32],
        dst: &mut [f32],
        scratch: &mut Scratch,
    ) -> Result<()> {
        let p = self.params;
        let dims = self.plan.dims;
        let (m, n, k) = (dims.m, dims.n, dims.k);
        let cin = p.src_channels;
        let cin_g = p.src_channels_per_group();
        let cout = p.dst_channels;
        let src_image = p.src_spatial() * cin;
        let pointwise = p.is_pointwise();

        for (src_b, dst_b) in src
            .chunks_exact(src_image)
            .zip(dst.chunks_exact_mut(m * cout))
        {
            for g in 0..p.group {
                let (a, lda) = if pointwise {
                    (&src_b[g * cin_g..], cin)
                } else {
                    let col = &mut scratch.col[..m * k];
                    self.table.expand_hwc(src_b, cin, g * cin_g, cin_g, col);
                    (&scratch.col[..m * k], k)
                };
                let weights = &self.weights[g * k * n..(g + 1) * k * n];
                let staged = &mut scratch.out[..m * n];
                self.backend
                    .run(m, n, k, a, lda, Rhs::Dense { data: weights, ld: n }, staged, n)?;
                bias_and_activation(
                    staged,
                    Layout::ChannelLast,
                    n,
                    m,
                    g * n,
                    self.bias,
                    &p.activation,
                );
                for (pixel, row) in dst_b.chunks_exact_mut(cout).zip(staged.chunks_exact(n)) {
                    pixel[g * n..(g + 1) * n].copy_from_slice(row);
                }
            }
        }
        Ok(())
    }
}
