//! GEMM-lowered transposed convolution (deconvolution) for `f32` tensors.
//!
//! A [`Deconvolution`] is built once from a raw [`DeconvDescriptor`] plus
//! canonical weights, and then run any number of times with
//! [`Deconvolution::forward`]. Construction does all one-time work:
//!
//! 1. validate the descriptor into [`DeconvParams`] and derive [`GemmDims`]
//! 2. pick a GEMM backend for the detected CPU and the tensor layout
//!    ([`gemmconv_gemm::select_backend`])
//! 3. size every scratch buffer ([`BufferPlan`])
//! 4. repack the weights into the backend's preferred layout
//!    ([`WeightRepacker`])
//!
//! Each forward call then expands input columns, runs one GEMM per
//! (batch chunk, group) slice and finishes the output with the fused
//! bias + activation epilogue from [`gemmconv_kernel`].
//!
//! # Example
//!
//! ```
//! use gemmconv::{DeconvDescriptor, Deconvolution, Layout};
//!
//! // 1 -> 1 channel, 2x2 kernel of ones, stride 2: every input pixel becomes a
//! // 2x2 block in the output.
//! let desc = DeconvDescriptor {
//!     src_channels: 1,
//!     src_height: 2,
//!     src_width: 2,
//!     dst_channels: 1,
//!     kernel: [2, 2],
//!     stride: [2, 2],
//!     layout: Layout::ChannelFirst,
//!     ..Default::default()
//! };
//! let mut op = Deconvolution::new(&desc, &[1.0; 4], None).unwrap();
//! assert_eq!(op.dst_shape(), [1, 1, 4, 4]);
//!
//! let src = [1.0, 2.0, 3.0, 4.0];
//! let mut dst = vec![0.0; op.dst_len()];
//! op.forward(&src, &mut dst).unwrap();
//! assert_eq!(&dst[..4], &[1.0, 1.0, 2.0, 2.0]);
//! ```

/// Backend preference and tuning knobs.
pub mod config;
/// The public operator handle.
pub mod deconv;
/// Per-call pipeline: column expansion, GEMM, epilogue.
pub mod executor;
/// Column expansion of the input activations.
pub mod im2col;
/// Shape descriptor, validated parameters and GEMM dimensions.
pub mod param;
/// Scratch and weight buffer sizing.
pub mod plan;
/// Canonical-to-backend weight layout transformation.
pub mod repack;

pub use config::{DeconvOptions, DEFAULT_MAX_MERGE_ROWS};
pub use deconv::Deconvolution;
pub use gemmconv_gemm::{
    BackendKind, BackendPreference, GemmBackend, GemmError, KernelRequest, PlainGemm, Rhs,
};
pub use gemmconv_kernel::{Activation, ActivationError, ActivationKind, Layout};
pub use param::{DeconvDescriptor, DeconvParams, GemmDims};
pub use plan::{merge_factor, plan_buffers, BufferPlan};
pub use repack::{canonical_weight_len, WeightRepacker};

/// Errors raised by deconvolution construction and forward calls.
#[derive(Debug, thiserror::Error)]
pub enum DeconvError {
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error("{what}: expected {expected} elements, got {got}")]
    BufferMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Gemm(#[from] GemmError),
}

/// Convenience alias for `Result<T, DeconvError>`.
pub type Result<T> = std::result::Result<T, DeconvError>;
