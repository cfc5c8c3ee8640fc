//! Leaf kernels shared by the gemmconv workspace.
//!
//! This crate holds everything below the GEMM layer that the convolution
//! engine needs on every call:
//!
//! - [`simd_level`]: one-time CPU capability detection ([`SimdLevel`])
//! - [`simd::dispatch`]: runs a closure under the best instruction set
//!   available at runtime (via `pulp` when the `simd` feature is enabled)
//! - [`Activation`]: validated activation functions and their parameters
//! - [`bias_and_activation`]: the fused per-channel bias + activation pass
//!   applied in place over a GEMM result
//!
//! # Dependency graph
//!
//! ```text
//! gemmconv-kernel -> gemmconv-gemm -> gemmconv
//! ```

pub mod activation;
pub mod cpu;
pub mod epilogue;
pub mod simd;

pub use activation::{Activation, ActivationError, ActivationKind};
pub use cpu::{simd_level, SimdLevel};
pub use epilogue::{bias_and_activation, Layout};
