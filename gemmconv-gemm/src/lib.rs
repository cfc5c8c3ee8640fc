//! Interchangeable single-precision GEMM backends.
//!
//! Two families implement the [`GemmBackend`] strategy trait:
//!
//! - [`PlainGemm`]: ordinary dense `C = A * B`, no preprocessing. The inner
//!   kernel is fixed at compile time ([`ActiveKernel`]): `faer` when the
//!   `faer` feature is enabled, explicit loops otherwise.
//! - [`PackedGemm`]: a callback-style backend with a
//!   `buffer_len` / `reorder_b` / `run` triplet. `B` is reorganised once into
//!   register-tile panels and reused by every later `run`.
//!
//! [`select_backend`] picks one of them once per operator, from the detected
//! CPU capability and the operator's static configuration.
//!
//! All matrices are row-major with explicit leading dimensions.
//!
//! ```
//! use gemmconv_gemm::{GemmBackend, PlainGemm, Rhs};
//!
//! // C (2x2) = A (2x3) * B (3x2)
//! let a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let b = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let mut c = [0.0f32; 4];
//! PlainGemm
//!     .run(2, 2, 3, &a, 3, Rhs::Dense { data: &b, ld: 2 }, &mut c, 2)
//!     .unwrap();
//! assert_eq!(c, [22.0, 28.0, 49.0, 64.0]);
//! ```

/// Backend strategy trait, the plain backend and backend selection.
pub mod backend;
#[cfg(feature = "faer")]
/// Plain GEMM kernel using the [`faer`] library.
pub mod gemm_faer;
/// Plain GEMM kernel using explicit loops.
pub mod gemm_naive;
/// Packed/callback GEMM backend.
pub mod gemm_packed;
/// Register-tile menu and packed buffer sizing.
pub mod tile;
/// Operand validation helpers.
pub mod util;

pub use backend::{
    accept_backend, packed_blocker, select_backend, select_backend_for, ActiveKernel, BackendKind, BackendPreference,
    GemmBackend, GemmKernel, NaiveKernel, PlainGemm, Rhs,
};
#[cfg(feature = "faer")]
pub use backend::FaerKernel;
pub use gemm_packed::PackedGemm;
pub use tile::{packed_b_len, KernelRequest, KernelTile, TileShape};

/// Errors raised by GEMM backends before any arithmetic starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GemmError {
    #[error("operand {operand}: leading dimension {ld} is smaller than {cols} columns")]
    LeadingDimension {
        operand: &'static str,
        ld: usize,
        cols: usize,
    },
    #[error("operand {operand}: need {needed} elements, got {len}")]
    OperandTooShort {
        operand: &'static str,
        needed: usize,
        len: usize,
    },
    #[error("{backend} backend cannot consume a {got} right-hand operand")]
    RhsKind {
        backend: &'static str,
        got: &'static str,
    },
    #[error("{backend} backend does not reorder weights")]
    NoPacking { backend: &'static str },
}

/// Convenience alias for `Result<T, GemmError>`.
pub type Result<T> = std::result::Result<T, GemmError>;
