//! Runtime CPU capability detection.
//!
//! The instruction-set level is probed exactly once per process, on first
//! use, and cached in immutable global state. Every later query is a plain
//! load; nothing on the hot path ever re-probes the CPU.

use once_cell::sync::Lazy;

/// Widest vector instruction set usable for `f32` arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimdLevel {
    /// No usable vector unit.
    Scalar,
    /// 128-bit SSE2..SSE4.1.
    Sse,
    /// 256-bit AVX2 with FMA.
    Avx2,
    /// 512-bit AVX-512F.
    Avx512,
    /// 128-bit ARM NEON.
    Neon,
}

impl SimdLevel {
    /// Number of `f32` lanes in one vector register.
    ///
    /// Scalar targets report 4 so that tile shapes derived from the lane
    /// count stay identical to the 128-bit ones.
    pub fn f32_lanes(self) -> usize {
        match self {
            SimdLevel::Scalar | SimdLevel::Sse | SimdLevel::Neon => 4,
            SimdLevel::Avx2 => 8,
            SimdLevel::Avx512 => 16,
        }
    }

    /// Whether any vector unit is available.
    pub fn has_vector_unit(self) -> bool {
        !matches!(self, SimdLevel::Scalar)
    }

    /// Whether the level has at least 256-bit registers.
    pub fn is_wide(self) -> bool {
        matches!(self, SimdLevel::Avx2 | SimdLevel::Avx512)
    }

    pub fn name(self) -> &'static str {
        match self {
            SimdLevel::Scalar => "scalar",
            SimdLevel::Sse => "sse",
            SimdLevel::Avx2 => "avx2",
            SimdLevel::Avx512 => "avx512",
            SimdLevel::Neon => "neon",
        }
    }
}

static LEVEL: Lazy<SimdLevel> = Lazy::new(|| {
    let level = detect();
    log::debug!("detected simd level: {}", level.name());
    level
});

/// The SIMD level of the running CPU, detected once and cached.
#[inline]
pub fn simd_level() -> SimdLevel {
    *LEVEL
}

#[cfg(target_arch = "x86_64")]
fn detect() -> SimdLevel {
    if std::arch::is_x86_feature_detected!("avx512f") {
        SimdLevel::Avx512
    } else if std::arch::is_x86_feature_detected!("avx2")
        && std::arch::is_x86_feature_detected!("fma")
    {
        SimdLevel::Avx2
    } else {
        // SSE2 is part of the x86_64 baseline.
        SimdLevel::Sse
    }
}

#[cfg(target_arch = "aarch64")]
fn detect() -> SimdLevel {
    if std::arch::is_aarch64_feature_detected!("neon") {
        SimdLevel::Neon
    } else {
        SimdLevel::Scalar
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect() -> SimdLevel {
    SimdLevel::Scalar
}
