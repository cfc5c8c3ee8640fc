//! Construction options and the `GEMMCONV_BACKEND` override.

use gemmconv_gemm::{BackendPreference, KernelRequest};
use once_cell::sync::Lazy;

/// Default cap on `M * merge` when several images share one GEMM.
pub const DEFAULT_MAX_MERGE_ROWS: usize = 256;

/// Environment variable overriding the backend preference: `auto`, `plain`
/// or `packed`.
pub const BACKEND_ENV: &str = "GEMMCONV_BACKEND";

/// Construction-time options of a [`Deconvolution`](crate::Deconvolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeconvOptions {
    pub backend: BackendPreference,
    /// Upper bound on the rows of a merged multi-image GEMM. Merging never
    /// changes results, only how many GEMM calls a forward pass makes.
    pub max_merge_rows: usize,
    /// Register tile family for the packed backend.
    pub kernel: KernelRequest,
}

impl Default for DeconvOptions {
    fn default() -> Self {
        DeconvOptions {
            backend: BackendPreference::Auto,
            max_merge_rows: DEFAULT_MAX_MERGE_ROWS,
            kernel: KernelRequest::Any,
        }
    }
}

static ENV_BACKEND: Lazy<BackendPreference> = Lazy::new(|| {
    let raw = std::env::var(BACKEND_ENV).ok();
    let pref = parse_backend(raw.as_deref());
    if raw.is_some() {
        log::debug!("{BACKEND_ENV}={raw:?} -> {pref:?}");
    }
    pref
});

/// Parse a backend preference; unknown or missing values mean `Auto`.
pub fn parse_backend(value: Option<&str>) -> BackendPreference {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("auto") => BackendPreference::Auto,
        Some("plain") => BackendPreference::Plain,
        Some("packed") => BackendPreference::Packed,
        Some(other) => {
            log::warn!("ignoring unknown {BACKEND_ENV} value {other:?}");
            BackendPreference::Auto
        }
    }
}

impl DeconvOptions {
    /// Defaults, with the backend preference taken from `GEMMCONV_BACKEND`.
    /// The variable is read once per process.
    pub fn from_env() -> Self {
        DeconvOptions {
            backend: *ENV_BACKEND,
            ..Default::default()
        }
    }
}
