//! Tracing subscriber initialization
//!
//! Mirrors `acton-service::observability`: a single `EnvFilter`-driven
//! subscriber installed once at process start, falling back to `info` when
//! `RUST_LOG` is unset.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber. Safe to call once; a second call
/// returns an error that callers may ignore (tests calling this repeatedly
/// across threads is the expected case).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
