//! Logging configuration
//!
//! Structured logging with tracing.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Initialize logging. `RUST_LOG` wins over `verbose` when set.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}

/// `darkmsg` covers every crate of the workspace
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "darkmsg=debug,tower_http=debug"
    } else {
        "darkmsg=info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        assert!(EnvFilter::try_new(default_directives(false)).is_ok());
        assert!(EnvFilter::try_new(default_directives(true)).is_ok());
    }
}
