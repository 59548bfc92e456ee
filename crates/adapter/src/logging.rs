use tracing_subscriber::EnvFilter;

use crate::AdapterError;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info,lfs_s3=debug";

/// Installs the global subscriber.
///
/// Output goes to stderr: stdout carries protocol messages for git-lfs.
pub fn init() -> Result<(), AdapterError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|e| AdapterError::Logging(e.to_string()))
}

/// `RUST_LOG` if set and valid, otherwise [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        let filter = EnvFilter::new(DEFAULT_FILTER);
        let shown = filter.to_string();
        assert!(shown.contains("lfs_s3=debug"));
        assert!(shown.contains("info"));
    }

    #[test]
    fn second_init_is_an_error_not_a_panic() {
        let _ = init();
        assert!(matches!(init(), Err(AdapterError::Logging(_))));
    }
}
