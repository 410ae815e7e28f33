//! Logging setup shared by agent entry points.

use crate::Result;

/// Initializes structured logging from CLI verbosity.
///
/// `RUST_LOG` takes precedence when set; otherwise the level is derived
/// from the flags (0=INFO, 1=DEBUG, 2+=TRACE, quiet=ERROR).
///
/// # Errors
///
/// Returns a configuration error when a global subscriber is already set.
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = level_for(verbose, quiet);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| {
            crate::error::AgentError::configuration(format!("failed to initialize logging: {e}"))
        })?;

    Ok(())
}

const fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A global subscriber can only be installed once per test process, so
    // only the level mapping is exercised here.

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for(0, true), tracing::Level::ERROR);
        assert_eq!(level_for(3, true), tracing::Level::ERROR);
        assert_eq!(level_for(0, false), tracing::Level::INFO);
        assert_eq!(level_for(1, false), tracing::Level::DEBUG);
        assert_eq!(level_for(2, false), tracing::Level::TRACE);
    }
}
