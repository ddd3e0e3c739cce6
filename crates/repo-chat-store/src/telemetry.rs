// repo-chat-store/src/telemetry.rs

use tracing_subscriber::{fmt, EnvFilter};

/// Used when `RUST_LOG` is unset, blank or unparsable. Pool checkout chatter
/// stays at warn.
const DEFAULT_DIRECTIVES: &str = "info,r2d2=warn";

/// Filter for the given `RUST_LOG` value.
pub fn log_filter(raw: Option<&str>) -> EnvFilter {
    match raw.map(str::trim).filter(|directives| !directives.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|e| {
            // No subscriber exists yet to report this through.
            eprintln!("Ignoring invalid RUST_LOG {:?}: {}", directives, e);
            EnvFilter::new(DEFAULT_DIRECTIVES)
        }),
        None => EnvFilter::new(DEFAULT_DIRECTIVES),
    }
}

/// Install the global subscriber. Output goes to stderr so CLI subcommands
/// can print JSON on stdout. Returns false if one was already installed.
pub fn init_tracing() -> bool {
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_default_filter_is_info() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(Some("  ")).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_rust_log_overrides_default() {
        assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_invalid_rust_log_falls_back() {
        assert_eq!(
            log_filter(Some("repo_chat_store=loud")).max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }
}
