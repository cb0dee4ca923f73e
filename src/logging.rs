//! Log setup and component event macros.
//!
//! Every log line carries one of the crate's targets, so levels can be set per
//! component:
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! runner = "debug"    # one line per retry
//! backend = "trace"   # reply sizes per call
//! ```
//!
//! `RUST_LOG` replaces the configured filter entirely:
//! ```bash
//! RUST_LOG=pipeline=info,runner=debug quadchain run
//! ```
//!
//! Logs go to stderr; stdout is reserved for command output such as
//! `status --json`.

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Targets used by this crate.
pub const TARGETS: &[&str] = &["chunking", "runner", "pipeline", "backend", "store", "cli"];

/// HTTP stack crates that are capped at `warn` unless configured explicitly.
const TRANSPORT_CRATES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

static INIT: Once = Once::new();

/// HH:MM:SS.mmm in local time.
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directives for `config`: the default level, transport crates
/// capped at `warn`, then per-target levels in name order.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = vec![config.default.trim().to_string()];
    directives.extend(
        TRANSPORT_CRATES
            .iter()
            .filter(|krate| !config.modules.contains_key(**krate))
            .map(|krate| format!("{krate}=warn")),
    );

    let mut modules: Vec<(&String, &String)> = config.modules.iter().collect();
    modules.sort();
    directives.extend(
        modules
            .into_iter()
            .map(|(target, level)| format!("{target}={}", level.trim())),
    );
    directives.join(",")
}

/// Configured module names that match no target of this crate or its HTTP stack.
pub fn unknown_targets(config: &LoggingConfig) -> Vec<&str> {
    let mut unknown: Vec<&str> = config
        .modules
        .keys()
        .map(String::as_str)
        .filter(|name| !TARGETS.contains(name) && !TRANSPORT_CRATES.contains(name))
        .collect();
    unknown.sort_unstable();
    unknown
}

/// Install the global subscriber. Only the first call has an effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let from_env = std::env::var("RUST_LOG").is_ok();
        let (filter, rejected) = if from_env {
            (EnvFilter::from_default_env(), None)
        } else {
            match EnvFilter::try_new(filter_directives(config)) {
                Ok(filter) => (filter, None),
                Err(e) => (EnvFilter::new("warn"), Some(e)),
            }
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(is_terminal::is_terminal(std::io::stderr()))
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();

        if let Some(e) = rejected {
            tracing::warn!(target: "cli", "invalid [logging] levels ({e}), using warn");
        }
        if !from_env {
            for name in unknown_targets(config) {
                tracing::warn!(
                    target: "cli",
                    "[logging.modules] {name} matches no log target; known: {}",
                    TARGETS.join(", ")
                );
            }
        }
    });
}

/// Info-level event under a component target.
///
/// ```ignore
/// log_event!("store", "reset", "{}", root.display());
/// ```
#[macro_export]
macro_rules! log_event {
    ($target:literal, $event:expr) => {
        tracing::info!(target: $target, "{}", $event)
    };
    ($target:literal, $event:expr, $($arg:tt)*) => {
        tracing::info!(target: $target, "{}: {}", $event, format!($($arg)*))
    };
}

/// Debug-level counterpart of [`log_event!`].
#[macro_export]
macro_rules! debug_event {
    ($target:literal, $event:expr) => {
        tracing::debug!(target: $target, "{}", $event)
    };
    ($target:literal, $event:expr, $($arg:tt)*) => {
        tracing::debug!(target: $target, "{}: {}", $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(default: &str, modules: &[(&str, &str)]) -> LoggingConfig {
        LoggingConfig {
            default: default.to_string(),
            modules: modules
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_directives_cap_transport_and_sort_modules() {
        let directives = filter_directives(&config("info", &[("store", "trace"), ("runner", "debug")]));
        assert_eq!(
            directives,
            "info,hyper=warn,hyper_util=warn,reqwest=warn,h2=warn,rustls=warn,runner=debug,store=trace"
        );
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_explicit_transport_level_wins() {
        let directives = filter_directives(&config("warn", &[("reqwest", "debug")]));
        assert!(!directives.contains("reqwest=warn"));
        assert!(directives.ends_with("reqwest=debug"));
    }

    #[test]
    fn test_unknown_targets() {
        let cfg = config("warn", &[("runner", "debug"), ("indexer", "trace"), ("hyper", "info")]);
        assert_eq!(unknown_targets(&cfg), vec!["indexer"]);
        assert!(unknown_targets(&config("warn", &[])).is_empty());
    }
}
