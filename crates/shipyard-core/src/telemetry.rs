//! Subscriber setup for Shipyard binaries.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// HTTP client internals are only interesting when asked for explicitly.
const QUIET_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

fn default_filter(level: Level) -> EnvFilter {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(QUIET_TARGETS.iter().map(|d| d.to_string()));
    EnvFilter::new(directives.join(","))
}

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
///
/// With `json`, one JSON object per line. Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(fmt::layer().with_target(false).json().flatten_event(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
