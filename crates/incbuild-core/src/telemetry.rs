//! Tracing setup for the `incbuild` binary.
//!
//! Logs go to stderr so summaries printed on stdout can be piped. `RUST_LOG`
//! wins over the command-line level when set.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Crates kept at `warn` unless `RUST_LOG` says otherwise; registry
/// lookups are chatty at debug.
const QUIET_CRATES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let mut directives = level.as_str().to_ascii_lowercase();
    for krate in QUIET_CRATES {
        directives.push_str(&format!(",{}=warn", krate));
    }
    directives
}

/// Install the global subscriber. Only the first call in a process takes
/// effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let layer = if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .ok();
}
