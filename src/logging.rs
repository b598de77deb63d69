//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

/// Install the global subscriber, writing to stderr so stdout stays
/// parseable (`srag search --json`).
///
/// `RUST_LOG` wins when set; otherwise `level` (e.g. `"info"`, `"debug"`)
/// applies to this crate and the core crate, and everything else logs
/// warnings only.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,secure_rag={level},secure_rag_core={level},srag={level}"
        ))
    });

    // A second init (e.g. from tests) is harmless; keep the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
