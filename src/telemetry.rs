//! Structured logging setup for host applications.
//!
//! Library code only emits `tracing` events; hosts that want console output
//! call [`init`] once at startup. Honors `RUST_LOG` when set.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize a console subscriber. Safe to call more than once; only the
/// first call installs anything.
pub fn init() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,cashbook=debug"));

        let console_layer = fmt::layer().with_target(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
    });
}
