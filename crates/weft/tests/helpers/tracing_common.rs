use std::sync::Once;

use tracing::Level;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Set up a global tracing subscriber once per test binary. `RUST_LOG`
/// wins when set.
pub fn setup_tracing() {
    INIT.call_once(|| {
        let targets = if let Ok(rust_log) = std::env::var("RUST_LOG") {
            rust_log.parse::<Targets>().unwrap()
        } else {
            Targets::new()
                .with_default(Level::INFO)
                .with_target("weft", Level::DEBUG)
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_file(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(targets)
            .with(fmt_layer)
            .init();
    });
}
