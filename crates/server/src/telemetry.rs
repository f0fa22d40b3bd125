use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` filters (default `info`);
/// `LOG_FORMAT=json` switches to bunyan JSON lines on stdout.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let formatting = BunyanFormattingLayer::new(env!("CARGO_PKG_NAME").into(), std::io::stdout);
        tracing_subscriber::registry()
            .with(filter)
            .with(JsonStorageLayer)
            .with(formatting)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
