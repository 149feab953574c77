//! Entry point: load configuration, initialize tracing, then hand off to
//! `vn_market_pipeline::serve`. Kept deliberately thin — every component is
//! wired in the library crate so `tests/` can build the same stack.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vn_market_pipeline::config::Config;

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vn_market_pipeline={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    if let Err(err) = vn_market_pipeline::serve(config).await {
        tracing::error!(%err, "fatal startup error");
        std::process::exit(1);
    }
}
