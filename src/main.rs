use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_digest::aggregator::{start_background_refresh, Aggregator};
use feed_digest::config::Config;
use feed_digest::fetcher::HttpFetcher;
use feed_digest::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feed_digest=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("FEED_DIGEST_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded {} feeds from {} (cache TTL {}s)",
        config.feeds.len(),
        config_path,
        config.cache_ttl_secs
    );

    let fetcher = HttpFetcher::new(config.request_timeout())?;
    let aggregator = Arc::new(Aggregator::new(
        fetcher,
        config.cache_ttl(),
        config.feed_urls(),
    ));

    // Warm the cache and keep it warm
    let bg_aggregator = aggregator.clone();
    let refresh_interval = config.refresh_interval();
    tokio::spawn(async move {
        start_background_refresh(bg_aggregator, refresh_interval).await;
    });

    let state = Arc::new(AppState { aggregator });
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
