mod cache;
mod config;
mod db;
mod errors;
mod models;
mod notify;
mod orchestrator;
mod ratelimit;
mod recovery;
mod render;
mod resilience;
mod routes;
mod state;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::{PgS3CacheStore, VideoCache};
use crate::config::Config;
use crate::db::create_pool;
use crate::notify::RedisNotifier;
use crate::orchestrator::store::PgInterviewStore;
use crate::orchestrator::Orchestrator;
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::recovery::{RecoverySweep, SweepConfig};
use crate::render::clients::{
    HttpSpeechClient, HttpVideoClient, SPEECH_DEPENDENCY, VIDEO_DEPENDENCY,
};
use crate::render::pipeline::RenderPipeline;
use crate::resilience::breaker::BreakerConfig;
use crate::resilience::retry::RetryPolicy;
use crate::resilience::Resilience;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (panics on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cadence API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;

    // Initialize Redis (push notifications for render progress)
    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // One breaker + retry policy per external dependency
    let mut resilience = Resilience::new();
    resilience.register(
        SPEECH_DEPENDENCY,
        RetryPolicy::default(),
        BreakerConfig::default(),
    );
    resilience.register(
        VIDEO_DEPENDENCY,
        RetryPolicy::default(),
        BreakerConfig::default(),
    );
    let resilience = Arc::new(resilience);

    // Generation pipeline behind the tiered cache
    let speech = Arc::new(HttpSpeechClient::new(
        config.speech_api_url.clone(),
        config.speech_api_key.clone(),
        &config.generation,
    ));
    let video = Arc::new(HttpVideoClient::new(
        config.video_api_url.clone(),
        config.video_api_key.clone(),
    ));
    let pipeline = Arc::new(RenderPipeline::new(
        s3.clone(),
        speech,
        video,
        resilience,
        &config,
    ));
    let cache_store = Arc::new(PgS3CacheStore::new(
        pool.clone(),
        s3,
        config.s3_bucket.clone(),
    ));
    let video_cache = Arc::new(VideoCache::new(
        cache_store,
        config.generation.clone(),
        pipeline,
    ));

    // Orchestrator consuming post-commit hand-offs
    let store = Arc::new(PgInterviewStore::new(pool.clone()));
    let notifier = Arc::new(RedisNotifier::new(redis));
    let (render_tx, render_rx) = tokio::sync::mpsc::channel(64);
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        video_cache,
        notifier,
    ));
    tokio::spawn(orchestrator.run(render_rx));
    info!("Orchestrator started");

    // Recovery sweep for interviews stuck by process or listener failure
    let sweep = RecoverySweep::new(
        store,
        SweepConfig {
            interval: Duration::from_secs(config.sweep_interval_secs),
            rendering_timeout: Duration::from_secs(config.rendering_timeout_secs),
            evaluation_timeout: Duration::from_secs(config.evaluation_timeout_secs),
        },
    );
    tokio::spawn(sweep.run());
    info!("Recovery sweep started");

    // Build app state
    let state = AppState {
        db: pool,
        config: config.clone(),
        render_tx,
        rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "cadence-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
