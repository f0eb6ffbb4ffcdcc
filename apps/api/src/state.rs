use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::orchestrator::RenderRequest;
use crate::ratelimit::RateLimiter;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Hand-off to the orchestrator. Sends happen only after the creating
    /// transaction has committed.
    pub render_tx: mpsc::Sender<RenderRequest>,
    pub rate_limiter: Arc<RateLimiter>,
}
