//! Multi-tier, content-addressed video cache.
//!
//! Lookup order: in-process memory map → durable `video_cache` table →
//! legacy fixed-path S3 object → generation pipeline. Durable writes are
//! best-effort: the freshly generated artifact is valid whether or not the
//! mapping persists, and concurrent first-writers race harmlessly because
//! the mapping is immutable once written.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::render::fingerprint::fingerprint;
use crate::render::pipeline::{RenderError, Renderer};

/// Generation failure wrapped with the question that triggered it.
#[derive(Debug, Error)]
#[error("video generation failed for question {question_id}: {source}")]
pub struct CacheError {
    pub question_id: Uuid,
    #[source]
    pub source: RenderError,
}

/// Seam for the orchestrator.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn get_or_generate(&self, text: &str, question_id: Uuid)
        -> Result<String, CacheError>;
}

/// The durable tiers behind the in-process map: the fingerprint table and
/// the legacy fixed-path objects.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn lookup(&self, fp: &str) -> Result<Option<String>>;

    /// Records a fingerprint → key mapping. Callers treat failures
    /// (including a lost insert race) as best-effort.
    async fn persist(&self, fp: &str, video_key: &str) -> Result<()>;

    /// Whether the legacy fixed-path object for `fp` exists.
    async fn legacy_exists(&self, legacy_key: &str) -> Result<bool>;
}

pub struct PgS3CacheStore {
    db: PgPool,
    s3: aws_sdk_s3::Client,
    bucket: String,
}

impl PgS3CacheStore {
    pub fn new(db: PgPool, s3: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { db, s3, bucket }
    }
}

#[async_trait]
impl CacheStore for PgS3CacheStore {
    async fn lookup(&self, fp: &str) -> Result<Option<String>> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT video_key FROM video_cache WHERE fingerprint = $1",
        )
        .bind(fp)
        .fetch_optional(&self.db)
        .await?)
    }

    async fn persist(&self, fp: &str, video_key: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO video_cache (fingerprint, video_key) VALUES ($1, $2) \
             ON CONFLICT (fingerprint) DO NOTHING",
        )
        .bind(fp)
        .bind(video_key)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn legacy_exists(&self, legacy_key: &str) -> Result<bool> {
        match self
            .s3
            .head_object()
            .bucket(&self.bucket)
            .key(legacy_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().map_or(false, |e| e.is_not_found()) {
                    Ok(false)
                } else {
                    Err(err.into())
                }
            }
        }
    }
}

pub struct VideoCache {
    store: Arc<dyn CacheStore>,
    config: GenerationConfig,
    renderer: Arc<dyn Renderer>,
    /// Outer result cache: fingerprint → video key. Repeated calls for the
    /// same fingerprint within the process never re-enter the lookup path.
    memory: RwLock<HashMap<String, String>>,
}

impl VideoCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        config: GenerationConfig,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            store,
            config,
            renderer,
            memory: RwLock::new(HashMap::new()),
        }
    }

    async fn lookup_or_render(
        &self,
        fp: &str,
        text: &str,
        question_id: Uuid,
    ) -> Result<String, CacheError> {
        // Tier 1: durable key-value lookup.
        match self.store.lookup(fp).await {
            Ok(Some(key)) => {
                info!("durable cache hit for {fp}");
                return Ok(key);
            }
            Ok(None) => {}
            // A failed lookup degrades to a miss; generation still works.
            Err(e) => warn!("durable cache lookup for {fp} failed: {e:#}"),
        }

        // Tier 2: legacy fixed path, written before the durable table existed.
        let legacy_key = format!("videos/cache/{fp}.mp4");
        match self.store.legacy_exists(&legacy_key).await {
            Ok(true) => {
                info!("legacy cache hit for {fp}, backfilling durable table");
                self.persist_mapping(fp, &legacy_key).await;
                return Ok(legacy_key);
            }
            Ok(false) => {}
            Err(e) => warn!("legacy cache existence check for {legacy_key} failed: {e:#}"),
        }

        // Miss on both tiers: generate.
        let video_key = self
            .renderer
            .render(text, question_id)
            .await
            .map_err(|source| CacheError {
                question_id,
                source,
            })?;
        self.persist_mapping(fp, &video_key).await;
        // Copying the artifact to the legacy path is intentionally skipped;
        // the durable mapping is the source of truth going forward.
        Ok(video_key)
    }

    /// Best-effort. A lost race with another writer (or any other insert
    /// failure) is logged and swallowed — the entry that exists is equally
    /// valid.
    async fn persist_mapping(&self, fp: &str, video_key: &str) {
        if let Err(e) = self.store.persist(fp, video_key).await {
            warn!("failed to persist cache mapping {fp} -> {video_key}: {e:#}");
        }
    }
}

#[async_trait]
impl VideoProvider for VideoCache {
    async fn get_or_generate(
        &self,
        text: &str,
        question_id: Uuid,
    ) -> Result<String, CacheError> {
        let fp = fingerprint(text, &self.config);

        if let Some(key) = self.memory.read().await.get(&fp).cloned() {
            return Ok(key);
        }

        let key = self.lookup_or_render(&fp, text, question_id).await?;
        self.memory.write().await.insert(fp, key.clone());
        Ok(key)
    }
}
