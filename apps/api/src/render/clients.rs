//! HTTP clients for the two external generation providers.
//!
//! Both providers sit behind traits so the pipeline and the resilience
//! wrapper can be exercised entirely with stubs in tests.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dependency name for speech-synthesis breaker/retry accounting.
pub const SPEECH_DEPENDENCY: &str = "speech-synthesis";
/// Dependency name for video-synthesis breaker/retry accounting.
pub const VIDEO_DEPENDENCY: &str = "video-synthesis";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("provider returned an unusable response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Server errors, rate limiting, and transport failures are worth
    /// retrying; other client errors and unusable payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Malformed(_) => false,
        }
    }
}

#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    /// Synthesizes `text` to audio bytes (mp3).
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Status of an asynchronous lip-sync job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoJobStatus {
    Done { result_url: String },
    Error { description: String },
    /// Any non-terminal status ("created", "started", ...). Not a failure.
    InProgress(String),
}

#[async_trait]
pub trait VideoSynthesis: Send + Sync {
    /// Submits a lip-sync job for the avatar image and audio track, both
    /// reachable by the provider via presigned URLs. Returns the job id.
    async fn submit(&self, avatar_url: &str, audio_url: &str) -> Result<String, ProviderError>;

    /// Fetches the current status of a previously submitted job.
    async fn job_status(&self, job_id: &str) -> Result<VideoJobStatus, ProviderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Speech synthesis over HTTP
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    speaking_rate: f32,
    stability: f32,
}

pub struct HttpSpeechClient {
    client: Client,
    base_url: String,
    api_key: String,
    voice_id: String,
    speaking_rate: f32,
    stability: f32,
}

impl HttpSpeechClient {
    pub fn new(
        base_url: String,
        api_key: String,
        config: &crate::config::GenerationConfig,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            api_key,
            voice_id: config.voice_id.clone(),
            speaking_rate: config.speaking_rate,
            stability: config.stability,
        }
    }
}

#[async_trait]
impl SpeechSynthesis for HttpSpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/synthesize", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&SynthesizeRequest {
                text,
                voice_id: &self.voice_id,
                speaking_rate: self.speaking_rate,
                stability: self.stability,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::Malformed("empty audio payload".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Video lip-sync over HTTP
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SubmitTalkRequest<'a> {
    source_url: &'a str,
    audio_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitTalkResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TalkStatusResponse {
    status: String,
    result_url: Option<String>,
    error: Option<TalkError>,
}

#[derive(Debug, Deserialize)]
struct TalkError {
    description: String,
}

pub struct HttpVideoClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpVideoClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl VideoSynthesis for HttpVideoClient {
    async fn submit(&self, avatar_url: &str, audio_url: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/talks", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&SubmitTalkRequest {
                source_url: avatar_url,
                audio_url,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: SubmitTalkResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("bad submit response: {e}")))?;
        Ok(body.id)
    }

    async fn job_status(&self, job_id: &str) -> Result<VideoJobStatus, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/talks/{job_id}", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: TalkStatusResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("bad status response: {e}")))?;
        Ok(parse_job_status(body))
    }
}

fn parse_job_status(body: TalkStatusResponse) -> VideoJobStatus {
    match body.status.as_str() {
        "done" => match body.result_url {
            Some(result_url) => VideoJobStatus::Done { result_url },
            None => VideoJobStatus::Error {
                description: "job done but no result_url in response".to_string(),
            },
        },
        "error" | "rejected" => VideoJobStatus::Error {
            description: body
                .error
                .map(|e| e.description)
                .unwrap_or_else(|| "unspecified provider error".to_string()),
        },
        other => VideoJobStatus::InProgress(other.to_string()),
    }
}
