//! The generation pipeline — drives one question end to end.
//!
//! Flow: synthesize speech → store audio → presign URLs → submit video
//! job (resilience-wrapped) → poll job status (NOT wrapped) → download
//! result → store video.
//!
//! Only the two submission legs go through the resilience wrapper. The
//! poll loop tolerates transient per-poll errors on its own by skipping to
//! the next attempt; an in-progress status is never treated as a failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::render::clients::{
    SpeechSynthesis, VideoJobStatus, VideoSynthesis, SPEECH_DEPENDENCY, VIDEO_DEPENDENCY,
};
use crate::resilience::Resilience;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    SpeechSynthesis,
    SignedUrl,
    VideoSubmit,
    VideoPoll,
    Store,
}

impl std::fmt::Display for RenderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RenderStage::SpeechSynthesis => "speech-synthesis",
            RenderStage::SignedUrl => "signed-url",
            RenderStage::VideoSubmit => "video-submit",
            RenderStage::VideoPoll => "video-poll",
            RenderStage::Store => "store",
        };
        f.write_str(name)
    }
}

/// Unrecoverable pipeline failure, naming the stage and the question.
#[derive(Debug, Error)]
#[error("render stage '{stage}' failed for question {question_id}: {message}")]
pub struct RenderError {
    pub stage: RenderStage,
    pub question_id: Uuid,
    pub message: String,
}

/// Seam for the cache manager: the pipeline behind a stubbable trait.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Renders one question to a talking-avatar video and returns the
    /// storage key of the stored artifact.
    async fn render(&self, text: &str, question_id: Uuid) -> Result<String, RenderError>;
}

pub struct RenderPipeline {
    s3: aws_sdk_s3::Client,
    bucket: String,
    http: reqwest::Client,
    speech: Arc<dyn SpeechSynthesis>,
    video: Arc<dyn VideoSynthesis>,
    resilience: Arc<Resilience>,
    avatar_key: String,
    signed_url_ttl: Duration,
    poll_interval: Duration,
    poll_max_attempts: u32,
}

impl RenderPipeline {
    pub fn new(
        s3: aws_sdk_s3::Client,
        speech: Arc<dyn SpeechSynthesis>,
        video: Arc<dyn VideoSynthesis>,
        resilience: Arc<Resilience>,
        config: &Config,
    ) -> Self {
        Self {
            s3,
            bucket: config.s3_bucket.clone(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
            speech,
            video,
            resilience,
            avatar_key: config.generation.avatar_key.clone(),
            signed_url_ttl: Duration::from_secs(config.signed_url_ttl_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            poll_max_attempts: config.poll_max_attempts,
        }
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), String> {
        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| format!("S3 upload of {key} failed: {e}"))?;
        Ok(())
    }

    /// Presigned GET URL the external provider can fetch over the network.
    async fn presign_get(&self, key: &str) -> Result<String, String> {
        let presigning = PresigningConfig::expires_in(self.signed_url_ttl)
            .map_err(|e| format!("invalid presign TTL: {e}"))?;
        let request = self
            .s3
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| format!("presigning {key} failed: {e}"))?;
        Ok(request.uri().to_string())
    }

    /// Polls the job on a fixed interval up to a fixed attempt count.
    ///
    /// A transient error during a single poll is logged and the loop moves
    /// to the next attempt; this implicit tolerance is deliberately outside
    /// the resilience wrapper.
    async fn poll_until_done(&self, job_id: &str, question_id: Uuid) -> Result<String, RenderError> {
        for attempt in 1..=self.poll_max_attempts {
            tokio::time::sleep(self.poll_interval).await;

            match self.video.job_status(job_id).await {
                Ok(VideoJobStatus::Done { result_url }) => {
                    info!("video job {job_id} finished after {attempt} polls");
                    return Ok(result_url);
                }
                Ok(VideoJobStatus::Error { description }) => {
                    return Err(RenderError {
                        stage: RenderStage::VideoPoll,
                        question_id,
                        message: format!("job {job_id} failed: {description}"),
                    });
                }
                Ok(VideoJobStatus::InProgress(status)) => {
                    debug!("video job {job_id} still '{status}' (poll {attempt})");
                }
                Err(e) => {
                    warn!("poll {attempt} for job {job_id} failed, continuing: {e}");
                }
            }
        }

        Err(RenderError {
            stage: RenderStage::VideoPoll,
            question_id,
            message: format!(
                "job {job_id} did not finish within {} polls",
                self.poll_max_attempts
            ),
        })
    }
}

#[async_trait]
impl Renderer for RenderPipeline {
    async fn render(&self, text: &str, question_id: Uuid) -> Result<String, RenderError> {
        let fail = |stage: RenderStage, message: String| RenderError {
            stage,
            question_id,
            message,
        };

        // Stage 1: speech synthesis, stored durably.
        let audio = self
            .resilience
            .call(SPEECH_DEPENDENCY, || self.speech.synthesize(text))
            .await
            .map_err(|e| fail(RenderStage::SpeechSynthesis, e.to_string()))?;

        let audio_key = format!("audio/{question_id}/{}.mp3", Utc::now().timestamp_millis());
        self.put_object(&audio_key, audio, "audio/mpeg")
            .await
            .map_err(|e| fail(RenderStage::SpeechSynthesis, e))?;
        info!("stored audio for question {question_id} at {audio_key}");

        // Stage 2: short-lived URLs the video provider fetches over the network.
        let audio_url = self
            .presign_get(&audio_key)
            .await
            .map_err(|e| fail(RenderStage::SignedUrl, e))?;
        let avatar_url = self
            .presign_get(&self.avatar_key)
            .await
            .map_err(|e| fail(RenderStage::SignedUrl, e))?;

        // Stage 3: job submission, resilience-wrapped.
        let job_id = self
            .resilience
            .call(VIDEO_DEPENDENCY, || {
                self.video.submit(&avatar_url, &audio_url)
            })
            .await
            .map_err(|e| fail(RenderStage::VideoSubmit, e.to_string()))?;
        info!("submitted video job {job_id} for question {question_id}");

        // Stage 4: poll loop, not wrapped.
        let result_url = self.poll_until_done(&job_id, question_id).await?;

        // Stage 5: download and store under a question-scoped key. The
        // fingerprint-keyed mapping is the cache manager's concern.
        let bytes = self
            .http
            .get(&result_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fail(RenderStage::Store, format!("download failed: {e}")))?
            .bytes()
            .await
            .map_err(|e| fail(RenderStage::Store, format!("download failed: {e}")))?;

        let video_key = format!("videos/{question_id}/{}.mp4", Utc::now().timestamp_millis());
        self.put_object(&video_key, bytes.to_vec(), "video/mp4")
            .await
            .map_err(|e| fail(RenderStage::Store, e))?;
        info!("stored video for question {question_id} at {video_key}");

        Ok(video_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::clients::ProviderError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted video client: each poll pops the next response.
    struct ScriptedVideo {
        polls: Mutex<VecDeque<Result<VideoJobStatus, ProviderError>>>,
    }

    impl ScriptedVideo {
        fn new(polls: Vec<Result<VideoJobStatus, ProviderError>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
            }
        }
    }

    #[async_trait]
    impl VideoSynthesis for ScriptedVideo {
        async fn submit(&self, _: &str, _: &str) -> Result<String, ProviderError> {
            Ok("job-1".to_string())
        }

        async fn job_status(&self, _: &str) -> Result<VideoJobStatus, ProviderError> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(VideoJobStatus::InProgress("started".to_string())))
        }
    }

    struct NoSpeech;

    #[async_trait]
    impl SpeechSynthesis for NoSpeech {
        async fn synthesize(&self, _: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(vec![0u8])
        }
    }

    fn pipeline_with(video: Arc<dyn VideoSynthesis>, poll_max_attempts: u32) -> RenderPipeline {
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                "test", "test", None, None, "test",
            ))
            .endpoint_url("http://127.0.0.1:1")
            .build();

        RenderPipeline {
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: "test-bucket".to_string(),
            http: reqwest::Client::new(),
            speech: Arc::new(NoSpeech),
            video,
            resilience: Arc::new(Resilience::new()),
            avatar_key: "avatars/test.png".to_string(),
            signed_url_ttl: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
            poll_max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_result_url_on_done() {
        let video = Arc::new(ScriptedVideo::new(vec![
            Ok(VideoJobStatus::InProgress("created".to_string())),
            Ok(VideoJobStatus::InProgress("started".to_string())),
            Ok(VideoJobStatus::Done {
                result_url: "https://cdn.example/v.mp4".to_string(),
            }),
        ]));
        let pipeline = pipeline_with(video, 5);

        let url = pipeline
            .poll_until_done("job-1", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example/v.mp4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_tolerates_transient_errors() {
        let video = Arc::new(ScriptedVideo::new(vec![
            Err(ProviderError::Status {
                status: 503,
                message: "blip".to_string(),
            }),
            Ok(VideoJobStatus::Done {
                result_url: "https://cdn.example/v.mp4".to_string(),
            }),
        ]));
        let pipeline = pipeline_with(video, 5);

        let url = pipeline
            .poll_until_done("job-1", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example/v.mp4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_fails_immediately_on_error_status() {
        let video = Arc::new(ScriptedVideo::new(vec![Ok(VideoJobStatus::Error {
            description: "face not detected".to_string(),
        })]));
        let pipeline = pipeline_with(video, 5);
        let question_id = Uuid::new_v4();

        let err = pipeline
            .poll_until_done("job-1", question_id)
            .await
            .unwrap_err();
        assert_eq!(err.stage, RenderStage::VideoPoll);
        assert_eq!(err.question_id, question_id);
        assert!(err.message.contains("face not detected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_gives_up_after_max_attempts() {
        let video = Arc::new(ScriptedVideo::new(vec![]));
        let pipeline = pipeline_with(video, 3);

        let err = pipeline
            .poll_until_done("job-1", Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.stage, RenderStage::VideoPoll);
        assert!(err.message.contains("3 polls"));
    }
}
