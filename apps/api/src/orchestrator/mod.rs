//! Drives one interview's batch of questions through the video cache.
//!
//! Hand-off is an explicit channel message sent only after the creating
//! transaction has committed, so the orchestrator never sees questions
//! that are not yet visible to reads. Questions render sequentially
//! (provider rate limits); per-question failures never abort siblings or
//! the terminal transition, and nothing here propagates to the caller —
//! the recovery sweep is the backstop.

pub mod store;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::VideoProvider;
use crate::models::interview::InterviewStatus;
use crate::notify::Notifier;
use store::InterviewStore;

/// The "batch created" signal from a collaborator.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub interview_id: Uuid,
    pub question_ids: Vec<Uuid>,
}

pub struct Orchestrator {
    store: Arc<dyn InterviewStore>,
    videos: Arc<dyn VideoProvider>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn InterviewStore>,
        videos: Arc<dyn VideoProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            videos,
            notifier,
        }
    }

    /// Consumes hand-off messages until the channel closes, spawning one
    /// task per interview. Cross-interview concurrency is unbounded;
    /// within an interview, questions run sequentially.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<RenderRequest>) {
        while let Some(request) = rx.recv().await {
            let orchestrator = Arc::clone(&self);
            tokio::spawn(async move {
                orchestrator.process(request).await;
            });
        }
    }

    /// Processes one interview end to end. Infallible by design: every
    /// failure is logged and absorbed here.
    pub async fn process(&self, request: RenderRequest) {
        let interview_id = request.interview_id;
        info!(
            "rendering interview {interview_id} ({} questions)",
            request.question_ids.len()
        );

        if let Err(e) = self.render_questions(&request).await {
            error!("failed to render questions for interview {interview_id}: {e:#}");
        }

        // Always attempt the terminal transition, whatever happened above.
        match self
            .store
            .transition(interview_id, InterviewStatus::Ready)
            .await
        {
            Ok(true) => {
                info!("interview {interview_id} is ready");
                self.notifier
                    .publish(
                        interview_id,
                        "interview_ready",
                        json!({ "interview_id": interview_id }),
                    )
                    .await;
                self.notifier.close(interview_id).await;
            }
            // Raced with the recovery sweep or a duplicate trigger.
            Ok(false) => {}
            Err(e) => error!("failed to transition interview {interview_id}: {e:#}"),
        }
    }

    async fn render_questions(&self, request: &RenderRequest) -> anyhow::Result<()> {
        let questions = self.store.load_questions(&request.question_ids).await?;

        for question in questions {
            // Idempotency guard: re-running the whole batch is safe. The
            // existing artifact is re-announced so a client listening on a
            // re-trigger still hears about every question.
            if question.has_video() {
                info!("question {} already has a video, skipping", question.id);
                self.notifier
                    .publish(
                        request.interview_id,
                        "question_rendered",
                        json!({
                            "question_id": question.id,
                            "video_key": question.video_key,
                        }),
                    )
                    .await;
                continue;
            }

            match self.videos.get_or_generate(&question.prompt, question.id).await {
                Ok(video_key) => {
                    // Committed independently of sibling questions.
                    match self.store.save_video_key(question.id, &video_key).await {
                        Ok(()) => {
                            self.notifier
                                .publish(
                                    request.interview_id,
                                    "question_rendered",
                                    json!({
                                        "question_id": question.id,
                                        "video_key": video_key,
                                    }),
                                )
                                .await;
                        }
                        Err(e) => {
                            error!(
                                "failed to save video key for question {}: {e:#}",
                                question.id
                            );
                            self.notify_failure(request.interview_id, question.id).await;
                        }
                    }
                }
                Err(e) => {
                    // The question stays without a video key; consumers see
                    // "artifact unavailable". Siblings keep rendering.
                    warn!("question {} failed to render: {e}", question.id);
                    self.notify_failure(request.interview_id, question.id).await;
                }
            }
        }

        Ok(())
    }

    async fn notify_failure(&self, interview_id: Uuid, question_id: Uuid) {
        self.notifier
            .publish(
                interview_id,
                "question_rendered",
                json!({ "question_id": question_id, "video_key": null }),
            )
            .await;
    }
}
