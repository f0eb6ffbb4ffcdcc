//! Persistence seam for the orchestrator and the recovery sweep.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::interview::{InterviewRow, InterviewStatus, QuestionRow};

#[async_trait]
pub trait InterviewStore: Send + Sync {
    /// Loads the given questions in batch order.
    async fn load_questions(&self, question_ids: &[Uuid]) -> Result<Vec<QuestionRow>>;

    /// Writes the rendered video key for one question. Committed
    /// independently so partial progress survives a crash between items.
    async fn save_video_key(&self, question_id: Uuid, video_key: &str) -> Result<()>;

    /// Advances the interview to `to` if that is a forward transition.
    /// Returns `false` (a silent no-op) when the interview already passed
    /// or reached `to` — the guard that makes orchestrator/sweep races
    /// harmless.
    async fn transition(&self, interview_id: Uuid, to: InterviewStatus) -> Result<bool>;

    /// Interviews in `status` whose relevant timestamp (evaluation
    /// submission time when present, otherwise creation time) is older
    /// than `cutoff`, oldest first.
    async fn stuck_interviews(
        &self,
        status: InterviewStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<InterviewRow>>;
}

pub struct PgInterviewStore {
    pool: PgPool,
}

impl PgInterviewStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InterviewStore for PgInterviewStore {
    async fn load_questions(&self, question_ids: &[Uuid]) -> Result<Vec<QuestionRow>> {
        Ok(sqlx::query_as::<_, QuestionRow>(
            "SELECT * FROM interview_questions WHERE id = ANY($1) ORDER BY position ASC",
        )
        .bind(question_ids.to_vec())
        .fetch_all(&self.pool)
        .await?)
    }

    async fn save_video_key(&self, question_id: Uuid, video_key: &str) -> Result<()> {
        sqlx::query("UPDATE interview_questions SET video_key = $1 WHERE id = $2")
            .bind(video_key)
            .bind(question_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn transition(&self, interview_id: Uuid, to: InterviewStatus) -> Result<bool> {
        let row: Option<InterviewRow> =
            sqlx::query_as("SELECT * FROM interviews WHERE id = $1")
                .bind(interview_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            anyhow::bail!("interview {interview_id} not found");
        };
        let Some(current) = row.status() else {
            anyhow::bail!("interview {interview_id} has unknown status '{}'", row.status);
        };

        if !current.can_advance_to(to) {
            info!(
                "interview {interview_id} already '{}', skipping transition to '{}'",
                current.as_str(),
                to.as_str()
            );
            return Ok(false);
        }

        // Optimistic guard: a concurrent transition wins and this one
        // becomes a no-op.
        let updated = if to == InterviewStatus::SubmittedForEvaluation {
            sqlx::query(
                "UPDATE interviews SET status = $1, evaluation_submitted_at = NOW() \
                 WHERE id = $2 AND status = $3",
            )
        } else {
            sqlx::query("UPDATE interviews SET status = $1 WHERE id = $2 AND status = $3")
        }
        .bind(to.as_str())
        .bind(interview_id)
        .bind(current.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }

    async fn stuck_interviews(
        &self,
        status: InterviewStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<InterviewRow>> {
        Ok(sqlx::query_as::<_, InterviewRow>(
            "SELECT * FROM interviews \
             WHERE status = $1 AND COALESCE(evaluation_submitted_at, created_at) < $2 \
             ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory store used by orchestrator and recovery sweep tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStore {
        pub interviews: Mutex<HashMap<Uuid, InterviewRow>>,
        pub questions: Mutex<HashMap<Uuid, QuestionRow>>,
        /// When set, `transition` returns this error once.
        pub fail_transition_for: Mutex<Option<Uuid>>,
    }

    impl MemoryStore {
        pub fn insert_interview(&self, row: InterviewRow) {
            self.interviews.lock().unwrap().insert(row.id, row);
        }

        pub fn insert_question(&self, row: QuestionRow) {
            self.questions.lock().unwrap().insert(row.id, row);
        }

        pub fn interview_status(&self, id: Uuid) -> String {
            self.interviews.lock().unwrap()[&id].status.clone()
        }

        pub fn video_key(&self, id: Uuid) -> Option<String> {
            self.questions.lock().unwrap()[&id].video_key.clone()
        }
    }

    #[async_trait]
    impl InterviewStore for MemoryStore {
        async fn load_questions(&self, question_ids: &[Uuid]) -> Result<Vec<QuestionRow>> {
            let questions = self.questions.lock().unwrap();
            let mut rows: Vec<QuestionRow> = question_ids
                .iter()
                .filter_map(|id| questions.get(id).cloned())
                .collect();
            rows.sort_by_key(|q| q.position);
            Ok(rows)
        }

        async fn save_video_key(&self, question_id: Uuid, video_key: &str) -> Result<()> {
            let mut questions = self.questions.lock().unwrap();
            let question = questions
                .get_mut(&question_id)
                .ok_or_else(|| anyhow::anyhow!("question {question_id} not found"))?;
            question.video_key = Some(video_key.to_string());
            Ok(())
        }

        async fn transition(&self, interview_id: Uuid, to: InterviewStatus) -> Result<bool> {
            {
                let mut fail_for = self.fail_transition_for.lock().unwrap();
                if *fail_for == Some(interview_id) {
                    fail_for.take();
                    anyhow::bail!("injected transition failure");
                }
            }
            let mut interviews = self.interviews.lock().unwrap();
            let row = interviews
                .get_mut(&interview_id)
                .ok_or_else(|| anyhow::anyhow!("interview {interview_id} not found"))?;
            let current = row
                .status()
                .ok_or_else(|| anyhow::anyhow!("unknown status '{}'", row.status))?;
            if !current.can_advance_to(to) {
                return Ok(false);
            }
            row.status = to.as_str().to_string();
            if to == InterviewStatus::SubmittedForEvaluation {
                row.evaluation_submitted_at = Some(Utc::now());
            }
            Ok(true)
        }

        async fn stuck_interviews(
            &self,
            status: InterviewStatus,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<InterviewRow>> {
            let interviews = self.interviews.lock().unwrap();
            let mut rows: Vec<InterviewRow> = interviews
                .values()
                .filter(|row| {
                    row.status == status.as_str()
                        && row.evaluation_submitted_at.unwrap_or(row.created_at) < cutoff
                })
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.created_at);
            Ok(rows)
        }
    }
}
