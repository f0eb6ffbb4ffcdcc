//! Periodic recovery of interviews stuck in a non-terminal state.
//!
//! The orchestrator can die between rendering and the READY transition
//! (process restart, listener failure); nothing signals that explicitly,
//! so staleness is judged purely by elapsed time. Stuck RENDERING
//! interviews are forced to READY — partial content is acceptable and
//! consumers treat missing video keys as "artifact unavailable". Stuck
//! SUBMITTED_FOR_EVALUATION interviews are forced to FAILED; no partial
//! fallback exists for that phase.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::models::interview::InterviewStatus;
use crate::orchestrator::store::InterviewStore;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub rendering_timeout: Duration,
    pub evaluation_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            rendering_timeout: Duration::from_secs(900),
            evaluation_timeout: Duration::from_secs(1800),
        }
    }
}

pub struct RecoverySweep {
    store: Arc<dyn InterviewStore>,
    config: SweepConfig,
}

impl RecoverySweep {
    pub fn new(store: Arc<dyn InterviewStore>, config: SweepConfig) -> Self {
        Self { store, config }
    }

    /// Runs forever on a fixed interval. A single task, so passes never
    /// overlap.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "recovery sweep started (every {}s)",
            self.config.interval.as_secs()
        );

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once(Utc::now()).await {
                // Query failures point at the store itself, not at one
                // interview; surface them and try again next tick.
                error!("recovery sweep pass failed: {e:#}");
            }
        }
    }

    /// One pass over both stuck states.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.recover(
            InterviewStatus::Rendering,
            now - to_chrono(self.config.rendering_timeout),
            InterviewStatus::Ready,
        )
        .await?;
        self.recover(
            InterviewStatus::SubmittedForEvaluation,
            now - to_chrono(self.config.evaluation_timeout),
            InterviewStatus::Failed,
        )
        .await?;
        Ok(())
    }

    async fn recover(
        &self,
        from: InterviewStatus,
        cutoff: DateTime<Utc>,
        to: InterviewStatus,
    ) -> anyhow::Result<()> {
        let stuck = self.store.stuck_interviews(from, cutoff).await?;

        for interview in stuck {
            match self.store.transition(interview.id, to).await {
                Ok(true) => warn!(
                    "recovered interview {} stuck in '{}' since {}: forced to '{}'",
                    interview.id,
                    from.as_str(),
                    interview.created_at,
                    to.as_str()
                ),
                // Raced with the orchestrator; it finished first.
                Ok(false) => {}
                // One bad interview never blocks recovery of the others.
                Err(e) => error!("failed to recover interview {}: {e:#}", interview.id),
            }
        }

        Ok(())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::seconds(duration.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::interview::InterviewRow;
    use crate::orchestrator::store::memory::MemoryStore;
    use uuid::Uuid;

    fn sweep(store: Arc<MemoryStore>) -> RecoverySweep {
        RecoverySweep::new(
            store as Arc<dyn InterviewStore>,
            SweepConfig {
                interval: Duration::from_secs(300),
                rendering_timeout: Duration::from_secs(900),
                evaluation_timeout: Duration::from_secs(1800),
            },
        )
    }

    fn interview(
        status: InterviewStatus,
        age_minutes: i64,
        submitted_minutes_ago: Option<i64>,
    ) -> InterviewRow {
        let now = Utc::now();
        InterviewRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status: status.as_str().to_string(),
            created_at: now - chrono::Duration::minutes(age_minutes),
            evaluation_submitted_at: submitted_minutes_ago
                .map(|m| now - chrono::Duration::minutes(m)),
        }
    }

    #[tokio::test]
    async fn test_stale_rendering_interview_is_forced_ready() {
        let store = Arc::new(MemoryStore::default());
        let stale = interview(InterviewStatus::Rendering, 20, None);
        let stale_id = stale.id;
        store.insert_interview(stale);

        sweep(Arc::clone(&store)).sweep_once(Utc::now()).await.unwrap();

        assert_eq!(store.interview_status(stale_id), "ready");
    }

    #[tokio::test]
    async fn test_recent_rendering_interview_is_left_alone() {
        let store = Arc::new(MemoryStore::default());
        let recent = interview(InterviewStatus::Rendering, 5, None);
        let recent_id = recent.id;
        store.insert_interview(recent);

        sweep(Arc::clone(&store)).sweep_once(Utc::now()).await.unwrap();

        assert_eq!(store.interview_status(recent_id), "rendering");
    }

    #[tokio::test]
    async fn test_stale_evaluation_is_failed() {
        let store = Arc::new(MemoryStore::default());
        let stale = interview(InterviewStatus::SubmittedForEvaluation, 120, Some(45));
        let stale_id = stale.id;
        store.insert_interview(stale);

        sweep(Arc::clone(&store)).sweep_once(Utc::now()).await.unwrap();

        assert_eq!(store.interview_status(stale_id), "failed");
    }

    #[tokio::test]
    async fn test_recent_submission_time_beats_old_creation_time() {
        let store = Arc::new(MemoryStore::default());
        // Created two hours ago but submitted for evaluation five minutes
        // ago: the submission time governs, so it must not be recovered.
        let row = interview(InterviewStatus::SubmittedForEvaluation, 120, Some(5));
        let id = row.id;
        store.insert_interview(row);

        sweep(Arc::clone(&store)).sweep_once(Utc::now()).await.unwrap();

        assert_eq!(store.interview_status(id), "submitted_for_evaluation");
    }

    #[tokio::test]
    async fn test_one_bad_interview_does_not_block_the_rest() {
        let store = Arc::new(MemoryStore::default());
        let bad = interview(InterviewStatus::Rendering, 30, None);
        let good = interview(InterviewStatus::Rendering, 20, None);
        let (bad_id, good_id) = (bad.id, good.id);
        store.insert_interview(bad);
        store.insert_interview(good);
        *store.fail_transition_for.lock().unwrap() = Some(bad_id);

        sweep(Arc::clone(&store)).sweep_once(Utc::now()).await.unwrap();

        assert_eq!(store.interview_status(bad_id), "rendering");
        assert_eq!(store.interview_status(good_id), "ready");
    }

    #[tokio::test]
    async fn test_terminal_interviews_are_never_touched() {
        let store = Arc::new(MemoryStore::default());
        let done = interview(InterviewStatus::Evaluated, 600, Some(500));
        let done_id = done.id;
        store.insert_interview(done);

        sweep(Arc::clone(&store)).sweep_once(Utc::now()).await.unwrap();

        assert_eq!(store.interview_status(done_id), "evaluated");
    }
}
