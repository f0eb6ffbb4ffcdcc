use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an interview's video batch.
///
/// Transitions are monotonic forward. `Failed` is terminal and reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Created,
    Rendering,
    Ready,
    SubmittedForEvaluation,
    Evaluated,
    Failed,
}

impl InterviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewStatus::Created => "created",
            InterviewStatus::Rendering => "rendering",
            InterviewStatus::Ready => "ready",
            InterviewStatus::SubmittedForEvaluation => "submitted_for_evaluation",
            InterviewStatus::Evaluated => "evaluated",
            InterviewStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(InterviewStatus::Created),
            "rendering" => Some(InterviewStatus::Rendering),
            "ready" => Some(InterviewStatus::Ready),
            "submitted_for_evaluation" => Some(InterviewStatus::SubmittedForEvaluation),
            "evaluated" => Some(InterviewStatus::Evaluated),
            "failed" => Some(InterviewStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InterviewStatus::Evaluated | InterviewStatus::Failed)
    }

    /// Position in the forward lifecycle, used to reject backward transitions.
    fn rank(&self) -> u8 {
        match self {
            InterviewStatus::Created => 0,
            InterviewStatus::Rendering => 1,
            InterviewStatus::Ready => 2,
            InterviewStatus::SubmittedForEvaluation => 3,
            InterviewStatus::Evaluated => 4,
            InterviewStatus::Failed => 5,
        }
    }

    /// Whether moving from `self` to `to` advances the lifecycle.
    /// A transition to a state already passed (or already reached) is a
    /// no-op, never an error — this protects against races between the
    /// orchestrator and the recovery sweep.
    pub fn can_advance_to(&self, to: InterviewStatus) -> bool {
        !self.is_terminal() && to.rank() > self.rank()
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InterviewRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// Set when the interview is submitted for evaluation; the recovery
    /// sweep prefers this over `created_at` when judging staleness.
    pub evaluation_submitted_at: Option<DateTime<Utc>>,
}

impl InterviewRow {
    pub fn status(&self) -> Option<InterviewStatus> {
        InterviewStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuestionRow {
    pub id: Uuid,
    pub interview_id: Uuid,
    pub position: i32,
    pub prompt: String,
    /// Storage key of the rendered avatar video. Absent means "artifact
    /// unavailable" to consumers, never a hard error.
    pub video_key: Option<String>,
}

impl QuestionRow {
    /// A question with a non-blank video key is never regenerated.
    pub fn has_video(&self) -> bool {
        self.video_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            InterviewStatus::Created,
            InterviewStatus::Rendering,
            InterviewStatus::Ready,
            InterviewStatus::SubmittedForEvaluation,
            InterviewStatus::Evaluated,
            InterviewStatus::Failed,
        ] {
            assert_eq!(InterviewStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InterviewStatus::parse("bogus"), None);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(InterviewStatus::Rendering.can_advance_to(InterviewStatus::Ready));
        assert!(InterviewStatus::Created.can_advance_to(InterviewStatus::Rendering));
        // Backward or same-state transitions are no-ops.
        assert!(!InterviewStatus::Ready.can_advance_to(InterviewStatus::Ready));
        assert!(!InterviewStatus::Ready.can_advance_to(InterviewStatus::Rendering));
        assert!(!InterviewStatus::Evaluated.can_advance_to(InterviewStatus::Ready));
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal_state() {
        for status in [
            InterviewStatus::Created,
            InterviewStatus::Rendering,
            InterviewStatus::Ready,
            InterviewStatus::SubmittedForEvaluation,
        ] {
            assert!(status.can_advance_to(InterviewStatus::Failed));
        }
        assert!(!InterviewStatus::Failed.can_advance_to(InterviewStatus::Failed));
        assert!(!InterviewStatus::Evaluated.can_advance_to(InterviewStatus::Failed));
    }

    #[test]
    fn test_blank_video_key_counts_as_missing() {
        let mut question = QuestionRow {
            id: Uuid::new_v4(),
            interview_id: Uuid::new_v4(),
            position: 0,
            prompt: "Tell me about yourself".to_string(),
            video_key: None,
        };
        assert!(!question.has_video());

        question.video_key = Some("   ".to_string());
        assert!(!question.has_video());

        question.video_key = Some("videos/q/1.mp4".to_string());
        assert!(question.has_video());
    }
}
