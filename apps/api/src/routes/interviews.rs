//! The collaborator surface: create an interview, trigger rendering, read
//! back status and per-question video keys. Everything heavier lives in
//! the orchestrator and pipeline modules.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::interview::{InterviewRow, InterviewStatus, QuestionRow};
use crate::orchestrator::RenderRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateInterviewRequest {
    pub user_id: Uuid,
    pub questions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateInterviewResponse {
    pub interview_id: Uuid,
    pub question_ids: Vec<Uuid>,
    pub status: InterviewStatus,
}

/// POST /api/v1/interviews
pub async fn handle_create_interview(
    State(state): State<AppState>,
    Json(req): Json<CreateInterviewRequest>,
) -> Result<Json<CreateInterviewResponse>, AppError> {
    if req.questions.is_empty() {
        return Err(AppError::Validation(
            "An interview needs at least one question".to_string(),
        ));
    }
    if !state.rate_limiter.try_consume(req.user_id) {
        return Err(AppError::RateLimited);
    }

    let interview_id = Uuid::new_v4();
    let mut tx = state.db.begin().await?;

    sqlx::query("INSERT INTO interviews (id, user_id, status) VALUES ($1, $2, $3)")
        .bind(interview_id)
        .bind(req.user_id)
        .bind(InterviewStatus::Created.as_str())
        .execute(&mut *tx)
        .await?;

    let mut question_ids = Vec::with_capacity(req.questions.len());
    for (position, prompt) in req.questions.iter().enumerate() {
        let question_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO interview_questions (id, interview_id, position, prompt) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(question_id)
        .bind(interview_id)
        .bind(position as i32)
        .bind(prompt)
        .execute(&mut *tx)
        .await?;
        question_ids.push(question_id);
    }

    tx.commit().await?;
    info!(
        "created interview {interview_id} with {} questions for user {}",
        question_ids.len(),
        req.user_id
    );

    Ok(Json(CreateInterviewResponse {
        interview_id,
        question_ids,
        status: InterviewStatus::Created,
    }))
}

/// POST /api/v1/interviews/:id/render
///
/// Flips the interview to RENDERING and hands it to the orchestrator. The
/// channel send happens only after the status write has committed, so the
/// orchestrator always sees the questions.
pub async fn handle_start_render(
    State(state): State<AppState>,
    Path(interview_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let updated = sqlx::query("UPDATE interviews SET status = $1 WHERE id = $2 AND status = $3")
        .bind(InterviewStatus::Rendering.as_str())
        .bind(interview_id)
        .bind(InterviewStatus::Created.as_str())
        .execute(&state.db)
        .await?
        .rows_affected();

    if updated == 0 {
        let exists: Option<InterviewRow> =
            sqlx::query_as("SELECT * FROM interviews WHERE id = $1")
                .bind(interview_id)
                .fetch_optional(&state.db)
                .await?;
        return match exists {
            None => Err(AppError::NotFound(format!(
                "Interview {interview_id} not found"
            ))),
            Some(row) => Err(AppError::Validation(format!(
                "Interview {interview_id} is '{}', not 'created'",
                row.status
            ))),
        };
    }

    let question_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM interview_questions WHERE interview_id = $1 ORDER BY position ASC",
    )
    .bind(interview_id)
    .fetch_all(&state.db)
    .await?;

    state
        .render_tx
        .send(RenderRequest {
            interview_id,
            question_ids,
        })
        .await
        .map_err(|_| AppError::Internal(anyhow::anyhow!("render channel closed")))?;

    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize)]
pub struct InterviewDetailResponse {
    pub interview: InterviewRow,
    pub questions: Vec<QuestionRow>,
}

/// GET /api/v1/interviews/:id
///
/// Questions without a video key are surfaced as-is; the client renders
/// them as "artifact unavailable".
pub async fn handle_get_interview(
    State(state): State<AppState>,
    Path(interview_id): Path<Uuid>,
) -> Result<Json<InterviewDetailResponse>, AppError> {
    let interview: Option<InterviewRow> =
        sqlx::query_as("SELECT * FROM interviews WHERE id = $1")
            .bind(interview_id)
            .fetch_optional(&state.db)
            .await?;
    let interview = interview
        .ok_or_else(|| AppError::NotFound(format!("Interview {interview_id} not found")))?;

    let questions: Vec<QuestionRow> = sqlx::query_as(
        "SELECT * FROM interview_questions WHERE interview_id = $1 ORDER BY position ASC",
    )
    .bind(interview_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(InterviewDetailResponse {
        interview,
        questions,
    }))
}
