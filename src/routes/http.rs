//! HTTP endpoint handlers. These are thin wrappers that forward to the engine in `AppState`.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{
  extract::{Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{error, info, instrument, warn};

use crate::domain::Level;
use crate::protocol::*;
use crate::state::AppState;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
  (status, Json(ErrorOut { error: message.into() })).into_response()
}

/// Parse the level and reject blank identifiers; the error is ready to return.
fn validate(ids: &[(&str, &str)], level: &str) -> Result<Level, Response> {
  if let Some((name, _)) = ids.iter().find(|(_, v)| v.trim().is_empty()) {
    return Err(error_response(StatusCode::BAD_REQUEST, format!("{name} must not be blank")));
  }
  level.parse::<Level>().map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state), fields(student_id = %q.student_id, subject = %q.subject, level = %q.level))]
pub async fn http_get_exam(
  State(state): State<Arc<AppState>>,
  Query(q): Query<ExamQuery>,
) -> Response {
  let level = match validate(&[("studentId", q.student_id.as_str()), ("subject", q.subject.as_str())], &q.level) {
    Ok(l) => l,
    Err(resp) => return resp,
  };
  if let Some(count) = q.count.filter(|&c| c > state.engine.max_exam_size) {
    return error_response(
      StatusCode::BAD_REQUEST,
      format!("count {count} exceeds the maximum exam size of {}", state.engine.max_exam_size),
    );
  }
  let exam = state.serve_exam(&q.student_id, &q.subject, level, q.count).await;
  if exam.items.is_empty() && q.count != Some(0) {
    error!(target: "qbank_backend", student_id = %q.student_id, subject = %q.subject, %level, "No questions could be produced");
    return error_response(StatusCode::SERVICE_UNAVAILABLE, "no questions available right now; try again later");
  }
  info!(target: "qbank_backend", student_id = %q.student_id, %level, n = exam.items.len(), source = ?exam.source, "HTTP exam served");
  Json(ExamOut { items: exam.items, source: exam.source }).into_response()
}

#[instrument(level = "info", skip(state, body), fields(student_id = %body.student_id, subject = %body.subject))]
pub async fn http_post_release(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ReleaseIn>,
) -> Response {
  let level = match validate(&[("studentId", body.student_id.as_str()), ("subject", body.subject.as_str())], &body.level) {
    Ok(l) => l,
    Err(resp) => return resp,
  };
  match state.release_exam(&body.student_id, &body.subject, level).await {
    Ok(released) => Json(ReleaseOut { released }).into_response(),
    Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
  }
}

#[instrument(level = "info", skip(state, body), fields(subject = %body.subject, level = %body.level))]
pub async fn http_post_generate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateIn>,
) -> Response {
  let level = match validate(&[("subject", body.subject.as_str())], &body.level) {
    Ok(l) => l,
    Err(resp) => return resp,
  };
  let report = state.generate(&body.subject, level, body.target_per_topic, body.max_questions).await;
  info!(target: "qbank_backend", subject = %body.subject, %level, success = report.success, generated = report.generated_count, "HTTP generation finished");
  Json(report).into_response()
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_stats(State(state): State<Arc<AppState>>) -> Response {
  match state.stats().await {
    Ok(stats) => Json(stats).into_response(),
    Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
  }
}

#[instrument(level = "info", skip(state, body), fields(student_id = %body.student_id, bank_id = %body.bank_id, answer_len = body.answer.len()))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AnswerIn>,
) -> Response {
  if body.student_id.trim().is_empty() || body.bank_id.trim().is_empty() {
    return error_response(StatusCode::BAD_REQUEST, "studentId and bankId must not be blank");
  }
  match state.record_answer(&body.student_id, &body.bank_id).await {
    Ok(Some(entry)) => Json(AnswerOut { recorded: true, expected: entry.content.answer }).into_response(),
    Ok(None) => {
      warn!(target: "qbank_backend", bank_id = %body.bank_id, "Answer for unknown bank id");
      error_response(StatusCode::NOT_FOUND, format!("unknown bankId '{}'", body.bank_id))
    }
    Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
  }
}
