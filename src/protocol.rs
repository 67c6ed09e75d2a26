//! Public protocol structs for the HTTP endpoints (serde ready).
//! Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::domain::{ExamItem, ExamSource};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamQuery {
    pub student_id: String,
    pub subject: String,
    pub level: String,
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ExamOut {
    pub items: Vec<ExamItem>,
    pub source: ExamSource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseIn {
    pub student_id: String,
    pub subject: String,
    pub level: String,
}
#[derive(Serialize)]
pub struct ReleaseOut {
    pub released: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateIn {
    pub subject: String,
    pub level: String,
    pub target_per_topic: Option<usize>,
    pub max_questions: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerIn {
    pub student_id: String,
    pub bank_id: String,
    pub answer: String,
}
#[derive(Serialize)]
pub struct AnswerOut {
    pub recorded: bool,
    pub expected: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}
