use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AnswerMap, Dimension, Question, ResultId},
    error::ApiError,
};

/// Business status code that marks a successful envelope.
pub const ENVELOPE_OK: i64 = 200;

/// Wrapper carried by every 2xx response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: ENVELOPE_OK,
            message: None,
            data: Some(data),
        }
    }

    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        if self.code == ENVELOPE_OK {
            Ok(self.data)
        } else {
            Err(ApiError {
                code: self.code,
                message: self
                    .message
                    .unwrap_or_else(|| "operation failed".to_string()),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub questions_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionnaireConfig {
    pub version: String,
    pub basic_questions: Vec<Question>,
    pub advanced_questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub answers: AnswerMap,
}

/// Final rating produced by the remote scorer; immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub id: ResultId,
    pub timestamp: DateTime<Utc>,
    pub overall_level: f64,
    pub level_label: String,
    pub dimensions: BTreeMap<Dimension, f64>,
    #[serde(default)]
    pub advantages: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: BTreeMap<Dimension, Vec<String>>,
}

/// Response of the basic-tier evaluation endpoint. The embedded result is
/// the basic-only rating, final whenever the advanced tier is skipped or
/// declined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicEvaluation {
    pub need_advanced: bool,
    pub rounded_level: f64,
    pub result: EvaluationResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionInfo {
    pub key: Dimension,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub open_id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHistoryPage {
    pub items: Vec<EvaluationResult>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingDrill {
    pub dimension: Dimension,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPlan {
    pub result_id: ResultId,
    pub drills: Vec<TrainingDrill>,
}
