use std::{collections::HashSet, sync::Arc};

use serde_json::Value;
use shared::{
    domain::{Question, Tier},
    protocol::QuestionnaireConfig,
};
use storage::{keys, KvStore};
use thiserror::Error;
use tracing::{info, warn};

use crate::{api::EvaluationApi, error::ClientError};

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The fetched config does not have the expected shape. Recoverable by
    /// invalidating the cache and reloading.
    #[error("question config is malformed: {0}")]
    Format(String),
    /// The requested tier has no questions; the caller should offer a retry
    /// or abandon choice.
    #[error("no questions available for the {0} tier")]
    EmptyTier(Tier),
    #[error(transparent)]
    Api(#[from] ClientError),
    #[error("local storage failure: {0}")]
    Storage(anyhow::Error),
}

impl ConfigError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmptyTier(_) => true,
            Self::Api(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for ConfigError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

/// Loads the versioned question set, refreshing the local cache whenever
/// the server-reported version differs from the cached one.
pub struct ConfigLoader {
    api: Arc<dyn EvaluationApi>,
    store: Arc<KvStore>,
}

impl ConfigLoader {
    pub fn new(api: Arc<dyn EvaluationApi>, store: Arc<KvStore>) -> Self {
        Self { api, store }
    }

    /// Returns the question sequence for one tier, serving from cache only
    /// when the cached version matches the server-reported version.
    pub async fn load(&self, tier: Tier) -> Result<Vec<Question>, ConfigError> {
        let config = self.current_config().await?;
        let questions = match tier {
            Tier::Basic => config.basic_questions,
            Tier::Advanced => config.advanced_questions,
        };
        if questions.is_empty() {
            return Err(ConfigError::EmptyTier(tier));
        }
        Ok(questions)
    }

    async fn current_config(&self) -> Result<QuestionnaireConfig, ConfigError> {
        // A failed version check must not let a possibly outdated cache win;
        // question content correctness beats availability here.
        let server_version = match self.api.fetch_version().await {
            Ok(info) => Some(info.questions_version),
            Err(err) => {
                warn!(error = %err, "version check failed, treating cached config as stale");
                None
            }
        };

        if let Some(server_version) = &server_version {
            let cached_version: Option<String> = self.store.get(keys::QUESTIONS_VERSION).await?;
            if cached_version.as_deref() == Some(server_version.as_str()) {
                if let Some(config) = self
                    .store
                    .get::<QuestionnaireConfig>(keys::QUESTIONS_CONFIG)
                    .await?
                {
                    return Ok(config);
                }
            }
        }

        self.refresh().await
    }

    /// Fetches the full config and overwrites the cache (config + version)
    /// in one transaction; the cache is never merged.
    pub async fn refresh(&self) -> Result<QuestionnaireConfig, ConfigError> {
        let raw = self.api.fetch_config().await?;
        let config = parse_config(raw)?;
        self.store
            .set_many(&[
                (
                    keys::QUESTIONS_CONFIG,
                    serde_json::to_value(&config).map_err(|err| ConfigError::Storage(err.into()))?,
                ),
                (
                    keys::QUESTIONS_VERSION,
                    Value::String(config.version.clone()),
                ),
            ])
            .await?;
        info!(
            version = %config.version,
            basic = config.basic_questions.len(),
            advanced = config.advanced_questions.len(),
            "question config refreshed"
        );
        Ok(config)
    }

    pub async fn invalidate(&self) -> Result<(), ConfigError> {
        self.store
            .remove_many(&[keys::QUESTIONS_CONFIG, keys::QUESTIONS_VERSION])
            .await?;
        Ok(())
    }
}

fn parse_config(raw: Value) -> Result<QuestionnaireConfig, ConfigError> {
    if !raw.is_object() {
        return Err(ConfigError::Format(
            "config payload is not an object".to_string(),
        ));
    }
    let mut config: QuestionnaireConfig =
        serde_json::from_value(raw).map_err(|err| ConfigError::Format(err.to_string()))?;

    // Array membership is authoritative for tier assignment.
    for question in &mut config.basic_questions {
        question.tier = Tier::Basic;
    }
    for question in &mut config.advanced_questions {
        question.tier = Tier::Advanced;
    }

    let mut seen = HashSet::new();
    for question in config
        .basic_questions
        .iter()
        .chain(config.advanced_questions.iter())
    {
        if !seen.insert(&question.id) {
            return Err(ConfigError::Format(format!(
                "duplicate question id {}",
                question.id
            )));
        }
        if question.options.is_empty() {
            return Err(ConfigError::Format(format!(
                "question {} has no options",
                question.id
            )));
        }
        let mut option_ids = HashSet::new();
        for option in &question.options {
            if !option_ids.insert(&option.id) {
                return Err(ConfigError::Format(format!(
                    "question {} repeats option id {}",
                    question.id, option.id
                )));
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
