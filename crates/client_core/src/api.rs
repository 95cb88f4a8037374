use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{AnswerMap, ResultId},
    protocol::{
        BasicEvaluation, DimensionInfo, Envelope, EvaluationRequest, EvaluationResult,
        LoginRequest, LoginResponse, RemoteHistoryPage, TrainingPlan, VersionInfo,
    },
};
use storage::{keys, KvStore};
use tracing::{debug, info, warn};

use crate::error::ClientError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const NO_BODY: Option<&()> = None;

/// Scoring backend operations the questionnaire flow depends on.
#[async_trait]
pub trait EvaluationApi: Send + Sync {
    async fn fetch_version(&self) -> Result<VersionInfo, ClientError>;
    /// Raw config payload; shape validation belongs to the config loader.
    async fn fetch_config(&self) -> Result<Value, ClientError>;
    async fn submit_basic(&self, answers: &AnswerMap) -> Result<BasicEvaluation, ClientError>;
    async fn submit_full(&self, answers: &AnswerMap) -> Result<EvaluationResult, ClientError>;
}

/// HTTP client for the assessment backend.
///
/// Attaches the stored bearer token to authenticated calls and normalizes
/// every outcome into the [`ClientError`] taxonomy. A 401 response clears
/// the stored token.
pub struct ApiClient {
    http: Client,
    base_url: String,
    store: Arc<KvStore>,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, store: Arc<KvStore>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn send<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        authenticated: bool,
    ) -> Result<Option<T>, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .timeout(self.request_timeout);

        if authenticated {
            if let Some(token) = self.store.get::<String>(keys::TOKEN).await? {
                request = request.bearer_auth(token);
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%url, "dispatching api request");
        let response = request.send().await.map_err(ClientError::from_send)?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            self.store.remove(keys::TOKEN).await?;
            warn!(%url, "credentials rejected, stored token cleared");
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ClientError::Http { status });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|err| ClientError::MalformedResponse(err.to_string()))?;
        Ok(envelope.into_result()?)
    }

    async fn expect_data<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        authenticated: bool,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(method, path, body, authenticated)
            .await?
            .ok_or_else(|| {
                ClientError::MalformedResponse(format!("response for {path} carried no data"))
            })
    }

    /// Exchanges a host-provided login code for a bearer token and stores
    /// token and profile locally.
    pub async fn login(&self, code: &str) -> Result<LoginResponse, ClientError> {
        let login: LoginResponse = self
            .expect_data(
                Method::POST,
                "/auth/wx-login",
                Some(&LoginRequest {
                    code: code.to_string(),
                }),
                false,
            )
            .await?;
        self.store.set(keys::TOKEN, &login.token, None).await?;
        self.store
            .set(keys::USER_PROFILE, &login.user, None)
            .await?;
        info!(open_id = %login.user.open_id, "login succeeded");
        Ok(login)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        self.store
            .remove_many(&[keys::TOKEN, keys::USER_PROFILE])
            .await?;
        Ok(())
    }

    pub async fn fetch_dimensions(&self) -> Result<Vec<DimensionInfo>, ClientError> {
        self.expect_data(Method::GET, "/questionnaire/dimensions", NO_BODY, false)
            .await
    }

    pub async fn fetch_result(&self, id: ResultId) -> Result<EvaluationResult, ClientError> {
        self.expect_data(
            Method::GET,
            &format!("/evaluation/result/{}", id.0),
            NO_BODY,
            true,
        )
        .await
    }

    pub async fn delete_result(&self, id: ResultId) -> Result<(), ClientError> {
        self.send::<Value, ()>(
            Method::DELETE,
            &format!("/evaluation/result/{}", id.0),
            None,
            true,
        )
        .await?;
        Ok(())
    }

    pub async fn fetch_remote_history(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<RemoteHistoryPage, ClientError> {
        self.expect_data(
            Method::GET,
            &format!("/evaluation/history?page={page}&page_size={page_size}"),
            NO_BODY,
            true,
        )
        .await
    }

    pub async fn fetch_training_plan(&self, result: ResultId) -> Result<TrainingPlan, ClientError> {
        self.expect_data(
            Method::GET,
            &format!("/training/plan/{}", result.0),
            NO_BODY,
            true,
        )
        .await
    }
}

#[async_trait]
impl EvaluationApi for ApiClient {
    async fn fetch_version(&self) -> Result<VersionInfo, ClientError> {
        self.expect_data(Method::GET, "/version", NO_BODY, false)
            .await
    }

    async fn fetch_config(&self) -> Result<Value, ClientError> {
        self.expect_data(Method::GET, "/questionnaire/config", NO_BODY, false)
            .await
    }

    async fn submit_basic(&self, answers: &AnswerMap) -> Result<BasicEvaluation, ClientError> {
        self.expect_data(
            Method::POST,
            "/evaluation/basic",
            Some(&EvaluationRequest {
                answers: answers.clone(),
            }),
            true,
        )
        .await
    }

    async fn submit_full(&self, answers: &AnswerMap) -> Result<EvaluationResult, ClientError> {
        self.expect_data(
            Method::POST,
            "/evaluation/full",
            Some(&EvaluationRequest {
                answers: answers.clone(),
            }),
            true,
        )
        .await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
