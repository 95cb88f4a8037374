use super::*;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use shared::protocol::VersionInfo;
use tokio::sync::Mutex;

struct StubApi {
    config: Mutex<Value>,
    version: Mutex<Option<String>>,
}

impl StubApi {
    fn new(config: Value) -> Arc<Self> {
        let version = config
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string);
        Arc::new(Self {
            config: Mutex::new(config),
            version: Mutex::new(version),
        })
    }
}

#[async_trait]
impl EvaluationApi for StubApi {
    async fn fetch_version(&self) -> Result<VersionInfo, ClientError> {
        match self.version.lock().await.clone() {
            Some(questions_version) => Ok(VersionInfo { questions_version }),
            None => Err(ClientError::Http {
                status: StatusCode::SERVICE_UNAVAILABLE,
            }),
        }
    }

    async fn fetch_config(&self) -> Result<Value, ClientError> {
        Ok(self.config.lock().await.clone())
    }

    async fn submit_basic(
        &self,
        _answers: &shared::domain::AnswerMap,
    ) -> Result<shared::protocol::BasicEvaluation, ClientError> {
        Err(ClientError::Http {
            status: StatusCode::NOT_IMPLEMENTED,
        })
    }

    async fn submit_full(
        &self,
        _answers: &shared::domain::AnswerMap,
    ) -> Result<shared::protocol::EvaluationResult, ClientError> {
        Err(ClientError::Http {
            status: StatusCode::NOT_IMPLEMENTED,
        })
    }
}

async fn memory_store() -> Arc<KvStore> {
    Arc::new(KvStore::new("sqlite::memory:").await.expect("store"))
}

fn minimal_config(version: &str) -> Value {
    json!({
        "version": version,
        "basic_questions": [
            {
                "id": "Q1",
                "dimension": "baseline",
                "text": "Rally length?",
                "options": [{"id": "Q1_A1", "text": "Short"}]
            }
        ],
        "advanced_questions": [
            {
                "id": "A1",
                "dimension": "tactics",
                "text": "Point planning?",
                "options": [{"id": "A1_B1", "text": "Rarely"}]
            }
        ]
    })
}

#[tokio::test]
async fn load_stamps_tier_from_the_containing_array() {
    let api = StubApi::new(minimal_config("v1"));
    let loader = ConfigLoader::new(api, memory_store().await);

    let basic = loader.load(Tier::Basic).await.expect("basic");
    let advanced = loader.load(Tier::Advanced).await.expect("advanced");

    assert!(basic.iter().all(|q| q.tier == Tier::Basic));
    assert!(advanced.iter().all(|q| q.tier == Tier::Advanced));
}

#[tokio::test]
async fn empty_tier_is_a_recoverable_condition() {
    let mut config = minimal_config("v1");
    config["advanced_questions"] = json!([]);
    let api = StubApi::new(config);
    let loader = ConfigLoader::new(api, memory_store().await);

    let err = loader.load(Tier::Advanced).await.expect_err("must report");
    assert!(matches!(err, ConfigError::EmptyTier(Tier::Advanced)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn invalidate_removes_config_and_version() {
    let api = StubApi::new(minimal_config("v1"));
    let store = memory_store().await;
    let loader = ConfigLoader::new(api, store.clone());

    loader.load(Tier::Basic).await.expect("load");
    let cached: Option<String> = store.get(keys::QUESTIONS_VERSION).await.expect("get");
    assert!(cached.is_some());

    loader.invalidate().await.expect("invalidate");
    let version: Option<String> = store.get(keys::QUESTIONS_VERSION).await.expect("get");
    let config: Option<Value> = store.get(keys::QUESTIONS_CONFIG).await.expect("get");
    assert_eq!(version, None);
    assert_eq!(config, None);
}

#[test]
fn non_object_payload_is_a_format_error() {
    let err = parse_config(json!(["not", "an", "object"])).expect_err("must fail");
    assert!(matches!(err, ConfigError::Format(_)));
    assert!(!err.is_retryable());
}

#[test]
fn missing_fields_are_a_format_error() {
    let err = parse_config(json!({"version": "v1"})).expect_err("must fail");
    assert!(matches!(err, ConfigError::Format(_)));
}

#[test]
fn duplicate_question_ids_are_rejected() {
    let mut config = minimal_config("v1");
    config["advanced_questions"][0]["id"] = json!("Q1");
    let err = parse_config(config).expect_err("must fail");
    assert!(matches!(err, ConfigError::Format(message) if message.contains("duplicate")));
}

#[test]
fn optionless_questions_are_rejected() {
    let mut config = minimal_config("v1");
    config["basic_questions"][0]["options"] = json!([]);
    let err = parse_config(config).expect_err("must fail");
    assert!(matches!(err, ConfigError::Format(message) if message.contains("no options")));
}

#[test]
fn repeated_option_ids_within_a_question_are_rejected() {
    let mut config = minimal_config("v1");
    config["basic_questions"][0]["options"] = json!([
        {"id": "Q1_A1", "text": "Short"},
        {"id": "Q1_A1", "text": "Long"}
    ]);
    let err = parse_config(config).expect_err("must fail");
    assert!(matches!(err, ConfigError::Format(message) if message.contains("repeats option id")));
}
