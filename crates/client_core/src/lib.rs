pub mod api;
pub mod config;
pub mod error;
pub mod flow;
pub mod history;

pub use api::{ApiClient, EvaluationApi, DEFAULT_REQUEST_TIMEOUT};
pub use config::{ConfigError, ConfigLoader};
pub use error::ClientError;
pub use flow::{
    FlowController, FlowError, FlowPhase, FlowSnapshot, StageProgress, StartOutcome, StepOutcome,
    SubmitOutcome,
};
pub use history::{top_dimensions, HistoryLog, HISTORY_CAP};
