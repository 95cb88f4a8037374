use std::sync::Arc;

use shared::{
    domain::{AnswerMap, OptionId, ProgressState, Question, QuestionId, Tier},
    protocol::{BasicEvaluation, EvaluationResult},
};
use storage::{keys, KvStore};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    api::EvaluationApi,
    config::{ConfigError, ConfigLoader},
    error::ClientError,
    history::HistoryLog,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Idle,
    Basic,
    AwaitingAdvancedDecision,
    Advanced,
    Submitting,
    Done,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ClientError),
    #[error("local storage failure: {0}")]
    Storage(anyhow::Error),
    #[error("the current question has no selection")]
    Unanswered,
    #[error("no question at the current position")]
    NoCurrentQuestion,
    #[error("option {option} does not belong to question {question}")]
    InvalidOption {
        question: QuestionId,
        option: OptionId,
    },
    #[error("operation not valid in the {phase:?} phase")]
    InvalidPhase { phase: FlowPhase },
    #[error("a newer flow state superseded this response")]
    Superseded,
    #[error("no saved progress to resume")]
    NothingToResume,
}

impl FlowError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(err) => err.is_retryable(),
            Self::Api(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Fresh {
        total: usize,
    },
    /// Saved progress exists; the host should offer resume or discard.
    SavedProgress {
        stage: Tier,
        answered: usize,
        total: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Moved { index: usize },
    /// The last question of the stage is answered; submit next.
    StageComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Unanswered questions remain; resubmit with `allow_partial` after the
    /// user confirms.
    ConfirmPartial { unanswered: Vec<QuestionId> },
    AdvancedOffered { rounded_level: f64 },
    Completed(EvaluationResult),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub stage: Tier,
    pub current_index: usize,
    pub answered: usize,
    pub total: usize,
}

pub(crate) enum Advance {
    Moved(usize),
    AtEnd,
}

/// Answering state for one stage. Transitions are pure: no I/O, no clock,
/// no shared state, which keeps navigation properties unit-testable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    stage: Tier,
    questions: Vec<Question>,
    answers: AnswerMap,
    current_index: usize,
}

impl StageProgress {
    fn new(stage: Tier, questions: Vec<Question>) -> Self {
        Self {
            stage,
            questions,
            answers: AnswerMap::new(),
            current_index: 0,
        }
    }

    fn with_saved(stage: Tier, questions: Vec<Question>, saved: AnswerMap) -> Self {
        let mut progress = Self::new(stage, questions);
        progress.restore(saved);
        progress
    }

    /// Installs a saved answer map, dropping answers for unknown question
    /// ids, and repositions at the first unanswered question.
    fn restore(&mut self, saved: AnswerMap) {
        self.answers = saved
            .into_iter()
            .filter(|(id, _)| self.questions.iter().any(|question| &question.id == id))
            .collect();
        self.current_index = self
            .first_unanswered()
            .unwrap_or_else(|| self.questions.len().saturating_sub(1));
    }

    pub fn stage(&self) -> Tier {
        self.stage
    }

    pub fn total(&self) -> usize {
        self.questions.len()
    }

    pub fn answered(&self) -> usize {
        self.answers.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    pub fn selected_answer(&self) -> Option<&OptionId> {
        self.current_question()
            .and_then(|question| self.answers.get(&question.id))
    }

    pub fn answers(&self) -> &AnswerMap {
        &self.answers
    }

    pub fn first_unanswered(&self) -> Option<usize> {
        self.questions
            .iter()
            .position(|question| !self.answers.contains_key(&question.id))
    }

    pub fn unanswered(&self) -> Vec<QuestionId> {
        self.questions
            .iter()
            .filter(|question| !self.answers.contains_key(&question.id))
            .map(|question| question.id.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.first_unanswered().is_none()
    }

    fn select(&mut self, option: OptionId) -> Result<(), FlowError> {
        let question = self
            .questions
            .get(self.current_index)
            .ok_or(FlowError::NoCurrentQuestion)?;
        if !question.has_option(&option) {
            return Err(FlowError::InvalidOption {
                question: question.id.clone(),
                option,
            });
        }
        self.answers.insert(question.id.clone(), option);
        Ok(())
    }

    fn advance(&mut self) -> Result<Advance, FlowError> {
        let question = self
            .questions
            .get(self.current_index)
            .ok_or(FlowError::NoCurrentQuestion)?;
        if !self.answers.contains_key(&question.id) {
            return Err(FlowError::Unanswered);
        }
        if self.current_index + 1 < self.questions.len() {
            self.current_index += 1;
            Ok(Advance::Moved(self.current_index))
        } else {
            Ok(Advance::AtEnd)
        }
    }

    fn retreat(&mut self) -> Option<usize> {
        if self.current_index == 0 {
            None
        } else {
            self.current_index -= 1;
            Some(self.current_index)
        }
    }

    fn to_progress_state(&self) -> ProgressState {
        ProgressState {
            stage: self.stage,
            answers: self.answers.clone(),
            current_index: self.current_index,
        }
    }
}

struct FlowInner {
    phase: FlowPhase,
    stage: Option<StageProgress>,
    pending_basic: Option<BasicEvaluation>,
    basic_answers: Option<AnswerMap>,
    result: Option<EvaluationResult>,
    /// Bumped on every applied transition; in-flight responses captured
    /// against an older generation are discarded instead of applied.
    generation: u64,
}

/// Drives the two-stage questionnaire: answer capture, progress
/// persistence, stage transition and submission.
pub struct FlowController {
    api: Arc<dyn EvaluationApi>,
    store: Arc<KvStore>,
    loader: ConfigLoader,
    history: HistoryLog,
    inner: Mutex<FlowInner>,
}

impl FlowController {
    pub fn new(api: Arc<dyn EvaluationApi>, store: Arc<KvStore>) -> Self {
        Self {
            loader: ConfigLoader::new(api.clone(), store.clone()),
            history: HistoryLog::new(store.clone()),
            api,
            store,
            inner: Mutex::new(FlowInner {
                phase: FlowPhase::Idle,
                stage: None,
                pending_basic: None,
                basic_answers: None,
                result: None,
                generation: 0,
            }),
        }
    }

    /// Loads the basic sequence and enters `Basic` with an empty answer
    /// map. Reports saved progress, if any, without consuming it; the host
    /// decides between [`resume`](Self::resume) and
    /// [`discard_saved`](Self::discard_saved).
    pub async fn start(&self) -> Result<StartOutcome, FlowError> {
        let generation = {
            let inner = self.inner.lock().await;
            if !matches!(inner.phase, FlowPhase::Idle | FlowPhase::Done) {
                return Err(FlowError::InvalidPhase { phase: inner.phase });
            }
            inner.generation
        };

        let questions = self.loader.load(Tier::Basic).await?;
        let saved: Option<ProgressState> = self.store.get(keys::CURRENT_ANSWERS).await?;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return Err(FlowError::Superseded);
        }
        inner.generation += 1;
        let total = questions.len();
        inner.phase = FlowPhase::Basic;
        inner.stage = Some(StageProgress::new(Tier::Basic, questions));
        inner.pending_basic = None;
        inner.basic_answers = None;
        inner.result = None;

        // An advanced-stage record is resumable even with zero advanced
        // answers: the completed basic tier is what it preserves.
        match saved.filter(|progress| {
            progress.stage == Tier::Advanced || !progress.answers.is_empty()
        }) {
            Some(progress) => {
                debug!(stage = %progress.stage, answered = progress.answers.len(), "saved progress found");
                Ok(StartOutcome::SavedProgress {
                    stage: progress.stage,
                    answered: progress.answers.len(),
                    total,
                })
            }
            None => Ok(StartOutcome::Fresh { total }),
        }
    }

    /// Restores the persisted answer map and stage; the position after
    /// resuming is the first unanswered question.
    pub async fn resume(&self) -> Result<(), FlowError> {
        let generation = {
            let inner = self.inner.lock().await;
            if inner.phase != FlowPhase::Basic {
                return Err(FlowError::InvalidPhase { phase: inner.phase });
            }
            inner.generation
        };

        let saved: Option<ProgressState> = self.store.get(keys::CURRENT_ANSWERS).await?;
        let Some(saved) = saved else {
            return Err(FlowError::NothingToResume);
        };

        match saved.stage {
            Tier::Basic => {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return Err(FlowError::Superseded);
                }
                let stage = inner.stage.as_mut().ok_or(FlowError::NoCurrentQuestion)?;
                stage.restore(saved.answers);
                inner.generation += 1;
                info!("resumed basic stage from saved progress");
                Ok(())
            }
            Tier::Advanced => {
                // An advanced-stage resume is only coherent when the basic
                // answers survived alongside it.
                let basic: Option<AnswerMap> = self.store.get(keys::BASIC_ANSWERS).await?;
                let Some(basic) = basic else {
                    self.clear_progress_keys().await?;
                    return Err(FlowError::NothingToResume);
                };
                let questions = self.loader.load(Tier::Advanced).await?;

                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return Err(FlowError::Superseded);
                }
                inner.generation += 1;
                inner.phase = FlowPhase::Advanced;
                inner.basic_answers = Some(basic);
                inner.stage = Some(StageProgress::with_saved(
                    Tier::Advanced,
                    questions,
                    saved.answers,
                ));
                info!("resumed advanced stage from saved progress");
                Ok(())
            }
        }
    }

    /// Drops the persisted progress; the fresh state from
    /// [`start`](Self::start) stays in place.
    pub async fn discard_saved(&self) -> Result<(), FlowError> {
        self.clear_progress_keys().await?;
        Ok(())
    }

    /// Records the option for the current question, replacing any previous
    /// selection, and persists the progress record.
    pub async fn select_answer(&self, option: OptionId) -> Result<(), FlowError> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.phase, FlowPhase::Basic | FlowPhase::Advanced) {
            return Err(FlowError::InvalidPhase { phase: inner.phase });
        }
        let stage = inner.stage.as_mut().ok_or(FlowError::NoCurrentQuestion)?;
        stage.select(option)?;
        let progress = stage.to_progress_state();
        inner.generation += 1;
        self.persist_progress(&progress).await?;
        Ok(())
    }

    /// Moves forward; requires a selection for the current question.
    pub async fn next(&self) -> Result<StepOutcome, FlowError> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.phase, FlowPhase::Basic | FlowPhase::Advanced) {
            return Err(FlowError::InvalidPhase { phase: inner.phase });
        }
        let stage = inner.stage.as_mut().ok_or(FlowError::NoCurrentQuestion)?;
        match stage.advance()? {
            Advance::Moved(index) => {
                let progress = stage.to_progress_state();
                inner.generation += 1;
                self.persist_progress(&progress).await?;
                Ok(StepOutcome::Moved { index })
            }
            Advance::AtEnd => Ok(StepOutcome::StageComplete),
        }
    }

    /// Moves backward; answers are retained, navigation is index-based.
    pub async fn previous(&self) -> Result<Option<usize>, FlowError> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.phase, FlowPhase::Basic | FlowPhase::Advanced) {
            return Err(FlowError::InvalidPhase { phase: inner.phase });
        }
        let stage = inner.stage.as_mut().ok_or(FlowError::NoCurrentQuestion)?;
        match stage.retreat() {
            Some(index) => {
                let progress = stage.to_progress_state();
                inner.generation += 1;
                self.persist_progress(&progress).await?;
                Ok(Some(index))
            }
            None => Ok(None),
        }
    }

    /// Submits the active stage. With unanswered questions and
    /// `allow_partial == false` no network call is made; the host asks the
    /// user and resubmits with `allow_partial == true`.
    ///
    /// On failure the controller stays in the pre-submission state, so a
    /// retry reuses the same answer map.
    pub async fn submit_stage(&self, allow_partial: bool) -> Result<SubmitOutcome, FlowError> {
        let (generation, tier, answers) = {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.phase, FlowPhase::Basic | FlowPhase::Advanced) {
                return Err(FlowError::InvalidPhase { phase: inner.phase });
            }
            let stage = inner.stage.as_ref().ok_or(FlowError::NoCurrentQuestion)?;
            let unanswered = stage.unanswered();
            if !unanswered.is_empty() && !allow_partial {
                return Ok(SubmitOutcome::ConfirmPartial { unanswered });
            }
            let tier = stage.stage();
            let answers = match tier {
                Tier::Basic => stage.answers().clone(),
                // Advanced entries win on key collision; by construction the
                // key sets are disjoint.
                Tier::Advanced => {
                    let mut merged = inner.basic_answers.clone().unwrap_or_default();
                    merged.extend(stage.answers().clone());
                    merged
                }
            };
            inner.phase = FlowPhase::Submitting;
            inner.generation += 1;
            (inner.generation, tier, answers)
        };

        match tier {
            Tier::Basic => match self.api.submit_basic(&answers).await {
                Ok(evaluation) if evaluation.need_advanced => {
                    let mut inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return Err(FlowError::Superseded);
                    }
                    inner.generation += 1;
                    inner.phase = FlowPhase::AwaitingAdvancedDecision;
                    let rounded_level = evaluation.rounded_level;
                    inner.pending_basic = Some(evaluation);
                    info!(rounded_level, "advanced tier recommended");
                    Ok(SubmitOutcome::AdvancedOffered { rounded_level })
                }
                Ok(evaluation) => {
                    let result = self.finalize(generation, evaluation.result).await?;
                    Ok(SubmitOutcome::Completed(result))
                }
                Err(err) => {
                    self.restore_after_failed_submit(generation, tier).await;
                    Err(err.into())
                }
            },
            Tier::Advanced => match self.api.submit_full(&answers).await {
                Ok(result) => {
                    let result = self.finalize(generation, result).await?;
                    Ok(SubmitOutcome::Completed(result))
                }
                Err(err) => {
                    self.restore_after_failed_submit(generation, tier).await;
                    Err(err.into())
                }
            },
        }
    }

    /// Preserves the basic answers under their own key, starts a fresh
    /// answer map and loads the advanced sequence.
    pub async fn accept_advanced(&self) -> Result<(), FlowError> {
        let generation = {
            let inner = self.inner.lock().await;
            if inner.phase != FlowPhase::AwaitingAdvancedDecision {
                return Err(FlowError::InvalidPhase { phase: inner.phase });
            }
            inner.generation
        };

        let questions = self.loader.load(Tier::Advanced).await?;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return Err(FlowError::Superseded);
        }
        let basic = inner
            .stage
            .as_ref()
            .map(|stage| stage.answers().clone())
            .unwrap_or_default();
        self.store
            .set(keys::BASIC_ANSWERS, &basic, None)
            .await
            .map_err(FlowError::Storage)?;
        let stage = StageProgress::new(Tier::Advanced, questions);
        self.persist_progress(&stage.to_progress_state()).await?;
        inner.generation += 1;
        inner.phase = FlowPhase::Advanced;
        inner.basic_answers = Some(basic);
        info!(total = stage.total(), "advanced stage started");
        inner.stage = Some(stage);
        inner.pending_basic = None;
        Ok(())
    }

    /// Treats the basic-only evaluation as final.
    pub async fn decline_advanced(&self) -> Result<EvaluationResult, FlowError> {
        let (generation, result) = {
            let inner = self.inner.lock().await;
            if inner.phase != FlowPhase::AwaitingAdvancedDecision {
                return Err(FlowError::InvalidPhase { phase: inner.phase });
            }
            let Some(pending) = inner.pending_basic.as_ref() else {
                return Err(FlowError::InvalidPhase { phase: inner.phase });
            };
            (inner.generation, pending.result.clone())
        };
        self.finalize(generation, result).await
    }

    /// Abandons the in-memory run; persisted progress stays resumable. Any
    /// response still in flight is discarded by the generation bump.
    pub async fn abandon(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.phase = FlowPhase::Idle;
        inner.stage = None;
        inner.pending_basic = None;
        inner.basic_answers = None;
    }

    pub async fn phase(&self) -> FlowPhase {
        self.inner.lock().await.phase
    }

    pub async fn current_question(&self) -> Option<Question> {
        let inner = self.inner.lock().await;
        if !matches!(inner.phase, FlowPhase::Basic | FlowPhase::Advanced) {
            return None;
        }
        inner
            .stage
            .as_ref()
            .and_then(|stage| stage.current_question().cloned())
    }

    pub async fn selected_answer(&self) -> Option<OptionId> {
        let inner = self.inner.lock().await;
        inner
            .stage
            .as_ref()
            .and_then(|stage| stage.selected_answer().cloned())
    }

    pub async fn progress(&self) -> Option<FlowSnapshot> {
        let inner = self.inner.lock().await;
        inner.stage.as_ref().map(|stage| FlowSnapshot {
            stage: stage.stage(),
            current_index: stage.current_index(),
            answered: stage.answered(),
            total: stage.total(),
        })
    }

    pub async fn result(&self) -> Option<EvaluationResult> {
        self.inner.lock().await.result.clone()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    async fn restore_after_failed_submit(&self, generation: u64, tier: Tier) {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        inner.generation += 1;
        inner.phase = match tier {
            Tier::Basic => FlowPhase::Basic,
            Tier::Advanced => FlowPhase::Advanced,
        };
    }

    /// Terminal transition: record the result, clear every progress key and
    /// enter `Done`. Local bookkeeping failures are logged but do not undo a
    /// submission the server already accepted.
    async fn finalize(
        &self,
        generation: u64,
        result: EvaluationResult,
    ) -> Result<EvaluationResult, FlowError> {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return Err(FlowError::Superseded);
        }
        if let Err(err) = self.history.append(&result).await {
            warn!(error = %err, "failed to record evaluation result in local history");
        }
        if let Err(err) = self
            .store
            .remove_many(&[keys::CURRENT_ANSWERS, keys::CURRENT_STAGE, keys::BASIC_ANSWERS])
            .await
        {
            warn!(error = %err, "failed to clear persisted progress after completion");
        }
        inner.generation += 1;
        inner.phase = FlowPhase::Done;
        inner.stage = None;
        inner.pending_basic = None;
        inner.basic_answers = None;
        inner.result = Some(result.clone());
        info!(result_id = result.id.0, level = result.overall_level, "assessment finalized");
        Ok(result)
    }

    async fn persist_progress(&self, progress: &ProgressState) -> Result<(), FlowError> {
        self.store
            .set_many(&[
                (
                    keys::CURRENT_ANSWERS,
                    serde_json::to_value(progress).map_err(|err| FlowError::Storage(err.into()))?,
                ),
                (
                    keys::CURRENT_STAGE,
                    serde_json::to_value(progress.stage)
                        .map_err(|err| FlowError::Storage(err.into()))?,
                ),
            ])
            .await?;
        Ok(())
    }

    async fn clear_progress_keys(&self) -> Result<(), FlowError> {
        self.store
            .remove_many(&[keys::CURRENT_ANSWERS, keys::CURRENT_STAGE, keys::BASIC_ANSWERS])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/flow_tests.rs"]
mod tests;
