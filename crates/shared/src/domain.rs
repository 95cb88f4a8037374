use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(QuestionId);
id_newtype!(OptionId);
id_newtype!(Dimension);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultId(pub i64);

/// The two ordered question sequences of the assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Basic,
    Advanced,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Basic
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Tier::Basic => "basic",
            Tier::Advanced => "advanced",
        })
    }
}

/// Selected option per question; keys are unique by construction.
pub type AnswerMap = BTreeMap<QuestionId, OptionId>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: OptionId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub dimension: Dimension,
    pub text: String,
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub tier: Tier,
}

impl Question {
    pub fn has_option(&self, option: &OptionId) -> bool {
        self.options.iter().any(|candidate| &candidate.id == option)
    }
}

/// Resumable in-progress record, persisted after every answer change.
///
/// `current_index` is always a valid position in the active question
/// sequence, or the sequence is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub stage: Tier,
    pub answers: AnswerMap,
    pub current_index: usize,
}
