use std::{cmp::Ordering, sync::Arc};

use anyhow::Result;
use shared::{domain::Dimension, protocol::EvaluationResult};
use storage::{keys, KvStore};

/// Upper bound on locally retained evaluation results.
pub const HISTORY_CAP: usize = 10;

/// Most-recent-first log of evaluation results, bounded to [`HISTORY_CAP`].
///
/// Appending rewrites the whole list; O(n) is acceptable at this bound.
/// Repeated submissions each create a new entry, there is no deduplication.
#[derive(Clone)]
pub struct HistoryLog {
    store: Arc<KvStore>,
}

impl HistoryLog {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self { store }
    }

    /// Prepends the result, evicting the oldest entries past the cap, and
    /// refreshes the latest-result slot.
    pub async fn append(&self, result: &EvaluationResult) -> Result<()> {
        let mut entries = self.list().await?;
        entries.insert(0, result.clone());
        entries.truncate(HISTORY_CAP);
        self.store
            .set_many(&[
                (keys::EVALUATION_HISTORY, serde_json::to_value(&entries)?),
                (keys::LATEST_RESULT, serde_json::to_value(result)?),
            ])
            .await
    }

    pub async fn list(&self) -> Result<Vec<EvaluationResult>> {
        Ok(self
            .store
            .get(keys::EVALUATION_HISTORY)
            .await?
            .unwrap_or_default())
    }

    pub async fn latest(&self) -> Result<Option<EvaluationResult>> {
        self.store.get(keys::LATEST_RESULT).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store
            .remove_many(&[keys::EVALUATION_HISTORY, keys::LATEST_RESULT])
            .await
    }
}

/// The `count` highest-scoring dimensions of a result, best first.
pub fn top_dimensions(result: &EvaluationResult, count: usize) -> Vec<Dimension> {
    let mut entries: Vec<_> = result.dimensions.iter().collect();
    entries.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(Ordering::Equal));
    entries
        .into_iter()
        .take(count)
        .map(|(dimension, _)| dimension.clone())
        .collect()
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
