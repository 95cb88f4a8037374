use super::*;
use shared::domain::ResultId;

async fn history_log() -> HistoryLog {
    let store = Arc::new(KvStore::new("sqlite::memory:").await.expect("store"));
    HistoryLog::new(store)
}

fn result_with_level(id: i64, overall_level: f64) -> EvaluationResult {
    EvaluationResult {
        id: ResultId(id),
        timestamp: "2024-05-01T10:00:00Z".parse().expect("timestamp"),
        overall_level,
        level_label: "club player".to_string(),
        dimensions: [
            (Dimension::new("baseline"), 3.4),
            (Dimension::new("serve"), 2.8),
            (Dimension::new("net"), 3.9),
            (Dimension::new("footwork"), 3.1),
        ]
        .into_iter()
        .collect(),
        advantages: Vec::new(),
        weaknesses: Vec::new(),
        suggestions: Default::default(),
    }
}

#[tokio::test]
async fn list_is_most_recent_first() {
    let log = history_log().await;

    log.append(&result_with_level(1, 2.5)).await.expect("append");
    log.append(&result_with_level(2, 3.0)).await.expect("append");
    log.append(&result_with_level(3, 3.5)).await.expect("append");

    let entries = log.list().await.expect("list");
    let ids: Vec<i64> = entries.iter().map(|entry| entry.id.0).collect();
    assert_eq!(ids, vec![3, 2, 1]);
}

#[tokio::test]
async fn eleventh_entry_evicts_exactly_the_oldest() {
    let log = history_log().await;

    for id in 1..=11 {
        log.append(&result_with_level(id, 3.0)).await.expect("append");
    }

    let entries = log.list().await.expect("list");
    assert_eq!(entries.len(), HISTORY_CAP);
    let ids: Vec<i64> = entries.iter().map(|entry| entry.id.0).collect();
    assert_eq!(ids, (2..=11).rev().collect::<Vec<_>>());
}

#[tokio::test]
async fn latest_tracks_the_newest_append() {
    let log = history_log().await;

    log.append(&result_with_level(5, 3.0)).await.expect("append");
    log.append(&result_with_level(6, 4.0)).await.expect("append");

    let latest = log.latest().await.expect("latest").expect("present");
    assert_eq!(latest.id, ResultId(6));
}

#[tokio::test]
async fn identical_results_are_not_deduplicated() {
    let log = history_log().await;
    let result = result_with_level(7, 3.0);

    log.append(&result).await.expect("append");
    log.append(&result).await.expect("append");

    assert_eq!(log.list().await.expect("list").len(), 2);
}

#[tokio::test]
async fn clear_removes_history_and_latest() {
    let log = history_log().await;
    log.append(&result_with_level(8, 3.0)).await.expect("append");

    log.clear().await.expect("clear");

    assert!(log.list().await.expect("list").is_empty());
    assert_eq!(log.latest().await.expect("latest"), None);
}

#[test]
fn top_dimensions_ranks_by_score() {
    let result = result_with_level(9, 3.0);
    let top = top_dimensions(&result, 3);
    assert_eq!(
        top,
        vec![
            Dimension::new("net"),
            Dimension::new("baseline"),
            Dimension::new("footwork"),
        ]
    );
}
