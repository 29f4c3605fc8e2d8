use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::config::IngestConfig;
use crate::storage::MockEntityStore;

fn session(reentry_count: u32) -> SessionInfo {
    SessionInfo {
        reentry_count,
        session_start_time: 1_700_000_000_000,
        last_visit_time: None,
        total_session_time: i64::from(reentry_count) * 1_000,
        is_first_visit: None,
    }
}

fn request(participant: &str, step: &str, reentry_count: u32) -> IngestRequest {
    IngestRequest {
        research_id: "r-1".to_string(),
        participant_id: participant.to_string(),
        step_id: Some(step.to_string()),
        step_type: "smartvoc_nps".to_string(),
        step_title: "NPS".to_string(),
        response: json!({"value": 9}),
        metadata: ResponseMetadata::with_session(session(reentry_count)),
    }
}

fn fast_backoff(retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(1))
        .with_max_times(retries)
}

fn ingestor(store: Arc<MockEntityStore>) -> ResponseIngestor {
    ResponseIngestor::new(store, &IngestConfig::default()).with_conflict_backoff(fast_backoff(3))
}

#[tokio::test]
async fn test_first_answer_creates_row_with_client_reentry_count() {
    let store = Arc::new(MockEntityStore::new());
    let ingestor = ingestor(store.clone());

    let stored = ingestor.ingest(request("p-1", "nps", 4)).await.unwrap();

    assert_eq!(stored.id, "r-1");
    assert_eq!(stored.sk, "RESPONSE#p-1#nps");
    assert_eq!(stored.entity_type, "MODULE_RESPONSE");
    assert_eq!(stored.version, 1);
    assert_eq!(stored.metadata.session_info.reentry_count, 4);
    assert_eq!(stored.created_at, stored.updated_at);

    let row = store.get_one("r-1", "RESPONSE#p-1#nps").await.unwrap().unwrap();
    assert_eq!(row["researchId"], "r-1");
    assert_eq!(row["participantId"], "p-1");
    assert_eq!(row["metadata"]["sessionInfo"]["reentryCount"], 4);
}

#[tokio::test]
async fn test_step_id_defaults_to_step_type() {
    let store = Arc::new(MockEntityStore::new());
    let mut req = request("p-1", "ignored", 0);
    req.step_id = None;

    let stored = ingestor(store).ingest(req).await.unwrap();
    assert_eq!(stored.step_id, "smartvoc_nps");
    assert_eq!(stored.sk, "RESPONSE#p-1#smartvoc_nps");
}

#[tokio::test]
async fn test_reentries_accumulate_metadata_union() {
    let store = Arc::new(MockEntityStore::new());
    let ingestor = ingestor(store.clone());

    let mut first = request("p-1", "nps", 0);
    first.metadata.device_info = Some(DeviceInfo {
        device_type: DeviceType::Tablet,
        user_agent: "ua".to_string(),
        screen_width: 768,
        screen_height: 1024,
        platform: "iPad".to_string(),
        language: "es".to_string(),
    });
    ingestor.ingest(first).await.unwrap();

    let mut second = request("p-1", "nps", 1);
    second.metadata.location_info = Some(LocationInfo {
        country: Some("MX".to_string()),
        ..Default::default()
    });
    ingestor.ingest(second).await.unwrap();

    let mut third = request("p-1", "nps", 2);
    third.metadata.timing_info = Some(TimingInfo {
        duration: Some(3_500),
        ..Default::default()
    });
    third.response = json!({"value": 10});
    let stored = ingestor.ingest(third).await.unwrap();

    assert_eq!(stored.version, 3);
    assert_eq!(stored.metadata.session_info.reentry_count, 2);
    assert_eq!(
        stored.metadata.device_info.as_ref().map(|d| d.device_type),
        Some(DeviceType::Tablet)
    );
    assert_eq!(
        stored.metadata.location_info.as_ref().and_then(|l| l.country.as_deref()),
        Some("MX")
    );
    assert_eq!(
        stored.metadata.timing_info.as_ref().and_then(|t| t.duration),
        Some(3_500)
    );
    assert_eq!(stored.response, json!({"value": 10}));
    assert!(stored.created_at <= stored.updated_at);

    let reread = ingestor.responses_for_participant("r-1", "p-1").await.unwrap();
    assert_eq!(reread, vec![stored]);
}

#[tokio::test]
async fn test_regression_accepted_by_default() {
    let store = Arc::new(MockEntityStore::new());
    let ingestor = ingestor(store);

    ingestor.ingest(request("p-1", "nps", 3)).await.unwrap();
    let stored = ingestor.ingest(request("p-1", "nps", 1)).await.unwrap();

    assert_eq!(ingestor.policy(), ReentryPolicy::Accept);
    assert_eq!(stored.metadata.session_info.reentry_count, 1);
}

#[tokio::test]
async fn test_regression_clamped_or_rejected_by_policy() {
    let store = Arc::new(MockEntityStore::new());

    let clamp = ingestor(store.clone()).with_policy(ReentryPolicy::Clamp);
    clamp.ingest(request("p-1", "nps", 3)).await.unwrap();
    let stored = clamp.ingest(request("p-1", "nps", 1)).await.unwrap();
    assert_eq!(stored.metadata.session_info.reentry_count, 3);

    let reject = ingestor(store.clone()).with_policy(ReentryPolicy::Reject);
    let err = reject.ingest(request("p-1", "nps", 2)).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Conflict(MergeConflict {
            stored: 3,
            incoming: 2
        })
    ));

    // The rejected write left the row untouched.
    let rows = reject.responses_for_participant("r-1", "p-1").await.unwrap();
    assert_eq!(rows[0].version, 2);
}

#[tokio::test]
async fn test_conflicting_writer_is_retried() {
    let store = Arc::new(MockEntityStore::new());
    let ingestor = ingestor(store.clone());
    ingestor.ingest(request("p-1", "nps", 0)).await.unwrap();

    store.inject_conflicts(2);
    let stored = ingestor.ingest(request("p-1", "nps", 1)).await.unwrap();

    assert_eq!(stored.version, 2);
    assert_eq!(store.put_count(), 2);
}

#[tokio::test]
async fn test_persistent_conflict_is_contention() {
    let store = Arc::new(MockEntityStore::new());
    let ingestor = ingestor(store.clone());

    store.inject_conflicts(10);
    let err = ingestor.ingest(request("p-1", "nps", 0)).await.unwrap_err();

    assert!(matches!(err, IngestError::Contention { attempts: 4, .. }));
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn test_legacy_row_without_version_is_merged() {
    let store = Arc::new(MockEntityStore::new());
    let ingestor = ingestor(store.clone());
    ingestor.ingest(request("p-1", "nps", 0)).await.unwrap();

    let mut row = store.get_one("r-1", "RESPONSE#p-1#nps").await.unwrap().unwrap();
    row.remove("version");
    store
        .insert_raw(ItemKey::new("r-1", "RESPONSE#p-1#nps"), row)
        .await;

    let stored = ingestor.ingest(request("p-1", "nps", 1)).await.unwrap();
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn test_separator_in_ids_is_rejected() {
    let store = Arc::new(MockEntityStore::new());
    let err = ingestor(store.clone())
        .ingest(request("p#1", "nps", 0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IngestError::Storage(StorageError::InvalidKey {
            field: "participantId",
            ..
        })
    ));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_readers_reject_invalid_ids() {
    let ingestor = ingestor(Arc::new(MockEntityStore::new()));
    let invalid = |err: IngestError, expected: &str| {
        assert!(
            matches!(&err, IngestError::Storage(StorageError::InvalidKey { field, .. }) if *field == expected),
            "got {err:?}"
        );
    };

    invalid(ingestor.responses_for_research("").await.unwrap_err(), "researchId");
    invalid(ingestor.participant_ids("r#1").await.unwrap_err(), "researchId");
    invalid(
        ingestor.responses_for_participant("", "p-1").await.unwrap_err(),
        "researchId",
    );
    invalid(ingestor.session_status("", "p-1").await.unwrap_err(), "researchId");
    invalid(ingestor.session_status("r-1", "").await.unwrap_err(), "participantId");
}

#[tokio::test]
async fn test_storage_failure_propagates() {
    let store = Arc::new(MockEntityStore::new());
    store.set_fail_on_put(true).await;

    let err = ingestor(store).ingest(request("p-1", "nps", 0)).await.unwrap_err();
    assert!(matches!(err, IngestError::Storage(StorageError::Unavailable(_))));
}

#[tokio::test]
async fn test_retrieval_by_research_and_participant() {
    let store = Arc::new(MockEntityStore::new());
    let ingestor = ingestor(store.clone());

    ingestor.ingest(request("p-2", "welcome", 0)).await.unwrap();
    ingestor.ingest(request("p-1", "nps", 0)).await.unwrap();
    ingestor.ingest(request("p-1", "csat", 0)).await.unwrap();
    ingestor.mark_completed("r-1", "p-1").await.unwrap();

    let all = ingestor.responses_for_research("r-1").await.unwrap();
    let sks: Vec<_> = all.iter().map(|r| r.sk.as_str()).collect();
    assert_eq!(
        sks,
        vec!["RESPONSE#p-1#csat", "RESPONSE#p-1#nps", "RESPONSE#p-2#welcome"]
    );

    let p1 = ingestor.responses_for_participant("r-1", "p-1").await.unwrap();
    assert_eq!(p1.len(), 2);
    assert!(p1.iter().all(|r| r.participant_id == "p-1"));

    assert_eq!(
        ingestor.participant_ids("r-1").await.unwrap(),
        vec!["p-1".to_string(), "p-2".to_string()]
    );
    assert!(ingestor.responses_for_research("r-other").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_undecodable_rows_are_skipped() {
    let store = Arc::new(MockEntityStore::new());
    let ingestor = ingestor(store.clone());
    ingestor.ingest(request("p-1", "nps", 0)).await.unwrap();
    store
        .put(
            json!({
                "id": "r-1",
                "sk": "RESPONSE#p-1#broken",
                "researchId": "r-1",
                "participantId": "p-1",
                "response": "no metadata"
            })
            .as_object()
            .cloned()
            .unwrap(),
        )
        .await
        .unwrap();

    let rows = ingestor.responses_for_research("r-1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].step_id, "nps");
}

#[tokio::test]
async fn test_session_completion() {
    let store = Arc::new(MockEntityStore::new());
    let ingestor = ingestor(store);

    assert!(ingestor.session_status("r-1", "p-1").await.unwrap().is_none());

    let session = ingestor.mark_completed("r-1", "p-1").await.unwrap();
    assert_eq!(session.sk, "SESSION#p-1");
    assert_eq!(session.entity_type, "PARTICIPANT_SESSION");

    let status = ingestor.session_status("r-1", "p-1").await.unwrap().unwrap();
    assert!(status.is_completed);
    assert!(status.completed_at.is_some());
}
