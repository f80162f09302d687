// File: botlytics-core/tests/ingest_tests.rs

use std::collections::BTreeSet;
use std::sync::Arc;
use futures_util::TryStreamExt;
use serde_json::json;

use botlytics_common::models::{EventFilter, PropertyValue, RawEvent, StoredEvent};
use botlytics_common::traits::EventStore;
use botlytics_core::normalizer::EventNormalizer;
use botlytics_core::repositories::InMemoryEventStore;
use botlytics_core::services::IngestService;
use botlytics_core::test_utils::helpers::props;
use botlytics_core::Error;

fn service() -> IngestService<InMemoryEventStore> {
    IngestService::new(EventNormalizer::default(), InMemoryEventStore::new())
}

#[tokio::test]
async fn test_bot_started_with_deep_link_is_attributed() -> Result<(), Error> {
    let svc = service();
    let stored = svc
        .submit_event(
            "bot_started",
            props(json!({ "user_id": "42", "session_id": "s1", "timestamp": "T" })),
            Some("utm_source-google_utm_medium-cpc_utm_campaign-summer2024"),
        )
        .await?;

    assert_eq!(stored.id, 1);
    assert_eq!(stored.properties["source"], PropertyValue::from("google"));
    assert_eq!(stored.properties["utm_source"], PropertyValue::from("google"));
    assert_eq!(stored.properties["utm_medium"], PropertyValue::from("cpc"));
    assert_eq!(stored.properties["utm_campaign"], PropertyValue::from("summer2024"));

    let all: Vec<StoredEvent> = svc.query_events(&EventFilter::new()).await?.try_collect().await?;
    assert_eq!(all, vec![stored]);
    Ok(())
}

#[tokio::test]
async fn test_invalid_events_are_not_stored() -> Result<(), Error> {
    let svc = service();

    let err = svc
        .submit_event("tips_viewed", props(json!({ "session_id": "s1" })), None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = svc
        .submit_event("", props(json!({ "user_id": "1", "session_id": "s1" })), None)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert_eq!(svc.store().count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_payload_still_stores_event() -> Result<(), Error> {
    let svc = service();
    let stored = svc
        .submit_event(
            "bot_started",
            props(json!({ "user_id": "42", "session_id": "s1" })),
            Some("utm_source-google_utm_campaign-x"),
        )
        .await?;
    assert!(!stored.properties.contains_key("utm_source"));
    assert_eq!(stored.source(), Some("direct"));
    Ok(())
}

#[tokio::test]
async fn test_submit_raw_log_line() -> Result<(), Error> {
    let svc = service();
    let raw: RawEvent = serde_json::from_str(
        r#"{"event":"decode_completed","properties":{"user_id":7,"session_id":"s7","response_time_ms":950}}"#,
    )?;
    let stored = svc.submit_raw(raw).await?;
    assert_eq!(stored.event_type, "decode_completed");
    assert_eq!(stored.user_id(), "7");
    assert_eq!(stored.properties["response_time_ms"], PropertyValue::Int(950));
    assert_eq!(stored.properties["platform"], PropertyValue::from("telegram"));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_submissions_are_totally_ordered() -> Result<(), Error> {
    let svc = Arc::new(service());

    let mut handles = Vec::new();
    for task in 0..8 {
        let svc = Arc::clone(&svc);
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..25 {
                let stored = svc
                    .submit_event(
                        "button_clicked",
                        props(json!({ "user_id": format!("u{}", task), "session_id": "s", "n": i })),
                        None,
                    )
                    .await?;
                ids.push(stored.id);
            }
            Ok::<_, Error>(ids)
        }));
    }

    let mut appended = BTreeSet::new();
    for h in handles {
        let ids = h.await.map_err(|e| Error::Storage(e.to_string()))??;
        appended.extend(ids);
    }
    assert_eq!(appended.len(), 200);

    let all: Vec<StoredEvent> = svc.query_events(&EventFilter::new()).await?.try_collect().await?;
    assert_eq!(all.len(), 200);
    for pair in all.windows(2) {
        assert!(pair[0].id < pair[1].id);
        assert!(pair[0].received_at < pair[1].received_at);
    }
    let queried: BTreeSet<i64> = all.iter().map(|e| e.id).collect();
    assert_eq!(queried, appended);
    Ok(())
}
