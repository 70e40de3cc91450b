// ABOUTME: Integration tests for webhook handshake verification and event delivery
// ABOUTME: Covers idempotency, classification, subscription gating, and charset tolerance
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use anyhow::Result;
use common::{envelope, envelope_at, RecordingNotifier, StaticCredentialProvider, TestPipeline};
use pierre_webhook_ingest::{
    database::NewWebhookEvent,
    models::{EventStatus, IdentityStatus},
    providers::{ActivityFetcher, FetchError, RawActivity},
    receiver::{compute_event_uid, DeliveryOutcome, HandshakeOutcome},
};
use std::sync::Arc;

/// An event row stuck in `received`: the original delivery crashed
/// between insert and classification
async fn insert_unclassified_event(
    pipeline: &TestPipeline,
    object_type: &str,
    aspect_type: &str,
    object_id: i64,
    owner_id: i64,
) -> Result<String> {
    let event_uid = compute_event_uid(
        1,
        owner_id,
        object_type,
        object_id,
        aspect_type,
        1_700_000_000,
    );
    let new_event = NewWebhookEvent {
        event_uid: event_uid.clone(),
        object_type: object_type.into(),
        aspect_type: aspect_type.into(),
        object_id,
        owner_id,
        subscription_id: 1,
        event_time: 1_700_000_000,
        payload_raw: String::from_utf8(envelope(object_type, aspect_type, object_id, owner_id))?,
    };
    let (event, created) = pipeline.database.get_or_create_event(&new_event).await?;
    assert!(created);
    assert_eq!(event.status, EventStatus::Received);
    Ok(event_uid)
}

async fn pipeline() -> Result<TestPipeline> {
    let fetcher = common::MockFetcher::new(vec![Err(FetchError::Transient(
        "receiver tests never fetch".into(),
    ))]);
    TestPipeline::new(
        StaticCredentialProvider::new(fetcher),
        RecordingNotifier::new(),
        3,
    )
    .await
}

#[tokio::test]
async fn test_handshake_echoes_challenge_on_token_match() -> Result<()> {
    let pipeline = pipeline().await?;

    let outcome = pipeline.receiver.verify_handshake(
        Some("subscribe"),
        Some("test-verify"),
        Some("challenge-123"),
    );

    assert_eq!(
        outcome,
        HandshakeOutcome::Verified {
            challenge: "challenge-123".into()
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_handshake_rejects_wrong_token() -> Result<()> {
    let pipeline = pipeline().await?;

    let outcome =
        pipeline
            .receiver
            .verify_handshake(Some("subscribe"), Some("wrong"), Some("challenge-123"));

    assert_eq!(outcome, HandshakeOutcome::Forbidden);
    Ok(())
}

#[tokio::test]
async fn test_handshake_requires_all_params() -> Result<()> {
    let pipeline = pipeline().await?;

    let outcome = pipeline
        .receiver
        .verify_handshake(Some("subscribe"), None, Some("challenge-123"));

    assert_eq!(outcome, HandshakeOutcome::MissingParams);
    Ok(())
}

#[tokio::test]
async fn test_new_create_event_is_persisted_and_queued() -> Result<()> {
    let mut pipeline = pipeline().await?;

    let outcome = pipeline
        .receiver
        .handle_delivery(&envelope("activity", "create", 555, 111))
        .await?;

    let DeliveryOutcome::Accepted {
        event_uid,
        duplicate,
    } = outcome
    else {
        panic!("Expected Accepted, got {outcome:?}");
    };
    assert!(!duplicate);

    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.status, EventStatus::Queued);
    assert_eq!(event.object_id, 555);
    assert_eq!(event.owner_id, 111);
    assert_eq!(event.duplicate_count, 0);

    // Eager identity stub exists even though nobody is linked yet
    let identity = pipeline
        .database
        .get_identity("strava", 111)
        .await?
        .unwrap();
    assert_eq!(identity.status, IdentityStatus::Unlinked);

    assert_eq!(pipeline.pending_tasks(), 1);
    Ok(())
}

#[tokio::test]
async fn test_double_delivery_converges_to_one_event_row() -> Result<()> {
    let mut pipeline = pipeline().await?;
    let body = envelope_at("activity", "create", 555, 111, 1_700_000_000);

    let first = pipeline.receiver.handle_delivery(&body).await?;
    let second = pipeline.receiver.handle_delivery(&body).await?;

    let DeliveryOutcome::Accepted { event_uid, .. } = first else {
        panic!("Expected Accepted, got {first:?}");
    };
    assert_eq!(
        second,
        DeliveryOutcome::Accepted {
            event_uid: event_uid.clone(),
            duplicate: true
        }
    );
    assert_eq!(
        event_uid,
        compute_event_uid(1, 111, "activity", 555, "create", 1_700_000_000)
    );

    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.duplicate_count, 1);
    // The duplicate arrived while queued, so it must not enqueue again
    assert_eq!(pipeline.pending_tasks(), 1);
    Ok(())
}

#[tokio::test]
async fn test_same_envelope_with_different_aspect_is_a_distinct_event() -> Result<()> {
    let pipeline = pipeline().await?;

    pipeline
        .receiver
        .handle_delivery(&envelope("activity", "create", 555, 111))
        .await?;
    let outcome = pipeline
        .receiver
        .handle_delivery(&envelope("activity", "update", 555, 111))
        .await?;

    let DeliveryOutcome::Accepted { duplicate, .. } = outcome else {
        panic!("Expected Accepted, got {outcome:?}");
    };
    assert!(!duplicate, "Different aspect_type must produce a new event");
    Ok(())
}

#[tokio::test]
async fn test_malformed_json_is_rejected_without_persisting() -> Result<()> {
    let mut pipeline = pipeline().await?;

    let outcome = pipeline.receiver.handle_delivery(b"{not json").await?;

    assert!(matches!(outcome, DeliveryOutcome::Malformed(_)));
    assert_eq!(
        pipeline
            .database
            .count_events_by_status(EventStatus::Received)
            .await?,
        0
    );
    assert_eq!(pipeline.pending_tasks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_required_field_is_malformed() -> Result<()> {
    let pipeline = pipeline().await?;

    let body = br#"{"object_type": "activity", "aspect_type": "create", "owner_id": 111}"#;
    let outcome = pipeline.receiver.handle_delivery(body).await?;

    match outcome {
        DeliveryOutcome::Malformed(detail) => assert!(detail.contains("object_id")),
        other => panic!("Expected Malformed, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_foreign_subscription_is_rejected_without_persisting() -> Result<()> {
    let mut pipeline = pipeline().await?;

    let body = serde_json::to_vec(&serde_json::json!({
        "object_type": "activity",
        "aspect_type": "create",
        "object_id": 555,
        "owner_id": 111,
        "subscription_id": 99,
        "event_time": 1_700_000_000,
    }))?;
    let outcome = pipeline.receiver.handle_delivery(&body).await?;

    assert_eq!(outcome, DeliveryOutcome::SubscriptionMismatch);
    assert!(pipeline.database.get_identity("strava", 111).await?.is_none());
    assert_eq!(pipeline.pending_tasks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_non_activity_event_is_discarded_not_queued() -> Result<()> {
    let mut pipeline = pipeline().await?;

    let outcome = pipeline
        .receiver
        .handle_delivery(&envelope("athlete", "update", 111, 111))
        .await?;

    let DeliveryOutcome::Discarded { event_uid, reason } = outcome else {
        panic!("Expected Discarded, got {outcome:?}");
    };
    assert_eq!(reason, "non_activity_event");

    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.status, EventStatus::Discarded);
    assert_eq!(event.discard_reason.as_deref(), Some("non_activity_event"));
    assert_eq!(pipeline.pending_tasks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_delete_event_is_recorded_but_ignored() -> Result<()> {
    let mut pipeline = pipeline().await?;

    let outcome = pipeline
        .receiver
        .handle_delivery(&envelope("activity", "delete", 555, 111))
        .await?;

    let DeliveryOutcome::Discarded { event_uid, reason } = outcome else {
        panic!("Expected Discarded, got {outcome:?}");
    };
    assert_eq!(reason, "delete_event_ignored");

    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.status, EventStatus::Discarded);
    assert_eq!(pipeline.pending_tasks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_utf16_body_is_decoded_and_accepted() -> Result<()> {
    let pipeline = pipeline().await?;

    let text = String::from_utf8(envelope("activity", "create", 555, 111))?;
    let mut body = vec![0xff, 0xfe];
    for unit in text.encode_utf16() {
        body.extend_from_slice(&unit.to_le_bytes());
    }

    let outcome = pipeline.receiver.handle_delivery(&body).await?;
    assert!(matches!(outcome, DeliveryOutcome::Accepted { .. }));
    Ok(())
}

#[tokio::test]
async fn test_undecodable_body_is_malformed() -> Result<()> {
    let pipeline = pipeline().await?;

    // Lone UTF-16 BOM with a truncated code unit decodes nowhere
    let outcome = pipeline.receiver.handle_delivery(b"\xff\xfe\x00").await?;

    assert!(matches!(outcome, DeliveryOutcome::Malformed(_)));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_of_failed_event_requeues_it() -> Result<()> {
    let mut pipeline = pipeline().await?;
    let body = envelope("activity", "create", 555, 111);

    let DeliveryOutcome::Accepted { event_uid, .. } =
        pipeline.receiver.handle_delivery(&body).await?
    else {
        panic!("Expected Accepted");
    };
    pipeline.drain_and_process().await?;

    // Simulate a terminal failure, then redeliver
    pipeline
        .database
        .mark_event_failed(&event_uid, "fetch_failed", "boom")
        .await?;

    let outcome = pipeline.receiver.handle_delivery(&body).await?;
    assert_eq!(
        outcome,
        DeliveryOutcome::Accepted {
            event_uid: event_uid.clone(),
            duplicate: true
        }
    );

    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.status, EventStatus::Queued);
    assert!(event.last_error.is_none(), "Requeue clears failure state");
    assert_eq!(pipeline.pending_tasks(), 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_of_unclassified_non_activity_event_is_discarded() -> Result<()> {
    let mut pipeline = pipeline().await?;
    let event_uid = insert_unclassified_event(&pipeline, "athlete", "update", 111, 111).await?;

    // Redelivery must re-run classification, not blindly requeue: this
    // event would never have been queued in the first place
    let outcome = pipeline
        .receiver
        .handle_delivery(&envelope("athlete", "update", 111, 111))
        .await?;

    let DeliveryOutcome::Discarded { reason, .. } = outcome else {
        panic!("Expected Discarded, got {outcome:?}");
    };
    assert_eq!(reason, "non_activity_event");

    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.status, EventStatus::Discarded);
    assert_eq!(event.duplicate_count, 1);
    assert_eq!(pipeline.pending_tasks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_of_unclassified_delete_event_is_discarded() -> Result<()> {
    let mut pipeline = pipeline().await?;
    let event_uid = insert_unclassified_event(&pipeline, "activity", "delete", 555, 111).await?;

    let outcome = pipeline
        .receiver
        .handle_delivery(&envelope("activity", "delete", 555, 111))
        .await?;

    let DeliveryOutcome::Discarded { reason, .. } = outcome else {
        panic!("Expected Discarded, got {outcome:?}");
    };
    assert_eq!(reason, "delete_event_ignored");

    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.status, EventStatus::Discarded);
    assert_eq!(pipeline.pending_tasks(), 0);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_of_unclassified_activity_event_is_queued() -> Result<()> {
    let mut pipeline = pipeline().await?;
    let event_uid = insert_unclassified_event(&pipeline, "activity", "create", 555, 111).await?;

    let outcome = pipeline
        .receiver
        .handle_delivery(&envelope("activity", "create", 555, 111))
        .await?;

    assert_eq!(
        outcome,
        DeliveryOutcome::Accepted {
            event_uid: event_uid.clone(),
            duplicate: true
        }
    );
    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.status, EventStatus::Queued);
    assert_eq!(pipeline.pending_tasks(), 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_of_saved_event_is_acknowledged_without_requeue() -> Result<()> {
    let raw: RawActivity = serde_json::from_value(serde_json::json!({
        "id": 555,
        "name": "Morning Run",
        "sport_type": "Run",
        "distance": 8210.5,
        "moving_time": 2545
    }))?;
    let fetcher = common::MockFetcher::returning(raw);
    let mut pipeline = TestPipeline::new(
        StaticCredentialProvider::new(Arc::clone(&fetcher) as Arc<dyn ActivityFetcher>),
        RecordingNotifier::new(),
        3,
    )
    .await?;
    common::create_linked_athlete(&pipeline.database, 111).await?;

    let body = envelope("activity", "create", 555, 111);
    let DeliveryOutcome::Accepted { event_uid, .. } =
        pipeline.receiver.handle_delivery(&body).await?
    else {
        panic!("Expected Accepted");
    };
    pipeline.drain_and_process().await?;

    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.status, EventStatus::Saved);

    let outcome = pipeline.receiver.handle_delivery(&body).await?;
    assert_eq!(
        outcome,
        DeliveryOutcome::Accepted {
            event_uid: event_uid.clone(),
            duplicate: true
        }
    );

    // Still saved, nothing re-queued, no second fetch consumed
    let event = pipeline.database.get_event_required(&event_uid).await?;
    assert_eq!(event.status, EventStatus::Saved);
    assert_eq!(pipeline.pending_tasks(), 0);
    assert_eq!(fetcher.remaining(), 0);
    Ok(())
}
