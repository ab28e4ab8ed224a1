//! Start-up snapshot and plate corrections against a local REST backend.

use std::sync::Arc;

use feed_core::retrieve::VehiclesApi;
use feed_core::{
    ChannelConnector, ControllerConfig, CorrectionError, FeedController, HttpOptions, InitialFetchError,
    PlateCorrection,
};
use project_tests::mock_api::MockApi;
use project_tests::{vehicle, wait_until};
use serde_json::{json, Value};

fn options() -> HttpOptions {
    HttpOptions {
        timeout_ms: 2000,
        retries: 0,
        auth_token: None,
    }
}

fn config(api: &MockApi, capacity: usize) -> ControllerConfig {
    ControllerConfig {
        api_url: Some(api.url.clone()),
        capacity,
        coalesce_window_ms: 50,
        http: options(),
        ..Default::default()
    }
}

#[tokio::test]
async fn first_start_seeds_the_store_newest_first() -> anyhow::Result<()> {
    let api = MockApi::start(vec![
        vehicle("v5", "KL11BM2325"),
        vehicle("v4", "KL11BM2324"),
        vehicle("v3", "KL11BM2323"),
        vehicle("v2", "KL11BM2322"),
    ])
    .await?;
    let connector = ChannelConnector::new();
    let _peer = connector.accept();
    let controller = FeedController::spawn(config(&api, 3), Arc::new(connector.clone()))?;

    controller.start().await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.ids(), vec!["v5", "v4", "v3"]);
    assert!(snapshot.most_recent.is_none());
    assert_eq!(api.list_limits(), vec![Some(3)]);

    // Only the very first start fetches.
    controller.stop().await;
    let _again = connector.accept();
    controller.start().await;
    assert_eq!(api.list_limits().len(), 1);
    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_failed_snapshot_leaves_the_store_empty_and_still_connects() -> anyhow::Result<()> {
    let api = MockApi::start(vec![vehicle("v1", "KL11BM2325")]).await?;
    api.fail_list_with(500);
    let connector = ChannelConnector::new();
    let peer = connector.accept();
    let controller = FeedController::spawn(config(&api, 10), Arc::new(connector.clone()))?;

    controller.start().await;
    assert!(controller.snapshot().is_empty());
    assert_eq!(connector.dial_count(), 1);

    peer.send_text(vehicle("live", "KA05MN4321").to_string());
    let mut feed = controller.feed();
    wait_until(&mut feed, "live detection", |s| s.ids() == vec!["live"]).await?;
    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn vehicles_api_reports_rejections() -> anyhow::Result<()> {
    let api = MockApi::start(Vec::new()).await?;
    let client = VehiclesApi::new(&api.url, &options())?;
    assert!(client.recent(5).await?.is_empty());

    api.fail_list_with(503);
    assert_eq!(client.recent(5).await, Err(InitialFetchError::Rejected { status: 503 }));

    let fix = PlateCorrection::new("kl11bm2325")?;
    assert_eq!(
        client.correct_plate("nobody", &fix).await,
        Err(CorrectionError::UnknownDetection("nobody".into()))
    );

    api.fail_patch_with(500);
    match client.correct_plate("nobody", &fix).await {
        Err(CorrectionError::Rejected { status: 500, body }) => assert_eq!(body, "plate rejected"),
        other => panic!("expected a 500 rejection, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn rows_with_null_columns_still_seed_the_store() -> anyhow::Result<()> {
    let mut sparse = vehicle("v2", "KL11BM2324");
    sparse["color"] = Value::Null;
    sparse["location"] = Value::Null;
    let api = MockApi::start(vec![vehicle("v3", "KL11BM2325"), sparse, vehicle("v1", "KL11BM2323")]).await?;
    let connector = ChannelConnector::new();
    let _peer = connector.accept();
    let controller = FeedController::spawn(config(&api, 10), Arc::new(connector.clone()))?;
    controller.start().await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.ids(), vec!["v3", "v2", "v1"]);
    let v2 = snapshot.get("v2").expect("sparse row kept");
    assert_eq!(v2.color, "");
    assert_eq!(v2.source_location, "UNKNOWN");

    // The PATCH answer for the same row decodes too.
    let updated = controller.correct_plate("v2", "KL11BM2399").await?;
    assert_eq!(updated.source_location, "UNKNOWN");
    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn an_evicted_detection_can_still_be_corrected() -> anyhow::Result<()> {
    let api = MockApi::start(vec![
        vehicle("v4", "KL11BM2324"),
        vehicle("v3", "KL11BM2323"),
        vehicle("v2", "KL11BM2322"),
    ])
    .await?;
    let connector = ChannelConnector::new();
    let _peer = connector.accept();
    let controller = FeedController::spawn(config(&api, 2), Arc::new(connector.clone()))?;
    controller.start().await;
    assert_eq!(controller.snapshot().ids(), vec!["v4", "v3"]);

    let updated = controller.correct_plate("v2", "KL11BM2300").await?;
    assert_eq!(updated.plate_text.as_deref(), Some("KL11BM2300"));
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.ids(), vec!["v2", "v4"]);
    assert_eq!(snapshot.len(), 2);
    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_correction_updates_the_detection_in_place() -> anyhow::Result<()> {
    let api = MockApi::start(vec![
        vehicle("v3", "KL11BM2325"),
        vehicle("v2", "KL1IBM2324"),
        vehicle("v1", "KL11BM2323"),
    ])
    .await?;
    let connector = ChannelConnector::new();
    let _peer = connector.accept();
    let controller = FeedController::spawn(config(&api, 10), Arc::new(connector.clone()))?;
    controller.start().await;

    let updated = controller.correct_plate("v2", "  kl11bm2324 ").await?;
    assert_eq!(updated.plate_text.as_deref(), Some("KL11BM2324"));
    assert_eq!(api.patches(), vec![("v2".to_string(), json!({"vehicle_number": "KL11BM2324"}))]);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.ids(), vec!["v3", "v2", "v1"]);
    assert_eq!(snapshot.get("v2").and_then(|d| d.plate_text.as_deref()), Some("KL11BM2324"));
    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_rejected_correction_leaves_the_store_untouched() -> anyhow::Result<()> {
    let api = MockApi::start(vec![vehicle("v1", "KL11BM2325")]).await?;
    api.fail_patch_with(422);
    let connector = ChannelConnector::new();
    let _peer = connector.accept();
    let controller = FeedController::spawn(config(&api, 10), Arc::new(connector.clone()))?;
    controller.start().await;
    let before = controller.snapshot();

    let err = controller.correct_plate("v1", "KL11BM2399").await.unwrap_err();
    assert!(matches!(err, CorrectionError::Rejected { status: 422, .. }));
    assert!(!err.is_retryable());

    let after = controller.snapshot();
    assert_eq!(after.revision, before.revision);
    assert_eq!(after.get("v1").and_then(|d| d.plate_text.as_deref()), Some("KL11BM2325"));
    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn a_correction_refreshes_the_most_recent_detection() -> anyhow::Result<()> {
    let api = MockApi::start(vec![vehicle("v9", "KL11BM2325")]).await?;
    let connector = ChannelConnector::new();
    let peer = connector.accept();
    let controller = FeedController::spawn(
        ControllerConfig {
            api_url: None,
            ..config(&api, 10)
        },
        Arc::new(connector.clone()),
    )?;
    controller.start().await;
    peer.send_text(vehicle("v9", "KL11BM2325").to_string());
    let mut feed = controller.feed();
    wait_until(&mut feed, "released detection", |s| s.most_recent.is_some()).await?;
    assert_eq!(
        controller.correct_plate("v9", "KL11BM2300").await,
        Err(CorrectionError::NotConfigured)
    );
    controller.shutdown().await;

    let connector = ChannelConnector::new();
    let peer = connector.accept();
    let controller = FeedController::spawn(config(&api, 10), Arc::new(connector.clone()))?;
    controller.start().await;
    peer.send_text(vehicle("v9", "KL11BM2325").to_string());
    let mut feed = controller.feed();
    wait_until(&mut feed, "released detection", |s| s.most_recent.is_some()).await?;

    controller.correct_plate("v9", "KL11BM2300").await?;
    let most_recent = controller.snapshot().most_recent.expect("most recent detection");
    assert_eq!(most_recent.plate_text.as_deref(), Some("KL11BM2300"));
    controller.shutdown().await;
    Ok(())
}
