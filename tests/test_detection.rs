//! Integration tests for the detection service.
//!
//! Tests cover:
//! - Timeouts and unavailable models surfacing as failed detection passes
//! - Serialized access to the single detector instance

mod common;

use std::{sync::atomic::Ordering, time::Duration};

use weldscan::UnavailableDetector;

use common::*;

#[tokio::test]
async fn test_detection_returns_result() -> anyhow::Result<()> {
    let service = DetectionService::new(
        FixedDetector {
            detections: vec![detection(3, 42.0)],
        },
        Duration::from_secs(5),
    );

    let result = service.detect(png_bytes(20, 10, 0)).await?;

    assert_eq!(result.detections, vec![detection(3, 42.0)]);
    assert_eq!((result.image_width, result.image_height), (20, 10));
    Ok(())
}

#[tokio::test]
async fn test_invalid_image_is_reported() {
    let service = DetectionService::new(FixedDetector::default(), Duration::from_secs(5));

    let err = service.detect(b"not an image".to_vec()).await.unwrap_err();

    assert!(matches!(err, DetectionError::InvalidImage(_)));
}

#[tokio::test]
async fn test_detection_timeout() {
    let timeout = Duration::from_millis(50);
    let service = DetectionService::new(
        SlowDetector {
            delay: Duration::from_millis(500),
        },
        timeout,
    );

    let err = service.detect(png_bytes(4, 4, 0)).await.unwrap_err();

    assert_eq!(err, DetectionError::Timeout(timeout));
    assert_eq!(service.timeout(), timeout);
}

#[tokio::test]
async fn test_timed_out_upload_is_marked_failed() -> anyhow::Result<()> {
    let timeout = Duration::from_millis(50);
    let (service, _temp_dir) = create_test_service_with_timeout(
        SlowDetector {
            delay: Duration::from_millis(500),
        },
        timeout,
    )
    .await;
    let owner = service.create_owner(new_owner("Owner")).await?;

    let outcome = service
        .upload_image(owner.id, PNG, png_bytes(16, 16, 0))
        .await?;

    assert_eq!(outcome.detection, DetectionStatus::Failed(DetectionError::Timeout(timeout)));
    assert_eq!(outcome.image.state, ImageState::DetectionFailed);
    assert!(outcome.image.detections.is_none());
    assert!(outcome.image.detection_error.is_some());

    Ok(())
}

#[tokio::test]
async fn test_unavailable_model() -> anyhow::Result<()> {
    let (service, _temp_dir) =
        create_test_service(UnavailableDetector::new("model file missing")).await;
    let owner = service.create_owner(new_owner("Owner")).await?;

    let outcome = service
        .upload_image(owner.id, PNG, png_bytes(16, 16, 0))
        .await?;

    assert_eq!(
        outcome.detection,
        DetectionStatus::Failed(DetectionError::ModelUnavailable(
            "model file missing".into()
        ))
    );
    assert_eq!(outcome.image.state, ImageState::DetectionFailed);

    let fallback = DetectionService::new(UnavailableDetector::default(), Duration::from_secs(1));
    let err = fallback.detect(png_bytes(4, 4, 0)).await.unwrap_err();
    assert!(matches!(err, DetectionError::ModelUnavailable(reason) if reason.contains("no detection model")));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_detector_calls_never_overlap() -> anyhow::Result<()> {
    let probe = OverlapProbe::default();
    let service = DetectionService::new(probe.clone(), Duration::from_secs(5));

    let (a, b, c, d) = tokio::join!(
        service.detect(png_bytes(4, 4, 0)),
        service.detect(png_bytes(4, 4, 1)),
        service.detect(png_bytes(4, 4, 2)),
        service.detect(png_bytes(4, 4, 3)),
    );
    for result in [a, b, c, d] {
        result?;
    }

    assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_share_one_detector() -> anyhow::Result<()> {
    let probe = OverlapProbe::default();
    let (service, _temp_dir) = create_test_service(probe.clone()).await;
    let alice = service.create_owner(new_owner("Alice")).await?;
    let bob = service.create_owner(new_owner("Bob")).await?;

    let (first, second, third) = tokio::join!(
        service.upload_image(alice.id, PNG, png_bytes(8, 8, 0)),
        service.upload_image(bob.id, PNG, png_bytes(8, 8, 1)),
        service.upload_image(alice.id, PNG, png_bytes(8, 8, 2)),
    );
    let (first, second, third) = (first?, second?, third?);

    assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    for outcome in [&first, &second, &third] {
        assert_eq!(outcome.image.state, ImageState::Detected);
    }

    let positions: Vec<i64> = service
        .list_images(alice.id)
        .await?
        .iter()
        .map(|image| image.position)
        .collect();
    assert_eq!(positions, vec![0, 1]);
    assert_eq!(service.list_images(bob.id).await?.len(), 1);

    Ok(())
}
