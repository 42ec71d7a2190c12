//! Integration tests for the progress/waiter runner.

use anyhow::anyhow;
use pullflow::{CancelSource, ProgressHandle, RunnerBuilder, RunnerError, Status};
use std::time::Duration;

#[tokio::test]
async fn test_waiter_resolves_when_target_reached() {
    let runner = RunnerBuilder::new().task(|progress, _cancel| async move {
        for i in 0..3u32 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            progress.advance(i);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(99u32)
    });

    let pull = runner.get_required(None, Some(3), None).await.unwrap();
    assert_eq!(pull.position, 3);
    assert_eq!(pull.advanced, 3);
    assert_eq!(pull.value, Some(2), "latest reported value");
    assert_eq!(pull.status, Status::Progressed);
}

#[tokio::test]
async fn test_available_advances_only_to_current_progress() {
    let runner = RunnerBuilder::new().task(|progress, _cancel| async move {
        progress.advance(1u32);
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(0u32)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pull = runner.get_available(None, Some(5)).unwrap();
    assert_eq!(pull.advanced, 1);
    assert_eq!(pull.position, 1);
    assert_eq!(pull.status, Status::Stalled);

    let pull = runner.get_available(None, Some(1)).unwrap();
    assert_eq!(pull.advanced, 0);
    assert_eq!(pull.status, Status::Stalled);
}

#[tokio::test]
async fn test_cancelled_waiter_resolves_as_cancelled_once() {
    let runner = RunnerBuilder::new().task(|progress, _cancel| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        progress.advance(7u32);
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(7u32)
    });

    let source = CancelSource::new();
    let token = source.token();
    let trigger = source.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = runner.get_required(None, Some(1), Some(token)).await;
    assert!(matches!(result, Err(RunnerError::Cancelled)));
    assert!(!runner.status().is_final(), "only the waiter was cancelled");

    // Progress made after the cancellation reaches later pulls normally.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let pull = runner.get_available(None, Some(1)).unwrap();
    assert_eq!(pull.advanced, 1);
    assert_eq!(pull.value, Some(7));
}

#[tokio::test]
async fn test_final_state_releases_waiters_beyond_progress() {
    let runner = RunnerBuilder::new().task(|progress, _cancel| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        progress.advance(1u32);
        Ok(7u32)
    });

    let pull = runner.get_required(None, Some(1000), None).await.unwrap();
    assert_eq!(pull.status, Status::Complete);
    assert_eq!(pull.position, 1, "trimmed to the progress actually produced");
    assert_eq!(pull.value, Some(7), "final value wins");
}

#[tokio::test]
async fn test_failure_maps_to_failed() {
    let runner = RunnerBuilder::new().task(|_progress: ProgressHandle<u32>, _cancel| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err(anyhow!("exploded"))
    });

    let pull = runner.get_required(None, Some(5), None).await.unwrap();
    assert_eq!(pull.status, Status::Failed);
    assert_eq!(pull.advanced, 0);
    assert!(pull.failure.unwrap().to_string().contains("exploded"));
}

#[tokio::test]
async fn test_abort_maps_to_aborted() {
    let runner = RunnerBuilder::new().task(|_progress: ProgressHandle<u32>, cancel| async move {
        cancel.cancelled().await;
        Err(anyhow!("stopping"))
    });

    runner.abort();
    let pull = runner.get_required(None, Some(1), None).await.unwrap();
    assert_eq!(pull.status, Status::Aborted);
}

#[tokio::test]
async fn test_panicking_body_maps_to_failed() {
    let runner = RunnerBuilder::new().task(|_progress: ProgressHandle<u32>, _cancel| async move {
        let boom = true;
        if boom {
            panic!("kaboom");
        }
        Ok(0)
    });

    let pull = runner.get_required(None, Some(1), None).await.unwrap();
    assert_eq!(pull.status, Status::Failed);
    assert!(pull.failure.unwrap().to_string().contains("kaboom"));
}

#[tokio::test]
async fn test_target_behind_position_is_rejected() {
    let runner = RunnerBuilder::new().task(|progress, _cancel| async move {
        progress.advance(1u32);
        progress.advance(2u32);
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(0u32)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pull = runner.get_available(None, Some(2)).unwrap();
    assert_eq!(pull.position, 2);

    let result = runner.get_required(Some(0), Some(1), None).await;
    assert!(matches!(
        result,
        Err(RunnerError::PositionBehind { given: 0, current: 2 })
    ));
}

#[tokio::test]
async fn test_progress_query_reports_estimate() {
    let runner = RunnerBuilder::new().task(|progress, _cancel| async move {
        progress.set_estimated_end(10);
        progress.advance(1u32);
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(0u32)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (progress, estimated_end) = runner.progress();
    assert_eq!(progress, 1);
    assert_eq!(estimated_end, Some(10));
}

#[tokio::test]
async fn test_dispose_unblocks_and_finalizes() {
    let runner = RunnerBuilder::new().task(|_progress: ProgressHandle<u32>, cancel| async move {
        cancel.cancelled().await;
        Err(anyhow!("stopping"))
    });

    runner.dispose().await;
    assert_eq!(runner.status(), Status::Aborted);
    assert!(matches!(
        runner.get_required(None, Some(1), None).await,
        Err(RunnerError::Disposed)
    ));
}
