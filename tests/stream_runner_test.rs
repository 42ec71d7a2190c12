//! Integration tests for the asynchronous-source runner.

use anyhow::anyhow;
use futures::stream;
use futures::StreamExt;
use pullflow::{CancelSource, RunnerBuilder, RunnerError, Status};
use std::sync::Arc;
use std::time::Duration;

fn ints(values: impl IntoIterator<Item = i32>) -> Vec<anyhow::Result<i32>> {
    values.into_iter().map(Ok).collect()
}

#[tokio::test]
async fn test_required_pull_delivers_in_source_order() {
    let runner = RunnerBuilder::new().stream(stream::iter(ints([1, 2, 3])));

    let pull = runner.get_required(None, Some(2), None).await.unwrap();
    assert_eq!(pull.items, vec![1, 2]);
    assert_eq!(pull.position, 2);
    assert!(matches!(pull.status, Status::Stalled | Status::Progressed));

    let pull = runner.get_required(None, Some(2), None).await.unwrap();
    assert_eq!(pull.items, vec![3]);
    assert_eq!(pull.position, 3);
    assert_eq!(pull.status, Status::Complete);
}

#[tokio::test]
async fn test_available_drains_then_completes() {
    let runner = RunnerBuilder::new()
        .lookahead(2)
        .stream(stream::iter(ints(0..5)));

    let mut collected = Vec::new();
    let mut last_position = 0;
    loop {
        let pull = runner.get_available(None, None).unwrap();
        assert!(pull.position >= last_position, "position must never rewind");
        last_position = pull.position;
        collected.extend(pull.items);
        if pull.status.is_final() {
            assert_eq!(pull.status, Status::Complete);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(collected, (0..5).collect::<Vec<_>>());
    assert_eq!(runner.position(), 5);
}

#[tokio::test]
async fn test_start_position_mismatch_fails_for_any_advance() {
    let runner = RunnerBuilder::new().stream(stream::iter(ints([1])));

    let result = runner.get_required(Some(5), Some(1), None).await;
    assert!(matches!(
        result,
        Err(RunnerError::PositionMismatch { given: 5, current: 0 })
    ));

    // The position check comes before the advance check.
    let result = runner.get_required(Some(7), Some(0), None).await;
    assert!(matches!(result, Err(RunnerError::PositionMismatch { .. })));
}

#[tokio::test]
async fn test_zero_advance_is_invalid() {
    let runner = RunnerBuilder::new().stream(stream::iter(ints([1])));
    let result = runner.get_available(None, Some(0));
    assert!(matches!(result, Err(RunnerError::InvalidAdvance)));
}

#[tokio::test]
async fn test_second_suspending_pull_fails_single_flight() {
    let runner = Arc::new(
        RunnerBuilder::new().stream(stream::pending::<anyhow::Result<i32>>()),
    );

    let first = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.get_required(None, Some(1), None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = runner.get_required(None, Some(1), None).await;
    assert!(matches!(second, Err(RunnerError::ParallelPull)));

    runner.abort();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, Status::Aborted);
}

#[tokio::test]
async fn test_source_fault_latches_failed() {
    let items: Vec<anyhow::Result<i32>> = vec![Ok(1), Err(anyhow!("boom"))];
    let runner = RunnerBuilder::new().stream(stream::iter(items));

    let pull = runner.get_required(None, Some(1), None).await.unwrap();
    assert_eq!(pull.items, vec![1]);

    let pull = runner.get_required(None, Some(1), None).await.unwrap();
    assert!(pull.items.is_empty());
    assert_eq!(pull.status, Status::Failed);
    assert_eq!(pull.position, 1);
    assert!(pull.failure.unwrap().to_string().contains("boom"));

    // Final states are sticky for every future pull.
    let pull = runner.get_available(None, None).unwrap();
    assert_eq!(pull.status, Status::Failed);
    assert_eq!(pull.position, 1);
}

#[tokio::test]
async fn test_external_cancel_aborts_runner() {
    let source = CancelSource::new();
    let runner = RunnerBuilder::new()
        .cancel_source(source.clone(), false)
        .stream(stream::pending::<anyhow::Result<i32>>());

    source.cancel();

    let pull = runner.get_required(None, Some(1), None).await.unwrap();
    assert!(pull.items.is_empty());
    assert_eq!(pull.status, Status::Aborted);
}

#[tokio::test]
async fn test_cancelled_pull_returns_partial_delivery() {
    let head = stream::iter(ints([1]));
    let runner = RunnerBuilder::new().stream(head.chain(stream::pending()));

    let source = CancelSource::new();
    let token = source.token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        source.cancel();
    });

    let pull = runner
        .get_required(None, Some(3), Some(token))
        .await
        .unwrap();
    assert_eq!(pull.items, vec![1]);
    assert_eq!(pull.position, 1);
    assert!(!pull.status.is_final(), "the runner itself is unaffected");
}

#[tokio::test]
async fn test_dispose_is_idempotent_and_blocks_pulls() {
    let runner = RunnerBuilder::new().stream(stream::iter(ints([1, 2, 3])));

    runner.dispose().await;
    runner.dispose().await;

    assert!(matches!(
        runner.get_available(None, None),
        Err(RunnerError::Disposed)
    ));
    assert!(matches!(
        runner.get_required(None, Some(1), None).await,
        Err(RunnerError::Disposed)
    ));
    assert!(runner.status().is_final());
}
