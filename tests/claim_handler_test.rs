mod common;

use common::{message, messages, MockProcessor, RecordingSession, ScriptedClaim};
use parking_lot::Mutex;
use kafka_handler::consumer::{
    ClaimHandler, CommitMode, ConsumerError, ConsumerMetrics, Context, ContextError, GroupHandler,
    ProcessOutcome,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn handler(processor: MockProcessor) -> ClaimHandler<MockProcessor> {
    ClaimHandler::new(Arc::new(processor))
}

#[tokio::test(start_paused = true)]
async fn test_success_marks_and_keeps_waiting() {
    let mut processor = MockProcessor::new();
    processor
        .expect_handle()
        .withf(|_, m| m.offset == 7 && &m.payload[..] == b"payload-7")
        .times(1)
        .returning(|_, _| ProcessOutcome::Success);

    let handler = handler(processor);
    let session = RecordingSession::new(Context::new());
    let mut claim = ScriptedClaim::open(vec![message(7)]);

    let still_running = tokio::time::timeout(
        Duration::from_secs(1),
        handler.consume_claim(&session, &mut claim),
    )
    .await;

    assert!(still_running.is_err(), "consume_claim returned early");
    assert_eq!(session.marks(), vec![7]);
    assert_eq!(session.commits(), 1);
}

#[tokio::test]
async fn test_skip_marks_then_stops() {
    let mut processor = MockProcessor::new();
    processor
        .expect_handle()
        .withf(|_, m| m.offset == 10)
        .times(1)
        .returning(|_, _| ProcessOutcome::skip("unparseable"));
    processor
        .expect_handle()
        .withf(|_, m| m.offset == 11)
        .never();

    let handler = handler(processor);
    let session = RecordingSession::new(Context::new());
    let mut claim = ScriptedClaim::closed(messages([10, 11]));

    let err = handler
        .consume_claim(&session, &mut claim)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ConsumerError::Skipped { offset: 10, ref reason, .. } if reason == "unparseable"
    ));
    assert_eq!(session.marks(), vec![10]);
    assert_eq!(claim.remaining(), 1);
}

#[tokio::test]
async fn test_failure_leaves_message_unmarked() {
    let mut processor = MockProcessor::new();
    processor
        .expect_handle()
        .withf(|_, m| m.offset == 19)
        .times(1)
        .returning(|_, _| ProcessOutcome::Success);
    processor
        .expect_handle()
        .withf(|_, m| m.offset == 20)
        .times(1)
        .returning(|_, _| ProcessOutcome::failure("database down"));
    processor
        .expect_handle()
        .withf(|_, m| m.offset == 21)
        .never();

    let metrics = ConsumerMetrics::new();
    let handler = handler(processor).with_metrics(metrics.clone());
    let session = RecordingSession::new(Context::new());
    let mut claim = ScriptedClaim::closed(messages([19, 20, 21]));

    let err = handler
        .consume_claim(&session, &mut claim)
        .await
        .unwrap_err();

    assert!(matches!(err, ConsumerError::Processing { offset: 20, .. }));
    assert_eq!(session.marks(), vec![19]);
    assert_eq!(session.commits(), 1);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.messages_consumed, 2);
    assert_eq!(snapshot.messages_committed, 1);
    assert_eq!(snapshot.messages_failed, 1);
}

#[tokio::test]
async fn test_cancelled_while_idle() {
    let mut processor = MockProcessor::new();
    processor.expect_handle().never();

    let handler = handler(processor);
    let ctx = Context::new();
    let session = RecordingSession::new(ctx.clone());
    let mut claim = ScriptedClaim::open(Vec::new());

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let err = handler
        .consume_claim(&session, &mut claim)
        .await
        .unwrap_err();

    assert!(matches!(err, ConsumerError::Cancelled(ContextError::Cancelled)));
    assert!(err.is_cancellation());
    assert!(session.marks().is_empty());
}

#[tokio::test]
async fn test_cancellation_wins_over_pending_message() {
    let mut processor = MockProcessor::new();
    processor.expect_handle().never();

    let handler = handler(processor);
    let ctx = Context::new();
    ctx.cancel();
    let session = RecordingSession::new(ctx);
    let mut claim = ScriptedClaim::closed(messages([1, 2]));

    let err = handler
        .consume_claim(&session, &mut claim)
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(claim.remaining(), 2);
}

#[tokio::test]
async fn test_in_flight_message_is_marked_before_cancellation_is_seen() {
    let ctx = Context::new();
    let mut processor = MockProcessor::new();
    processor
        .expect_handle()
        .withf(|_, m| m.offset == 3)
        .times(1)
        .returning(|ctx, _| {
            ctx.cancel();
            ProcessOutcome::Success
        });

    let handler = handler(processor);
    let session = RecordingSession::new(ctx);
    let mut claim = ScriptedClaim::closed(messages([3, 4]));

    let err = handler
        .consume_claim(&session, &mut claim)
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(session.marks(), vec![3]);
}

#[tokio::test(start_paused = true)]
async fn test_session_deadline() {
    let mut processor = MockProcessor::new();
    processor.expect_handle().never();

    let handler = handler(processor);
    let session = RecordingSession::new(Context::new().with_timeout(Duration::from_secs(3)));
    let mut claim = ScriptedClaim::open(Vec::new());

    let err = handler
        .consume_claim(&session, &mut claim)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ConsumerError::Cancelled(ContextError::DeadlineExceeded)
    ));
}

#[tokio::test]
async fn test_closed_stream_ends_cleanly() {
    let mut processor = MockProcessor::new();
    processor
        .expect_handle()
        .times(2)
        .returning(|_, _| ProcessOutcome::Success);

    let handler = handler(processor);
    let session = RecordingSession::new(Context::new());
    let mut claim = ScriptedClaim::closed(messages([0, 1]));

    handler.consume_claim(&session, &mut claim).await.unwrap();
    assert_eq!(session.marks(), vec![0, 1]);
}

#[tokio::test]
async fn test_auto_commit_mode_only_marks() {
    let mut processor = MockProcessor::new();
    processor
        .expect_handle()
        .times(3)
        .returning(|_, _| ProcessOutcome::Success);

    let handler = handler(processor).with_commit_mode(CommitMode::Auto);
    let session = RecordingSession::new(Context::new());
    let mut claim = ScriptedClaim::closed(messages([5, 6, 7]));

    handler.consume_claim(&session, &mut claim).await.unwrap();
    assert_eq!(session.marks(), vec![5, 6, 7]);
    assert_eq!(session.commits(), 0);
}

#[tokio::test]
async fn test_mark_failure_stops_claim() {
    let mut processor = MockProcessor::new();
    processor
        .expect_handle()
        .times(1)
        .returning(|_, _| ProcessOutcome::Success);

    let metrics = ConsumerMetrics::new();
    let handler = handler(processor).with_metrics(metrics.clone());
    let session = RecordingSession::failing_marks(Context::new());
    let mut claim = ScriptedClaim::closed(messages([1, 2]));

    let err = handler
        .consume_claim(&session, &mut claim)
        .await
        .unwrap_err();

    assert!(matches!(err, ConsumerError::Commit(_)));
    assert_eq!(session.commits(), 0);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.commit_errors, 1);
    assert_eq!(snapshot.messages_committed, 0);
}

#[tokio::test]
async fn test_setup_and_cleanup_are_noops() {
    let handler = handler(MockProcessor::new());
    let session = RecordingSession::new(Context::new());

    handler.setup(&session).await.unwrap();
    handler.cleanup(&session).await.unwrap();
    assert!(session.marks().is_empty());
}

#[tokio::test]
async fn test_sync_commit_lands_before_next_message() {
    let session = Arc::new(RecordingSession::new(Context::new()));
    let seen_at_next = Arc::new(Mutex::new(None));

    let mut processor = MockProcessor::new();
    processor
        .expect_handle()
        .withf(|_, m| m.offset == 30)
        .times(1)
        .returning(|_, _| ProcessOutcome::Success);
    let observer = session.clone();
    let seen = seen_at_next.clone();
    processor
        .expect_handle()
        .withf(|_, m| m.offset == 31)
        .times(1)
        .returning(move |_, _| {
            *seen.lock() = Some((observer.marks(), observer.commits()));
            ProcessOutcome::Success
        });

    let handler = handler(processor);
    let mut claim = ScriptedClaim::closed(messages([30, 31]));
    handler
        .consume_claim(session.as_ref(), &mut claim)
        .await
        .unwrap();

    assert_eq!(*seen_at_next.lock(), Some((vec![30], 1)));
    assert_eq!(session.commits(), 2);
}
