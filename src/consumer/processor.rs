//! Message processor trait and outcome classification

use crate::consumer::context::Context;
use crate::consumer::error::{BoxError, ConsumerError};
use crate::consumer::message::Message;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of handling one message
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The message was handled
    Success,
    /// The message cannot be handled but must not block the partition.
    /// It is marked, and the current generation is still abandoned.
    Skip(String),
    /// Handling failed; the message stays unmarked and is redelivered
    /// after the group is rejoined.
    Failure(BoxError),
}

impl ProcessOutcome {
    pub fn skip(reason: impl Into<String>) -> Self {
        ProcessOutcome::Skip(reason.into())
    }

    pub fn failure(error: impl Into<BoxError>) -> Self {
        ProcessOutcome::Failure(error.into())
    }

    /// The acknowledgment this outcome calls for
    pub fn decision(&self) -> AckDecision {
        match self {
            ProcessOutcome::Success => AckDecision::Commit,
            ProcessOutcome::Skip(_) => AckDecision::CommitAndAbort,
            ProcessOutcome::Failure(_) => AckDecision::AbortWithoutCommit,
        }
    }

    /// The error `consume_claim` returns for this outcome, if it stops the loop
    pub fn into_error(self, message: &Message) -> Option<ConsumerError> {
        match self {
            ProcessOutcome::Success => None,
            ProcessOutcome::Skip(reason) => Some(ConsumerError::Skipped {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                reason,
            }),
            ProcessOutcome::Failure(source) => Some(ConsumerError::Processing {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                source,
            }),
        }
    }
}

impl<E: Into<BoxError>> From<Result<(), E>> for ProcessOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => ProcessOutcome::Success,
            Err(e) => ProcessOutcome::Failure(e.into()),
        }
    }
}

/// Per-message acknowledgment decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Mark and keep consuming
    Commit,
    /// Mark, then end the claim
    CommitAndAbort,
    /// Leave unmarked and end the claim
    AbortWithoutCommit,
}

impl AckDecision {
    /// Whether the message is marked committable
    pub fn marks(self) -> bool {
        matches!(self, AckDecision::Commit | AckDecision::CommitAndAbort)
    }

    /// Whether the claim loop stops after this message
    pub fn aborts(self) -> bool {
        matches!(
            self,
            AckDecision::CommitAndAbort | AckDecision::AbortWithoutCommit
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AckDecision::Commit => "commit",
            AckDecision::CommitAndAbort => "commit_and_abort",
            AckDecision::AbortWithoutCommit => "abort_without_commit",
        }
    }
}

/// User logic invoked once per delivered message.
///
/// Invoked concurrently for distinct partition claims, sequentially within
/// one claim. Implementations should return promptly once `ctx` ends.
#[async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
    /// Handle a single message
    async fn handle(&self, ctx: &Context, message: &Message) -> ProcessOutcome;

    /// Get processor name for logs
    fn name(&self) -> &str {
        "MessageProcessor"
    }
}

#[async_trait]
impl<P: MessageProcessor + ?Sized> MessageProcessor for Arc<P> {
    async fn handle(&self, ctx: &Context, message: &Message) -> ProcessOutcome {
        (**self).handle(ctx, message).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_table() {
        assert_eq!(ProcessOutcome::Success.decision(), AckDecision::Commit);
        assert_eq!(
            ProcessOutcome::skip("bad json").decision(),
            AckDecision::CommitAndAbort
        );
        assert_eq!(
            ProcessOutcome::failure("boom").decision(),
            AckDecision::AbortWithoutCommit
        );

        assert!(AckDecision::Commit.marks() && !AckDecision::Commit.aborts());
        assert!(AckDecision::CommitAndAbort.marks() && AckDecision::CommitAndAbort.aborts());
        assert!(!AckDecision::AbortWithoutCommit.marks());
        assert!(AckDecision::AbortWithoutCommit.aborts());
    }

    #[test]
    fn test_into_error() {
        let message = Message::new("t", 2, 10, "x");

        assert!(ProcessOutcome::Success.into_error(&message).is_none());

        let skipped = ProcessOutcome::skip("poison").into_error(&message);
        assert!(matches!(
            skipped,
            Some(ConsumerError::Skipped { offset: 10, partition: 2, .. })
        ));

        let failed = ProcessOutcome::failure("boom").into_error(&message);
        assert!(matches!(
            failed,
            Some(ConsumerError::Processing { offset: 10, .. })
        ));
    }

    #[test]
    fn test_from_result() {
        let ok: Result<(), anyhow::Error> = Ok(());
        assert!(matches!(ProcessOutcome::from(ok), ProcessOutcome::Success));

        let err: Result<(), anyhow::Error> = Err(anyhow::anyhow!("nope"));
        match ProcessOutcome::from(err) {
            ProcessOutcome::Failure(e) => assert_eq!(e.to_string(), "nope"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
