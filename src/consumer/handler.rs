//! Per-claim consume loop

use crate::consumer::config::CommitMode;
use crate::consumer::context::{Context, ContextError};
use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::group::{GroupClaim, GroupHandler, GroupSession};
use crate::consumer::message::Message;
use crate::consumer::metrics::ConsumerMetrics;
use crate::consumer::processor::{AckDecision, MessageProcessor};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, trace, warn};

pub(crate) const COMPONENT: &str = "ConsumerGroupHandler";

/// Drives a [`MessageProcessor`] over partition claims.
///
/// One instance serves every claim of a generation; the only state shared
/// between claims is the processor and the atomic metrics.
pub struct ClaimHandler<P: ?Sized> {
    processor: Arc<P>,
    commit_mode: CommitMode,
    metrics: ConsumerMetrics,
}

impl<P: MessageProcessor + ?Sized> ClaimHandler<P> {
    pub fn new(processor: Arc<P>) -> Self {
        Self {
            processor,
            commit_mode: CommitMode::default(),
            metrics: ConsumerMetrics::new(),
        }
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    pub fn with_metrics(mut self, metrics: ConsumerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    /// Run the processor on one message and apply the ack decision.
    ///
    /// Returns `Err` whenever the claim loop must stop.
    async fn process(
        &self,
        session: &dyn GroupSession,
        ctx: &Context,
        message: Message,
    ) -> ConsumerResult<()> {
        debug!(
            component = COMPONENT,
            topic = %message.topic,
            timestamp = %message.timestamp_rfc3339(),
            offset = message.offset,
            partition = message.partition,
            length = message.len(),
            "message consumed, running {}",
            self.processor.name()
        );
        self.metrics.increment_consumed();

        let started = Instant::now();
        let outcome = self.processor.handle(ctx, &message).await;
        let decision = outcome.decision();
        let elapsed = started.elapsed();

        if decision.marks() {
            self.acknowledge(session, &message).await?;
        }
        self.metrics.record_decision(decision, elapsed);

        match outcome.into_error(&message) {
            None => {
                debug!(
                    component = COMPONENT,
                    offset = message.offset,
                    partition = message.partition,
                    "processor completed without an error, message marked"
                );
                Ok(())
            }
            Some(err) => {
                match decision {
                    AckDecision::CommitAndAbort => debug!(
                        component = COMPONENT,
                        error = %err,
                        "processor skipped message, marked and ending claim"
                    ),
                    _ => error!(
                        component = COMPONENT,
                        error = %err,
                        "error running processor, not marking message"
                    ),
                }
                Err(err)
            }
        }
    }

    async fn acknowledge(&self, session: &dyn GroupSession, message: &Message) -> ConsumerResult<()> {
        let result = match self.commit_mode {
            CommitMode::Sync => match session.mark(message) {
                Ok(()) => session.commit().await,
                Err(e) => Err(e),
            },
            CommitMode::Auto => session.mark(message),
        };
        if let Err(e) = &result {
            self.metrics.increment_commit_errors();
            error!(
                component = COMPONENT,
                error = %e,
                offset = message.offset,
                partition = message.partition,
                "failed to acknowledge message"
            );
        }
        result
    }
}

#[async_trait]
impl<P: MessageProcessor + ?Sized> GroupHandler for ClaimHandler<P> {
    async fn setup(&self, session: &dyn GroupSession) -> ConsumerResult<()> {
        trace!(
            component = COMPONENT,
            generation = session.generation_id(),
            "setup() called"
        );
        Ok(())
    }

    async fn cleanup(&self, session: &dyn GroupSession) -> ConsumerResult<()> {
        trace!(
            component = COMPONENT,
            generation = session.generation_id(),
            "cleanup() called"
        );
        Ok(())
    }

    async fn consume_claim(
        &self,
        session: &dyn GroupSession,
        claim: &mut dyn GroupClaim,
    ) -> ConsumerResult<()> {
        trace!(
            component = COMPONENT,
            topic = claim.topic(),
            partition = claim.partition(),
            initial_offset = claim.initial_offset(),
            "consume_claim() called"
        );
        let ctx = session.context();

        loop {
            let message = tokio::select! {
                biased;
                _ = ctx.done() => {
                    let reason = ctx.err().unwrap_or(ContextError::Cancelled);
                    debug!(component = COMPONENT, reason = %reason, "session context ended");
                    return Err(ConsumerError::Cancelled(reason));
                }
                next = claim.next_message() => match next {
                    Some(message) => message,
                    None => {
                        warn!(
                            component = COMPONENT,
                            topic = claim.topic(),
                            partition = claim.partition(),
                            "message channel was closed"
                        );
                        return Ok(());
                    }
                },
            };

            self.process(session, ctx, message).await?;
        }
    }
}
