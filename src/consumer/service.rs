//! Outer run loop: join, consume one generation, decide whether to rejoin
//!
//! Any error that is not fatal ends only the current generation. The
//! service then rejoins the group and relies on the broker redelivering
//! everything after the last committed offset. There is no retry counter,
//! backoff or dead-letter path here; a message that fails on every delivery
//! keeps the group rejoining, which under load shows up only in the logs
//! and in [`ConsumerMetrics::rejoins`].

use crate::consumer::config::{CommitMode, ConsumerConfig};
use crate::consumer::context::{Context, ContextError};
use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::group::{ConsumerGroup, GroupHandler};
use crate::consumer::handler::{ClaimHandler, COMPONENT};
use crate::consumer::metrics::ConsumerMetrics;
use crate::consumer::processor::MessageProcessor;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Keeps a consumer group membership alive until shutdown
pub struct ConsumerGroupService<G: ?Sized, P: ?Sized> {
    group: Arc<G>,
    topics: Vec<String>,
    processor: Arc<P>,
    commit_mode: CommitMode,
    metrics: ConsumerMetrics,
}

impl<G, P> ConsumerGroupService<G, P>
where
    G: ConsumerGroup + ?Sized,
    P: MessageProcessor + ?Sized,
{
    pub fn new(group: Arc<G>, topics: Vec<String>, processor: Arc<P>) -> Self {
        Self {
            group,
            topics,
            processor,
            commit_mode: CommitMode::default(),
            metrics: ConsumerMetrics::new(),
        }
    }

    /// Build a service using the topics and commit cadence of `config`
    pub fn from_config(group: Arc<G>, config: &ConsumerConfig, processor: Arc<P>) -> Self {
        Self::new(group, config.topics.clone(), processor).with_commit_mode(config.commit_mode)
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    pub fn with_metrics(mut self, metrics: ConsumerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &ConsumerMetrics {
        &self.metrics
    }

    pub fn group(&self) -> &Arc<G> {
        &self.group
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    fn new_handler(&self) -> Arc<dyn GroupHandler> {
        Arc::new(
            ClaimHandler::new(self.processor.clone())
                .with_commit_mode(self.commit_mode)
                .with_metrics(self.metrics.clone()),
        )
    }

    /// Consume until `ctx` ends or the group is closed.
    ///
    /// Fails with [`ConsumerError::Config`] when no topics were given.
    /// Returns `Ok(())` on voluntary cancellation,
    /// [`ConsumerError::Context`] when the context ends any other way, and
    /// fatal errors from the group as-is. Every other error, including
    /// processing failures, is logged and followed by a rejoin.
    pub async fn run(&self, ctx: &Context) -> ConsumerResult<()> {
        trace!(component = COMPONENT, topics = ?self.topics, "run() called");
        if self.topics.is_empty() {
            return Err(ConsumerError::Config("Topics cannot be empty".to_string()));
        }

        loop {
            trace!(component = COMPONENT, "starting message consumption");
            self.metrics.increment_generations();

            match self.group.consume(ctx, &self.topics, self.new_handler()).await {
                Ok(()) => debug!(component = COMPONENT, "generation ended"),
                Err(e) if e.is_fatal() => {
                    info!(component = COMPONENT, error = %e, "consumer group stopped");
                    return Err(e);
                }
                Err(e) => {
                    if !ctx.is_done() {
                        self.metrics.increment_rejoins();
                        warn!(
                            component = COMPONENT,
                            error = %e,
                            "generation ended with an error, rejoining group"
                        );
                    }
                }
            }

            match ctx.err() {
                Some(ContextError::Cancelled) => {
                    warn!(component = COMPONENT, "context cancelled on message consumption");
                    return Ok(());
                }
                Some(other) => return Err(ConsumerError::Context(other)),
                None => {}
            }

            tokio::task::yield_now().await;
        }
    }
}
