//! Consumer-group message processing
//!
//! This module provides:
//! - A per-partition consume loop ([`ClaimHandler`]) that classifies every
//!   processor outcome into an acknowledgment decision
//! - An outer run loop ([`ConsumerGroupService`]) that rejoins the group
//!   whenever a generation ends with a non-fatal error
//! - Broker seams ([`ConsumerGroup`], [`GroupSession`], [`GroupClaim`]) with
//!   an rdkafka implementation (feature `kafka`) and an in-memory one
//!
//! Delivery is at-least-once. A failed message is never marked, the claim is
//! abandoned, and the message comes back once the group has been rejoined.
//!
//! # Example
//!
//! ```no_run
//! use kafka_handler::consumer::{
//!     ConsumerGroupService, Context, InMemoryGroup, Message, MessageProcessor, ProcessOutcome,
//! };
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl MessageProcessor for Printer {
//!     async fn handle(&self, _ctx: &Context, message: &Message) -> ProcessOutcome {
//!         match std::str::from_utf8(&message.payload) {
//!             Ok(text) => {
//!                 println!("{}", text);
//!                 ProcessOutcome::Success
//!             }
//!             Err(_) => ProcessOutcome::skip("payload is not UTF-8"),
//!         }
//!     }
//! }
//!
//! # async fn example() -> kafka_handler::consumer::ConsumerResult<()> {
//! let group = Arc::new(InMemoryGroup::new());
//! group.produce("events", 0, "hello");
//!
//! let service = ConsumerGroupService::new(group, vec!["events".to_string()], Arc::new(Printer));
//! service.run(&Context::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod handler;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod processor;
pub mod service;

pub use config::{CommitMode, ConsumerConfig, ConsumerConfigBuilder, OffsetReset};
pub use context::{Context, ContextError};
pub use error::{BoxError, ConsumerError, ConsumerResult, ErrorSeverity};
pub use group::{ConsumerGroup, GroupClaim, GroupHandler, GroupSession};
pub use handler::ClaimHandler;
#[cfg(feature = "kafka")]
pub use kafka::KafkaConsumerGroup;
pub use memory::InMemoryGroup;
pub use message::Message;
pub use metrics::{ConsumerMetrics, MetricsSnapshot};
pub use processor::{AckDecision, MessageProcessor, ProcessOutcome};
pub use service::ConsumerGroupService;

/// Create a service over Kafka for `config`
#[cfg(feature = "kafka")]
pub fn create_kafka_service<P: MessageProcessor>(
    config: &ConsumerConfig,
    processor: std::sync::Arc<P>,
) -> ConsumerResult<ConsumerGroupService<KafkaConsumerGroup, P>> {
    tracing::info!(group_id = %config.group_id, topics = ?config.topics, "creating kafka service");
    let group = std::sync::Arc::new(KafkaConsumerGroup::new(config)?);
    Ok(ConsumerGroupService::from_config(group, config, processor))
}
