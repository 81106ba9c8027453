//! Consumer-group message processing engine
//!
//! Subscribes to topic partitions as a member of a consumer group, hands
//! every message to a user [`MessageProcessor`](consumer::MessageProcessor)
//! exactly once per delivery attempt, and decides per outcome whether to
//! mark the message, abandon the claim, or stop.
//!
//! # Kafka
//!
//! ```no_run
//! # #[cfg(feature = "kafka")]
//! # async fn example() -> anyhow::Result<()> {
//! use kafka_handler::consumer::{
//!     create_kafka_service, ConsumerConfig, Context, Message, MessageProcessor, ProcessOutcome,
//! };
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Audit;
//!
//! #[async_trait]
//! impl MessageProcessor for Audit {
//!     async fn handle(&self, _ctx: &Context, message: &Message) -> ProcessOutcome {
//!         tracing::info!(offset = message.offset, "audited");
//!         ProcessOutcome::Success
//!     }
//! }
//!
//! let config = ConsumerConfig::builder()
//!     .brokers("localhost:9092")
//!     .group_id("audit")
//!     .topics(vec!["security-events".to_string()])
//!     .build();
//!
//! let service = create_kafka_service(&config, Arc::new(Audit))?;
//! service.run(&Context::new()).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

/// Consumer group handler, service and broker adapters
pub mod consumer;

/// Tracing subscriber setup
pub mod logging;

pub use consumer::{
    ConsumerError, ConsumerGroupService, ConsumerResult, Context, Message, MessageProcessor,
    ProcessOutcome,
};
pub use logging::init_tracing;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
