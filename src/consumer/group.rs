//! Broker client seams: group, session, claim and handler
//!
//! A [`ConsumerGroup`] drives one membership generation per
//! [`ConsumerGroup::consume`] call. For that generation it creates a
//! [`GroupSession`], calls [`GroupHandler::setup`], runs
//! [`GroupHandler::consume_claim`] once per assigned partition (concurrently),
//! and finally calls [`GroupHandler::cleanup`]. Sessions and claims are only
//! valid for the duration of those calls.

use crate::consumer::context::Context;
use crate::consumer::error::ConsumerResult;
use crate::consumer::message::Message;
use async_trait::async_trait;
use std::sync::Arc;

/// One generation of group membership
#[async_trait]
pub trait GroupSession: Send + Sync {
    /// Cancellation scope of the generation; ends on rebalance or shutdown
    fn context(&self) -> &Context;

    /// Generation identifier assigned by the broker client
    fn generation_id(&self) -> i32;

    /// Record that `message` and everything before it in its partition may
    /// be committed
    fn mark(&self, message: &Message) -> ConsumerResult<()>;

    /// Make marked offsets durable
    async fn commit(&self) -> ConsumerResult<()>;
}

/// Ordered message stream of one assigned partition
#[async_trait]
pub trait GroupClaim: Send {
    fn topic(&self) -> &str;

    fn partition(&self) -> i32;

    /// Offset of the first message the claim will deliver
    fn initial_offset(&self) -> i64;

    /// Next message, or `None` once the stream is closed.
    /// Must be cancel safe: dropping the future loses no message.
    async fn next_message(&mut self) -> Option<Message>;
}

/// Callbacks a [`ConsumerGroup`] drives for each generation
#[async_trait]
pub trait GroupHandler: Send + Sync {
    /// Called before any claim of the generation is consumed
    async fn setup(&self, _session: &dyn GroupSession) -> ConsumerResult<()> {
        Ok(())
    }

    /// Called after every claim of the generation has returned
    async fn cleanup(&self, _session: &dyn GroupSession) -> ConsumerResult<()> {
        Ok(())
    }

    /// Consume one partition claim until it closes or must be abandoned
    async fn consume_claim(
        &self,
        session: &dyn GroupSession,
        claim: &mut dyn GroupClaim,
    ) -> ConsumerResult<()>;
}

/// Group membership supplied by a broker client
#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Join the group for `topics` and consume one generation.
    ///
    /// Blocks until the generation ends. Returns
    /// [`ConsumerError::GroupClosed`](crate::consumer::ConsumerError::GroupClosed)
    /// once the group has been closed.
    async fn consume(
        &self,
        ctx: &Context,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
    ) -> ConsumerResult<()>;

    /// Permanently close the group
    async fn close(&self) -> ConsumerResult<()>;
}
