//! In-process consumer group
//!
//! [`InMemoryGroup`] keeps an append-only log and a committed offset per
//! partition. Every [`ConsumerGroup::consume`] call is a new generation whose
//! claims start at the committed offset, so anything left unmarked in an
//! earlier generation is delivered again. Committed offsets use Kafka
//! semantics: they name the next offset to read.

use crate::consumer::context::Context;
use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::group::{ConsumerGroup, GroupClaim, GroupHandler, GroupSession};
use crate::consumer::message::Message;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

type PartitionKey = (String, i32);

#[derive(Debug)]
struct PartitionLog {
    log_start: i64,
    messages: Vec<Message>,
    committed: Option<i64>,
}

impl PartitionLog {
    fn new(log_start: i64) -> Self {
        Self {
            log_start,
            messages: Vec::new(),
            committed: None,
        }
    }

    fn next_offset(&self) -> i64 {
        self.messages
            .last()
            .map(|m| m.offset + 1)
            .unwrap_or(self.log_start)
    }

    fn start_position(&self) -> i64 {
        self.committed.unwrap_or(self.log_start)
    }
}

#[derive(Debug, Default)]
struct State {
    partitions: BTreeMap<PartitionKey, PartitionLog>,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    version: watch::Sender<u64>,
    generation: AtomicI32,
}

impl Inner {
    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn commit(&self, offsets: &HashMap<PartitionKey, i64>) {
        let mut state = self.state.lock();
        for (key, next) in offsets {
            if let Some(log) = state.partitions.get_mut(key) {
                if log.committed.map_or(true, |c| c < *next) {
                    log.committed = Some(*next);
                }
            }
        }
    }
}

/// Consumer group backed by process memory
#[derive(Debug, Clone)]
pub struct InMemoryGroup {
    inner: Arc<Inner>,
}

impl InMemoryGroup {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                version,
                generation: AtomicI32::new(0),
            }),
        }
    }

    /// Create `partitions` empty partitions for `topic`
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let mut state = self.inner.state.lock();
        for partition in 0..partitions {
            state
                .partitions
                .entry((topic.to_string(), partition))
                .or_insert_with(|| PartitionLog::new(0));
        }
    }

    /// Create a partition whose first message gets offset `log_start`
    pub fn create_partition(&self, topic: &str, partition: i32, log_start: i64) {
        let mut state = self.inner.state.lock();
        state
            .partitions
            .entry((topic.to_string(), partition))
            .or_insert_with(|| PartitionLog::new(log_start));
    }

    /// Append a message and return its offset
    pub fn produce(&self, topic: &str, partition: i32, payload: impl Into<Bytes>) -> i64 {
        let offset = {
            let mut state = self.inner.state.lock();
            let log = state
                .partitions
                .entry((topic.to_string(), partition))
                .or_insert_with(|| PartitionLog::new(0));
            let offset = log.next_offset();
            log.messages.push(
                Message::new(topic, partition, offset, payload).with_timestamp(Utc::now()),
            );
            offset
        };
        self.inner.notify();
        offset
    }

    /// Next offset the group will read from this partition, if anything was committed
    pub fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        let state = self.inner.state.lock();
        state
            .partitions
            .get(&(topic.to_string(), partition))
            .and_then(|log| log.committed)
    }

    /// Number of generations started so far
    pub fn generations(&self) -> i32 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    async fn wait_idle(&self, ctx: &Context) {
        let mut version = self.inner.version.subscribe();
        while !self.inner.is_closed() {
            tokio::select! {
                _ = ctx.done() => return,
                changed = version.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn claims_for(&self, topics: &[String]) -> Vec<MemoryClaim> {
        let mut state = self.inner.state.lock();
        for topic in topics {
            if !state.partitions.keys().any(|(t, _)| t == topic) {
                state
                    .partitions
                    .insert((topic.clone(), 0), PartitionLog::new(0));
            }
        }
        state
            .partitions
            .iter()
            .filter(|((topic, _), _)| topics.contains(topic))
            .map(|((topic, partition), log)| MemoryClaim {
                topic: topic.clone(),
                partition: *partition,
                initial_offset: log.start_position(),
                position: log.start_position(),
                inner: self.inner.clone(),
                version: self.inner.version.subscribe(),
            })
            .collect()
    }
}

impl Default for InMemoryGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsumerGroup for InMemoryGroup {
    async fn consume(
        &self,
        ctx: &Context,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
    ) -> ConsumerResult<()> {
        if self.inner.is_closed() {
            return Err(ConsumerError::GroupClosed);
        }

        let generation_id = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = MemorySession {
            ctx: ctx.child(),
            generation_id,
            inner: self.inner.clone(),
            marked: Mutex::new(HashMap::new()),
        };
        debug!(generation = generation_id, "in-memory generation started");

        handler.setup(&session).await?;

        let claims = self.claims_for(topics);
        if claims.is_empty() {
            // nothing assigned: the generation lasts until it is ended
            self.wait_idle(&session.ctx).await;
        }
        let results = futures::future::join_all(claims.into_iter().map(|mut claim| {
            let handler = &handler;
            let session = &session;
            async move {
                let result = handler.consume_claim(session, &mut claim).await;
                // one finished claim ends the whole generation
                session.ctx.cancel();
                result
            }
        }))
        .await;

        session.flush();
        if let Err(e) = handler.cleanup(&session).await {
            warn!(generation = generation_id, error = %e, "cleanup failed");
        }

        if self.inner.is_closed() {
            return Err(ConsumerError::GroupClosed);
        }
        match results
            .into_iter()
            .filter_map(Result::err)
            .find(|e| !e.is_cancellation())
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&self) -> ConsumerResult<()> {
        self.inner.state.lock().closed = true;
        self.inner.notify();
        Ok(())
    }
}

struct MemorySession {
    ctx: Context,
    generation_id: i32,
    inner: Arc<Inner>,
    marked: Mutex<HashMap<PartitionKey, i64>>,
}

impl MemorySession {
    fn flush(&self) {
        let marked = self.marked.lock().clone();
        self.inner.commit(&marked);
    }
}

#[async_trait]
impl GroupSession for MemorySession {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn generation_id(&self) -> i32 {
        self.generation_id
    }

    fn mark(&self, message: &Message) -> ConsumerResult<()> {
        let mut marked = self.marked.lock();
        let next = marked
            .entry((message.topic.clone(), message.partition))
            .or_insert(message.offset + 1);
        if *next < message.offset + 1 {
            *next = message.offset + 1;
        }
        Ok(())
    }

    async fn commit(&self) -> ConsumerResult<()> {
        self.flush();
        Ok(())
    }
}

enum Fetch {
    Ready(Message),
    Closed,
    Wait,
}

struct MemoryClaim {
    topic: String,
    partition: i32,
    initial_offset: i64,
    position: i64,
    inner: Arc<Inner>,
    version: watch::Receiver<u64>,
}

impl MemoryClaim {
    fn fetch(&self) -> Fetch {
        let state = self.inner.state.lock();
        if state.closed {
            return Fetch::Closed;
        }
        state
            .partitions
            .get(&(self.topic.clone(), self.partition))
            .and_then(|log| log.messages.iter().find(|m| m.offset >= self.position))
            .cloned()
            .map(Fetch::Ready)
            .unwrap_or(Fetch::Wait)
    }
}

#[async_trait]
impl GroupClaim for MemoryClaim {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    fn initial_offset(&self) -> i64 {
        self.initial_offset
    }

    async fn next_message(&mut self) -> Option<Message> {
        loop {
            match self.fetch() {
                Fetch::Ready(message) => {
                    self.position = message.offset + 1;
                    return Some(message);
                }
                Fetch::Closed => return None,
                Fetch::Wait => {
                    if self.version.changed().await.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}
