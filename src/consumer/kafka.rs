//! rdkafka-backed consumer group
//!
//! One [`ConsumerGroup::consume`] call is one generation. The fetch loop
//! polls the [`StreamConsumer`], which also serves rebalance callbacks, and
//! routes each message to a per-partition claim running on its own task.
//! The generation ends on revocation of a claimed partition, context end,
//! close, or when the first claim returns.
//!
//! The subscription outlives generations; only [`ConsumerGroup::close`]
//! leaves the group. Instead of rejoining, the end of a generation seeks
//! every claimed partition back to its first unmarked offset, so the next
//! generation sees the same messages a rejoin would redeliver. A claim whose
//! channel is full gets its partition paused in the client until it catches
//! up; the fetch loop itself never waits on a claim.

use crate::consumer::config::{CommitMode, ConsumerConfig};
use crate::consumer::context::Context;
use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::group::{ConsumerGroup, GroupClaim, GroupHandler, GroupSession};
use crate::consumer::message::Message;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use rdkafka::consumer::{
    BaseConsumer, CommitMode as KafkaCommitMode, Consumer, ConsumerContext, Rebalance,
    StreamConsumer,
};
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientConfig, ClientContext, Message as _, Offset, TopicPartitionList};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError, OwnedPermit};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type PartitionKey = (String, i32);

#[derive(Debug)]
enum RebalanceEvent {
    Assigned(Vec<PartitionKey>),
    Revoked(Vec<PartitionKey>),
}

/// Forwards rebalance callbacks to the fetch loop
pub struct GroupContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<PartitionKey> {
    tpl.elements()
        .iter()
        .map(|e| (e.topic().to_string(), e.partition()))
        .collect()
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let _ = self.events.send(RebalanceEvent::Revoked(partitions_of(tpl)));
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let _ = self.events.send(RebalanceEvent::Assigned(partitions_of(tpl)));
            }
            Rebalance::Error(e) => error!(error = %e, "rebalance failed"),
            Rebalance::Revoke(_) => {}
        }
    }
}

type GroupConsumer = StreamConsumer<GroupContext>;

/// Build the librdkafka client configuration for `config`
pub fn client_config(config: &ConsumerConfig) -> ConsumerResult<ClientConfig> {
    config.validate().map_err(ConsumerError::Config)?;

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("client.id", &config.client_id)
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
        .set("auto.offset.reset", config.auto_offset_reset.as_str())
        .set("enable.auto.offset.store", "false")
        .set(
            "enable.auto.commit",
            (config.commit_mode == CommitMode::Auto).to_string(),
        )
        .set(
            "auto.commit.interval.ms",
            config.auto_commit_interval_ms.to_string(),
        );

    for (key, value) in &config.kafka_properties {
        client_config.set(key, value);
    }
    Ok(client_config)
}

/// [`ConsumerGroup`] over an rdkafka [`StreamConsumer`]
pub struct KafkaConsumerGroup {
    consumer: Arc<GroupConsumer>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<RebalanceEvent>>,
    subscription: Mutex<Vec<String>>,
    closing: CancellationToken,
    closed: AtomicBool,
    generation: AtomicI32,
    channel_buffer_size: usize,
}

impl KafkaConsumerGroup {
    pub fn new(config: &ConsumerConfig) -> ConsumerResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer: GroupConsumer = client_config(config)?
            .create_with_context(GroupContext { events: tx })
            .map_err(|e| ConsumerError::Connection(format!("Failed to create consumer: {}", e)))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            commit_mode = ?config.commit_mode,
            "created kafka consumer group"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            events: tokio::sync::Mutex::new(rx),
            subscription: Mutex::new(Vec::new()),
            closing: CancellationToken::new(),
            closed: AtomicBool::new(false),
            generation: AtomicI32::new(0),
            channel_buffer_size: config.channel_buffer_size,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Subscribe unless already subscribed to exactly `topics`.
    /// The membership is kept between generations and only left on close.
    fn ensure_subscribed(&self, topics: &[String]) -> ConsumerResult<()> {
        let mut subscription = self.subscription.lock();
        if subscription.as_slice() == topics {
            return Ok(());
        }
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topic_refs)?;
        *subscription = topics.to_vec();
        info!(topics = ?topics, "subscribed");
        Ok(())
    }

    fn pause(&self, key: &PartitionKey) {
        if let Err(e) = self.consumer.pause(&partition_list(key)) {
            warn!(topic = %key.0, partition = key.1, error = %e, "failed to pause partition");
        }
    }

    fn resume(&self, key: &PartitionKey) {
        if let Err(e) = self.consumer.resume(&partition_list(key)) {
            warn!(topic = %key.0, partition = key.1, error = %e, "failed to resume partition");
        }
    }

    /// Move each partition back to the first offset this generation did not
    /// mark, so the next generation sees every unprocessed message again.
    async fn rewind(&self, positions: Vec<(PartitionKey, i64)>) {
        if positions.is_empty() {
            return;
        }
        let consumer = self.consumer.clone();
        let result = tokio::task::spawn_blocking(move || {
            for ((topic, partition), offset) in positions {
                // fails for partitions that were revoked; they restart from
                // the committed offset once assigned again
                if let Err(e) =
                    consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
                {
                    debug!(topic = %topic, partition, offset, error = %e, "seek skipped");
                }
            }
        })
        .await;
        if let Err(e) = result {
            warn!(error = %e, "rewind task failed");
        }
    }
}

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

fn partition_list(key: &PartitionKey) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(&key.0, key.1);
    tpl
}

/// Where each partition touched by a generation resumes: after the last
/// marked offset, or at the first delivered offset when nothing was marked
fn resume_positions(
    starts: &HashMap<PartitionKey, i64>,
    marked: &HashMap<PartitionKey, i64>,
) -> Vec<(PartitionKey, i64)> {
    starts
        .iter()
        .map(|(key, start)| {
            let next = marked.get(key).copied().unwrap_or(*start).max(*start);
            (key.clone(), next)
        })
        .collect()
}

/// Messages held back for partitions whose claim channel is full.
/// A partition with a backlog is paused in the client.
#[derive(Debug, Default)]
struct Backlog {
    pending: HashMap<PartitionKey, VecDeque<Message>>,
}

impl Backlog {
    fn is_paused(&self, key: &PartitionKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Queue behind the partition's backlog; true if this starts one
    fn push(&mut self, message: Message) -> bool {
        let queue = self
            .pending
            .entry((message.topic.clone(), message.partition))
            .or_default();
        queue.push_back(message);
        queue.len() == 1
    }

    fn pop(&mut self, key: &PartitionKey) -> Option<Message> {
        let queue = self.pending.get_mut(key)?;
        let message = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(key);
        }
        message
    }

    fn discard(&mut self, key: &PartitionKey) {
        self.pending.remove(key);
    }

    fn drain_keys(&mut self) -> Vec<PartitionKey> {
        self.pending.drain().map(|(key, _)| key).collect()
    }
}

type Room = (
    PartitionKey,
    Result<OwnedPermit<Message>, mpsc::error::SendError<()>>,
);

fn wait_for_room(key: PartitionKey, sender: mpsc::Sender<Message>) -> BoxFuture<'static, Room> {
    async move { (key, sender.reserve_owned().await) }.boxed()
}

enum Step {
    Deliver(Message),
    Room(Room),
    Revoked(Vec<PartitionKey>),
    ClaimFinished,
    Stop,
    Continue,
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    async fn consume(
        &self,
        ctx: &Context,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
    ) -> ConsumerResult<()> {
        if self.is_closed() {
            return Err(ConsumerError::GroupClosed);
        }

        // one generation at a time
        let mut events = self.events.lock().await;
        self.ensure_subscribed(topics)?;

        let generation_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(KafkaSession {
            consumer: self.consumer.clone(),
            ctx: ctx.child(),
            generation_id,
            marked: Mutex::new(HashMap::new()),
        });
        info!(generation = generation_id, topics = ?topics, "generation started");

        handler.setup(session.as_ref()).await?;

        let mut claims: HashMap<PartitionKey, mpsc::Sender<Message>> = HashMap::new();
        let mut starts: HashMap<PartitionKey, i64> = HashMap::new();
        let mut backlog = Backlog::default();
        let mut waiting: FuturesUnordered<BoxFuture<'static, Room>> = FuturesUnordered::new();
        let mut tasks: JoinSet<ConsumerResult<()>> = JoinSet::new();
        let mut results = Vec::new();

        loop {
            let step = tokio::select! {
                biased;
                _ = session.ctx.done() => Step::Stop,
                _ = self.closing.cancelled() => Step::Stop,
                Some(joined) = tasks.join_next() => {
                    results.push(joined.unwrap_or_else(|e| Err(ConsumerError::Handler(e.to_string()))));
                    Step::ClaimFinished
                }
                event = events.recv() => match event {
                    Some(RebalanceEvent::Revoked(partitions)) => Step::Revoked(partitions),
                    Some(RebalanceEvent::Assigned(partitions)) => {
                        info!(generation = generation_id, assigned = ?partitions, "partitions assigned");
                        Step::Continue
                    }
                    None => Step::Stop,
                },
                Some(room) = waiting.next(), if !waiting.is_empty() => Step::Room(room),
                received = self.consumer.recv() => match received {
                    Ok(message) => Step::Deliver(convert(&message)),
                    Err(e) => {
                        warn!(error = %e, "kafka error");
                        Step::Continue
                    }
                },
            };

            match step {
                Step::Deliver(message) => {
                    let key = (message.topic.clone(), message.partition);
                    let sender = claims.entry(key.clone()).or_insert_with(|| {
                        let (tx, rx) = mpsc::channel(self.channel_buffer_size);
                        starts.insert(key.clone(), message.offset);
                        let mut claim = KafkaClaim {
                            topic: message.topic.clone(),
                            partition: message.partition,
                            initial_offset: message.offset,
                            messages: rx,
                        };
                        let handler = handler.clone();
                        let session = session.clone();
                        tasks.spawn(async move {
                            handler.consume_claim(session.as_ref(), &mut claim).await
                        });
                        tx
                    });

                    if backlog.is_paused(&key) {
                        backlog.push(message);
                        continue;
                    }
                    match sender.try_send(message) {
                        Ok(()) => {}
                        Err(TrySendError::Full(message)) => {
                            debug!(topic = %key.0, partition = key.1, "claim is busy, pausing partition");
                            backlog.push(message);
                            self.pause(&key);
                            waiting.push(wait_for_room(key, sender.clone()));
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!(generation = generation_id, "claim already finished, dropping message");
                        }
                    }
                }
                Step::Room((key, Ok(permit))) => {
                    if let Some(message) = backlog.pop(&key) {
                        let _ = permit.send(message);
                    }
                    match claims.get(&key) {
                        Some(sender) if backlog.is_paused(&key) => {
                            waiting.push(wait_for_room(key, sender.clone()));
                        }
                        _ => {
                            debug!(topic = %key.0, partition = key.1, "claim caught up, resuming partition");
                            self.resume(&key);
                        }
                    }
                }
                Step::Room((key, Err(_))) => {
                    backlog.discard(&key);
                    self.resume(&key);
                }
                Step::Revoked(partitions) => {
                    if partitions.iter().any(|p| claims.contains_key(p)) {
                        info!(generation = generation_id, revoked = ?partitions, "partitions revoked");
                        break;
                    }
                    debug!(generation = generation_id, revoked = ?partitions, "revoked partitions had no claim");
                }
                Step::Continue => {}
                Step::ClaimFinished | Step::Stop => break,
            }
        }

        session.ctx.cancel();
        drop(waiting);
        drop(claims);
        for key in backlog.drain_keys() {
            self.resume(&key);
        }
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.unwrap_or_else(|e| Err(ConsumerError::Handler(e.to_string()))));
        }

        if let Err(e) = handler.cleanup(session.as_ref()).await {
            warn!(generation = generation_id, error = %e, "cleanup failed");
        }
        info!(generation = generation_id, "generation ended");

        if self.is_closed() {
            return Err(ConsumerError::GroupClosed);
        }
        let marked = session.marked.lock().clone();
        self.rewind(resume_positions(&starts, &marked)).await;

        match results.into_iter().filter_map(Result::err).find(|e| !e.is_cancellation()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&self) -> ConsumerResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("closing kafka consumer group");
            self.closing.cancel();
            self.consumer.unsubscribe();
            self.subscription.lock().clear();
        }
        Ok(())
    }
}

fn convert(message: &BorrowedMessage<'_>) -> Message {
    Message {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        key: message.key().map(Bytes::copy_from_slice),
        payload: message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
    }
}

struct KafkaSession {
    consumer: Arc<GroupConsumer>,
    ctx: Context,
    generation_id: i32,
    marked: Mutex<HashMap<PartitionKey, i64>>,
}

fn offsets_list(offsets: &HashMap<PartitionKey, i64>) -> ConsumerResult<TopicPartitionList> {
    let mut tpl = TopicPartitionList::new();
    for ((topic, partition), next) in offsets {
        tpl.add_partition_offset(topic, *partition, Offset::Offset(*next))?;
    }
    Ok(tpl)
}

#[async_trait]
impl GroupSession for KafkaSession {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn generation_id(&self) -> i32 {
        self.generation_id
    }

    fn mark(&self, message: &Message) -> ConsumerResult<()> {
        let next = message.offset + 1;
        let mut single = HashMap::new();
        single.insert((message.topic.clone(), message.partition), next);
        self.consumer
            .store_offsets(&offsets_list(&single)?)
            .map_err(|e| ConsumerError::Commit(format!("failed to store offset: {}", e)))?;

        let mut marked = self.marked.lock();
        let entry = marked
            .entry((message.topic.clone(), message.partition))
            .or_insert(next);
        if *entry < next {
            *entry = next;
        }
        Ok(())
    }

    async fn commit(&self) -> ConsumerResult<()> {
        let offsets = self.marked.lock().clone();
        if offsets.is_empty() {
            return Ok(());
        }
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || -> ConsumerResult<()> {
            let tpl = offsets_list(&offsets)?;
            consumer
                .commit(&tpl, KafkaCommitMode::Sync)
                .map_err(|e| ConsumerError::Commit(format!("failed to commit offsets: {}", e)))
        })
        .await
        .map_err(|e| ConsumerError::Commit(e.to_string()))?
    }
}

struct KafkaClaim {
    topic: String,
    partition: i32,
    initial_offset: i64,
    messages: mpsc::Receiver<Message>,
}

#[async_trait]
impl GroupClaim for KafkaClaim {
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
        self.messages.recv().await
    }
}
