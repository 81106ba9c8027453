#![allow(dead_code)]

use async_trait::async_trait;
use kafka_handler::consumer::{
    ConsumerError, ConsumerResult, Context, GroupClaim, GroupSession, Message, MessageProcessor,
    ProcessOutcome,
};
use mockall::mock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

mock! {
    pub Processor {}

    #[async_trait]
    impl MessageProcessor for Processor {
        async fn handle(&self, ctx: &Context, message: &Message) -> ProcessOutcome;
    }
}

/// Session that records marks and commits instead of talking to a broker
pub struct RecordingSession {
    ctx: Context,
    marks: Mutex<Vec<i64>>,
    commits: AtomicUsize,
    fail_marks: bool,
}

impl RecordingSession {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            marks: Mutex::new(Vec::new()),
            commits: AtomicUsize::new(0),
            fail_marks: false,
        }
    }

    pub fn failing_marks(ctx: Context) -> Self {
        Self {
            fail_marks: true,
            ..Self::new(ctx)
        }
    }

    pub fn marks(&self) -> Vec<i64> {
        self.marks.lock().clone()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupSession for RecordingSession {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn generation_id(&self) -> i32 {
        1
    }

    fn mark(&self, message: &Message) -> ConsumerResult<()> {
        if self.fail_marks {
            return Err(ConsumerError::Commit("offset store unavailable".to_string()));
        }
        self.marks.lock().push(message.offset);
        Ok(())
    }

    async fn commit(&self) -> ConsumerResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Claim over a fixed list of messages. An open claim waits forever once
/// drained; a closed one reports end of stream.
pub struct ScriptedClaim {
    messages: VecDeque<Message>,
    open: bool,
}

impl ScriptedClaim {
    pub fn closed(messages: Vec<Message>) -> Self {
        Self {
            messages: messages.into(),
            open: false,
        }
    }

    pub fn open(messages: Vec<Message>) -> Self {
        Self {
            messages: messages.into(),
            open: true,
        }
    }

    pub fn remaining(&self) -> usize {
        self.messages.len()
    }
}

#[async_trait]
impl GroupClaim for ScriptedClaim {
    fn topic(&self) -> &str {
        "t"
    }

    fn partition(&self) -> i32 {
        0
    }

    fn initial_offset(&self) -> i64 {
        self.messages.front().map(|m| m.offset).unwrap_or(0)
    }

    async fn next_message(&mut self) -> Option<Message> {
        match self.messages.pop_front() {
            Some(message) => Some(message),
            None if self.open => futures::future::pending().await,
            None => None,
        }
    }
}

pub fn message(offset: i64) -> Message {
    Message::new("t", 0, offset, format!("payload-{}", offset))
}

pub fn messages(offsets: impl IntoIterator<Item = i64>) -> Vec<Message> {
    offsets.into_iter().map(message).collect()
}
