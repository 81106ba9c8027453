//! Broker-independent message record

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};

/// A consumed message. Read-only to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Broker or producer timestamp
    pub timestamp: Option<DateTime<Utc>>,
    /// Message key (if present)
    pub key: Option<Bytes>,
    /// Message payload
    pub payload: Bytes,
}

impl Message {
    /// Create a message without key or timestamp
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp: None,
            key: None,
            payload: payload.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Timestamp formatted as RFC 3339, empty when unknown
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_message_builder() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let message = Message::new("t", 0, 7, "x")
            .with_key("k")
            .with_timestamp(ts);

        assert_eq!(message.len(), 1);
        assert_eq!(message.key.as_deref(), Some(&b"k"[..]));
        assert_eq!(message.timestamp_rfc3339(), "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_missing_timestamp_formats_empty() {
        let message = Message::new("t", 0, 0, Bytes::new());
        assert!(message.is_empty());
        assert_eq!(message.timestamp_rfc3339(), "");
    }
}
