use chrono::{DateTime, Local};
use std::fmt;

/// A message received on the subscribed feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    topic: String,
    content: String,
    timestamp: DateTime<Local>,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Topic = {}, Msg = {}",
            self.topic,
            self.content
        )
    }
}

impl InboundMessage {
    pub fn from_topic(topic: String, content: String) -> Self {
        InboundMessage {
            topic,
            content,
            timestamp: Local::now(),
        }
    }

    /// Builds a message from a raw payload; invalid UTF-8 is replaced rather than rejected.
    pub fn from_payload(topic: String, payload: &[u8]) -> Self {
        Self::from_topic(topic, String::from_utf8_lossy(payload).into_owned())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }
}
