use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::sink::memory::{MemoryTopicConnection, MemoryTopicConnector};
use crate::sink::{SinkEvent, TopicConnection, TopicConnector};

/// Builds `count` events for `topic` with payloads `"<topic>-<n>"`.
pub fn events_for(topic: &str, count: usize) -> Vec<SinkEvent> {
    (0..count)
        .map(|n| SinkEvent::new(topic, Bytes::from(format!("{topic}-{n}"))))
        .collect()
}

/// Delivers through a [`MemoryTopicConnector`] but fails or delays chosen topics.
#[derive(Debug, Clone, Default)]
pub struct FaultyConnector {
    memory: MemoryTopicConnector,
    failing: BTreeSet<String>,
    delays: BTreeMap<String, Duration>,
    connect_delay: Option<Duration>,
}

impl FaultyConnector {
    pub fn new(memory: MemoryTopicConnector) -> Self {
        Self {
            memory,
            ..Self::default()
        }
    }

    /// Makes every request to `topic` fail.
    pub fn failing(mut self, topic: &str) -> Self {
        self.failing.insert(topic.to_owned());
        self
    }

    /// Makes opening a connection to any topic take `delay`.
    pub fn slow_connect(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Makes every request to `topic` wait `delay` before being delivered.
    pub fn delayed(mut self, topic: &str, delay: Duration) -> Self {
        self.delays.insert(topic.to_owned(), delay);
        self
    }
}

impl TopicConnector for FaultyConnector {
    type Connection = FaultyConnection;

    async fn connect(&self, topic: &str) -> MirrorResult<FaultyConnection> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        Ok(FaultyConnection {
            topic: topic.to_owned(),
            inner: self.memory.connect(topic).await?,
            fail: self.failing.contains(topic),
            delay: self.delays.get(topic).copied(),
        })
    }

    async fn topic_exists(&self, topic: &str) -> MirrorResult<bool> {
        self.memory.topic_exists(topic).await
    }

    async fn create_topic(&self, topic: &str) -> MirrorResult<()> {
        self.memory.create_topic(topic).await
    }
}

#[derive(Debug)]
pub struct FaultyConnection {
    topic: String,
    inner: MemoryTopicConnection,
    fail: bool,
    delay: Option<Duration>,
}

impl TopicConnection for FaultyConnection {
    async fn send_batch(&self, events: Vec<Bytes>, deadline: Instant) -> MirrorResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail {
            bail!(
                ErrorKind::SinkDeliveryFailed,
                "Topic rejected the request",
                format!("topic `{}` is configured to fail", self.topic)
            );
        }

        self.inner.send_batch(events, deadline).await
    }

    async fn close(&self) -> MirrorResult<()> {
        self.inner.close().await
    }
}
