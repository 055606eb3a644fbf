use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};
use crate::sink::{TopicConnection, TopicConnector};

#[derive(Debug, Default)]
struct Inner {
    topics: BTreeSet<String>,
    requests: BTreeMap<String, Vec<Vec<Bytes>>>,
    connects: usize,
    closed: usize,
}

/// In-memory topics, for tests and local development.
///
/// Every request sent through a connection is kept as-is so that the request boundaries can
/// be inspected afterwards. Topics are created implicitly by the first request.
#[derive(Debug, Clone, Default)]
pub struct MemoryTopicConnector {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTopicConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the requests received by `topic`, oldest first.
    pub async fn requests(&self, topic: &str) -> Vec<Vec<Bytes>> {
        let inner = self.inner.lock().await;

        inner.requests.get(topic).cloned().unwrap_or_default()
    }

    /// Returns all events received by `topic` in arrival order.
    pub async fn events(&self, topic: &str) -> Vec<Bytes> {
        self.requests(topic).await.into_iter().flatten().collect()
    }

    pub async fn request_count(&self) -> usize {
        let inner = self.inner.lock().await;

        inner.requests.values().map(Vec::len).sum()
    }

    pub async fn topics(&self) -> BTreeSet<String> {
        self.inner.lock().await.topics.clone()
    }

    /// Number of connections opened so far.
    pub async fn connects(&self) -> usize {
        self.inner.lock().await.connects
    }

    /// Number of connections closed so far.
    pub async fn closed(&self) -> usize {
        self.inner.lock().await.closed
    }
}

impl TopicConnector for MemoryTopicConnector {
    type Connection = MemoryTopicConnection;

    async fn connect(&self, topic: &str) -> MirrorResult<MemoryTopicConnection> {
        let mut inner = self.inner.lock().await;
        inner.connects += 1;

        Ok(MemoryTopicConnection {
            topic: topic.to_owned(),
            inner: Arc::clone(&self.inner),
        })
    }

    async fn topic_exists(&self, topic: &str) -> MirrorResult<bool> {
        Ok(self.inner.lock().await.topics.contains(topic))
    }

    async fn create_topic(&self, topic: &str) -> MirrorResult<()> {
        let mut inner = self.inner.lock().await;
        inner.topics.insert(topic.to_owned());

        info!(topic, "created in-memory topic");

        Ok(())
    }
}

/// Connection to one topic of a [`MemoryTopicConnector`].
#[derive(Debug)]
pub struct MemoryTopicConnection {
    topic: String,
    inner: Arc<Mutex<Inner>>,
}

impl TopicConnection for MemoryTopicConnection {
    async fn send_batch(&self, events: Vec<Bytes>, deadline: Instant) -> MirrorResult<()> {
        if Instant::now() >= deadline {
            bail!(
                ErrorKind::SinkTimeout,
                "Topic delivery timed out",
                format!("deadline passed before sending to topic `{}`", self.topic)
            );
        }

        let mut inner = self.inner.lock().await;
        inner.topics.insert(self.topic.clone());
        inner
            .requests
            .entry(self.topic.clone())
            .or_default()
            .push(events);

        Ok(())
    }

    async fn close(&self) -> MirrorResult<()> {
        self.inner.lock().await.closed += 1;

        Ok(())
    }
}
