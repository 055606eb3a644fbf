use std::future::Future;

use bytes::Bytes;
use tokio::time::Instant;

use crate::error::MirrorResult;

/// A serialized change event bound for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEvent {
    pub topic: String,
    pub payload: Bytes,
}

impl SinkEvent {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> SinkEvent {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Opens connections to the topics of a messaging system.
pub trait TopicConnector: Send + Sync + 'static {
    type Connection: TopicConnection;

    fn connect(&self, topic: &str) -> impl Future<Output = MirrorResult<Self::Connection>> + Send;

    fn topic_exists(&self, topic: &str) -> impl Future<Output = MirrorResult<bool>> + Send;

    fn create_topic(&self, topic: &str) -> impl Future<Output = MirrorResult<()>> + Send;
}

/// An open connection to a single topic.
pub trait TopicConnection: Send + Sync + 'static {
    /// Publishes `events` as one request that must finish before `deadline`.
    fn send_batch(
        &self,
        events: Vec<Bytes>,
        deadline: Instant,
    ) -> impl Future<Output = MirrorResult<()>> + Send;

    fn close(&self) -> impl Future<Output = MirrorResult<()>> + Send;
}
