use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{MirrorError, MirrorResult};
use crate::sink::{TopicConnection, TopicConnector};

/// Per-topic connections of one sink session.
///
/// Connections are opened on first use and kept until [`ConnectionCache::close_all`]. Each
/// sink owns its cache, so independent sinks never share connections.
pub struct ConnectionCache<C: TopicConnector> {
    connector: C,
    connections: Mutex<HashMap<String, Arc<C::Connection>>>,
}

impl<C: TopicConnector> ConnectionCache<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Returns the cached connection of `topic`, connecting first if there is none.
    ///
    /// The map is not locked while connecting, so topics connect concurrently. When two
    /// tasks connect the same topic at once the first cached connection wins and the other
    /// one is closed.
    pub async fn get_or_connect(&self, topic: &str) -> MirrorResult<Arc<C::Connection>> {
        if let Some(connection) = self.connections.lock().await.get(topic) {
            return Ok(Arc::clone(connection));
        }

        let connection = Arc::new(self.connector.connect(topic).await?);

        let cached = match self.connections.lock().await.entry(topic.to_owned()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&connection));
                None
            }
        };

        let Some(cached) = cached else {
            info!(topic, "opened topic connection");
            return Ok(connection);
        };

        if let Err(err) = connection.close().await {
            warn!(topic, error = %err, "failed to close duplicate topic connection");
        }

        Ok(cached)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Closes and forgets every connection.
    ///
    /// Connections are closed concurrently and all of them are closed even when some fail,
    /// the failures are returned together.
    pub async fn close_all(&self) -> MirrorResult<()> {
        let connections = std::mem::take(&mut *self.connections.lock().await);

        let results = join_all(connections.into_iter().map(|(topic, connection)| async move {
            let result = connection.close().await;
            (topic, result)
        }))
        .await;

        let mut errors: Vec<MirrorError> = Vec::new();
        for (topic, result) in results {
            match result {
                Ok(()) => info!(topic = %topic, "closed topic connection"),
                Err(err) => {
                    warn!(topic = %topic, error = %err, "failed to close topic connection");
                    errors.push(err);
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }
}
