use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use mirror_config::shared::FanoutConfig;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, MirrorError, MirrorResult};
use crate::mirror_error;
use crate::sink::{ConnectionCache, SinkEvent, TopicConnection, TopicConnector};
use crate::store::metadata::MetadataStore;
use crate::sync::{Heartbeat, HeartbeatReporter};
use crate::types::SourceOffset;

/// Result of a successful [`FanoutSink::sync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutOutcome {
    pub events_delivered: usize,
    /// Number of per-topic requests sent.
    pub requests: usize,
}

/// Delivers batches of events to their topics, one request per topic, in parallel.
///
/// The sink is append-only: it has no raw log and no normalize step, and only the source
/// offset of the job is recorded once a whole batch was delivered. A failed batch is not
/// retried here. Retrying it as a whole is safe, duplicates are left to the topic consumers.
pub struct FanoutSink<C: TopicConnector, S, H> {
    job_name: String,
    cache: Arc<ConnectionCache<C>>,
    store: S,
    heartbeat: H,
    config: FanoutConfig,
}

impl<C, S, H> FanoutSink<C, S, H>
where
    C: TopicConnector,
    S: MetadataStore,
    H: HeartbeatReporter,
{
    pub fn new(
        job_name: impl Into<String>,
        connector: C,
        store: S,
        heartbeat: H,
        config: FanoutConfig,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            cache: Arc::new(ConnectionCache::new(connector)),
            store,
            heartbeat,
            config,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn connections(&self) -> &ConnectionCache<C> {
        &self.cache
    }

    /// Creates every topic in `topics` that does not exist yet and returns the created ones.
    pub async fn ensure_topics(&self, topics: &[String]) -> MirrorResult<Vec<String>> {
        let connector = self.cache.connector();

        let mut created = Vec::new();
        for topic in topics {
            if connector.topic_exists(topic).await? {
                debug!(job_name = %self.job_name, topic = %topic, "topic already exists");
                continue;
            }

            connector.create_topic(topic).await?;
            info!(job_name = %self.job_name, topic = %topic, "topic created");
            created.push(topic.clone());
        }

        Ok(created)
    }

    /// Delivers `events`, which end at `source_offset`, and then records the offset.
    ///
    /// Events are accumulated per topic and sent in rounds of at most
    /// `max_events_per_request` events, every round sending one request per topic
    /// concurrently. All requests of the call share one deadline of `batch_timeout_ms`.
    /// The first failing request decides the result. The other requests of its round still
    /// run to completion, but no further round is started and the offset is not recorded.
    pub async fn sync(
        &self,
        events: Vec<SinkEvent>,
        source_offset: SourceOffset,
    ) -> MirrorResult<FanoutOutcome> {
        if events.is_empty() {
            info!(job_name = %self.job_name, "no events to deliver");
            return Ok(FanoutOutcome::default());
        }

        let deadline = Instant::now() + self.config.batch_timeout();
        let max_events = self.config.max_events_per_request.max(1);
        let heartbeat_every = self.config.events_per_heartbeat.max(1);
        let total = events.len();

        let delivered = Arc::new(AtomicUsize::new(0));
        let mut requests = 0;
        let mut last_heartbeat = 0;
        let mut round: BTreeMap<String, Vec<Bytes>> = BTreeMap::new();
        let mut round_events = 0;

        let mut events = events.into_iter().peekable();
        while let Some(event) = events.next() {
            round.entry(event.topic).or_default().push(event.payload);
            round_events += 1;

            if round_events < max_events && events.peek().is_some() {
                continue;
            }

            requests += self
                .deliver_round(std::mem::take(&mut round), deadline, &delivered)
                .await?;
            round_events = 0;

            let processed = delivered.load(Ordering::SeqCst);
            if processed - last_heartbeat >= heartbeat_every || processed == total {
                self.heartbeat.record_heartbeat(Heartbeat {
                    job_name: self.job_name.clone(),
                    processed,
                    total,
                });
                last_heartbeat = processed;
            }
        }

        self.store
            .record_offset(&self.job_name, source_offset)
            .await?;

        let outcome = FanoutOutcome {
            events_delivered: delivered.load(Ordering::SeqCst),
            requests,
        };
        info!(
            job_name = %self.job_name,
            source_offset,
            events = outcome.events_delivered,
            requests = outcome.requests,
            "batch delivered"
        );

        Ok(outcome)
    }

    /// Closes every cached topic connection.
    pub async fn close(&self) -> MirrorResult<()> {
        self.cache.close_all().await
    }

    /// Sends one request per topic of `round` concurrently and waits for all of them.
    ///
    /// Returns the number of requests sent, or the first error recorded by any of them.
    async fn deliver_round(
        &self,
        round: BTreeMap<String, Vec<Bytes>>,
        deadline: Instant,
        delivered: &Arc<AtomicUsize>,
    ) -> MirrorResult<usize> {
        let requests = round.len();
        let first_error: Arc<OnceLock<MirrorError>> = Arc::new(OnceLock::new());

        let mut join_set = JoinSet::new();
        for (topic, events) in round {
            let cache = Arc::clone(&self.cache);
            let first_error = Arc::clone(&first_error);
            let delivered = Arc::clone(delivered);
            let job_name = self.job_name.clone();

            join_set.spawn(async move {
                let count = events.len();
                let result = match timeout_at(deadline, deliver(&cache, &topic, events, deadline)).await {
                    Ok(result) => result,
                    Err(_) => Err(mirror_error!(
                        ErrorKind::SinkTimeout,
                        "Topic delivery timed out",
                        format!("delivery of {count} events to topic `{topic}` missed the batch deadline")
                    )),
                };

                match result {
                    Ok(()) => {
                        delivered.fetch_add(count, Ordering::SeqCst);
                        debug!(job_name = %job_name, topic = %topic, events = count, "topic delivered");
                    }
                    Err(err) => {
                        warn!(job_name = %job_name, topic = %topic, error = %err, "topic delivery failed");
                        // Only the first error is kept.
                        let _ = first_error.set(err);
                    }
                }
            });
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(join_err) = result {
                let _ = first_error.set(mirror_error!(
                    ErrorKind::SinkDeliveryFailed,
                    "Topic delivery task panicked",
                    join_err.to_string()
                ));
            }
        }

        if let Some(err) = first_error.get() {
            return Err(err.clone());
        }

        Ok(requests)
    }
}

async fn deliver<C: TopicConnector>(
    cache: &ConnectionCache<C>,
    topic: &str,
    events: Vec<Bytes>,
    deadline: Instant,
) -> MirrorResult<()> {
    let connection = cache.get_or_connect(topic).await?;

    connection.send_batch(events, deadline).await
}
