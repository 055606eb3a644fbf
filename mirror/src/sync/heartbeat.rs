use tracing::debug;

/// Progress of a long running sync or fan-out call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub job_name: String,
    /// Items handled so far in this call.
    pub processed: usize,
    /// Items handed to this call.
    pub total: usize,
}

/// Receives liveness reports so a supervising scheduler can tell a slow job from a stuck one.
pub trait HeartbeatReporter: Send + Sync {
    fn record_heartbeat(&self, heartbeat: Heartbeat);
}

/// Logs heartbeats at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHeartbeat;

impl HeartbeatReporter for LogHeartbeat {
    fn record_heartbeat(&self, heartbeat: Heartbeat) {
        debug!(
            job_name = %heartbeat.job_name,
            processed = heartbeat.processed,
            total = heartbeat.total,
            "heartbeat"
        );
    }
}
