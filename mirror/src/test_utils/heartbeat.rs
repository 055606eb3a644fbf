use std::sync::{Arc, Mutex};

use crate::sync::{Heartbeat, HeartbeatReporter};

/// Keeps every heartbeat it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingHeartbeat {
    heartbeats: Arc<Mutex<Vec<Heartbeat>>>,
}

impl RecordingHeartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeats(&self) -> Vec<Heartbeat> {
        self.heartbeats.lock().expect("heartbeat lock poisoned").clone()
    }
}

impl HeartbeatReporter for RecordingHeartbeat {
    fn record_heartbeat(&self, heartbeat: Heartbeat) {
        self.heartbeats
            .lock()
            .expect("heartbeat lock poisoned")
            .push(heartbeat);
    }
}
