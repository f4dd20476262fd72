//! Job status events.
//!
//! Every record transition the dispatcher makes is mirrored as a
//! [`JobEvent`] through the [`EventSink`] seam. Emission is synchronous
//! best-effort: a sink with no listeners is not an error, and a failing
//! sink never fails the dispatch path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::{JobKind, JobRecord, JobStatus};

/// One status transition, as published to listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub external_id: String,
    pub job_name: String,
    pub job_type: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    /// Failure reason, present on FAILED transitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Buffered submissions this execution stands in for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub represented: Option<usize>,
}

impl JobEvent {
    /// Build an event from a record's current state.
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            external_id: record.external_id.clone(),
            job_name: record.job_name.clone(),
            job_type: record.job_type.clone(),
            kind: record.kind,
            status: record.status,
            timestamp: Utc::now(),
            error: record.error_message.clone(),
            represented: None,
        }
    }

    pub fn with_represented(mut self, count: usize) -> Self {
        self.represented = Some(count);
        self
    }
}

/// Listener seam for status events.
pub trait EventSink: Send + Sync {
    /// Publish one event. Must not block and must not fail the caller.
    fn publish(&self, event: JobEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: JobEvent) {}
}

/// Fan-out sink over a tokio broadcast channel.
///
/// Feeds the job-status WebSocket endpoint; slow consumers lag and drop,
/// they never backpressure the dispatcher.
pub struct BroadcastSink {
    sender: broadcast::Sender<JobEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// New subscription for one listener.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Listeners currently subscribed.
    pub fn listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: JobEvent) {
        // send only errs when nobody listens.
        let _ = self.sender.send(event);
    }
}
