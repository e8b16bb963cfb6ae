//! Event types for the restyle event system
//!
//! Provides the shared event definitions and the EventBus used to push job
//! progress to SSE subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline events
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// Stage and status names are the wire names (`fetch`, `style-transfer`,
/// `partially-succeeded`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RestyleEvent {
    /// A transformation job was accepted
    JobSubmitted {
        job_id: Uuid,
        source_reference: String,
        target_style: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage began executing (after any worker-pool wait)
    StageStarted {
        job_id: Uuid,
        stage: String,
        /// 1-based attempt number (only `fetch` retries)
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// A stage produced and verified its output artifact
    StageCompleted {
        job_id: Uuid,
        stage: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A stage failed
    ///
    /// `required` tells subscribers whether the job is about to fail.
    StageFailed {
        job_id: Uuid,
        stage: String,
        required: bool,
        error_code: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage was not attempted
    StageSkipped {
        job_id: Uuid,
        stage: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Job reached `succeeded` or `partially-succeeded`
    JobCompleted {
        job_id: Uuid,
        status: String,
        styled_audio_url: String,
        timestamp: DateTime<Utc>,
    },

    /// Job reached `failed`
    JobFailed {
        job_id: Uuid,
        failed_stage: String,
        error_code: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Job reached `cancelled`
    JobCancelled {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl RestyleEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            RestyleEvent::JobSubmitted { .. } => "JobSubmitted",
            RestyleEvent::StageStarted { .. } => "StageStarted",
            RestyleEvent::StageCompleted { .. } => "StageCompleted",
            RestyleEvent::StageFailed { .. } => "StageFailed",
            RestyleEvent::StageSkipped { .. } => "StageSkipped",
            RestyleEvent::JobCompleted { .. } => "JobCompleted",
            RestyleEvent::JobFailed { .. } => "JobFailed",
            RestyleEvent::JobCancelled { .. } => "JobCancelled",
        }
    }

    /// Job the event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            RestyleEvent::JobSubmitted { job_id, .. }
            | RestyleEvent::StageStarted { job_id, .. }
            | RestyleEvent::StageCompleted { job_id, .. }
            | RestyleEvent::StageFailed { job_id, .. }
            | RestyleEvent::StageSkipped { job_id, .. }
            | RestyleEvent::JobCompleted { job_id, .. }
            | RestyleEvent::JobFailed { job_id, .. }
            | RestyleEvent::JobCancelled { job_id, .. } => *job_id,
        }
    }

    /// True for events that mark a terminal job state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RestyleEvent::JobCompleted { .. }
                | RestyleEvent::JobFailed { .. }
                | RestyleEvent::JobCancelled { .. }
        )
    }
}

/// Broadcast bus for RestyleEvent
///
/// Cloning the bus yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RestyleEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    ///
    /// # Examples
    ///
    /// ```
    /// use restyle_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<RestyleEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: RestyleEvent,
    ) -> Result<usize, broadcast::error::SendError<RestyleEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RestyleEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
