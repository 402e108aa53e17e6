//! Event types and the in-process event bus
//!
//! Mirror changes and reconciliation job progress are broadcast on a
//! `tokio::sync::broadcast` channel. The HTTP surface forwards them to SSE clients;
//! nothing in the core depends on anyone listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Which bulk job an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Rebuild,
    AuditRepair,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Rebuild => write!(f, "rebuild"),
            JobKind::AuditRepair => write!(f, "audit-repair"),
        }
    }
}

/// Events emitted by the mirror synchronizer and reconciliation jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MirrorEvent {
    /// A mirror post was created for an origin item
    MirrorCreated {
        guild_id: u64,
        origin_id: u64,
        mirror_id: u64,
        timestamp: DateTime<Utc>,
    },
    /// A mirror entry (and its posts) was removed
    MirrorRemoved {
        guild_id: u64,
        origin_id: u64,
        timestamp: DateTime<Utc>,
    },
    JobStarted {
        job_id: Uuid,
        guild_id: u64,
        kind: JobKind,
        total: usize,
        fast: bool,
        timestamp: DateTime<Utc>,
    },
    /// Periodic progress of a running job
    JobProgress {
        job_id: Uuid,
        guild_id: u64,
        kind: JobKind,
        processed: usize,
        total: usize,
        elapsed_seconds: u64,
        timestamp: DateTime<Utc>,
    },
    JobCompleted {
        job_id: Uuid,
        guild_id: u64,
        kind: JobKind,
        summary: String,
        timestamp: DateTime<Utc>,
    },
    JobFailed {
        job_id: Uuid,
        guild_id: u64,
        kind: JobKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl MirrorEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            MirrorEvent::MirrorCreated { .. } => "MirrorCreated",
            MirrorEvent::MirrorRemoved { .. } => "MirrorRemoved",
            MirrorEvent::JobStarted { .. } => "JobStarted",
            MirrorEvent::JobProgress { .. } => "JobProgress",
            MirrorEvent::JobCompleted { .. } => "JobCompleted",
            MirrorEvent::JobFailed { .. } => "JobFailed",
        }
    }

    /// Human-readable progress line, as sent back to the operator
    pub fn describe(&self) -> String {
        match self {
            MirrorEvent::MirrorCreated { origin_id, mirror_id, .. } => {
                format!("Mirrored message {} as {}", origin_id, mirror_id)
            }
            MirrorEvent::MirrorRemoved { origin_id, .. } => {
                format!("Removed mirror of message {}", origin_id)
            }
            MirrorEvent::JobStarted { kind, total, fast, .. } => {
                let mode = if *fast { " (fast mode)" } else { "" };
                format!("Started {}{} over {} entries", kind, mode, total)
            }
            MirrorEvent::JobProgress { kind, processed, total, elapsed_seconds, .. } => format!(
                "{}: processed {}/{} entries ({}s elapsed)",
                kind, processed, total, elapsed_seconds
            ),
            MirrorEvent::JobCompleted { summary, .. } => summary.clone(),
            MirrorEvent::JobFailed { kind, error, .. } => format!("{} failed: {}", kind, error),
        }
    }
}

/// Broadcast bus for [`MirrorEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MirrorEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MirrorEvent) {
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
