//! Periodic progress reporting for long-running jobs
//!
//! A background task publishes "processed N of M" every interval until the job
//! stops it. Stopping is immediate: no final tick is sent after the job ends.

use chrono::Utc;
use starboard_common::events::{EventBus, JobKind, MirrorEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::GuildId;

pub struct ProgressReporter {
    processed: Arc<AtomicUsize>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn start(
        events: EventBus,
        job_id: Uuid,
        guild_id: GuildId,
        kind: JobKind,
        total: usize,
        period: Duration,
    ) -> Self {
        let processed = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let processed = processed.clone();
            let cancel = cancel.clone();
            async move {
                let started = Instant::now();
                let mut ticker = tokio::time::interval_at(started + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let event = MirrorEvent::JobProgress {
                                job_id,
                                guild_id,
                                kind,
                                processed: processed.load(Ordering::Relaxed),
                                total,
                                elapsed_seconds: started.elapsed().as_secs(),
                                timestamp: Utc::now(),
                            };
                            tracing::info!(%job_id, guild_id, "{}", event.describe());
                            events.emit_lossy(event);
                        }
                    }
                }
            }
        });

        Self {
            processed,
            cancel,
            handle: Some(handle),
        }
    }

    /// Count one more item as processed
    pub fn tick(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Stop reporting and wait for the task to exit
    pub async fn stop(mut self) -> usize {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Progress reporter task ended abnormally");
            }
        }
        self.processed.load(Ordering::Relaxed)
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        // covers jobs that bail out before calling stop()
        self.cancel.cancel();
    }
}
