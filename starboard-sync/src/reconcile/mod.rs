//! Reconciliation engine
//!
//! Two operator-triggered bulk jobs bring the entry table and the live mirror
//! posts back in line with the external store:
//! - rebuild: delete every mirror, wipe the entries, recreate from live state
//! - audit-and-repair: verify each entry against its live post and repair drift
//!
//! Jobs never abort on a single entry; failures are counted and reported. At most
//! one job runs per guild. External calls go through the rate-limited executor
//! unless the operator has confirmed a fast-mode override.

mod audit;
mod rebuild;
pub mod report;

pub use report::{AuditReport, IntegrityGap, ItemFailure, RebuildReport, UnresolvedPart};

use chrono::Utc;
use starboard_common::events::{JobKind, MirrorEvent};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{MirrorError, MirrorResult};
use crate::external::{ExternalError, Resource};
use crate::services::executor::CallPolicy;
use crate::services::override_gate::{OverrideGate, OverrideToken};
use crate::services::progress::ProgressReporter;
use crate::services::publisher::MirrorPublisher;
use crate::services::RateLimitedExecutor;
use crate::types::{ChannelId, GuildConfig, GuildId, ItemRef, MirrorEntry, OriginItem};

pub struct Reconciler {
    publisher: Arc<MirrorPublisher>,
    executor: Arc<RateLimitedExecutor>,
    gate: Arc<OverrideGate>,
    running: Arc<Mutex<HashSet<GuildId>>>,
    progress_interval: Duration,
}

/// Everything one job run needs
pub(crate) struct JobContext<'a> {
    pub job_id: Uuid,
    pub guild_id: GuildId,
    pub config: GuildConfig,
    pub mirror_channel: ChannelId,
    pub fast: bool,
    pub policy: CallPolicy<'a>,
    pub progress: &'a ProgressReporter,
}

/// Where an origin ended up after searching for it
pub(crate) enum Located {
    Found(OriginItem),
    /// Not reachable; lists each layer that failed to resolve
    Missing(Vec<UnresolvedPart>),
}

/// Marks a guild busy for the lifetime of one job
struct RunningJob {
    guild_id: GuildId,
    running: Arc<Mutex<HashSet<GuildId>>>,
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.guild_id);
    }
}

impl Reconciler {
    pub fn new(
        publisher: Arc<MirrorPublisher>,
        executor: Arc<RateLimitedExecutor>,
        gate: Arc<OverrideGate>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            publisher,
            executor,
            gate,
            running: Arc::new(Mutex::new(HashSet::new())),
            progress_interval,
        }
    }

    pub fn gate(&self) -> &Arc<OverrideGate> {
        &self.gate
    }

    pub fn is_running(&self, guild_id: GuildId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&guild_id)
    }

    /// Delete and recreate every mirror of the guild from live state
    pub async fn run_rebuild(&self, guild_id: GuildId, fast: bool) -> MirrorResult<RebuildReport> {
        let _job = self.claim(guild_id)?;
        let _override = self.authorize(guild_id, fast)?;
        let (config, mirror_channel) = self.publisher.configured(guild_id).await?;
        let entries = self.publisher.entries().all_for_guild(guild_id).await?;

        let job_id = Uuid::new_v4();
        let kind = JobKind::Rebuild;
        self.started(job_id, guild_id, kind, entries.len(), fast);
        let progress = self.progress(job_id, guild_id, kind, entries.len());
        let ctx = JobContext {
            job_id,
            guild_id,
            config,
            mirror_channel,
            fast,
            policy: CallPolicy::for_mode(&self.executor, fast),
            progress: &progress,
        };

        let result = rebuild::run(&self.publisher, &ctx, entries).await;
        progress.stop().await;
        self.finished(job_id, guild_id, kind, result.as_ref().map(RebuildReport::summary));
        result
    }

    /// Verify every entry against its live mirror post and repair what drifted
    pub async fn run_audit_repair(&self, guild_id: GuildId, fast: bool) -> MirrorResult<AuditReport> {
        let _job = self.claim(guild_id)?;
        let _override = self.authorize(guild_id, fast)?;
        let (config, mirror_channel) = self.publisher.configured(guild_id).await?;
        let entries = self.publisher.entries().all_for_guild(guild_id).await?;

        let job_id = Uuid::new_v4();
        let kind = JobKind::AuditRepair;
        self.started(job_id, guild_id, kind, entries.len(), fast);
        let progress = self.progress(job_id, guild_id, kind, entries.len());
        let ctx = JobContext {
            job_id,
            guild_id,
            config,
            mirror_channel,
            fast,
            policy: CallPolicy::for_mode(&self.executor, fast),
            progress: &progress,
        };

        let result = audit::run(&self.publisher, &ctx, entries).await;
        progress.stop().await;
        self.finished(job_id, guild_id, kind, result.as_ref().map(AuditReport::summary));
        result
    }

    fn claim(&self, guild_id: GuildId) -> MirrorResult<RunningJob> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(guild_id) {
            return Err(MirrorError::JobAlreadyRunning(guild_id));
        }
        Ok(RunningJob {
            guild_id,
            running: self.running.clone(),
        })
    }

    /// Fast mode consumes the confirmed override; it is revoked when the token drops
    fn authorize(&self, guild_id: GuildId, fast: bool) -> MirrorResult<Option<OverrideToken>> {
        if fast {
            self.gate.take(guild_id).map(Some)
        } else {
            Ok(None)
        }
    }

    fn progress(&self, job_id: Uuid, guild_id: GuildId, kind: JobKind, total: usize) -> ProgressReporter {
        ProgressReporter::start(
            self.publisher.events().clone(),
            job_id,
            guild_id,
            kind,
            total,
            self.progress_interval,
        )
    }

    fn started(&self, job_id: Uuid, guild_id: GuildId, kind: JobKind, total: usize, fast: bool) {
        tracing::info!(%job_id, guild_id, %kind, total, fast, "Reconciliation job started");
        self.publisher.events().emit_lossy(MirrorEvent::JobStarted {
            job_id,
            guild_id,
            kind,
            total,
            fast,
            timestamp: Utc::now(),
        });
    }

    fn finished(
        &self,
        job_id: Uuid,
        guild_id: GuildId,
        kind: JobKind,
        outcome: Result<String, &MirrorError>,
    ) {
        let event = match outcome {
            Ok(summary) => {
                tracing::info!(%job_id, guild_id, "{}", summary);
                MirrorEvent::JobCompleted {
                    job_id,
                    guild_id,
                    kind,
                    summary,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                tracing::error!(%job_id, guild_id, %kind, error = %e, "Reconciliation job failed");
                MirrorEvent::JobFailed {
                    job_id,
                    guild_id,
                    kind,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                }
            }
        };
        self.publisher.events().emit_lossy(event);
    }
}

/// Find an entry's origin: stored channel first, then every channel of the guild
pub(crate) async fn locate_origin(
    publisher: &MirrorPublisher,
    ctx: &JobContext<'_>,
    entry: &MirrorEntry,
) -> Result<Located, ExternalError> {
    let store = publisher.store();
    let mut channel_missing = entry.origin_channel_id.is_none();

    if let Some(channel_id) = entry.origin_channel_id {
        let item = ItemRef::new(entry.guild_id, channel_id, entry.origin_id);
        match ctx.policy.call("fetch_item", || store.fetch_item(item)).await {
            Ok(origin) => return Ok(Located::Found(origin)),
            Err(ExternalError::NotFound { resource, .. }) => {
                match resource {
                    Resource::Guild => {
                        return Ok(Located::Missing(vec![
                            UnresolvedPart::Guild,
                            UnresolvedPart::OriginChannel,
                            UnresolvedPart::OriginItem,
                        ]))
                    }
                    Resource::Channel => channel_missing = true,
                    _ => {}
                }
            }
            Err(e) => return Err(e),
        }
    }

    let channels = match ctx
        .policy
        .call("list_channels", || store.list_channels(entry.guild_id))
        .await
    {
        Ok(channels) => channels,
        Err(e) if e.is_not_found() => {
            return Ok(Located::Missing(vec![
                UnresolvedPart::Guild,
                UnresolvedPart::OriginChannel,
                UnresolvedPart::OriginItem,
            ]))
        }
        Err(e) => return Err(e),
    };

    for channel_id in channels {
        if Some(channel_id) == entry.origin_channel_id || channel_id == ctx.mirror_channel {
            continue;
        }
        let item = ItemRef::new(entry.guild_id, channel_id, entry.origin_id);
        match ctx.policy.call("fetch_item", || store.fetch_item(item)).await {
            Ok(origin) => {
                tracing::info!(
                    origin_id = entry.origin_id,
                    channel_id,
                    "Located origin by scanning guild channels"
                );
                return Ok(Located::Found(origin));
            }
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(Located::Missing(if channel_missing {
        vec![UnresolvedPart::OriginChannel, UnresolvedPart::OriginItem]
    } else {
        vec![UnresolvedPart::OriginItem]
    }))
}
