//! Rebuild: replace the guild's mirror posts with fresh ones from live state
//!
//! Each listed origin is handled start to finish under its own item lock: the
//! current entry is re-read, its posts are deleted, the entry is dropped and the
//! mirror is recreated. Entries created by live signals after the listing are
//! left alone, and an origin whose old post could not be deleted keeps its entry.

use crate::error::MirrorResult;
use crate::reconcile::{locate_origin, JobContext, Located, RebuildReport};
use crate::services::publisher::MirrorPublisher;
use crate::types::{ItemRef, MirrorEntry};

pub(super) async fn run(
    publisher: &MirrorPublisher,
    ctx: &JobContext<'_>,
    entries: Vec<MirrorEntry>,
) -> MirrorResult<RebuildReport> {
    let mut report = RebuildReport::new(ctx.job_id, ctx.guild_id, ctx.fast, entries.len());

    for snapshot in &entries {
        let _guard = publisher.lock_item(snapshot.origin_id).await;
        rebuild_one(publisher, ctx, snapshot, &mut report).await;
        ctx.progress.tick();
    }

    Ok(report)
}

async fn rebuild_one(
    publisher: &MirrorPublisher,
    ctx: &JobContext<'_>,
    snapshot: &MirrorEntry,
    report: &mut RebuildReport,
) {
    let entry = match publisher.entries().get(snapshot.origin_id).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            tracing::debug!(origin_id = snapshot.origin_id, "Entry removed while rebuild was running");
            report.skipped += 1;
            return;
        }
        Err(e) => {
            report.fail(snapshot.origin_id, e);
            return;
        }
    };

    // posts before the entry: a live post must never be left untracked
    if let Err(e) = publisher.delete_posts(&entry, ctx.mirror_channel, ctx.policy).await {
        tracing::warn!(
            job_id = %ctx.job_id,
            origin_id = entry.origin_id,
            error = %e,
            "Could not delete old mirror post, keeping its entry"
        );
        report.fail(entry.origin_id, e);
        return;
    }
    if let Err(e) = publisher.entries().remove(entry.origin_id).await {
        report.fail(entry.origin_id, e);
        return;
    }

    recreate(publisher, ctx, &entry, report).await;
}

async fn recreate(
    publisher: &MirrorPublisher,
    ctx: &JobContext<'_>,
    entry: &MirrorEntry,
    report: &mut RebuildReport,
) {
    let located = match locate_origin(publisher, ctx, entry).await {
        Ok(located) => located,
        Err(e) => {
            report.fail(entry.origin_id, e);
            return;
        }
    };

    match located {
        Located::Found(origin) => {
            let count = origin.signal_count(&ctx.config.signal_kind);
            if !ctx.fast && !ctx.config.qualifies(count) {
                tracing::debug!(origin_id = entry.origin_id, count, "Below threshold, not recreated");
                report.skipped += 1;
                return;
            }
            match publisher
                .create_mirror(&origin, &ctx.config, ctx.mirror_channel, ctx.policy)
                .await
            {
                Ok(_) => report.recreated += 1,
                Err(e) => report.fail(entry.origin_id, e),
            }
        }
        Located::Missing(_) => {
            let Some(channel_id) = entry.origin_channel_id else {
                report.fail(
                    entry.origin_id,
                    "origin is gone and its channel was never recorded",
                );
                return;
            };
            let origin = ItemRef::new(entry.guild_id, channel_id, entry.origin_id);
            match publisher
                .post_tombstone(origin, &ctx.config, ctx.mirror_channel, ctx.policy)
                .await
            {
                Ok(_) => report.tombstoned += 1,
                Err(e) => report.fail(entry.origin_id, e),
            }
        }
    }
}
