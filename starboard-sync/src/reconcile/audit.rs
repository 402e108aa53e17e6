//! Audit-and-repair: verify entries against live posts without wiping anything
//!
//! The live mirror post is the source of truth for linkage. Its back-link gives
//! the origin identity and its reply reference gives the context post, so a
//! damaged entry table can be rebuilt from the mirror channel alone. When the
//! back-link names a different origin the entry is re-keyed under both origins'
//! locks.

use crate::error::MirrorResult;
use crate::external::{ExternalResult, PostedMirror};
use crate::reconcile::{locate_origin, AuditReport, JobContext, Located, UnresolvedPart};
use crate::services::publisher::MirrorPublisher;
use crate::types::{MessageId, MirrorEntry};

pub(super) async fn run(
    publisher: &MirrorPublisher,
    ctx: &JobContext<'_>,
    entries: Vec<MirrorEntry>,
) -> MirrorResult<AuditReport> {
    let mut report = AuditReport::new(ctx.job_id, ctx.guild_id, ctx.fast, entries.len());

    for snapshot in &entries {
        let rekey = {
            let _guard = publisher.lock_item(snapshot.origin_id).await;
            // live signal handling may have changed the entry since the listing
            match publisher.entries().get(snapshot.origin_id).await {
                Ok(Some(entry)) => audit_entry(publisher, ctx, &entry, &mut report)
                    .await
                    .map(|recovered| (entry, recovered)),
                Ok(None) => {
                    tracing::debug!(origin_id = snapshot.origin_id, "Entry removed while audit was running");
                    None
                }
                Err(e) => {
                    report.fail(snapshot.origin_id, e);
                    None
                }
            }
        };
        if let Some((entry, recovered)) = rekey {
            let _guards = publisher.lock_pair(entry.origin_id, recovered.origin_id).await;
            rekey_entry(publisher, &entry, recovered, &mut report).await;
        }
        ctx.progress.tick();
    }

    Ok(report)
}

/// Returns the recovered entry when it belongs under a different origin
async fn audit_entry(
    publisher: &MirrorPublisher,
    ctx: &JobContext<'_>,
    entry: &MirrorEntry,
    report: &mut AuditReport,
) -> Option<MirrorEntry> {
    match fetch_post(publisher, ctx, entry.mirror_id).await {
        Ok(post) => return verify(publisher, ctx, entry, post, report).await,
        Err(e) if e.is_retryable() => report.fail(entry.origin_id, e),
        Err(e) => {
            tracing::info!(
                job_id = %ctx.job_id,
                origin_id = entry.origin_id,
                mirror_id = entry.mirror_id,
                error = %e,
                "Mirror post unreachable, attempting recovery"
            );
            recover(publisher, ctx, entry, report).await;
        }
    }
    None
}

/// Mirror post is live: rebuild the entry from what the post itself says
async fn verify(
    publisher: &MirrorPublisher,
    ctx: &JobContext<'_>,
    entry: &MirrorEntry,
    post: PostedMirror,
    report: &mut AuditReport,
) -> Option<MirrorEntry> {
    let Some(link) = post.back_link else {
        report.gap(
            entry.origin_id,
            entry.mirror_id,
            vec![UnresolvedPart::OriginItem],
            "mirror post carries no parseable back-link",
        );
        return None;
    };

    let mut recovered = MirrorEntry {
        origin_id: link.message_id,
        mirror_id: entry.mirror_id,
        guild_id: link.guild_id,
        origin_channel_id: Some(link.channel_id),
        reply_context_mirror_id: entry.reply_context_mirror_id,
    };
    let mut has_gap = false;

    let context = post
        .reply_to
        .or(entry.reply_context_mirror_id)
        .filter(|id| *id != entry.mirror_id);
    if let Some(context_id) = context {
        match fetch_post(publisher, ctx, context_id).await {
            Ok(_) => recovered.reply_context_mirror_id = Some(context_id),
            Err(e) if e.is_retryable() => {
                report.fail(entry.origin_id, e);
                return None;
            }
            Err(_) => {
                // stored linkage is kept as-is for the operator to resolve
                report.gap(
                    entry.origin_id,
                    entry.mirror_id,
                    vec![UnresolvedPart::ReplyContext],
                    format!("reply-context post {} no longer resolves", context_id),
                );
                has_gap = true;
            }
        }
    }

    if recovered == *entry {
        if !has_gap {
            report.verified += 1;
        }
        return None;
    }
    if recovered.origin_id != entry.origin_id {
        return Some(recovered);
    }

    match publisher.entries().upsert(&recovered).await {
        Ok(()) => {
            tracing::info!(
                origin_id = recovered.origin_id,
                mirror_id = recovered.mirror_id,
                "Entry repaired from mirror post"
            );
            report.fixed += 1;
        }
        Err(e) => report.fail(entry.origin_id, e),
    }
    None
}

/// Move `entry` under the origin its post links to; both origins are locked
async fn rekey_entry(
    publisher: &MirrorPublisher,
    entry: &MirrorEntry,
    recovered: MirrorEntry,
    report: &mut AuditReport,
) {
    match publisher.entries().get(entry.origin_id).await {
        Ok(Some(current)) if current == *entry => {}
        Ok(_) => {
            tracing::debug!(origin_id = entry.origin_id, "Entry changed before it could be re-keyed");
            return;
        }
        Err(e) => {
            report.fail(entry.origin_id, e);
            return;
        }
    }

    match publisher.entries().get(recovered.origin_id).await {
        Ok(Some(other)) if other.mirror_id != recovered.mirror_id => {
            report.gap(
                entry.origin_id,
                entry.mirror_id,
                vec![UnresolvedPart::OriginItem],
                format!(
                    "post links to message {}, which already has mirror {}",
                    recovered.origin_id, other.mirror_id
                ),
            );
            return;
        }
        Ok(_) => {}
        Err(e) => {
            report.fail(entry.origin_id, e);
            return;
        }
    }
    if let Err(e) = publisher.entries().remove(entry.origin_id).await {
        report.fail(entry.origin_id, e);
        return;
    }

    match publisher.entries().upsert(&recovered).await {
        Ok(()) => {
            tracing::info!(
                from_origin_id = entry.origin_id,
                origin_id = recovered.origin_id,
                mirror_id = recovered.mirror_id,
                "Entry re-keyed from mirror post"
            );
            report.fixed += 1;
        }
        Err(e) => report.fail(entry.origin_id, e),
    }
}

/// Mirror post is gone: find the origin and post it again, or report the gap
async fn recover(
    publisher: &MirrorPublisher,
    ctx: &JobContext<'_>,
    entry: &MirrorEntry,
    report: &mut AuditReport,
) {
    let located = match locate_origin(publisher, ctx, entry).await {
        Ok(located) => located,
        Err(e) => {
            report.fail(entry.origin_id, e);
            return;
        }
    };

    let origin = match located {
        Located::Found(origin) => origin,
        Located::Missing(unresolved) => {
            report.gap(
                entry.origin_id,
                entry.mirror_id,
                unresolved,
                "mirror post is gone and the origin could not be located",
            );
            return;
        }
    };

    let count = origin.signal_count(&ctx.config.signal_kind);
    if !ctx.config.qualifies(count) {
        match publisher.remove_mirror(entry, ctx.mirror_channel, ctx.policy).await {
            Ok(()) => report.removed += 1,
            Err(e) => report.fail(entry.origin_id, e),
        }
        return;
    }

    // clears a surviving context post before the fresh pair is posted
    if let Err(e) = publisher.delete_posts(entry, ctx.mirror_channel, ctx.policy).await {
        report.fail(entry.origin_id, e);
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

async fn fetch_post(
    publisher: &MirrorPublisher,
    ctx: &JobContext<'_>,
    post_id: MessageId,
) -> ExternalResult<PostedMirror> {
    let store = publisher.store();
    let channel = ctx.mirror_channel;
    ctx.policy
        .call("fetch_post", || store.fetch_post(channel, post_id))
        .await
}
