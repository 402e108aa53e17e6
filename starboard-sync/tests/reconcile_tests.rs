//! Rebuild and audit-and-repair jobs against the in-memory store

mod helpers;

use helpers::*;
use starboard_common::events::{JobKind, MirrorEvent};
use starboard_sync::external::ExternalError;
use starboard_sync::reconcile::UnresolvedPart;
use starboard_sync::types::{ItemRef, MirrorEntry, SignalEvent};
use starboard_sync::MirrorError;

/// Mirror each origin through the live signal path
async fn mirror_all(app: &TestApp, ids: &[u64]) -> Vec<MirrorEntry> {
    let mut entries = Vec::new();
    for &id in ids {
        app.store.add_item(origin(id, 3));
        app.state
            .synchronizer
            .handle_signal_added(&star(id, 10))
            .await
            .unwrap();
        entries.push(app.state.publisher.entries().get(id).await.unwrap().unwrap());
    }
    entries
}

/// Reply origin `id` answering `parent`, mirrored with its context post
async fn mirror_reply(app: &TestApp, parent: u64, id: u64) -> MirrorEntry {
    app.store.add_item(origin(parent, 0));
    let mut reply = origin(id, 3);
    reply.reply_to = Some(ItemRef::new(GUILD, CHANNEL, parent));
    app.store.add_item(reply);
    app.state
        .synchronizer
        .handle_signal_added(&star(id, 10))
        .await
        .unwrap();
    app.state.publisher.entries().get(id).await.unwrap().unwrap()
}

/// Every live mirror post is referenced by exactly one entry
async fn assert_posts_tracked(app: &TestApp) {
    let mut tracked: Vec<u64> = app
        .state
        .publisher
        .entries()
        .all_for_guild(GUILD)
        .await
        .unwrap()
        .iter()
        .flat_map(|e| std::iter::once(e.mirror_id).chain(e.reply_context_mirror_id))
        .collect();
    tracked.sort_unstable();
    let live: Vec<u64> = app.store.posts_in(MIRROR).iter().map(|(id, _)| *id).collect();
    assert_eq!(live, tracked);
}

fn arm_override(app: &TestApp) {
    let gate = app.state.reconciler.gate();
    let challenge = gate.request(GUILD);
    gate.confirm(GUILD, &challenge.code).unwrap();
}

#[tokio::test]
async fn test_rebuild_recreates_and_audit_finds_nothing_to_fix() {
    let app = test_app().await;
    let before = mirror_all(&app, &[1, 2, 3]).await;

    let rebuild = app.state.reconciler.run_rebuild(GUILD, false).await.unwrap();
    assert_eq!(rebuild.total, 3);
    assert_eq!(rebuild.recreated, 3);
    assert_eq!(rebuild.failed, 0);

    let posts = app.store.posts_in(MIRROR);
    assert_eq!(posts.len(), 3);
    for old in &before {
        assert!(app.store.post(old.mirror_id).is_none());
    }

    let audit = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();
    assert_eq!(audit.verified, 3);
    assert_eq!(audit.fixed, 0);
    assert_eq!(audit.recreated, 0);
    assert!(audit.gaps.is_empty());
    assert_eq!(app.state.publisher.active_locks(), 0);
}

#[tokio::test]
async fn test_rebuild_tombstones_deleted_origin() {
    let app = test_app().await;
    mirror_all(&app, &[1]).await;
    app.store.remove_item(1);

    let report = app.state.reconciler.run_rebuild(GUILD, false).await.unwrap();
    assert_eq!(report.tombstoned, 1);
    assert_eq!(report.recreated, 0);

    let entry = app.state.publisher.entries().get(1).await.unwrap().unwrap();
    assert_eq!(entry.reply_context_mirror_id, None);
    let post = app.store.post(entry.mirror_id).unwrap();
    assert_eq!(post.header.as_deref(), Some("⭐ in <#200>"));
    assert!(post.text.contains("*The original message was deleted.*"));
    assert!(post.text.contains("https://discord.com/channels/100/200/1"));
}

#[tokio::test]
async fn test_rebuild_finds_origin_without_recorded_channel() {
    let app = test_app().await;
    app.store.add_item(origin_in(OTHER_CHANNEL, 7, 4));
    app.state
        .synchronizer
        .handle_signal_added(&SignalEvent {
            channel_id: OTHER_CHANNEL,
            ..star(7, 10)
        })
        .await
        .unwrap();
    let mut entry = app.state.publisher.entries().get(7).await.unwrap().unwrap();
    entry.origin_channel_id = None;
    app.state.publisher.entries().upsert(&entry).await.unwrap();

    let report = app.state.reconciler.run_rebuild(GUILD, false).await.unwrap();

    assert_eq!(report.recreated, 1);
    let rebuilt = app.state.publisher.entries().get(7).await.unwrap().unwrap();
    assert_eq!(rebuilt.origin_channel_id, Some(OTHER_CHANNEL));
}

#[tokio::test]
async fn test_rebuild_skips_below_threshold() {
    let app = test_app().await;
    mirror_all(&app, &[1, 2]).await;
    app.store.set_count(2, 1);

    let report = app.state.reconciler.run_rebuild(GUILD, false).await.unwrap();

    assert_eq!(report.recreated, 1);
    assert_eq!(report.skipped, 1);
    assert!(app.state.publisher.entries().get(2).await.unwrap().is_none());
    assert_eq!(app.store.posts_in(MIRROR).len(), 1);
}

#[tokio::test]
async fn test_rebuild_keeps_entry_when_old_post_cannot_be_deleted() {
    let app = test_app().await;
    let before = mirror_all(&app, &[1]).await.remove(0);
    app.store
        .set_delete_error(Some(ExternalError::permanent(Some(403), "Missing Permissions")));

    let report = app.state.reconciler.run_rebuild(GUILD, false).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].origin_id, 1);
    assert_eq!(report.recreated, 0);
    assert_eq!(app.store.posts_in(MIRROR).len(), 1);
    assert_eq!(
        app.state.publisher.entries().get(1).await.unwrap().unwrap(),
        before
    );

    // once deletes work again the next rebuild converges
    app.store.set_delete_error(None);
    let report = app.state.reconciler.run_rebuild(GUILD, false).await.unwrap();
    assert_eq!(report.recreated, 1);
    assert_eq!(app.store.posts_in(MIRROR).len(), 1);
    assert_posts_tracked(&app).await;
}

#[tokio::test]
async fn test_rebuild_tolerates_signals_mid_job() {
    let app = test_app().await;
    mirror_all(&app, &[1, 2]).await;
    app.store.add_item(origin(3, 3));
    // while origin 1 is being recreated, origin 2 gains a star and origin 3 crosses the threshold
    app.store.signal_during_fetch(
        1,
        app.state.synchronizer.clone(),
        vec![star(2, 11), star(3, 11)],
    );

    let report = app.state.reconciler.run_rebuild(GUILD, false).await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.recreated, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(app.store.posts_in(MIRROR).len(), 3);
    assert!(app.state.publisher.entries().get(3).await.unwrap().is_some());
    assert_posts_tracked(&app).await;
    assert_eq!(app.state.publisher.active_locks(), 0);
}

#[tokio::test]
async fn test_fast_rebuild_ignores_threshold_and_revokes_override() {
    let app = test_app().await;
    mirror_all(&app, &[1]).await;
    app.store.set_count(1, 1);
    arm_override(&app);

    let report = app.state.reconciler.run_rebuild(GUILD, true).await.unwrap();

    assert!(report.fast);
    assert_eq!(report.recreated, 1);
    assert_eq!(report.skipped, 0);
    let entry = app.state.publisher.entries().get(1).await.unwrap().unwrap();
    assert_eq!(
        app.store.post(entry.mirror_id).unwrap().header.as_deref(),
        Some("⭐ **1** in <#200>")
    );
    assert!(!app.state.reconciler.gate().is_armed(GUILD));

    // the override covered exactly one job
    let again = app.state.reconciler.run_rebuild(GUILD, true).await;
    assert!(matches!(again, Err(MirrorError::OverrideNotConfirmed(GUILD))));
}

#[tokio::test]
async fn test_fast_without_override_refused() {
    let app = test_app().await;
    mirror_all(&app, &[1]).await;

    let rebuild = app.state.reconciler.run_rebuild(GUILD, true).await;
    let audit = app.state.reconciler.run_audit_repair(GUILD, true).await;

    assert!(matches!(rebuild, Err(MirrorError::OverrideNotConfirmed(GUILD))));
    assert!(matches!(audit, Err(MirrorError::OverrideNotConfirmed(GUILD))));
    assert!(!app.state.reconciler.is_running(GUILD));
    // nothing was touched
    assert_eq!(app.store.posts_in(MIRROR).len(), 1);
}

#[tokio::test]
async fn test_jobs_refused_for_unconfigured_guild() {
    let app = test_app().await;

    let result = app.state.reconciler.run_audit_repair(555, false).await;

    assert!(matches!(result, Err(MirrorError::NotConfigured(555))));
    assert!(!app.state.reconciler.is_running(555));
}

#[tokio::test]
async fn test_audit_recovers_missing_channel_from_back_link() {
    let app = test_app().await;
    let mut entry = mirror_all(&app, &[1]).await.remove(0);
    entry.origin_channel_id = None;
    app.state.publisher.entries().upsert(&entry).await.unwrap();

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.fixed, 1);
    assert_eq!(report.verified, 0);
    let repaired = app.state.publisher.entries().get(1).await.unwrap().unwrap();
    assert_eq!(repaired.origin_channel_id, Some(CHANNEL));
    assert_eq!(repaired.mirror_id, entry.mirror_id);
}

#[tokio::test]
async fn test_audit_recovers_reply_context_from_post() {
    let app = test_app().await;
    let original = mirror_reply(&app, 1, 2).await;
    let damaged = MirrorEntry {
        reply_context_mirror_id: None,
        ..original.clone()
    };
    app.state.publisher.entries().upsert(&damaged).await.unwrap();

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.fixed, 1);
    assert_eq!(
        app.state.publisher.entries().get(2).await.unwrap().unwrap(),
        original
    );
}

#[tokio::test]
async fn test_audit_recreates_deleted_mirror_post() {
    let app = test_app().await;
    let entry = mirror_all(&app, &[1]).await.remove(0);
    app.store.delete_post_by_hand(entry.mirror_id);

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.recreated, 1);
    let fresh = app.state.publisher.entries().get(1).await.unwrap().unwrap();
    assert_ne!(fresh.mirror_id, entry.mirror_id);
    assert_eq!(app.store.posts_in(MIRROR).len(), 1);
}

#[tokio::test]
async fn test_audit_removes_deleted_post_below_threshold() {
    let app = test_app().await;
    let entry = mirror_all(&app, &[1]).await.remove(0);
    app.store.delete_post_by_hand(entry.mirror_id);
    app.store.set_count(1, 2);

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.recreated, 0);
    assert!(app.state.publisher.entries().get(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_audit_retries_transient_post_fetch() {
    let app = test_app().await;
    mirror_all(&app, &[1]).await;
    app.store.fail_transiently("fetch_post", 3);

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.verified, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(app.store.transient_left("fetch_post"), 0);
}

#[tokio::test]
async fn test_audit_retries_transient_origin_fetch() {
    let app = test_app().await;
    let entry = mirror_all(&app, &[1]).await.remove(0);
    app.store.delete_post_by_hand(entry.mirror_id);
    app.store.fail_transiently("fetch_item", 2);

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.recreated, 1);
    assert_eq!(report.failed, 0);
    assert_posts_tracked(&app).await;
}

#[tokio::test]
async fn test_audit_counts_exhausted_retries_as_failure() {
    let app = test_app().await;
    let entries = mirror_all(&app, &[1, 2]).await;
    // four attempts for origin 1 fail, origin 2 goes through
    app.store.fail_transiently("fetch_post", 4);

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].origin_id, 1);
    assert!(report.failures[0].error.contains("timed out"));
    assert_eq!(report.verified, 1);
    assert!(report.gaps.is_empty());
    // a failed item is left untouched
    assert_eq!(
        app.state.publisher.entries().get(1).await.unwrap().unwrap(),
        entries[0]
    );
    assert!(!app.state.reconciler.is_running(GUILD));
}

#[tokio::test]
async fn test_audit_rekeys_entry_to_linked_origin() {
    let app = test_app().await;
    let entry = mirror_all(&app, &[1]).await.remove(0);
    app.store.add_item(origin(5, 3));
    app.store.rewrite_post_text(
        entry.mirror_id,
        "message 5\n[Jump to Message](https://discord.com/channels/100/200/5)\nID: 5",
    );

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.fixed, 1);
    assert!(app.state.publisher.entries().get(1).await.unwrap().is_none());
    let moved = app.state.publisher.entries().get(5).await.unwrap().unwrap();
    assert_eq!(moved.mirror_id, entry.mirror_id);
    assert_eq!(moved.origin_channel_id, Some(CHANNEL));
    assert_eq!(app.state.publisher.active_locks(), 0);
}

#[tokio::test]
async fn test_audit_will_not_rekey_onto_mirrored_origin() {
    let app = test_app().await;
    let entries = mirror_all(&app, &[1, 5]).await;
    app.store.rewrite_post_text(
        entries[0].mirror_id,
        "[Jump to Message](https://discord.com/channels/100/200/5)",
    );

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.fixed, 0);
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].origin_id, 1);
    assert!(report.gaps[0].detail.contains("already has mirror"));
    assert_eq!(
        app.state.publisher.entries().get(1).await.unwrap().unwrap(),
        entries[0]
    );
}

#[tokio::test]
async fn test_audit_reports_unlocatable_origin() {
    let app = test_app().await;
    let entry = mirror_all(&app, &[1]).await.remove(0);
    app.store.delete_post_by_hand(entry.mirror_id);
    app.store.remove_item(1);

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.failed, 0);
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].origin_id, 1);
    assert_eq!(report.gaps[0].unresolved, vec![UnresolvedPart::OriginItem]);
    // the entry stays for the operator to resolve
    assert!(app.state.publisher.entries().get(1).await.unwrap().is_some());
    assert!(report.summary().contains("need manual follow-up"));
}

#[tokio::test]
async fn test_audit_reports_vanished_channel() {
    let app = test_app().await;
    let entry = mirror_all(&app, &[1]).await.remove(0);
    app.store.delete_post_by_hand(entry.mirror_id);
    app.store.set_channels(GUILD, vec![OTHER_CHANNEL, MIRROR]);

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(
        report.gaps[0].unresolved,
        vec![UnresolvedPart::OriginChannel, UnresolvedPart::OriginItem]
    );
}

#[tokio::test]
async fn test_audit_reports_deleted_reply_context() {
    let app = test_app().await;
    let entry = mirror_reply(&app, 1, 2).await;
    let context_id = entry.reply_context_mirror_id.unwrap();
    app.store.delete_post_by_hand(context_id);

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.verified, 0);
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].unresolved, vec![UnresolvedPart::ReplyContext]);
    assert_eq!(
        app.state.publisher.entries().get(2).await.unwrap().unwrap(),
        entry
    );
}

#[tokio::test]
async fn test_audit_reports_post_without_back_link() {
    let app = test_app().await;
    let entry = mirror_all(&app, &[1]).await.remove(0);
    app.store.rewrite_post_text(entry.mirror_id, "edited by a moderator");

    let report = app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].unresolved, vec![UnresolvedPart::OriginItem]);
    assert!(report.gaps[0].detail.contains("back-link"));
}

#[tokio::test]
async fn test_job_lifecycle_events() {
    let app = test_app().await;
    mirror_all(&app, &[1, 2]).await;
    let mut rx = app.state.event_bus.subscribe();

    app.state.reconciler.run_audit_repair(GUILD, false).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(
        events.first(),
        Some(MirrorEvent::JobStarted {
            kind: JobKind::AuditRepair,
            total: 2,
            fast: false,
            ..
        })
    ));
    match events.last() {
        Some(MirrorEvent::JobCompleted { kind, summary, .. }) => {
            assert_eq!(*kind, JobKind::AuditRepair);
            assert!(summary.contains("2 verified"));
        }
        other => panic!("expected JobCompleted, got {:?}", other),
    }
}
