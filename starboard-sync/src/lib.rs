//! starboard-sync library interface
//!
//! Threshold-gated mirror of highlighted messages: signal synchronizer, content
//! assembler, entry store and the reconciliation jobs that repair drift.

pub mod api;
pub mod backlink;
pub mod db;
pub mod error;
pub mod external;
pub mod reconcile;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, MirrorError, MirrorResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use starboard_common::config::TomlConfig;
use starboard_common::events::EventBus;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::db::EntryStore;
use crate::external::ContentStore;
use crate::reconcile::Reconciler;
use crate::services::{
    ExecutorSettings, MirrorPublisher, OverrideGate, RateLimitedExecutor, SignalSynchronizer,
};

/// Buffered events per slow SSE subscriber
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub publisher: Arc<MirrorPublisher>,
    pub synchronizer: Arc<SignalSynchronizer>,
    pub reconciler: Arc<Reconciler>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the mirror engine over `store` and an initialized database
    pub fn new(
        db: SqlitePool,
        store: Arc<dyn ContentStore>,
        config: &TomlConfig,
        event_bus: EventBus,
    ) -> Self {
        let publisher = Arc::new(MirrorPublisher::new(
            store,
            EntryStore::new(db.clone()),
            event_bus.clone(),
            config.defaults.clone(),
        ));
        let synchronizer = Arc::new(SignalSynchronizer::new(
            publisher.clone(),
            config.discord.self_user_id,
        ));
        let executor = Arc::new(RateLimitedExecutor::new(ExecutorSettings::from(
            &config.recovery,
        )));
        let reconciler = Arc::new(Reconciler::new(
            publisher.clone(),
            executor,
            Arc::new(OverrideGate::default()),
            config.recovery.progress_interval(),
        ));

        Self {
            db,
            event_bus,
            publisher,
            synchronizer,
            reconciler,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::signal_routes())
        .merge(api::guild_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
