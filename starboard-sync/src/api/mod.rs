//! HTTP trigger surface
//!
//! Thin handlers that translate requests into synchronizer, configuration and
//! reconciliation calls. Long-running jobs report progress over `/events`.

pub mod guilds;
pub mod health;
pub mod signals;
pub mod sse;

pub use guilds::guild_routes;
pub use health::health_routes;
pub use signals::signal_routes;
pub use sse::event_stream;
