//! Mirror engine services

pub mod assembler;
pub mod executor;
pub mod item_locks;
pub mod override_gate;
pub mod progress;
pub mod publisher;
pub mod synchronizer;

pub use assembler::{AssembledContent, ContentAssembler};
pub use executor::{CallPolicy, ExecutorSettings, RateLimitedExecutor};
pub use item_locks::ItemLocks;
pub use override_gate::{Challenge, OverrideGate, OverrideToken};
pub use progress::ProgressReporter;
pub use publisher::MirrorPublisher;
pub use synchronizer::{SignalOutcome, SignalSynchronizer};
