//! Operator override gate for fast (unthrottled) reconciliation
//!
//! Fast mode needs an out-of-band confirmation: the operator requests a
//! challenge, echoes its code back, and the armed override is consumed by exactly
//! one job. The [`OverrideToken`] handed to that job clears every bit of override
//! state for the guild when it is dropped, however the job ends.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{MirrorError, MirrorResult};
use crate::types::GuildId;

pub const CHALLENGE_LENGTH: usize = 6;
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(60);

/// Code the operator must echo back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Challenge {
    pub code: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug)]
enum GateState {
    Pending { code: String, expires_at: Instant },
    Armed,
}

#[derive(Debug)]
pub struct OverrideGate {
    states: Arc<Mutex<HashMap<GuildId, GateState>>>,
    ttl: Duration,
}

impl Default for OverrideGate {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_TTL)
    }
}

impl OverrideGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Issue a fresh challenge, replacing any pending or armed override
    pub fn request(&self, guild_id: GuildId) -> Challenge {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CHALLENGE_LENGTH)
            .map(|b| char::from(b).to_ascii_uppercase())
            .collect();

        self.lock().insert(
            guild_id,
            GateState::Pending {
                code: code.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        tracing::warn!(guild_id, "Fast-mode override challenge issued");

        Challenge {
            code,
            expires_in_seconds: self.ttl.as_secs(),
        }
    }

    /// Arm the override if `code` answers the pending challenge. Any failed attempt discards it.
    pub fn confirm(&self, guild_id: GuildId, code: &str) -> MirrorResult<()> {
        let mut states = self.lock();
        match states.remove(&guild_id) {
            Some(GateState::Pending { code: expected, expires_at })
                if Instant::now() < expires_at && expected.eq_ignore_ascii_case(code.trim()) =>
            {
                states.insert(guild_id, GateState::Armed);
                tracing::warn!(guild_id, "Fast-mode override armed");
                Ok(())
            }
            _ => {
                tracing::warn!(guild_id, "Fast-mode override confirmation rejected");
                Err(MirrorError::InvalidChallenge(guild_id))
            }
        }
    }

    /// Consume the armed override for one job
    pub fn take(&self, guild_id: GuildId) -> MirrorResult<OverrideToken> {
        let mut states = self.lock();
        match states.remove(&guild_id) {
            Some(GateState::Armed) => Ok(OverrideToken {
                guild_id,
                states: self.states.clone(),
            }),
            other => {
                // a pending challenge stays answerable
                if let Some(pending @ GateState::Pending { .. }) = other {
                    states.insert(guild_id, pending);
                }
                Err(MirrorError::OverrideNotConfirmed(guild_id))
            }
        }
    }

    pub fn is_armed(&self, guild_id: GuildId) -> bool {
        matches!(self.lock().get(&guild_id), Some(GateState::Armed))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<GuildId, GateState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Single-use permission to run one fast job
#[derive(Debug)]
pub struct OverrideToken {
    guild_id: GuildId,
    states: Arc<Mutex<HashMap<GuildId, GateState>>>,
}

impl OverrideToken {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }
}

impl Drop for OverrideToken {
    fn drop(&mut self) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.guild_id);
        tracing::info!(guild_id = self.guild_id, "Fast-mode override revoked");
    }
}
