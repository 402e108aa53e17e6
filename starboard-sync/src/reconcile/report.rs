//! Job reports returned to the operator

use serde::Serialize;
use uuid::Uuid;

use crate::types::{GuildId, MessageId};

/// Layer of an origin's identity that could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPart {
    Guild,
    OriginChannel,
    OriginItem,
    ReplyContext,
}

impl std::fmt::Display for UnresolvedPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnresolvedPart::Guild => write!(f, "guild"),
            UnresolvedPart::OriginChannel => write!(f, "origin channel"),
            UnresolvedPart::OriginItem => write!(f, "origin message"),
            UnresolvedPart::ReplyContext => write!(f, "reply context"),
        }
    }
}

/// Linkage that no strategy could recover; left for the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityGap {
    pub origin_id: MessageId,
    pub mirror_id: MessageId,
    pub unresolved: Vec<UnresolvedPart>,
    pub detail: String,
}

/// One entry the job gave up on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub origin_id: MessageId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub job_id: Uuid,
    pub guild_id: GuildId,
    pub fast: bool,
    pub total: usize,
    pub recreated: usize,
    pub tombstoned: usize,
    /// Origins now below threshold
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<ItemFailure>,
}

impl RebuildReport {
    pub fn new(job_id: Uuid, guild_id: GuildId, fast: bool, total: usize) -> Self {
        Self {
            job_id,
            guild_id,
            fast,
            total,
            recreated: 0,
            tombstoned: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    pub fn fail(&mut self, origin_id: MessageId, error: impl ToString) {
        self.failed += 1;
        self.failures.push(ItemFailure {
            origin_id,
            error: error.to_string(),
        });
    }

    pub fn summary(&self) -> String {
        format!(
            "Rebuild of guild {} finished{}: {} entries, {} recreated, {} tombstoned, {} skipped, {} failed.",
            self.guild_id,
            if self.fast { " (fast mode)" } else { "" },
            self.total,
            self.recreated,
            self.tombstoned,
            self.skipped,
            self.failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub job_id: Uuid,
    pub guild_id: GuildId,
    pub fast: bool,
    pub total: usize,
    pub verified: usize,
    /// Entries corrected from the mirror post's own back-link
    pub fixed: usize,
    pub recreated: usize,
    pub removed: usize,
    pub failed: usize,
    pub failures: Vec<ItemFailure>,
    pub gaps: Vec<IntegrityGap>,
}

impl AuditReport {
    pub fn new(job_id: Uuid, guild_id: GuildId, fast: bool, total: usize) -> Self {
        Self {
            job_id,
            guild_id,
            fast,
            total,
            verified: 0,
            fixed: 0,
            recreated: 0,
            removed: 0,
            failed: 0,
            failures: Vec::new(),
            gaps: Vec::new(),
        }
    }

    pub fn fail(&mut self, origin_id: MessageId, error: impl ToString) {
        self.failed += 1;
        self.failures.push(ItemFailure {
            origin_id,
            error: error.to_string(),
        });
    }

    pub fn gap(
        &mut self,
        origin_id: MessageId,
        mirror_id: MessageId,
        unresolved: Vec<UnresolvedPart>,
        detail: impl Into<String>,
    ) {
        let gap = IntegrityGap {
            origin_id,
            mirror_id,
            unresolved,
            detail: detail.into(),
        };
        tracing::warn!(origin_id, mirror_id, detail = %gap.detail, "Integrity gap");
        self.gaps.push(gap);
    }

    pub fn summary(&self) -> String {
        let mut text = format!(
            "Audit of guild {} finished{}: {} entries, {} verified, {} fixed, {} recreated, {} removed, {} failed.",
            self.guild_id,
            if self.fast { " (fast mode)" } else { "" },
            self.total,
            self.verified,
            self.fixed,
            self.recreated,
            self.removed,
            self.failed
        );
        if !self.gaps.is_empty() {
            text.push_str(&format!(
                " {} unresolved item(s) need manual follow-up:",
                self.gaps.len()
            ));
            for gap in &self.gaps {
                let parts: Vec<String> = gap.unresolved.iter().map(ToString::to_string).collect();
                text.push_str(&format!(
                    " message {} (mirror {}): {} not found;",
                    gap.origin_id,
                    gap.mirror_id,
                    parts.join(", ")
                ));
            }
        }
        text
    }
}
