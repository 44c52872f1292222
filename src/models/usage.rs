use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How many free fusions an anonymous session gets, per kind.
pub const MAX_MATCHES: i32 = 1;
pub const MAX_RANDOMIZES: i32 = 1;

/// The two quota-limited operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuotaKind {
    Match,
    Randomize,
}

impl QuotaKind {
    pub fn limit(self) -> i32 {
        match self {
            QuotaKind::Match => MAX_MATCHES,
            QuotaKind::Randomize => MAX_RANDOMIZES,
        }
    }
}

/// Per-session usage counters. Counters only ever increase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageQuota {
    pub session_key: String,
    pub matches_used: i32,
    pub randomizes_used: i32,
}

impl UsageQuota {
    pub fn fresh(session_key: &str) -> Self {
        Self {
            session_key: session_key.to_string(),
            matches_used: 0,
            randomizes_used: 0,
        }
    }

    pub fn used(&self, kind: QuotaKind) -> i32 {
        match kind {
            QuotaKind::Match => self.matches_used,
            QuotaKind::Randomize => self.randomizes_used,
        }
    }

    pub fn can_match(&self) -> bool {
        self.matches_used < MAX_MATCHES
    }

    pub fn can_randomize(&self) -> bool {
        self.randomizes_used < MAX_RANDOMIZES
    }

    pub fn is_limited(&self) -> bool {
        !self.can_match() && !self.can_randomize()
    }

    pub fn allows(&self, kind: QuotaKind) -> bool {
        match kind {
            QuotaKind::Match => self.can_match(),
            QuotaKind::Randomize => self.can_randomize(),
        }
    }
}

/// Usage payload returned to API callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub unlimited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    pub matches_used: i32,
    pub matches_limit: i32,
    pub randomizes_used: i32,
    pub randomizes_limit: i32,
    pub can_match: bool,
    pub can_randomize: bool,
    pub is_limited: bool,
}

impl UsageSnapshot {
    /// Snapshot for an authenticated user: quotas never apply.
    pub fn unlimited() -> Self {
        Self {
            unlimited: true,
            session_key: None,
            matches_used: 0,
            matches_limit: MAX_MATCHES,
            randomizes_used: 0,
            randomizes_limit: MAX_RANDOMIZES,
            can_match: true,
            can_randomize: true,
            is_limited: false,
        }
    }
}

impl From<&UsageQuota> for UsageSnapshot {
    fn from(quota: &UsageQuota) -> Self {
        Self {
            unlimited: false,
            session_key: Some(quota.session_key.clone()),
            matches_used: quota.matches_used,
            matches_limit: MAX_MATCHES,
            randomizes_used: quota.randomizes_used,
            randomizes_limit: MAX_RANDOMIZES,
            can_match: quota.can_match(),
            can_randomize: quota.can_randomize(),
            is_limited: quota.is_limited(),
        }
    }
}
