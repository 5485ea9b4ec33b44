//! Profile data model
//!
//! Everything rotation reads lives here: the profile identity, its opt-in
//! flags, its plan tier and the last usage snapshot. A missing snapshot means
//! "not fetched yet" and is deliberately distinct from a snapshot reporting
//! zero usage.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{FINGERPRINT_LEN, FULL_PERCENTAGE};

/// Stable, opaque profile identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ProfileId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Claude plan tier. The weight is a relative capacity multiplier against Pro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountTier {
    Free,
    Pro,
    Team,
    #[serde(rename = "max_5x")]
    Max5x,
    #[serde(rename = "max_20x")]
    Max20x,
}

impl AccountTier {
    pub fn weight(self) -> f64 {
        match self {
            AccountTier::Free => 0.25,
            AccountTier::Pro => 1.0,
            AccountTier::Team => 1.25,
            AccountTier::Max5x => 5.0,
            AccountTier::Max20x => 20.0,
        }
    }

    /// Weight for an optional tier; profiles without a tier count as Pro.
    pub fn effective_weight(tier: Option<AccountTier>) -> f64 {
        tier.unwrap_or(AccountTier::Pro).weight()
    }

    /// Label for logs and the admin API.
    pub fn label(self) -> &'static str {
        match self {
            AccountTier::Free => "free",
            AccountTier::Pro => "pro",
            AccountTier::Team => "team",
            AccountTier::Max5x => "max_5x",
            AccountTier::Max20x => "max_20x",
        }
    }
}

/// Clamp a usage percentage to `[0, 100]`. NaN reads as zero usage.
pub fn clamp_percentage(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, FULL_PERCENTAGE)
    }
}

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Usage reported for one profile at one point in time.
///
/// Percentages are stored as reported; consumers clamp them through
/// `clamped_session()` / `clamped_weekly()` before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Consumption of the rolling session (5-hour) quota, 0-100
    pub session_percentage: f64,
    /// Consumption of the rolling weekly quota, 0-100
    pub weekly_percentage: f64,
    /// When the running session window resets, unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_resets_at: Option<u64>,
    /// When this snapshot was taken, unix milliseconds
    #[serde(default)]
    pub fetched_at: u64,
}

impl UsageSnapshot {
    /// Snapshot taken now, with no known session reset time.
    pub fn new(session_percentage: f64, weekly_percentage: f64) -> Self {
        Self {
            session_percentage,
            weekly_percentage,
            session_resets_at: None,
            fetched_at: now_millis(),
        }
    }

    pub fn with_session_reset(mut self, resets_at: u64) -> Self {
        self.session_resets_at = Some(resets_at);
        self
    }

    pub fn clamped_session(&self) -> f64 {
        clamp_percentage(self.session_percentage)
    }

    pub fn clamped_weekly(&self) -> f64 {
        clamp_percentage(self.weekly_percentage)
    }

    /// Whether a session window is still open at `now_millis`.
    pub fn session_window_open(&self, now_millis: u64) -> bool {
        self.session_resets_at.is_some_and(|at| at > now_millis)
    }
}

/// Session credentials for one Claude account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl SessionCredentials {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            organization_id: None,
        }
    }

    /// Short, non-reversible tag that tells credentials apart in listings.
    ///
    /// `BASE64URL(SHA256(session_key))`, truncated.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.session_key.as_bytes());
        let mut encoded = URL_SAFE_NO_PAD.encode(hash);
        encoded.truncate(FINGERPRINT_LEN);
        encoded
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("session_key", &"[REDACTED]")
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

/// One Claude account as known to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    /// Opt-in: may be rotated away from and rotated to
    #[serde(default)]
    pub auto_rotate_enabled: bool,
    /// Opt-in: re-prime the session once its window has reset
    #[serde(default)]
    pub auto_start_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SessionCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_tier: Option<AccountTier>,
    /// Last known usage; `None` until the first successful fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSnapshot>,
}

impl Profile {
    pub fn new(id: impl Into<ProfileId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            auto_rotate_enabled: false,
            auto_start_enabled: false,
            credentials: None,
            account_tier: None,
            usage: None,
        }
    }

    pub fn with_credentials(mut self, credentials: SessionCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_tier(mut self, tier: AccountTier) -> Self {
        self.account_tier = Some(tier);
        self
    }

    pub fn with_usage(mut self, usage: UsageSnapshot) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_auto_rotate(mut self, enabled: bool) -> Self {
        self.auto_rotate_enabled = enabled;
        self
    }

    pub fn with_auto_start(mut self, enabled: bool) -> Self {
        self.auto_start_enabled = enabled;
        self
    }

    /// Credentials present and non-empty.
    pub fn has_session_credentials(&self) -> bool {
        self.credentials
            .as_ref()
            .is_some_and(|c| !c.session_key.trim().is_empty())
    }

    pub fn tier_weight(&self) -> f64 {
        AccountTier::effective_weight(self.account_tier)
    }
}
