//! Effective capacity scoring
//!
//! Estimates how much usable quota a profile has left: remaining session
//! headroom, scaled by the plan tier weight, scaled down linearly by weekly
//! usage. A profile at its weekly cap scores zero regardless of session
//! headroom.

use claude_profiles::{AccountTier, FULL_PERCENTAGE, Profile, UsageSnapshot};

/// Weekly percentage at which the weekly penalty reaches zero.
pub const WEEKLY_CAP: f64 = FULL_PERCENTAGE;

/// Effective capacity of a profile. Unknown usage scores zero.
///
/// Non-increasing in session and weekly percentage for a fixed tier.
pub fn effective_capacity(profile: &Profile, weekly_exhaustion_point: f64) -> f64 {
    match profile.usage.as_ref() {
        Some(usage) => snapshot_capacity(usage, profile.account_tier, weekly_exhaustion_point),
        None => 0.0,
    }
}

/// Effective capacity of a usage snapshot for the given tier.
pub fn snapshot_capacity(
    usage: &UsageSnapshot,
    tier: Option<AccountTier>,
    weekly_exhaustion_point: f64,
) -> f64 {
    let weekly = usage.clamped_weekly();
    if weekly >= weekly_exhaustion_point {
        return 0.0;
    }

    let remaining_session = (FULL_PERCENTAGE - usage.clamped_session()).max(0.0);
    let base = remaining_session * AccountTier::effective_weight(tier);
    let weekly_factor = 1.0 - weekly / WEEKLY_CAP;
    (base * weekly_factor).max(0.0)
}
