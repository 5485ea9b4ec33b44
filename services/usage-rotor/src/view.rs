//! JSON and text renderings shared by the admin API and the CLI
//!
//! Listings never include session keys. A profile is identified by its id and
//! a short credential fingerprint instead.

use claude_profiles::{Profile, ProfileId, StoreDocument, UsageSnapshot};
use profile_rotation::{CycleReport, effective_capacity};
use serde_json::{Value, json};

fn usage_json(usage: &UsageSnapshot) -> Value {
    json!({
        "session_percentage": usage.session_percentage,
        "weekly_percentage": usage.weekly_percentage,
        "session_resets_at": usage.session_resets_at,
        "fetched_at": usage.fetched_at,
    })
}

/// One profile as listed by `GET /profiles`.
pub fn profile_json(profile: &Profile, active: Option<&ProfileId>, weekly_exhaustion_point: f64) -> Value {
    let capacity = profile
        .usage
        .as_ref()
        .map(|_| effective_capacity(profile, weekly_exhaustion_point));

    json!({
        "id": profile.id,
        "name": profile.name,
        "active": active == Some(&profile.id),
        "auto_rotate_enabled": profile.auto_rotate_enabled,
        "auto_start_enabled": profile.auto_start_enabled,
        "eligible": profile.auto_rotate_enabled && profile.has_session_credentials(),
        "account_tier": profile.account_tier.map(|t| t.label()),
        "tier_weight": profile.tier_weight(),
        "credential_fingerprint": profile.credentials.as_ref().map(|c| c.fingerprint()),
        "usage": profile.usage.as_ref().map(usage_json),
        "capacity": capacity,
    })
}

pub fn profiles_json(document: &StoreDocument, weekly_exhaustion_point: f64) -> Value {
    let profiles: Vec<Value> = document
        .profiles
        .iter()
        .map(|p| profile_json(p, document.active.as_ref(), weekly_exhaustion_point))
        .collect();
    json!({
        "active": document.active,
        "profiles": profiles,
    })
}

pub fn cycle_json(report: &CycleReport) -> Value {
    json!({
        "fetched": report.fetched,
        "failed": report.failed,
        "outcome": report.decision.as_ref().map(|d| d.outcome.label()),
        "rotated_to": report.rotated_to,
        "primed": report.primed,
        "finished_at": report.finished_at,
    })
}

/// Aligned table of every profile, for `claude-usage-rotor status`.
pub fn status_table(document: &StoreDocument, weekly_exhaustion_point: f64) -> String {
    if document.profiles.is_empty() {
        return String::from("no profiles configured\n");
    }

    let mut out = format!(
        "  {:<24} {:<8} {:>8} {:>8} {:>9}  {}\n",
        "PROFILE", "TIER", "SESSION", "WEEKLY", "CAPACITY", "FLAGS"
    );
    for profile in &document.profiles {
        let marker = if document.active.as_ref() == Some(&profile.id) {
            '*'
        } else {
            ' '
        };
        let tier = profile.account_tier.map_or("-", |t| t.label());
        let (session, weekly, capacity) = match profile.usage.as_ref() {
            Some(usage) => (
                format!("{:.0}%", usage.clamped_session()),
                format!("{:.0}%", usage.clamped_weekly()),
                format!("{:.1}", effective_capacity(profile, weekly_exhaustion_point)),
            ),
            None => ("?".into(), "?".into(), "?".into()),
        };

        let mut flags = Vec::new();
        if profile.auto_rotate_enabled {
            flags.push("rotate");
        }
        if profile.auto_start_enabled {
            flags.push("auto-start");
        }
        if !profile.has_session_credentials() {
            flags.push("no-credentials");
        }

        out.push_str(&format!(
            "{marker} {:<24} {:<8} {:>8} {:>8} {:>9}  {}\n",
            profile.id.as_str(),
            tier,
            session,
            weekly,
            capacity,
            flags.join(",")
        ));
    }
    out
}

/// One-line summary of the active profile for a terminal statusline.
pub fn statusline(document: &StoreDocument, weekly_exhaustion_point: f64, now_millis: u64) -> String {
    let Some(active) = document
        .active
        .as_ref()
        .and_then(|id| document.profiles.iter().find(|p| &p.id == id))
    else {
        return String::from("no active profile");
    };

    let Some(usage) = active.usage.as_ref() else {
        return format!("{} | usage unknown", active.name);
    };

    let mut line = format!(
        "{} | session {:.0}% | weekly {:.0}% | capacity {:.1}",
        active.name,
        usage.clamped_session(),
        usage.clamped_weekly(),
        effective_capacity(active, weekly_exhaustion_point)
    );
    if let Some(resets_at) = usage.session_resets_at.filter(|at| *at > now_millis) {
        let minutes = (resets_at - now_millis).div_ceil(60_000);
        line.push_str(&format!(" | resets in {}h{:02}m", minutes / 60, minutes % 60));
    }
    line
}
