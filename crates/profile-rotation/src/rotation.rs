//! Rotation decision and cooldown bookkeeping
//!
//! `RotationService` evaluates a fixed sequence of gates over a read-only
//! profile snapshot:
//!
//! 1. at least two profiles opted in to auto-rotate with session credentials
//! 2. the active profile itself opted in
//! 3. the active profile's usage is known and exhausted (session threshold or
//!    weekly exhaustion point)
//! 4. the cooldown since the last recorded rotation has elapsed
//! 5. at least one other eligible profile has known usage
//! 6. the best candidate beats the active profile by the hysteresis ratio
//!
//! Every gate that stops the evaluation yields a distinct `RotationOutcome`;
//! none of them is an error. The service never performs the swap. The caller
//! activates the target and then calls `record_rotation()`.

use std::time::{Duration, Instant};

use claude_profiles::{Profile, ProfileId};
use tracing::{debug, info};

use crate::capacity::effective_capacity;

/// Rotation thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationConfig {
    /// Session percentage at which the active profile needs rotation
    pub session_threshold: f64,
    /// Weekly percentage treated as a hard cap
    pub weekly_exhaustion_point: f64,
    /// Minimum time between two rotations
    pub cooldown: Duration,
    /// Minimum best/active capacity ratio that justifies a switch
    pub hysteresis_multiplier: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            session_threshold: 90.0,
            weekly_exhaustion_point: 99.0,
            cooldown: Duration::from_secs(30 * 60),
            hysteresis_multiplier: 1.5,
        }
    }
}

/// Why an evaluation did or did not propose a rotation.
#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    Rotate(ProfileId),
    TooFewCandidates { eligible: usize },
    ActiveNotFound,
    ActiveOptedOut,
    ActiveUsageUnknown,
    NotExhausted,
    CoolingDown { remaining: Duration },
    NoScorableCandidate,
    InsufficientGain,
}

impl RotationOutcome {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RotationOutcome::Rotate(_) => "rotate",
            RotationOutcome::TooFewCandidates { .. } => "too_few_candidates",
            RotationOutcome::ActiveNotFound => "active_not_found",
            RotationOutcome::ActiveOptedOut => "active_opted_out",
            RotationOutcome::ActiveUsageUnknown => "active_usage_unknown",
            RotationOutcome::NotExhausted => "not_exhausted",
            RotationOutcome::CoolingDown { .. } => "cooling_down",
            RotationOutcome::NoScorableCandidate => "no_scorable_candidate",
            RotationOutcome::InsufficientGain => "insufficient_gain",
        }
    }

    pub fn target(&self) -> Option<&ProfileId> {
        match self {
            RotationOutcome::Rotate(id) => Some(id),
            _ => None,
        }
    }
}

/// Capacity computed for one rotation candidate. `None` when its usage is
/// unknown and it was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub id: ProfileId,
    pub capacity: Option<f64>,
}

/// Full evaluation result: the outcome plus the numbers behind it, as far as
/// the evaluation got.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationDecision {
    pub outcome: RotationOutcome,
    pub active_capacity: Option<f64>,
    pub best: Option<(ProfileId, f64)>,
    pub candidates: Vec<CandidateScore>,
}

impl RotationDecision {
    fn stop(outcome: RotationOutcome) -> Self {
        Self {
            outcome,
            active_capacity: None,
            best: None,
            candidates: Vec::new(),
        }
    }

    pub fn target(&self) -> Option<&ProfileId> {
        self.outcome.target()
    }

    /// JSON summary for the admin API and the CLI.
    pub fn to_json(&self) -> serde_json::Value {
        let cooldown_remaining_secs = match &self.outcome {
            RotationOutcome::CoolingDown { remaining } => Some(remaining.as_secs()),
            _ => None,
        };
        let candidates: Vec<serde_json::Value> = self
            .candidates
            .iter()
            .map(|c| serde_json::json!({ "id": c.id, "capacity": c.capacity }))
            .collect();

        serde_json::json!({
            "outcome": self.outcome.label(),
            "target": self.target(),
            "active_capacity": self.active_capacity,
            "best": self.best.as_ref().map(|(id, capacity)| {
                serde_json::json!({ "id": id, "capacity": capacity })
            }),
            "cooldown_remaining_secs": cooldown_remaining_secs,
            "candidates": candidates,
        })
    }
}

/// Decides whether the active profile should be swapped, and owns the time
/// of the last rotation.
#[derive(Debug)]
pub struct RotationService {
    config: RotationConfig,
    last_rotation: Option<Instant>,
}

impl RotationService {
    pub fn new(config: RotationConfig) -> Self {
        Self {
            config,
            last_rotation: None,
        }
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// When the last rotation was recorded, `None` if never.
    pub fn last_rotation(&self) -> Option<Instant> {
        self.last_rotation
    }

    /// Evaluate against the current time and return the target, if any.
    pub fn evaluate(&self, profiles: &[Profile], active: Option<&ProfileId>) -> Option<ProfileId> {
        self.evaluate_at(profiles, active, Instant::now())
    }

    /// Evaluate at `now` and return the target, if any.
    pub fn evaluate_at(
        &self,
        profiles: &[Profile],
        active: Option<&ProfileId>,
        now: Instant,
    ) -> Option<ProfileId> {
        self.evaluate_detailed_at(profiles, active, now)
            .target()
            .cloned()
    }

    /// Evaluate at `now` and return the outcome with its supporting numbers.
    pub fn evaluate_detailed_at(
        &self,
        profiles: &[Profile],
        active: Option<&ProfileId>,
        now: Instant,
    ) -> RotationDecision {
        let config = &self.config;

        let eligible: Vec<&Profile> = profiles
            .iter()
            .filter(|p| p.auto_rotate_enabled && p.has_session_credentials())
            .collect();
        debug!(
            profiles = profiles.len(),
            eligible = eligible.len(),
            "rotation eligibility"
        );
        if eligible.len() < 2 {
            return RotationDecision::stop(RotationOutcome::TooFewCandidates {
                eligible: eligible.len(),
            });
        }

        let Some(active) = active.and_then(|id| profiles.iter().find(|p| &p.id == id)) else {
            debug!("no active profile among known profiles");
            return RotationDecision::stop(RotationOutcome::ActiveNotFound);
        };
        if !active.auto_rotate_enabled {
            debug!(profile_id = %active.id, "active profile opted out of auto-rotate");
            return RotationDecision::stop(RotationOutcome::ActiveOptedOut);
        }

        let Some(usage) = active.usage.as_ref() else {
            debug!(profile_id = %active.id, "active profile usage unknown");
            return RotationDecision::stop(RotationOutcome::ActiveUsageUnknown);
        };
        let session = usage.clamped_session();
        let weekly = usage.clamped_weekly();
        let session_exhausted = session >= config.session_threshold;
        let weekly_exhausted = weekly >= config.weekly_exhaustion_point;
        debug!(
            profile_id = %active.id,
            session,
            weekly,
            session_threshold = config.session_threshold,
            weekly_exhaustion_point = config.weekly_exhaustion_point,
            session_exhausted,
            weekly_exhausted,
            "active profile exhaustion check"
        );
        if !session_exhausted && !weekly_exhausted {
            return RotationDecision::stop(RotationOutcome::NotExhausted);
        }

        if let Some(remaining) = self.cooldown_remaining_at(now) {
            debug!(
                remaining_secs = remaining.as_secs(),
                "rotation cooldown active"
            );
            return RotationDecision::stop(RotationOutcome::CoolingDown { remaining });
        }

        let active_capacity = effective_capacity(active, config.weekly_exhaustion_point);
        let mut candidates = Vec::with_capacity(eligible.len() - 1);
        let mut best: Option<(ProfileId, f64)> = None;

        for candidate in eligible.iter().filter(|p| p.id != active.id) {
            if candidate.usage.is_none() {
                debug!(profile_id = %candidate.id, "candidate usage unknown, skipped");
                candidates.push(CandidateScore {
                    id: candidate.id.clone(),
                    capacity: None,
                });
                continue;
            }

            let capacity = effective_capacity(candidate, config.weekly_exhaustion_point);
            debug!(profile_id = %candidate.id, capacity, "candidate scored");
            candidates.push(CandidateScore {
                id: candidate.id.clone(),
                capacity: Some(capacity),
            });

            // Ties go to the smallest id so repeated evaluations agree.
            let better = match &best {
                None => true,
                Some((best_id, best_capacity)) => {
                    capacity > *best_capacity
                        || (capacity == *best_capacity && candidate.id < *best_id)
                }
            };
            if better {
                best = Some((candidate.id.clone(), capacity));
            }
        }

        let Some((best_id, best_capacity)) = best.clone() else {
            debug!("no candidate with known usage");
            return RotationDecision {
                outcome: RotationOutcome::NoScorableCandidate,
                active_capacity: Some(active_capacity),
                best: None,
                candidates,
            };
        };

        let justified = if active_capacity > 0.0 {
            let ratio = best_capacity / active_capacity;
            debug!(
                active_capacity,
                best_capacity,
                ratio,
                hysteresis_multiplier = config.hysteresis_multiplier,
                "hysteresis check"
            );
            ratio >= config.hysteresis_multiplier
        } else {
            debug!(best_capacity, "active capacity is zero");
            best_capacity > 0.0
        };

        let outcome = if justified {
            info!(
                from = %active.id,
                to = %best_id,
                active_capacity,
                best_capacity,
                "rotation proposed"
            );
            RotationOutcome::Rotate(best_id)
        } else {
            debug!(
                active_capacity,
                best_capacity, "capacity gain below hysteresis, staying"
            );
            RotationOutcome::InsufficientGain
        };

        RotationDecision {
            outcome,
            active_capacity: Some(active_capacity),
            best,
            candidates,
        }
    }

    /// Time left in the cooldown at `now`, `None` once it has elapsed.
    ///
    /// The cooldown is still active at exactly `last_rotation + cooldown`.
    pub fn cooldown_remaining_at(&self, now: Instant) -> Option<Duration> {
        let last = self.last_rotation?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed <= self.config.cooldown {
            Some(self.config.cooldown - elapsed)
        } else {
            None
        }
    }

    /// Record that the caller performed a rotation just now.
    pub fn record_rotation(&mut self) {
        self.record_rotation_at(Instant::now());
    }

    /// Record a rotation performed at `now`. Never moves the timestamp back.
    pub fn record_rotation_at(&mut self, now: Instant) {
        let at = match self.last_rotation {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_rotation = Some(at);
        debug!(
            cooldown_secs = self.config.cooldown.as_secs(),
            "rotation recorded"
        );
    }
}
