//! Profile rotation for Claude accounts
//!
//! Decides, after every usage refresh, whether the active profile should be
//! swapped for another one with more remaining capacity. The decision is a
//! pure function of the profile snapshot, the configured thresholds and the
//! time of the last rotation; performing the swap is left to an
//! `ActivationSink`.
//!
//! Refresh cycle:
//! 1. `UsageFetcher` refreshes every credentialed profile's usage snapshot
//! 2. Failed fetches mark the profile's usage as unknown, unless it was
//!    pushed since the previous pass (push-only rotors skip steps 1-2)
//! 3. `RotationService` evaluates the gates over a cloned profile snapshot
//! 4. On a positive decision the `ActivationSink` swaps credentials, and only
//!    then is the rotation recorded (starting the cooldown)
//! 5. `AutoStartService` re-primes the active profile's session once its
//!    window has reset, if the profile opted in

pub mod activation;
pub mod auto_start;
pub mod capacity;
pub mod error;
pub mod fetch;
pub mod refresh;
pub mod rotation;

pub use activation::{ActivationSink, StoreActivation};
pub use auto_start::{AutoStartConfig, AutoStartService, CommandPrimer, SessionPrimer, is_idle};
pub use capacity::{WEEKLY_CAP, effective_capacity, snapshot_capacity};
pub use error::{Error, Result};
pub use fetch::{HttpUsageFetcher, UsageFetcher, UsageReport};
pub use refresh::{CycleReport, Rotor, spawn_refresh_task};
pub use rotation::{CandidateScore, RotationConfig, RotationDecision, RotationOutcome, RotationService};
