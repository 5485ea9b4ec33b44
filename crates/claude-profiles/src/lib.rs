//! Claude account profiles and their on-disk store
//!
//! A profile is one Claude account: its session credentials, plan tier,
//! opt-in flags for auto-rotation and auto-start, and the most recent usage
//! snapshot reported for it. The store persists every profile plus the id of
//! the active one in a single JSON file.
//!
//! Profile flow:
//! 1. Operator adds a profile (admin API or by editing the file)
//! 2. The refresh cycle writes fresh usage via `ProfileStore::update_usage()`
//! 3. Rotation reads a cloned snapshot via `ProfileStore::profiles()`
//! 4. Activation swaps credentials via `ProfileStore::activate_credentials()`

pub mod constants;
pub mod error;
pub mod profile;
pub mod store;

pub use constants::*;
pub use error::{Error, Result};
pub use profile::{
    AccountTier, Profile, ProfileId, SessionCredentials, UsageSnapshot, clamp_percentage,
    now_millis,
};
pub use store::{ActiveSession, ProfileStore, StoreDocument};
