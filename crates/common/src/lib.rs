//! Types shared across the claude-usage-rotor workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
