//! File names and fixed quantities shared by the profile model

/// Default file name for the profile store document
pub const DEFAULT_PROFILES_FILE: &str = "profiles.json";

/// Default file name for the credentials of the active profile
pub const DEFAULT_ACTIVE_SESSION_FILE: &str = "active-session.json";

/// Upper bound of every usage percentage
pub const FULL_PERCENTAGE: f64 = 100.0;

/// Number of base64url characters kept from a credential fingerprint
pub const FINGERPRINT_LEN: usize = 12;
