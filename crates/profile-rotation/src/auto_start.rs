//! Auto-start: re-prime a session once its window has reset
//!
//! Claude's session quota runs in a rolling window that only starts with the
//! first message. A profile that opted in gets a priming message as soon as
//! it is idle (zero session usage and no open window), so the next window is
//! already running when the user comes back.
//!
//! Priming is rate-limited per profile: a failed or ineffective prime is not
//! retried until the cooldown has passed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use claude_profiles::{Profile, ProfileId, UsageSnapshot};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable carrying the profile id to the priming command.
pub const PROFILE_ID_ENV: &str = "CLAUDE_PROFILE_ID";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoStartConfig {
    /// Minimum time between two prime attempts for the same profile
    pub cooldown: Duration,
}

impl Default for AutoStartConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(10 * 60),
        }
    }
}

/// A snapshot is idle when nothing was used and no window is open.
pub fn is_idle(usage: &UsageSnapshot, now_millis: u64) -> bool {
    usage.clamped_session() <= 0.0 && !usage.session_window_open(now_millis)
}

/// Decides when to prime and remembers the last attempt per profile.
#[derive(Debug, Default)]
pub struct AutoStartService {
    config: AutoStartConfig,
    last_prime: HashMap<ProfileId, Instant>,
}

impl AutoStartService {
    pub fn new(config: AutoStartConfig) -> Self {
        Self {
            config,
            last_prime: HashMap::new(),
        }
    }

    pub fn should_prime_at(&self, profile: &Profile, now_millis: u64, now: Instant) -> bool {
        if !profile.auto_start_enabled || !profile.has_session_credentials() {
            return false;
        }
        let Some(usage) = profile.usage.as_ref() else {
            debug!(profile_id = %profile.id, "usage unknown, not priming");
            return false;
        };
        if !is_idle(usage, now_millis) {
            return false;
        }
        match self.last_prime.get(&profile.id) {
            Some(last) if now.saturating_duration_since(*last) < self.config.cooldown => {
                debug!(profile_id = %profile.id, "prime attempted recently, waiting");
                false
            }
            _ => true,
        }
    }

    /// Record a prime attempt, successful or not.
    pub fn record_prime_at(&mut self, id: &ProfileId, now: Instant) {
        self.last_prime.insert(id.clone(), now);
    }
}

/// Starts a new session window for a profile.
///
/// Uses `Pin<Box<dyn Future>>` so primers can be shared as `Arc<dyn SessionPrimer>`.
pub trait SessionPrimer: Send + Sync {
    fn prime<'a>(&'a self, profile: &'a Profile) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Primes by running an external command (for example a one-shot Claude CLI
/// prompt). The profile id is passed in `CLAUDE_PROFILE_ID`; a non-zero exit
/// status is a failure.
#[derive(Debug, Clone)]
pub struct CommandPrimer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPrimer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl SessionPrimer for CommandPrimer {
    fn prime<'a>(&'a self, profile: &'a Profile) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut command = tokio::process::Command::new(&self.program);
            command
                .args(&self.args)
                .env(PROFILE_ID_ENV, profile.id.as_str())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let output = tokio::time::timeout(self.timeout, command.output())
                .await
                .map_err(|_| {
                    Error::Prime(format!(
                        "{} timed out after {}s",
                        self.program,
                        self.timeout.as_secs()
                    ))
                })?
                .map_err(|e| Error::Prime(format!("spawning {}: {e}", self.program)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::Prime(format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    stderr.trim()
                )));
            }

            info!(profile_id = %profile.id, program = %self.program, "session primed");
            Ok(())
        })
    }
}
