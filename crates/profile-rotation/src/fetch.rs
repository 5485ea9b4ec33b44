//! Usage fetching
//!
//! `UsageFetcher` is the seam between the refresh cycle and whatever knows a
//! profile's current consumption. `HttpUsageFetcher` polls a usage adapter
//! endpoint with the profile's session key and expects a small JSON report:
//!
//! ```json
//! { "session_percentage": 42.0, "weekly_percentage": 17.5, "session_resets_at": 1760000000000 }
//! ```
//!
//! Translating Claude's own usage responses into this report is the
//! adapter's job.

use std::future::Future;
use std::pin::Pin;

use claude_profiles::{Profile, UsageSnapshot, now_millis};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Header carrying the organization id, when the profile has one.
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Source of usage snapshots.
pub trait UsageFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        profile: &'a Profile,
    ) -> Pin<Box<dyn Future<Output = Result<UsageSnapshot>> + Send + 'a>>;
}

/// Usage report returned by the adapter endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageReport {
    pub session_percentage: f64,
    pub weekly_percentage: f64,
    /// Unix milliseconds
    #[serde(default)]
    pub session_resets_at: Option<u64>,
}

impl UsageReport {
    /// Convert to a snapshot stamped `fetched_at`. Rejects non-finite values.
    pub fn into_snapshot(self, fetched_at: u64) -> Result<UsageSnapshot> {
        if !self.session_percentage.is_finite() || !self.weekly_percentage.is_finite() {
            return Err(Error::Fetch(format!(
                "non-finite usage in report (session {}, weekly {})",
                self.session_percentage, self.weekly_percentage
            )));
        }
        Ok(UsageSnapshot {
            session_percentage: self.session_percentage,
            weekly_percentage: self.weekly_percentage,
            session_resets_at: self.session_resets_at,
            fetched_at,
        })
    }
}

/// Polls an HTTP usage adapter.
pub struct HttpUsageFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUsageFetcher {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl UsageFetcher for HttpUsageFetcher {
    fn fetch<'a>(
        &'a self,
        profile: &'a Profile,
    ) -> Pin<Box<dyn Future<Output = Result<UsageSnapshot>> + Send + 'a>> {
        Box::pin(async move {
            let credentials = profile
                .credentials
                .as_ref()
                .filter(|_| profile.has_session_credentials())
                .ok_or_else(|| Error::MissingCredentials(profile.id.to_string()))?;

            let mut request = self
                .client
                .get(&self.endpoint)
                .bearer_auth(&credentials.session_key);
            if let Some(org) = credentials.organization_id.as_deref() {
                request = request.header(ORGANIZATION_HEADER, org);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::Fetch(format!("usage request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));

                if status.as_u16() == 401 || status.as_u16() == 403 {
                    return Err(Error::Unauthorized(format!(
                        "usage endpoint returned {status}: {body}"
                    )));
                }
                return Err(Error::Fetch(format!(
                    "usage endpoint returned {status}: {body}"
                )));
            }

            let report = response
                .json::<UsageReport>()
                .await
                .map_err(|e| Error::Fetch(format!("invalid usage report: {e}")))?;

            let snapshot = report.into_snapshot(now_millis())?;
            debug!(
                profile_id = %profile.id,
                session = snapshot.session_percentage,
                weekly = snapshot.weekly_percentage,
                "usage fetched"
            );
            Ok(snapshot)
        })
    }
}
