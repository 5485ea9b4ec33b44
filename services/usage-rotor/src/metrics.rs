//! Prometheus metrics exposition
//!
//! The rotation library emits through the `metrics` facade; this module
//! installs the recorder and describes what it emits:
//!
//! - `rotor_rotation_evaluations_total` (counter): label `outcome`
//! - `rotor_rotations_total` (counter)
//! - `rotor_profile_capacity` (gauge): label `profile`, zero once usage is
//!   unknown or the profile is removed
//! - `rotor_usage_fetch_errors_total` (counter): label `kind`
//! - `rotor_session_primes_total` (counter): label `result`
//! - `rotor_usage_pushes_total` (counter): usage snapshots pushed over the admin API

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    describe();
    Ok(handle)
}

/// Register help text for every rotor metric.
pub fn describe() {
    metrics::describe_counter!(
        "rotor_rotation_evaluations_total",
        "Rotation evaluations by outcome"
    );
    metrics::describe_counter!(
        "rotor_rotations_total",
        "Rotations performed after a successful activation"
    );
    metrics::describe_gauge!(
        "rotor_profile_capacity",
        "Effective capacity per profile at the last refresh"
    );
    metrics::describe_counter!(
        "rotor_usage_fetch_errors_total",
        "Failed usage fetches by error kind"
    );
    metrics::describe_counter!(
        "rotor_session_primes_total",
        "Session prime attempts by result"
    );
    metrics::describe_counter!(
        "rotor_usage_pushes_total",
        "Usage snapshots pushed through the admin API"
    );
}

/// Record a usage snapshot pushed by an external hook.
pub fn record_usage_push() {
    metrics::counter!("rotor_usage_pushes_total").increment(1);
}
