//! Refresh cycle and its background task
//!
//! One cycle: fetch usage for every credentialed profile, then evaluate
//! rotation over a single cloned snapshot of the store, activate the target
//! if there is one, and finally consider priming the active profile. Cycles
//! are serialized, so a manual refresh from the admin API never interleaves
//! with the periodic one.
//!
//! A rotor without a fetcher runs push-only: usage arrives from outside
//! (`PUT /profiles/{id}/usage`, hand edits) and cycles only evaluate it. With
//! a fetcher, a failed fetch marks usage unknown unless the profile's
//! snapshot was written after the previous fetch pass finished.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use claude_profiles::{Profile, ProfileId, ProfileStore, now_millis};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::activation::ActivationSink;
use crate::auto_start::{AutoStartService, SessionPrimer};
use crate::capacity::effective_capacity;
use crate::error::Result;
use crate::fetch::UsageFetcher;
use crate::rotation::{RotationDecision, RotationService};

/// What one refresh cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub fetched: usize,
    pub failed: usize,
    /// `None` when rotation is disabled
    pub decision: Option<RotationDecision>,
    pub rotated_to: Option<ProfileId>,
    pub primed: Option<ProfileId>,
    /// Unix milliseconds
    pub finished_at: u64,
}

/// Owns the rotation state and drives refresh cycles over injected
/// collaborators.
pub struct Rotor {
    store: Arc<ProfileStore>,
    fetcher: Option<Arc<dyn UsageFetcher>>,
    activation: Arc<dyn ActivationSink>,
    primer: Option<Arc<dyn SessionPrimer>>,
    rotation: Mutex<RotationService>,
    auto_start: Mutex<AutoStartService>,
    rotation_enabled: bool,
    cycle: Mutex<()>,
    last_cycle: RwLock<Option<CycleReport>>,
    /// Unix milliseconds at which the last fetch pass finished
    fetch_pass_finished: AtomicU64,
    /// Profiles with a `rotor_profile_capacity` series
    capacity_series: Mutex<HashSet<ProfileId>>,
}

impl Rotor {
    pub fn new(
        store: Arc<ProfileStore>,
        fetcher: Arc<dyn UsageFetcher>,
        activation: Arc<dyn ActivationSink>,
        rotation: RotationService,
    ) -> Self {
        Self::build(store, Some(fetcher), activation, rotation)
    }

    /// Rotor that never fetches and evaluates pushed usage only.
    pub fn push_only(
        store: Arc<ProfileStore>,
        activation: Arc<dyn ActivationSink>,
        rotation: RotationService,
    ) -> Self {
        Self::build(store, None, activation, rotation)
    }

    fn build(
        store: Arc<ProfileStore>,
        fetcher: Option<Arc<dyn UsageFetcher>>,
        activation: Arc<dyn ActivationSink>,
        rotation: RotationService,
    ) -> Self {
        Self {
            store,
            fetcher,
            activation,
            primer: None,
            rotation: Mutex::new(rotation),
            auto_start: Mutex::new(AutoStartService::default()),
            rotation_enabled: true,
            cycle: Mutex::new(()),
            last_cycle: RwLock::new(None),
            fetch_pass_finished: AtomicU64::new(now_millis()),
            capacity_series: Mutex::new(HashSet::new()),
        }
    }

    /// Enable auto-start with the given primer.
    pub fn with_auto_start(mut self, primer: Arc<dyn SessionPrimer>, service: AutoStartService) -> Self {
        self.primer = Some(primer);
        self.auto_start = Mutex::new(service);
        self
    }

    /// Keep fetching usage but never evaluate rotation.
    pub fn with_rotation_enabled(mut self, enabled: bool) -> Self {
        self.rotation_enabled = enabled;
        self
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    pub fn rotation_enabled(&self) -> bool {
        self.rotation_enabled
    }

    pub fn is_push_only(&self) -> bool {
        self.fetcher.is_none()
    }

    pub async fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.read().await.clone()
    }

    /// Weekly exhaustion point in effect, for capacity displays.
    pub async fn weekly_exhaustion_point(&self) -> f64 {
        self.rotation.lock().await.config().weekly_exhaustion_point
    }

    /// Time left in the rotation cooldown, `None` if not cooling down.
    pub async fn cooldown_remaining(&self) -> Option<Duration> {
        self.rotation
            .lock()
            .await
            .cooldown_remaining_at(Instant::now())
    }

    /// Run one full refresh cycle.
    pub async fn refresh_cycle(&self) -> CycleReport {
        let _cycle = self.cycle.lock().await;

        let (fetched, failed) = self.fetch_all().await;

        let document = self.store.snapshot().await;
        let mut report = CycleReport {
            fetched,
            failed,
            decision: None,
            rotated_to: None,
            primed: None,
            finished_at: 0,
        };

        if self.rotation_enabled {
            let mut rotation = self.rotation.lock().await;
            let point = rotation.config().weekly_exhaustion_point;
            self.record_capacities(&document.profiles, point).await;

            let decision = rotation.evaluate_detailed_at(
                &document.profiles,
                document.active.as_ref(),
                Instant::now(),
            );
            metrics::counter!("rotor_rotation_evaluations_total", "outcome" => decision.outcome.label())
                .increment(1);

            if let Some(target) = decision.target() {
                match self.activation.activate(target).await {
                    Ok(()) => {
                        rotation.record_rotation();
                        metrics::counter!("rotor_rotations_total").increment(1);
                        info!(
                            from = document.active.as_ref().map(ProfileId::as_str),
                            to = %target,
                            "rotated active profile"
                        );
                        report.rotated_to = Some(target.clone());
                    }
                    Err(e) => {
                        warn!(profile_id = %target, error = %e, "activation failed, rotation not recorded");
                    }
                }
            } else {
                debug!(outcome = decision.outcome.label(), "no rotation");
            }
            report.decision = Some(decision);
        }

        if let Some(primer) = self.primer.as_ref() {
            report.primed = self.maybe_prime(primer.as_ref()).await;
        }

        report.finished_at = now_millis();
        *self.last_cycle.write().await = Some(report.clone());
        report
    }

    /// Dry-run evaluation over the stored snapshot. Fetches nothing and
    /// changes nothing.
    pub async fn evaluate_now(&self) -> RotationDecision {
        let document = self.store.snapshot().await;
        self.rotation.lock().await.evaluate_detailed_at(
            &document.profiles,
            document.active.as_ref(),
            Instant::now(),
        )
    }

    /// Manual activation. Does not start the rotation cooldown.
    pub async fn activate(&self, id: &ProfileId) -> Result<()> {
        let _cycle = self.cycle.lock().await;
        self.activation.activate(id).await?;
        info!(profile_id = %id, "profile activated manually");
        Ok(())
    }

    /// Set the capacity gauge for every profile. Unknown usage and profiles
    /// gone from the store report zero.
    async fn record_capacities(&self, profiles: &[Profile], weekly_exhaustion_point: f64) {
        let mut series = self.capacity_series.lock().await;
        let current: HashSet<ProfileId> = profiles.iter().map(|p| p.id.clone()).collect();
        for id in series.difference(&current) {
            metrics::gauge!("rotor_profile_capacity", "profile" => id.to_string()).set(0.0);
        }
        for profile in profiles {
            metrics::gauge!("rotor_profile_capacity", "profile" => profile.id.to_string())
                .set(effective_capacity(profile, weekly_exhaustion_point));
        }
        *series = current;
    }

    /// Fetch every credentialed profile sequentially.
    ///
    /// A failure marks the profile's usage unknown unless a newer snapshot
    /// was pushed since the previous pass.
    async fn fetch_all(&self) -> (usize, usize) {
        let Some(fetcher) = self.fetcher.as_ref() else {
            debug!("push-only, not fetching usage");
            return (0, 0);
        };

        let mut fetched = 0usize;
        let mut failed = 0usize;
        let cutoff = self.fetch_pass_finished.load(Ordering::SeqCst);

        for profile in self.store.profiles().await {
            if !profile.has_session_credentials() {
                debug!(profile_id = %profile.id, "no session credentials, not fetching");
                continue;
            }

            let written = match fetcher.fetch(&profile).await {
                Ok(snapshot) => {
                    fetched += 1;
                    self.store.update_usage(&profile.id, Some(snapshot)).await
                }
                Err(e) => {
                    failed += 1;
                    metrics::counter!("rotor_usage_fetch_errors_total", "kind" => e.kind())
                        .increment(1);
                    match self.store.expire_usage(&profile.id, cutoff).await {
                        Ok(true) => {
                            warn!(profile_id = %profile.id, error = %e, "usage fetch failed, marking unknown");
                            Ok(())
                        }
                        Ok(false) => {
                            warn!(profile_id = %profile.id, error = %e, "usage fetch failed, keeping pushed usage");
                            Ok(())
                        }
                        Err(store_err) => Err(store_err),
                    }
                }
            };

            if let Err(e) = written {
                warn!(profile_id = %profile.id, error = %e, "failed to persist usage");
            }
        }

        self.fetch_pass_finished.store(now_millis(), Ordering::SeqCst);
        debug!(fetched, failed, "usage fetch complete");
        (fetched, failed)
    }

    async fn maybe_prime(&self, primer: &dyn SessionPrimer) -> Option<ProfileId> {
        let active = self.store.active().await?;
        let mut auto_start = self.auto_start.lock().await;
        let now = Instant::now();
        if !auto_start.should_prime_at(&active, now_millis(), now) {
            return None;
        }

        auto_start.record_prime_at(&active.id, now);
        match primer.prime(&active).await {
            Ok(()) => {
                metrics::counter!("rotor_session_primes_total", "result" => "ok").increment(1);
                Some(active.id)
            }
            Err(e) => {
                metrics::counter!("rotor_session_primes_total", "result" => "error").increment(1);
                warn!(profile_id = %active.id, error = %e, "session prime failed");
                None
            }
        }
    }
}

/// Spawn a background task that runs a refresh cycle every `interval`.
///
/// The first cycle runs immediately so usage is known right after startup.
pub fn spawn_refresh_task(rotor: Arc<Rotor>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = rotor.refresh_cycle().await;
            info!(
                fetched = report.fetched,
                failed = report.failed,
                outcome = report.decision.as_ref().map(|d| d.outcome.label()),
                rotated_to = report.rotated_to.as_ref().map(ProfileId::as_str),
                "refresh cycle finished"
            );
        }
    })
}
