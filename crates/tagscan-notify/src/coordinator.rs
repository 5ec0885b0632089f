//! Scan notification coordinator.
//!
//! One coordinator backs one visit to a tag's public page. It moves through
//!
//! ```text
//! Idle -> Debouncing -> AcquiringLocation -> Recording -> Dispatching -> Settled
//! ```
//!
//! and guarantees that the recorder and the dispatcher are each invoked at most
//! once, no matter how mounts, cancellations and manual triggers interleave.
//!
//! Two flags carry that guarantee. `run_claimed` flips when an entry point
//! (debounce expiry or manual trigger) leaves the waiting states, so only the
//! first one ever acquires a position. `recording_attempted` flips the instant
//! the Recording transition begins and is never reset, even if recording fails.
//! Both live with the phase behind one mutex that is never held across an await.
//!
//! Cancellation is cooperative: [`ScanCoordinator::cancel`] clears the mounted
//! flag, every transition checks it first, and in-flight calls are left to
//! finish with their results discarded. A terminal outcome reached while
//! unmounted is parked rather than published, so a later remount can still
//! settle the visit instead of leaving it mid-run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::Serialize;
use tagscan_core::config::DEFAULT_FINDER_MESSAGE;
use tagscan_core::{AppConfig, DeviceInfo, NotificationOutcome, OutcomeReason, ScanEvent, ScanSource};
use tokio::sync::watch;

use crate::geolocation::{acquire_within, GeolocationAcquirer};
use crate::recorder::{RecordedScan, ScanRecorder};
use crate::webhook::{WebhookDispatcher, WebhookPayload};

/// Terminal flavour of a settled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    /// Owner notified with a location attached.
    Success,
    /// Anything short of that; the outcome's reason says why.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Debouncing,
    AcquiringLocation,
    Recording,
    Dispatching,
    Settled(Settlement),
}

impl ScanPhase {
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, ScanPhase::Settled(_))
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Debouncing => "debouncing",
            ScanPhase::AcquiringLocation => "acquiring_location",
            ScanPhase::Recording => "recording",
            ScanPhase::Dispatching => "dispatching",
            ScanPhase::Settled(Settlement::Success) => "succeeded",
            ScanPhase::Settled(Settlement::Degraded) => "degraded",
        }
    }
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and defaults for a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub debounce: Duration,
    pub geo_timeout: Duration,
    pub manual_geo_timeout: Duration,
    /// Finder message attached to automatic scans.
    pub default_finder_message: String,
    /// Offset for the webhook's `formatted_time`.
    pub display_offset: FixedOffset,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            geo_timeout: Duration::from_millis(5000),
            manual_geo_timeout: Duration::from_millis(10_000),
            default_finder_message: DEFAULT_FINDER_MESSAGE.to_owned(),
            display_offset: Utc.fix(),
        }
    }
}

impl CoordinatorSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            geo_timeout: Duration::from_millis(config.geo_timeout_ms),
            manual_geo_timeout: Duration::from_millis(config.manual_geo_timeout_ms),
            default_finder_message: config.default_finder_message.clone(),
            display_offset: config.display_offset,
        }
    }
}

/// The three collaborators a run drives.
#[derive(Clone)]
pub struct Collaborators {
    pub geolocation: Arc<dyn GeolocationAcquirer>,
    pub recorder: Arc<dyn ScanRecorder>,
    pub dispatcher: Arc<dyn WebhookDispatcher>,
}

/// Observable state of a coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorSnapshot {
    pub phase: ScanPhase,
    pub mounted: bool,
    /// Entry point that claimed the run, once one has.
    pub source: Option<ScanSource>,
    pub outcome: Option<NotificationOutcome>,
    /// Present once the recorder has succeeded.
    pub recorded: Option<RecordedScan>,
}

#[derive(Debug)]
struct Lifecycle {
    phase: ScanPhase,
    mounted: bool,
    /// Bumped on every mount so timers from an earlier mount expire silently.
    generation: u64,
    run_claimed: bool,
    /// Set while the claimed run's task is still executing.
    run_active: bool,
    recording_attempted: bool,
    /// Terminal outcome a run reached while unmounted.
    parked: Option<(OutcomeReason, Option<RecordedScan>)>,
}

struct Inner {
    tag: String,
    device_info: DeviceInfo,
    settings: CoordinatorSettings,
    collaborators: Collaborators,
    lifecycle: Mutex<Lifecycle>,
    snapshot: watch::Sender<CoordinatorSnapshot>,
}

/// Coordinates the automatic and manual notification paths for one visit.
///
/// Spawns onto the current tokio runtime; `mount` and `trigger_manual` must be
/// called from within one. Dropping the coordinator cancels it.
pub struct ScanCoordinator {
    inner: Arc<Inner>,
}

impl ScanCoordinator {
    #[must_use]
    pub fn new(
        tag: impl Into<String>,
        device_info: DeviceInfo,
        settings: CoordinatorSettings,
        collaborators: Collaborators,
    ) -> Self {
        let (snapshot, _) = watch::channel(CoordinatorSnapshot {
            phase: ScanPhase::Idle,
            mounted: false,
            source: None,
            outcome: None,
            recorded: None,
        });
        Self {
            inner: Arc::new(Inner {
                tag: tag.into(),
                device_info,
                settings,
                collaborators,
                lifecycle: Mutex::new(Lifecycle {
                    phase: ScanPhase::Idle,
                    mounted: false,
                    generation: 0,
                    run_claimed: false,
                    run_active: false,
                    recording_attempted: false,
                    parked: None,
                }),
                snapshot,
            }),
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// Marks the page as mounted and starts the debounce timer.
    ///
    /// Mounting an already-mounted or settled coordinator is a no-op. A remount
    /// after [`cancel`](Self::cancel) restarts the debounce if no run has been
    /// claimed, and lets a still-executing run publish again. When the claimed
    /// run has already returned, its parked outcome settles the visit, or the
    /// debounce starts over if it never reached Recording.
    pub fn mount(&self) {
        let generation = {
            let mut lc = self.inner.lock();
            if lc.mounted || lc.phase.is_settled() {
                return;
            }
            lc.mounted = true;
            if !lc.run_claimed {
                self.inner.restart_debounce(&mut lc)
            } else if lc.run_active {
                self.inner.publish(&lc, |_| {});
                return;
            } else {
                match self.inner.resume_abandoned(&mut lc) {
                    Some(generation) => generation,
                    None => return,
                }
            }
        };

        tracing::debug!(tag = %self.inner.tag, generation, "visit mounted, debouncing");
        self.inner.spawn_debounce(generation);
    }

    /// Ends the visit. Later transitions are suppressed; in-flight calls finish
    /// in the background and their results are dropped.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Starts the manual "share my location" path, bypassing the debounce.
    ///
    /// Returns `false` without side effects when the page is not mounted or a
    /// run (automatic or manual) has already been claimed.
    pub fn trigger_manual(&self, finder_message: Option<String>) -> bool {
        if !self.inner.claim_run(ScanSource::Manual, None) {
            return false;
        }
        let inner = Arc::clone(&self.inner);
        let timeout = inner.settings.manual_geo_timeout;
        tokio::spawn(async move {
            inner.run(ScanSource::Manual, timeout, finder_message).await;
        });
        true
    }

    /// Whether the UI should still offer the manual path.
    #[must_use]
    pub fn can_trigger_manual(&self) -> bool {
        let lc = self.inner.lock();
        lc.mounted && !lc.run_claimed && !lc.phase.is_settled()
    }

    #[must_use]
    pub fn recording_attempted(&self) -> bool {
        self.inner.lock().recording_attempted
    }

    #[must_use]
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Waits for a terminal snapshot.
    ///
    /// A cancelled coordinator settles only once it is mounted again; callers
    /// should bound this wait.
    pub async fn settled(&self) -> CoordinatorSnapshot {
        let mut rx = self.inner.snapshot.subscribe();
        let settled = rx
            .wait_for(|s| s.phase.is_settled())
            .await
            .map(|snapshot| snapshot.clone());
        settled.unwrap_or_else(|_| self.snapshot())
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes the lifecycle's phase and mounted flag plus `update`.
    fn publish(&self, lc: &Lifecycle, update: impl FnOnce(&mut CoordinatorSnapshot)) {
        self.snapshot.send_modify(|s| {
            s.phase = lc.phase;
            s.mounted = lc.mounted;
            update(s);
        });
    }

    fn cancel(&self) {
        let mut lc = self.lock();
        if !lc.mounted {
            return;
        }
        lc.mounted = false;
        self.publish(&lc, |_| {});
        tracing::debug!(tag = %self.tag, phase = %lc.phase, "visit cancelled");
    }

    /// Enters Debouncing under a fresh generation and returns it.
    fn restart_debounce(&self, lc: &mut Lifecycle) -> u64 {
        lc.generation += 1;
        lc.phase = ScanPhase::Debouncing;
        self.publish(lc, |s| {
            s.source = None;
            s.outcome = None;
        });
        lc.generation
    }

    fn spawn_debounce(self: &Arc<Self>, generation: u64) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.settings.debounce).await;
            if inner.claim_run(ScanSource::Automatic, Some(generation)) {
                let timeout = inner.settings.geo_timeout;
                inner.run(ScanSource::Automatic, timeout, None).await;
            }
        });
    }

    /// Resolves a claimed run whose task has already returned.
    ///
    /// Returns a generation when the run never reached Recording and the
    /// debounce must be spawned again.
    fn resume_abandoned(&self, lc: &mut Lifecycle) -> Option<u64> {
        if let Some((reason, recorded)) = lc.parked.take() {
            self.settle_locked(lc, reason, recorded);
            return None;
        }
        if lc.recording_attempted {
            // every path past begin_recording settles or parks
            self.settle_locked(lc, OutcomeReason::RecordingFailed, None);
            return None;
        }
        lc.run_claimed = false;
        Some(self.restart_debounce(lc))
    }

    /// Clears `run_active`. A remount that landed while the run was returning
    /// is resolved here.
    fn finish_run(&self) -> Option<u64> {
        let mut lc = self.lock();
        lc.run_active = false;
        if lc.mounted && !lc.phase.is_settled() {
            self.resume_abandoned(&mut lc)
        } else {
            None
        }
    }

    /// Leaves the waiting states for AcquiringLocation if nobody has yet.
    ///
    /// `generation` is set for debounce expiry and must match the current
    /// mount; a manual trigger passes `None`.
    fn claim_run(&self, source: ScanSource, generation: Option<u64>) -> bool {
        let mut lc = self.lock();
        let stale = generation.is_some_and(|g| g != lc.generation);
        if !lc.mounted || stale || lc.run_claimed || lc.recording_attempted {
            tracing::debug!(
                tag = %self.tag,
                %source,
                mounted = lc.mounted,
                stale,
                "run not claimed"
            );
            return false;
        }
        lc.run_claimed = true;
        lc.run_active = true;
        lc.phase = ScanPhase::AcquiringLocation;
        self.publish(&lc, |s| s.source = Some(source));
        true
    }

    /// Enters Recording. The guard flips here, before the recorder is awaited.
    fn begin_recording(&self) -> bool {
        let mut lc = self.lock();
        if !lc.mounted || lc.recording_attempted {
            return false;
        }
        lc.recording_attempted = true;
        lc.phase = ScanPhase::Recording;
        self.publish(&lc, |s| {
            s.outcome = Some(OutcomeReason::Recording.into());
        });
        true
    }

    /// Enters Dispatching. While unmounted the dispatcher is skipped and the
    /// run parks as an unconfirmed notification.
    fn begin_dispatching(&self, recorded: &RecordedScan, location_captured: bool) -> bool {
        let mut lc = self.lock();
        if lc.phase.is_settled() {
            return false;
        }
        if !lc.mounted {
            tracing::debug!(
                tag = %self.tag,
                scan_id = %recorded.scan_id,
                "dispatch skipped while unmounted"
            );
            lc.parked = Some((
                OutcomeReason::NotificationUncertain { location_captured },
                Some(recorded.clone()),
            ));
            return false;
        }
        lc.phase = ScanPhase::Dispatching;
        self.publish(&lc, |s| {
            s.outcome = Some(OutcomeReason::Notifying.into());
            s.recorded = Some(recorded.clone());
        });
        true
    }

    /// Settles the run, or parks the outcome while unmounted.
    fn settle(&self, reason: OutcomeReason, recorded: Option<RecordedScan>) {
        let mut lc = self.lock();
        if lc.phase.is_settled() {
            return;
        }
        if !lc.mounted {
            tracing::debug!(tag = %self.tag, ?reason, "outcome parked while unmounted");
            lc.parked = Some((reason, recorded));
            return;
        }
        self.settle_locked(&mut lc, reason, recorded);
    }

    fn settle_locked(
        &self,
        lc: &mut Lifecycle,
        reason: OutcomeReason,
        recorded: Option<RecordedScan>,
    ) {
        let settlement = if reason == OutcomeReason::OwnerNotified {
            Settlement::Success
        } else {
            Settlement::Degraded
        };
        lc.phase = ScanPhase::Settled(settlement);
        self.publish(lc, |s| {
            s.outcome = Some(NotificationOutcome::from(reason));
            if recorded.is_some() {
                s.recorded = recorded;
            }
        });
        tracing::info!(tag = %self.tag, ?reason, "scan run settled");
    }

    async fn run(
        self: Arc<Self>,
        source: ScanSource,
        geo_timeout: Duration,
        finder_message: Option<String>,
    ) {
        self.execute(source, geo_timeout, finder_message).await;
        if let Some(generation) = self.finish_run() {
            tracing::debug!(tag = %self.tag, generation, "abandoned run released, debouncing");
            self.spawn_debounce(generation);
        }
    }

    async fn execute(
        &self,
        source: ScanSource,
        geo_timeout: Duration,
        finder_message: Option<String>,
    ) {
        let geolocation = Arc::clone(&self.collaborators.geolocation);
        let coordinates = match acquire_within(geolocation.as_ref(), geo_timeout).await {
            Ok(coords) => Some(coords),
            Err(err) => {
                tracing::info!(tag = %self.tag, %source, error = %err, "continuing without location");
                None
            }
        };

        if !self.begin_recording() {
            return;
        }

        let finder_message = finder_message.or_else(|| {
            (source == ScanSource::Automatic).then(|| self.settings.default_finder_message.clone())
        });
        let event = ScanEvent::new(
            &self.tag,
            coordinates,
            &self.device_info,
            finder_message,
            source,
        );

        let recorded = match self.collaborators.recorder.record(&event).await {
            Ok(recorded) => recorded,
            Err(err) => {
                tracing::warn!(tag = %self.tag, error = %err, "scan recording failed");
                let reason = if err.is_unknown_tag() {
                    OutcomeReason::TagUnrecognized
                } else {
                    OutcomeReason::RecordingFailed
                };
                self.settle(reason, None);
                return;
            }
        };

        let Some(dispatch) = recorded.dispatch.clone() else {
            self.settle(OutcomeReason::NoOwnerContact, Some(recorded));
            return;
        };

        if !self.begin_dispatching(&recorded, event.has_location()) {
            return;
        }

        let payload = WebhookPayload::build(
            &event,
            &recorded,
            &dispatch,
            self.settings.display_offset,
            Utc::now(),
        );
        let reason = match self.collaborators.dispatcher.dispatch(&payload).await {
            Ok(_) if event.has_location() => OutcomeReason::OwnerNotified,
            Ok(_) => OutcomeReason::NotifiedWithoutLocation,
            Err(err) => {
                tracing::warn!(
                    tag = %self.tag,
                    scan_id = %recorded.scan_id,
                    error = %err,
                    "owner notification not confirmed"
                );
                OutcomeReason::NotificationUncertain {
                    location_captured: event.has_location(),
                }
            }
        };
        self.settle(reason, None);
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
