use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tagscan_core::Coordinates;
use tokio::time::{sleep, timeout, Instant};

use super::*;
use crate::error::{DispatchError, GeoError, RecordError};
use crate::recorder::DispatchData;
use crate::webhook::Ack;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeGeo {
    delay: Duration,
    result: Result<Coordinates, GeoError>,
    calls: AtomicUsize,
}

#[async_trait]
impl GeolocationAcquirer for FakeGeo {
    async fn acquire(&self, _timeout: Duration) -> Result<Coordinates, GeoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.delay).await;
        self.result
    }
}

#[derive(Clone, Copy)]
enum RecorderBehavior {
    WithContact,
    WithoutContact,
    UnknownTag,
    Unreachable,
}

struct FakeRecorder {
    behavior: RecorderBehavior,
    delay: Duration,
    calls: AtomicUsize,
    events: Mutex<Vec<ScanEvent>>,
}

#[async_trait]
impl ScanRecorder for FakeRecorder {
    async fn record(&self, event: &ScanEvent) -> Result<RecordedScan, RecordError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(event.clone());
        sleep(self.delay).await;
        let dispatch = DispatchData {
            pet_name: "Luna".to_owned(),
            owner_whatsapp: "+34600000000".to_owned(),
            maps_link: event.coordinates.map(|c| c.maps_link()),
        };
        match self.behavior {
            RecorderBehavior::WithContact => Ok(RecordedScan {
                scan_id: "scan-1".to_owned(),
                tag_identifier: event.tag_identifier.clone(),
                dispatch: Some(dispatch),
            }),
            RecorderBehavior::WithoutContact => Ok(RecordedScan {
                scan_id: "scan-1".to_owned(),
                tag_identifier: event.tag_identifier.clone(),
                dispatch: None,
            }),
            RecorderBehavior::UnknownTag => Err(RecordError::UnknownTag {
                tag: event.tag_identifier.clone(),
            }),
            RecorderBehavior::Unreachable => {
                Err(RecordError::Unreachable("connection refused".to_owned()))
            }
        }
    }
}

#[derive(Clone, Copy)]
enum DispatchBehavior {
    Ack,
    Reject(u16),
    NoResponse,
}

struct FakeDispatcher {
    behavior: DispatchBehavior,
    delay: Duration,
    calls: AtomicUsize,
    payloads: Mutex<Vec<WebhookPayload>>,
}

#[async_trait]
impl WebhookDispatcher for FakeDispatcher {
    async fn dispatch(&self, payload: &WebhookPayload) -> Result<Ack, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.clone());
        sleep(self.delay).await;
        match self.behavior {
            DispatchBehavior::Ack => Ok(Ack { status: 200 }),
            DispatchBehavior::Reject(status) => Err(DispatchError::RemoteRejected {
                status,
                body: "boom".to_owned(),
            }),
            DispatchBehavior::NoResponse => Err(DispatchError::NoResponse),
        }
    }
}

struct Harness {
    geo: Arc<FakeGeo>,
    recorder: Arc<FakeRecorder>,
    dispatcher: Arc<FakeDispatcher>,
}

impl Harness {
    fn new(
        geo_delay: Duration,
        geo_result: Result<Coordinates, GeoError>,
        recorder: RecorderBehavior,
        dispatcher: DispatchBehavior,
    ) -> Self {
        Self {
            geo: Arc::new(FakeGeo {
                delay: geo_delay,
                result: geo_result,
                calls: AtomicUsize::new(0),
            }),
            recorder: Arc::new(FakeRecorder {
                behavior: recorder,
                delay: Duration::from_millis(100),
                calls: AtomicUsize::new(0),
                events: Mutex::new(Vec::new()),
            }),
            dispatcher: Arc::new(FakeDispatcher {
                behavior: dispatcher,
                delay: Duration::from_millis(100),
                calls: AtomicUsize::new(0),
                payloads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Geolocation answers (40.0, -3.0) after 200 ms, everything else succeeds.
    fn happy() -> Self {
        Self::new(
            Duration::from_millis(200),
            Ok(Coordinates::new(40.0, -3.0)),
            RecorderBehavior::WithContact,
            DispatchBehavior::Ack,
        )
    }

    fn coordinator(&self, tag: &str) -> ScanCoordinator {
        ScanCoordinator::new(
            tag,
            DeviceInfo::new().with(DeviceInfo::USER_AGENT, "test-agent"),
            CoordinatorSettings::default(),
            Collaborators {
                geolocation: self.geo.clone(),
                recorder: self.recorder.clone(),
                dispatcher: self.dispatcher.clone(),
            },
        )
    }

    fn geo_calls(&self) -> usize {
        self.geo.calls.load(Ordering::SeqCst)
    }

    fn record_calls(&self) -> usize {
        self.recorder.calls.load(Ordering::SeqCst)
    }

    fn dispatch_calls(&self) -> usize {
        self.dispatcher.calls.load(Ordering::SeqCst)
    }

    fn recorded_event(&self) -> ScanEvent {
        self.recorder.events.lock().unwrap()[0].clone()
    }
}

async fn settle(coordinator: &ScanCoordinator) -> CoordinatorSnapshot {
    timeout(Duration::from_secs(60), coordinator.settled())
        .await
        .expect("coordinator should settle")
}

fn reason(snapshot: &CoordinatorSnapshot) -> OutcomeReason {
    snapshot.outcome.as_ref().expect("outcome present").reason
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn located_scan_notifies_owner() {
    let h = Harness::happy();
    let coordinator = h.coordinator("TAG-1");
    coordinator.mount();

    let snapshot = settle(&coordinator).await;

    assert_eq!(snapshot.phase, ScanPhase::Settled(Settlement::Success));
    let outcome = snapshot.outcome.expect("outcome");
    assert!(outcome.delivered);
    assert!(outcome.is_terminal);
    assert!(outcome.message.contains("owner notified"), "{}", outcome.message);
    assert_eq!(h.record_calls(), 1);
    assert_eq!(h.dispatch_calls(), 1);

    let event = h.recorded_event();
    assert_eq!(event.coordinates, Some(Coordinates::new(40.0, -3.0)));
    assert_eq!(event.source, ScanSource::Automatic);
    assert_eq!(event.finder_message.as_deref(), Some(DEFAULT_FINDER_MESSAGE));

    let payload = h.dispatcher.payloads.lock().unwrap()[0].clone();
    assert_eq!(payload.tag_identifier, "TAG-1");
    assert_eq!(payload.scan_id, "scan-1");
    assert_eq!(payload.location.coordinates_string.as_deref(), Some("40,-3"));
    assert_eq!(payload.ip_info.user_agent.as_deref(), Some("test-agent"));
}

#[tokio::test(start_paused = true)]
async fn geolocation_timeout_then_webhook_500_is_degraded() {
    let h = Harness::new(
        Duration::from_secs(8),
        Ok(Coordinates::new(1.0, 1.0)),
        RecorderBehavior::WithContact,
        DispatchBehavior::Reject(500),
    );
    let coordinator = h.coordinator("TAG-2");
    coordinator.mount();

    let snapshot = settle(&coordinator).await;

    assert_eq!(snapshot.phase, ScanPhase::Settled(Settlement::Degraded));
    assert_eq!(
        reason(&snapshot),
        OutcomeReason::NotificationUncertain {
            location_captured: false
        }
    );
    let outcome = snapshot.outcome.expect("outcome");
    assert!(!outcome.delivered);
    assert!(outcome.message.contains("Scan recorded"));
    assert!(outcome.message.contains("could not be confirmed"));
    assert_eq!(h.recorded_event().coordinates, None);
    assert_eq!(h.dispatch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_tag_never_dispatches() {
    let h = Harness::new(
        Duration::ZERO,
        Ok(Coordinates::new(40.0, -3.0)),
        RecorderBehavior::UnknownTag,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("UNKNOWN_TAG");
    coordinator.mount();

    let snapshot = settle(&coordinator).await;

    assert_eq!(snapshot.phase, ScanPhase::Settled(Settlement::Degraded));
    assert_eq!(reason(&snapshot), OutcomeReason::TagUnrecognized);
    assert!(snapshot.recorded.is_none());
    assert_eq!(h.record_calls(), 1);
    assert_eq!(h.dispatch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unmount_during_debounce_invokes_nothing() {
    let h = Harness::happy();
    let coordinator = h.coordinator("TAG-4");
    coordinator.mount();
    sleep(Duration::from_millis(50)).await;
    coordinator.cancel();

    sleep(Duration::from_secs(30)).await;

    assert_eq!(h.geo_calls(), 0);
    assert_eq!(h.record_calls(), 0);
    assert_eq!(h.dispatch_calls(), 0);
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.phase, ScanPhase::Debouncing);
    assert!(!snapshot.mounted);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn permission_denied_still_settles_within_bounds() {
    let h = Harness::new(
        Duration::ZERO,
        Err(GeoError::PermissionDenied),
        RecorderBehavior::WithContact,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("TAG-5");
    let started = Instant::now();
    coordinator.mount();

    let snapshot = settle(&coordinator).await;

    let settings = CoordinatorSettings::default();
    let bound = settings.debounce + settings.geo_timeout + Duration::from_secs(10) + Duration::from_secs(1);
    assert!(started.elapsed() <= bound, "took {:?}", started.elapsed());
    assert_eq!(reason(&snapshot), OutcomeReason::NotifiedWithoutLocation);
    assert!(snapshot.outcome.expect("outcome").delivered);
    assert_eq!(h.recorded_event().coordinates, None);
}

#[tokio::test(start_paused = true)]
async fn strict_mode_double_mount_records_once() {
    let h = Harness::happy();
    let coordinator = h.coordinator("TAG-6");
    coordinator.mount();
    coordinator.cancel();
    coordinator.mount();
    coordinator.mount();

    let snapshot = settle(&coordinator).await;

    assert_eq!(snapshot.phase, ScanPhase::Settled(Settlement::Success));
    assert_eq!(h.geo_calls(), 1);
    assert_eq!(h.record_calls(), 1);
    assert_eq!(h.dispatch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_during_debounce_wins_and_blocks_automatic() {
    let h = Harness::happy();
    let coordinator = h.coordinator("TAG-7");
    coordinator.mount();
    assert!(coordinator.can_trigger_manual());

    assert!(coordinator.trigger_manual(Some("Found at the station".to_owned())));
    assert!(!coordinator.can_trigger_manual());
    assert!(!coordinator.trigger_manual(None));

    let snapshot = settle(&coordinator).await;
    sleep(Duration::from_secs(5)).await;

    assert_eq!(snapshot.source, Some(ScanSource::Manual));
    assert_eq!(h.geo_calls(), 1);
    assert_eq!(h.record_calls(), 1);
    assert_eq!(h.dispatch_calls(), 1);
    let event = h.recorded_event();
    assert_eq!(event.source, ScanSource::Manual);
    assert_eq!(event.finder_message.as_deref(), Some("Found at the station"));
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_after_automatic_claim_is_noop() {
    let h = Harness::new(
        Duration::from_secs(1),
        Ok(Coordinates::new(40.0, -3.0)),
        RecorderBehavior::WithContact,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("TAG-8");
    coordinator.mount();
    sleep(Duration::from_millis(400)).await;

    assert_eq!(coordinator.snapshot().phase, ScanPhase::AcquiringLocation);
    assert!(!coordinator.can_trigger_manual());
    assert!(!coordinator.trigger_manual(None));

    settle(&coordinator).await;
    assert_eq!(h.geo_calls(), 1);
    assert_eq!(h.record_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_requires_mounted_page() {
    let h = Harness::happy();
    let coordinator = h.coordinator("TAG-9");
    assert!(!coordinator.trigger_manual(None));

    coordinator.mount();
    coordinator.cancel();
    assert!(!coordinator.trigger_manual(None));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.geo_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unmount_during_acquisition_suppresses_late_callback() {
    let h = Harness::new(
        Duration::from_secs(1),
        Ok(Coordinates::new(40.0, -3.0)),
        RecorderBehavior::WithContact,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("TAG-10");
    coordinator.mount();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(coordinator.snapshot().phase, ScanPhase::AcquiringLocation);

    coordinator.cancel();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.geo_calls(), 1);
    assert_eq!(h.record_calls(), 0);
    assert_eq!(coordinator.snapshot().phase, ScanPhase::AcquiringLocation);
    assert!(!coordinator.recording_attempted());
}

#[tokio::test(start_paused = true)]
async fn unmount_during_recording_discards_result_and_skips_dispatch() {
    let h = Harness::new(
        Duration::ZERO,
        Ok(Coordinates::new(40.0, -3.0)),
        RecorderBehavior::WithContact,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("TAG-11");
    coordinator.mount();
    sleep(Duration::from_millis(350)).await;
    assert_eq!(coordinator.snapshot().phase, ScanPhase::Recording);

    coordinator.cancel();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(h.record_calls(), 1);
    assert_eq!(h.dispatch_calls(), 0);
    assert_eq!(coordinator.snapshot().phase, ScanPhase::Recording);
    assert!(coordinator.recording_attempted());
}

#[tokio::test(start_paused = true)]
async fn remount_after_abandoned_acquisition_starts_over() {
    let h = Harness::new(
        Duration::from_secs(1),
        Ok(Coordinates::new(40.0, -3.0)),
        RecorderBehavior::WithContact,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("TAG-20");
    coordinator.mount();
    sleep(Duration::from_millis(500)).await;
    coordinator.cancel();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.record_calls(), 0);

    coordinator.mount();
    assert_eq!(coordinator.snapshot().phase, ScanPhase::Debouncing);
    assert!(coordinator.can_trigger_manual());

    let snapshot = settle(&coordinator).await;
    assert_eq!(snapshot.phase, ScanPhase::Settled(Settlement::Success));
    assert_eq!(h.geo_calls(), 2);
    assert_eq!(h.record_calls(), 1);
    assert_eq!(h.dispatch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn remount_after_cancelled_recording_settles_without_dispatch() {
    let h = Harness::new(
        Duration::ZERO,
        Ok(Coordinates::new(40.0, -3.0)),
        RecorderBehavior::WithContact,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("TAG-21");
    coordinator.mount();
    sleep(Duration::from_millis(350)).await;
    coordinator.cancel();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(coordinator.snapshot().phase, ScanPhase::Recording);

    coordinator.mount();
    let snapshot = settle(&coordinator).await;

    assert_eq!(snapshot.phase, ScanPhase::Settled(Settlement::Degraded));
    assert_eq!(
        reason(&snapshot),
        OutcomeReason::NotificationUncertain {
            location_captured: true
        }
    );
    assert_eq!(
        snapshot.recorded.as_ref().map(|r| r.scan_id.as_str()),
        Some("scan-1")
    );
    assert!(!coordinator.can_trigger_manual());
    assert_eq!(h.record_calls(), 1);
    assert_eq!(h.dispatch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn remount_after_cancelled_dispatch_publishes_acknowledgment() {
    let h = Harness::new(
        Duration::ZERO,
        Ok(Coordinates::new(40.0, -3.0)),
        RecorderBehavior::WithContact,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("TAG-22");
    coordinator.mount();
    sleep(Duration::from_millis(450)).await;
    assert_eq!(coordinator.snapshot().phase, ScanPhase::Dispatching);
    coordinator.cancel();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(coordinator.snapshot().phase, ScanPhase::Dispatching);

    coordinator.mount();
    let snapshot = settle(&coordinator).await;

    assert_eq!(snapshot.phase, ScanPhase::Settled(Settlement::Success));
    assert_eq!(reason(&snapshot), OutcomeReason::OwnerNotified);
    assert_eq!(h.record_calls(), 1);
    assert_eq!(h.dispatch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispatching_follows_successful_recording() {
    let h = Harness::happy();
    let coordinator = h.coordinator("TAG-12");
    let mut rx = coordinator.subscribe();
    let initial = rx.borrow_and_update().phase;
    let collector = tokio::spawn(async move {
        let mut phases = vec![initial];
        while rx.changed().await.is_ok() {
            let phase = rx.borrow_and_update().phase;
            if phases.last() != Some(&phase) {
                phases.push(phase);
            }
            if phase.is_settled() {
                break;
            }
        }
        phases
    });

    coordinator.mount();
    settle(&coordinator).await;
    let phases = timeout(Duration::from_secs(5), collector)
        .await
        .expect("collector finishes")
        .expect("collector task");

    assert_eq!(
        phases,
        vec![
            ScanPhase::Idle,
            ScanPhase::Debouncing,
            ScanPhase::AcquiringLocation,
            ScanPhase::Recording,
            ScanPhase::Dispatching,
            ScanPhase::Settled(Settlement::Success),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn settled_coordinator_ignores_further_triggers() {
    let h = Harness::happy();
    let coordinator = h.coordinator("TAG-13");
    coordinator.mount();
    let settled = settle(&coordinator).await;

    coordinator.mount();
    assert!(!coordinator.trigger_manual(None));
    sleep(Duration::from_secs(5)).await;

    assert_eq!(coordinator.snapshot(), settled);
    assert_eq!(h.record_calls(), 1);
    assert_eq!(h.dispatch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn backend_failure_is_reported_as_retryable_error() {
    let h = Harness::new(
        Duration::ZERO,
        Err(GeoError::Unsupported),
        RecorderBehavior::Unreachable,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("TAG-14");
    coordinator.mount();

    let snapshot = settle(&coordinator).await;

    assert_eq!(reason(&snapshot), OutcomeReason::RecordingFailed);
    assert_eq!(
        snapshot.outcome.expect("outcome").severity,
        tagscan_core::Severity::Error
    );
    assert_eq!(h.dispatch_calls(), 0);
    assert!(coordinator.recording_attempted());
}

#[tokio::test(start_paused = true)]
async fn missing_owner_contact_settles_without_dispatch() {
    let h = Harness::new(
        Duration::ZERO,
        Ok(Coordinates::new(40.0, -3.0)),
        RecorderBehavior::WithoutContact,
        DispatchBehavior::Ack,
    );
    let coordinator = h.coordinator("TAG-15");
    coordinator.mount();

    let snapshot = settle(&coordinator).await;

    assert_eq!(reason(&snapshot), OutcomeReason::NoOwnerContact);
    assert_eq!(
        snapshot.recorded.as_ref().map(|r| r.scan_id.as_str()),
        Some("scan-1")
    );
    assert_eq!(h.dispatch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn webhook_timeout_with_location_is_uncertain() {
    let h = Harness::new(
        Duration::ZERO,
        Ok(Coordinates::new(40.0, -3.0)),
        RecorderBehavior::WithContact,
        DispatchBehavior::NoResponse,
    );
    let coordinator = h.coordinator("TAG-16");
    coordinator.mount();

    let snapshot = settle(&coordinator).await;

    assert_eq!(
        reason(&snapshot),
        OutcomeReason::NotificationUncertain {
            location_captured: true
        }
    );
    assert!(snapshot.recorded.is_some());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_coordinator_cancels_pending_debounce() {
    let h = Harness::happy();
    let coordinator = h.coordinator("TAG-17");
    coordinator.mount();
    drop(coordinator);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.geo_calls(), 0);
}
