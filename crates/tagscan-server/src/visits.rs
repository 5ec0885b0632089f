//! In-memory registry of open tag-page visits.
//!
//! Each visit owns one [`ScanCoordinator`] plus the reporter half of its
//! geolocation channel, so position callbacks posted by the browser reach the
//! run that is waiting for them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tagscan_core::{contact_owner_message, whatsapp_link, DeviceInfo};
use tagscan_notify::{
    Collaborators, CoordinatorSettings, CoordinatorSnapshot, GeolocationReporter,
    ReportedGeolocation, ScanCoordinator, ScanRecorder, WebhookDispatcher,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

pub struct Visit {
    pub id: Uuid,
    pub coordinator: ScanCoordinator,
    pub reporter: GeolocationReporter,
    opened_at: Instant,
}

impl Visit {
    /// WhatsApp deep link for the contact-owner button, once the owner is known.
    pub fn contact_link(snapshot: &CoordinatorSnapshot) -> Option<String> {
        let dispatch = snapshot.recorded.as_ref()?.dispatch.as_ref()?;
        let message = contact_owner_message(&dispatch.pet_name, dispatch.maps_link.as_deref());
        whatsapp_link(&dispatch.owner_whatsapp, &message)
    }
}

#[derive(Clone)]
pub struct VisitRegistry {
    settings: CoordinatorSettings,
    recorder: Arc<dyn ScanRecorder>,
    dispatcher: Arc<dyn WebhookDispatcher>,
    ttl: Duration,
    visits: Arc<Mutex<HashMap<Uuid, Arc<Visit>>>>,
}

impl VisitRegistry {
    pub fn new(
        settings: CoordinatorSettings,
        recorder: Arc<dyn ScanRecorder>,
        dispatcher: Arc<dyn WebhookDispatcher>,
        ttl: Duration,
    ) -> Self {
        Self {
            settings,
            recorder,
            dispatcher,
            ttl,
            visits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Opens a visit for `tag` and mounts its coordinator.
    pub async fn open(&self, tag: &str, device_info: DeviceInfo) -> Arc<Visit> {
        let (reporter, geolocation) = ReportedGeolocation::channel();
        let coordinator = ScanCoordinator::new(
            tag,
            device_info,
            self.settings.clone(),
            Collaborators {
                geolocation: Arc::new(geolocation),
                recorder: Arc::clone(&self.recorder),
                dispatcher: Arc::clone(&self.dispatcher),
            },
        );
        let visit = Arc::new(Visit {
            id: Uuid::new_v4(),
            coordinator,
            reporter,
            opened_at: Instant::now(),
        });
        visit.coordinator.mount();

        self.visits
            .lock()
            .await
            .insert(visit.id, Arc::clone(&visit));
        tracing::info!(visit_id = %visit.id, tag, "visit opened");
        visit
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Visit>> {
        self.visits.lock().await.get(&id).cloned()
    }

    /// Forgets a visit, cancelling its coordinator.
    pub async fn close(&self, id: Uuid) -> bool {
        let removed = self.visits.lock().await.remove(&id);
        match removed {
            Some(visit) => {
                visit.coordinator.cancel();
                tracing::info!(visit_id = %id, "visit closed");
                true
            }
            None => false,
        }
    }

    /// Cancels and forgets every visit older than the TTL. Returns how many
    /// were removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut visits = self.visits.lock().await;
        let before = visits.len();
        visits.retain(|_, visit| {
            let keep = visit.opened_at.elapsed() < self.ttl;
            if !keep {
                visit.coordinator.cancel();
            }
            keep
        });
        before - visits.len()
    }

    pub async fn open_count(&self) -> usize {
        self.visits.lock().await.len()
    }
}
