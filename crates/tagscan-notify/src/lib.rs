//! Scan notification pipeline: acquire a position, record the scan, notify
//! the owner.

pub mod coordinator;
pub mod error;
pub mod geolocation;
pub mod recorder;
pub mod webhook;

pub use coordinator::{
    Collaborators, CoordinatorSettings, CoordinatorSnapshot, ScanCoordinator, ScanPhase,
    Settlement,
};
pub use error::{DispatchError, GeoError, RecordError};
pub use geolocation::{
    acquire_within, FixedGeolocation, GeolocationAcquirer, GeolocationReporter,
    ReportedGeolocation,
};
pub use recorder::{DispatchData, RecordedScan, RpcScanRecorder, ScanRecorder};
pub use webhook::{Ack, HttpWebhookDispatcher, IpInfo, WebhookDispatcher, WebhookLocation, WebhookPayload};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Shortens a remote response body for inclusion in an error.
pub(crate) fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_owned(),
    }
}
