//! Scan persistence through the backend's `record_tag_scan` procedure.
//!
//! One RPC stores the scan, resolves the tag to its pet and owner, and returns
//! everything the webhook needs, so no second lookup round trip is made.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tagscan_core::{DeviceInfo, ScanEvent};

use crate::error::RecordError;
use crate::truncate_body;

/// Error codes the procedure uses for a tag that cannot be notified about.
const UNKNOWN_TAG_CODES: &[&str] = &["tag_not_found", "tag_inactive", "pet_not_found"];

/// Owner-facing data needed by the webhook dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchData {
    pub pet_name: String,
    pub owner_whatsapp: String,
    pub maps_link: Option<String>,
}

/// Result of a successful recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedScan {
    pub scan_id: String,
    pub tag_identifier: String,
    /// `None` when the owner has no contact handle on file.
    pub dispatch: Option<DispatchData>,
}

/// Persists scan events.
///
/// Implementations perform a single remote call per invocation and never
/// retry; the caller guarantees each event is recorded at most once.
#[async_trait]
pub trait ScanRecorder: Send + Sync {
    async fn record(&self, event: &ScanEvent) -> Result<RecordedScan, RecordError>;
}

/// HTTP client for the backend's REST RPC endpoint.
pub struct RpcScanRecorder {
    client: Client,
    rpc_url: Url,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct RecordScanParams<'a> {
    p_tag_identifier: &'a str,
    p_latitude: Option<f64>,
    p_longitude: Option<f64>,
    p_accuracy: Option<f64>,
    p_device_info: &'a DeviceInfo,
    p_finder_message: Option<&'a str>,
    p_scanned_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RecordScanResponse {
    #[serde(default)]
    success: bool,
    scan_id: Option<serde_json::Value>,
    pet_name: Option<String>,
    owner_whatsapp: Option<String>,
    google_maps_link: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

impl<'a> RecordScanParams<'a> {
    fn from_event(event: &'a ScanEvent) -> Self {
        Self {
            p_tag_identifier: &event.tag_identifier,
            p_latitude: event.coordinates.map(|c| c.latitude),
            p_longitude: event.coordinates.map(|c| c.longitude),
            p_accuracy: event.coordinates.and_then(|c| c.accuracy_meters),
            p_device_info: &event.device_info,
            p_finder_message: event.finder_message.as_deref(),
            p_scanned_at: event.created_at,
        }
    }
}

impl RecordScanResponse {
    fn into_recorded(self, event: &ScanEvent) -> Result<RecordedScan, RecordError> {
        if !self.success {
            let code = self.error.unwrap_or_default();
            if UNKNOWN_TAG_CODES.contains(&code.as_str()) {
                return Err(RecordError::UnknownTag {
                    tag: event.tag_identifier.clone(),
                });
            }
            let detail = self.message.unwrap_or(code);
            return Err(RecordError::Backend(if detail.is_empty() {
                "procedure reported failure without detail".to_owned()
            } else {
                detail
            }));
        }

        let scan_id = match self.scan_id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(RecordError::Backend("response is missing scan_id".to_owned())),
        };

        let dispatch = self
            .owner_whatsapp
            .filter(|phone| !phone.trim().is_empty())
            .map(|owner_whatsapp| DispatchData {
                pet_name: self
                    .pet_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "your pet".to_owned()),
                owner_whatsapp,
                maps_link: self
                    .google_maps_link
                    .filter(|l| !l.is_empty())
                    .or_else(|| event.coordinates.map(|c| c.maps_link())),
            });

        Ok(RecordedScan {
            scan_id,
            tag_identifier: event.tag_identifier.clone(),
            dispatch,
        })
    }
}

impl RpcScanRecorder {
    /// Creates a recorder calling `{backend_url}/rest/v1/rpc/{function}`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::InvalidUrl`] if the URL cannot be built, or
    /// [`RecordError::Unreachable`] if the `reqwest::Client` cannot be
    /// constructed.
    pub fn new(
        backend_url: &str,
        api_key: &str,
        function: &str,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, RecordError> {
        let raw = format!(
            "{}/rest/v1/rpc/{}",
            backend_url.trim_end_matches('/'),
            function.trim_matches('/')
        );
        let rpc_url = Url::parse(&raw).map_err(|e| RecordError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            rpc_url,
            api_key: api_key.to_owned(),
        })
    }

    #[must_use]
    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }
}

#[async_trait]
impl ScanRecorder for RpcScanRecorder {
    async fn record(&self, event: &ScanEvent) -> Result<RecordedScan, RecordError> {
        let params = RecordScanParams::from_event(event);
        tracing::debug!(
            tag = %event.tag_identifier,
            has_location = event.has_location(),
            source = %event.source,
            "calling record-scan procedure"
        );

        let response = self
            .client
            .post(self.rpc_url.clone())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RecordError::Rejected {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        // Set-returning procedures answer with a one-element array, or an
        // empty one when the tag matched no row.
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| RecordError::Deserialize {
                context: format!("record scan for tag {}", event.tag_identifier),
                source: e,
            })?;
        let value = match value {
            serde_json::Value::Array(rows) if rows.is_empty() => {
                return Err(RecordError::UnknownTag {
                    tag: event.tag_identifier.clone(),
                });
            }
            serde_json::Value::Array(mut rows) => rows.swap_remove(0),
            other => other,
        };
        let parsed: RecordScanResponse =
            serde_json::from_value(value).map_err(|e| RecordError::Deserialize {
                context: format!("record scan for tag {}", event.tag_identifier),
                source: e,
            })?;

        let recorded = parsed.into_recorded(event)?;
        tracing::info!(
            tag = %recorded.tag_identifier,
            scan_id = %recorded.scan_id,
            has_contact = recorded.dispatch.is_some(),
            "scan recorded"
        );
        Ok(recorded)
    }
}
