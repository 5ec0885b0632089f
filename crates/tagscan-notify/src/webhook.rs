//! Owner notification through an external webhook relay.
//!
//! The payload carries raw data only. The receiving service owns the
//! WhatsApp message template, so wording changes never need a redeploy here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::{Client, Url};
use serde::Serialize;
use tagscan_core::{DeviceInfo, ScanEvent};

use crate::error::DispatchError;
use crate::recorder::{DispatchData, RecordedScan};
use crate::truncate_body;

const FORMATTED_TIME: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub google_maps_link: Option<String>,
    pub coordinates_string: Option<String>,
}

/// Best-effort descriptors of the finder's device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub scan_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub tag_identifier: String,
    pub pet_name: String,
    pub owner_whatsapp: String,
    pub scan_timestamp: DateTime<Utc>,
    pub formatted_time: String,
    pub location: WebhookLocation,
    pub ip_info: IpInfo,
    pub scan_id: String,
    pub finder_message: Option<String>,
    pub webhook_timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    /// Assembles the payload for a recorded scan.
    ///
    /// `display_offset` controls `formatted_time`; `now` becomes
    /// `webhook_timestamp`.
    #[must_use]
    pub fn build(
        event: &ScanEvent,
        recorded: &RecordedScan,
        dispatch: &DispatchData,
        display_offset: FixedOffset,
        now: DateTime<Utc>,
    ) -> Self {
        let location = WebhookLocation {
            latitude: event.coordinates.map(|c| c.latitude),
            longitude: event.coordinates.map(|c| c.longitude),
            accuracy: event.coordinates.and_then(|c| c.accuracy_meters),
            google_maps_link: dispatch
                .maps_link
                .clone()
                .or_else(|| event.coordinates.map(|c| c.maps_link())),
            coordinates_string: event.coordinates.map(|c| c.coordinates_string()),
        };

        let device = &event.device_info;
        let ip_info = IpInfo {
            ip: device.get(DeviceInfo::IP).map(str::to_owned),
            user_agent: device.get(DeviceInfo::USER_AGENT).map(str::to_owned),
            platform: device.get(DeviceInfo::PLATFORM).map(str::to_owned),
            language: device.get(DeviceInfo::LANGUAGE).map(str::to_owned),
            scan_type: event.source.as_str().to_owned(),
        };

        Self {
            tag_identifier: event.tag_identifier.clone(),
            pet_name: dispatch.pet_name.clone(),
            owner_whatsapp: dispatch.owner_whatsapp.clone(),
            scan_timestamp: event.created_at,
            formatted_time: event
                .created_at
                .with_timezone(&display_offset)
                .format(FORMATTED_TIME)
                .to_string(),
            location,
            ip_info,
            scan_id: recorded.scan_id.clone(),
            finder_message: event.finder_message.clone(),
            webhook_timestamp: now,
        }
    }
}

/// Acknowledgment from the webhook receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
}

/// Delivers payloads to the owner-notification relay. One attempt per call.
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    async fn dispatch(&self, payload: &WebhookPayload) -> Result<Ack, DispatchError>;
}

/// `reqwest`-backed dispatcher posting JSON to a fixed URL.
pub struct HttpWebhookDispatcher {
    client: Client,
    url: Url,
}

impl HttpWebhookDispatcher {
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidUrl`] if `url` does not parse, or
    /// [`DispatchError::Unreachable`] if the `reqwest::Client` cannot be
    /// constructed.
    pub fn new(url: &str, timeout: Duration, user_agent: &str) -> Result<Self, DispatchError> {
        let url = Url::parse(url).map_err(|e| DispatchError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    async fn dispatch(&self, payload: &WebhookPayload) -> Result<Ack, DispatchError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                scan_id = %payload.scan_id,
                status = status.as_u16(),
                "webhook rejected scan notification"
            );
            return Err(DispatchError::RemoteRejected {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        tracing::info!(
            scan_id = %payload.scan_id,
            status = status.as_u16(),
            "webhook acknowledged scan notification"
        );
        Ok(Ack {
            status: status.as_u16(),
        })
    }
}
