use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A geographic fix reported by the finder's device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of the 68% confidence circle, in meters, when the platform reports it.
    pub accuracy_meters: Option<f64>,
}

impl Coordinates {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: None,
        }
    }

    #[must_use]
    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }

    /// Returns `true` when both axes are finite and inside WGS84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.accuracy_meters.is_none_or(|a| a.is_finite() && a >= 0.0)
    }

    /// `"lat,lng"` as sent in the webhook's `coordinates_string` field.
    #[must_use]
    pub fn coordinates_string(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }

    #[must_use]
    pub fn maps_link(&self) -> String {
        format!(
            "https://www.google.com/maps?q={},{}",
            self.latitude, self.longitude
        )
    }
}

/// Which entry point produced a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    /// Fired by the page-load debounce timer.
    Automatic,
    /// Fired by the finder pressing "share my location".
    Manual,
}

impl ScanSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ScanSource::Automatic => "automatic",
            ScanSource::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ScanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort client metadata attached to a scan.
///
/// Keys are free-form; the well-known ones are exposed as constants so the
/// host and the webhook payload builder agree on spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceInfo(BTreeMap<String, String>);

impl DeviceInfo {
    pub const USER_AGENT: &'static str = "user_agent";
    pub const PLATFORM: &'static str = "platform";
    pub const LANGUAGE: &'static str = "language";
    pub const IP: &'static str = "ip";
    pub const SCAN_TYPE: &'static str = "scan_type";
    pub const TIMESTAMP: &'static str = "timestamp";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Blank values are skipped.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts `value` under `key` unless it is blank after trimming.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            self.0.insert(key.to_owned(), trimmed.to_owned());
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Copy of this metadata tagged with the scan source and recording time.
    #[must_use]
    pub fn stamped(&self, source: ScanSource, at: DateTime<Utc>) -> Self {
        self.clone()
            .with(Self::SCAN_TYPE, source.as_str())
            .with(Self::TIMESTAMP, at.to_rfc3339())
    }
}

/// One visit-triggered or manual scan, handed to the recorder exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEvent {
    pub tag_identifier: String,
    pub coordinates: Option<Coordinates>,
    pub device_info: DeviceInfo,
    pub finder_message: Option<String>,
    pub source: ScanSource,
    pub created_at: DateTime<Utc>,
}

impl ScanEvent {
    /// Builds an event stamped with the current time.
    ///
    /// Blank finder messages are dropped; `device_info` gains the
    /// `scan_type` and `timestamp` keys.
    #[must_use]
    pub fn new(
        tag_identifier: &str,
        coordinates: Option<Coordinates>,
        device_info: &DeviceInfo,
        finder_message: Option<String>,
        source: ScanSource,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            tag_identifier: tag_identifier.to_owned(),
            coordinates,
            device_info: device_info.stamped(source, created_at),
            finder_message: finder_message.filter(|m| !m.trim().is_empty()),
            source,
            created_at,
        }
    }

    #[must_use]
    pub fn has_location(&self) -> bool {
        self.coordinates.is_some()
    }
}
