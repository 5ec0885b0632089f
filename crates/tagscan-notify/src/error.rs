use thiserror::Error;

/// Why a position could not be obtained. Never fatal to a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("geolocation is not supported on this device")]
    Unsupported,

    #[error("geolocation permission denied")]
    PermissionDenied,

    #[error("position unavailable")]
    PositionUnavailable,

    #[error("geolocation timed out")]
    Timeout,
}

impl GeoError {
    /// Maps a browser `GeolocationPositionError.code` (1, 2, 3) to a variant.
    ///
    /// Unknown codes are treated as [`GeoError::PositionUnavailable`].
    #[must_use]
    pub fn from_platform_code(code: u16) -> Self {
        match code {
            1 => GeoError::PermissionDenied,
            3 => GeoError::Timeout,
            _ => GeoError::PositionUnavailable,
        }
    }
}

/// Errors returned by a scan recorder.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The tag does not resolve to an active tag/pet.
    #[error("tag {tag} is not registered")]
    UnknownTag { tag: String },

    /// Network failure or timeout talking to the backend.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with a non-2xx status.
    #[error("backend rejected the scan with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The procedure ran but reported a failure other than an unknown tag.
    #[error("backend error: {0}")]
    Backend(String),

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid backend URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl RecordError {
    #[must_use]
    pub fn is_unknown_tag(&self) -> bool {
        matches!(self, RecordError::UnknownTag { .. })
    }
}

impl From<reqwest::Error> for RecordError {
    fn from(err: reqwest::Error) -> Self {
        RecordError::Unreachable(err.to_string())
    }
}

/// Errors returned by a webhook dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("webhook unreachable: {0}")]
    Unreachable(String),

    #[error("webhook rejected the payload with HTTP {status}: {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("webhook did not respond in time")]
    NoResponse,

    #[error("invalid webhook URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::NoResponse
        } else {
            DispatchError::Unreachable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_codes_map_to_geo_errors() {
        assert_eq!(GeoError::from_platform_code(1), GeoError::PermissionDenied);
        assert_eq!(
            GeoError::from_platform_code(2),
            GeoError::PositionUnavailable
        );
        assert_eq!(GeoError::from_platform_code(3), GeoError::Timeout);
        assert_eq!(
            GeoError::from_platform_code(42),
            GeoError::PositionUnavailable
        );
    }

    #[test]
    fn unknown_tag_is_distinguished_from_transport_failures() {
        assert!(RecordError::UnknownTag {
            tag: "X".to_owned()
        }
        .is_unknown_tag());
        assert!(!RecordError::Unreachable("refused".to_owned()).is_unknown_tag());
    }
}
