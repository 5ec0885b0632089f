//! User-facing notification status derived from a scan run.

use serde::Serialize;

/// How a host should present an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// Why a run ended up where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    /// The recorder has been called and has not answered yet.
    Recording,
    /// The scan is stored and the webhook call is in flight.
    Notifying,
    /// Webhook acknowledged and a location was attached.
    OwnerNotified,
    /// Webhook acknowledged, but no location could be captured.
    NotifiedWithoutLocation,
    /// The scan is stored but the webhook call failed or timed out.
    NotificationUncertain { location_captured: bool },
    /// The scan is stored but the owner has no contact handle on file.
    NoOwnerContact,
    /// The tag does not resolve to an active pet.
    TagUnrecognized,
    /// The backend could not record the scan.
    RecordingFailed,
}

impl OutcomeReason {
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            OutcomeReason::OwnerNotified => Severity::Success,
            OutcomeReason::Recording
            | OutcomeReason::Notifying
            | OutcomeReason::NotifiedWithoutLocation => Severity::Info,
            OutcomeReason::NotificationUncertain { .. } | OutcomeReason::NoOwnerContact => {
                Severity::Warning
            }
            OutcomeReason::TagUnrecognized | OutcomeReason::RecordingFailed => Severity::Error,
        }
    }

    /// Only an acknowledged webhook may claim the owner was told.
    #[must_use]
    pub fn delivered(self) -> bool {
        matches!(
            self,
            OutcomeReason::OwnerNotified | OutcomeReason::NotifiedWithoutLocation
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, OutcomeReason::Recording | OutcomeReason::Notifying)
    }

    /// Default human-readable text for this reason.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            OutcomeReason::Recording => "Recording scan...",
            OutcomeReason::Notifying => "Scan recorded, notifying the owner...",
            OutcomeReason::OwnerNotified => {
                "Scan recorded and owner notified with your location."
            }
            OutcomeReason::NotifiedWithoutLocation => {
                "Owner notified. Your location could not be shared."
            }
            OutcomeReason::NotificationUncertain {
                location_captured: true,
            } => "Scan recorded with your location, but the owner notification could not be confirmed.",
            OutcomeReason::NotificationUncertain {
                location_captured: false,
            } => "Scan recorded, but the owner notification could not be confirmed.",
            OutcomeReason::NoOwnerContact => {
                "Scan recorded, but the owner has no contact number on file."
            }
            OutcomeReason::TagUnrecognized => "This tag isn't registered to any pet.",
            OutcomeReason::RecordingFailed => "Notification failed, please try again.",
        }
    }
}

/// Status projection handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationOutcome {
    pub delivered: bool,
    pub message: String,
    pub is_terminal: bool,
    pub reason: OutcomeReason,
    pub severity: Severity,
}

impl NotificationOutcome {
    #[must_use]
    pub fn from_reason(reason: OutcomeReason) -> Self {
        Self {
            delivered: reason.delivered(),
            message: reason.message().to_owned(),
            is_terminal: reason.is_terminal(),
            reason,
            severity: reason.severity(),
        }
    }
}

impl From<OutcomeReason> for NotificationOutcome {
    fn from(reason: OutcomeReason) -> Self {
        Self::from_reason(reason)
    }
}
