//! Position acquisition with a bounded wait.
//!
//! Platform location APIs are callback-based and cannot be aborted. Here an
//! acquirer is an awaitable, and [`acquire_within`] races it against a timer:
//! when the timer wins the acquisition future is dropped and any late answer
//! is ignored.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tagscan_core::Coordinates;
use tokio::sync::oneshot;

use crate::error::GeoError;

/// Source of the finder's position.
#[async_trait]
pub trait GeolocationAcquirer: Send + Sync {
    /// Resolve a position. `timeout` is the caller's bound; implementations
    /// may use it as a hint but are raced against it regardless.
    async fn acquire(&self, timeout: Duration) -> Result<Coordinates, GeoError>;
}

/// Awaits `acquirer` for at most `timeout`.
///
/// # Errors
///
/// Returns the acquirer's own [`GeoError`], or [`GeoError::Timeout`] when the
/// bound elapses first.
pub async fn acquire_within(
    acquirer: &dyn GeolocationAcquirer,
    timeout: Duration,
) -> Result<Coordinates, GeoError> {
    match tokio::time::timeout(timeout, acquirer.acquire(timeout)).await {
        Ok(Ok(coords)) if coords.is_valid() => Ok(coords),
        Ok(Ok(coords)) => {
            tracing::warn!(
                latitude = coords.latitude,
                longitude = coords.longitude,
                "discarding out-of-range position"
            );
            Err(GeoError::PositionUnavailable)
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(GeoError::Timeout),
    }
}

/// Resolves immediately with a preset result.
#[derive(Debug, Clone)]
pub struct FixedGeolocation {
    result: Result<Coordinates, GeoError>,
}

impl FixedGeolocation {
    #[must_use]
    pub fn located(coords: Coordinates) -> Self {
        Self { result: Ok(coords) }
    }

    #[must_use]
    pub fn failing(err: GeoError) -> Self {
        Self { result: Err(err) }
    }
}

#[async_trait]
impl GeolocationAcquirer for FixedGeolocation {
    async fn acquire(&self, _timeout: Duration) -> Result<Coordinates, GeoError> {
        self.result
    }
}

type Report = Result<Coordinates, GeoError>;

/// Acquirer fed by a remote device through a [`GeolocationReporter`].
///
/// The position can be consumed once. Any later acquisition resolves
/// [`GeoError::PositionUnavailable`].
#[derive(Debug)]
pub struct ReportedGeolocation {
    rx: Mutex<Option<oneshot::Receiver<Report>>>,
}

/// Sending half paired with a [`ReportedGeolocation`].
#[derive(Debug)]
pub struct GeolocationReporter {
    tx: Mutex<Option<oneshot::Sender<Report>>>,
}

impl ReportedGeolocation {
    /// Creates a connected reporter/acquirer pair.
    #[must_use]
    pub fn channel() -> (GeolocationReporter, ReportedGeolocation) {
        let (tx, rx) = oneshot::channel();
        (
            GeolocationReporter {
                tx: Mutex::new(Some(tx)),
            },
            ReportedGeolocation {
                rx: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl GeolocationAcquirer for ReportedGeolocation {
    async fn acquire(&self, _timeout: Duration) -> Result<Coordinates, GeoError> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(rx) = rx else {
            return Err(GeoError::PositionUnavailable);
        };
        // A dropped reporter means the device went away without answering.
        rx.await.unwrap_or(Err(GeoError::PositionUnavailable))
    }
}

impl GeolocationReporter {
    /// Delivers the device's answer. Returns `false` if an answer was already
    /// delivered or nobody is listening any more.
    pub fn report(&self, result: Result<Coordinates, GeoError>) -> bool {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}
