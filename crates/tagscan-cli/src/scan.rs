//! The `scan` command: one coordinator visit driven from the terminal.
//!
//! The position is supplied on the command line instead of a browser, so the
//! acquirer is always a [`FixedGeolocation`].

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use tagscan_core::{AppConfig, Coordinates, DeviceInfo};
use tagscan_notify::{
    Collaborators, CoordinatorSettings, CoordinatorSnapshot, FixedGeolocation, GeoError,
    HttpWebhookDispatcher, RpcScanRecorder, ScanCoordinator,
};

/// Slack added on top of the summed collaborator timeouts.
const SETTLE_SLACK: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum GeoErrorArg {
    Denied,
    Unavailable,
    Timeout,
    Unsupported,
}

impl From<GeoErrorArg> for GeoError {
    fn from(arg: GeoErrorArg) -> Self {
        match arg {
            GeoErrorArg::Denied => GeoError::PermissionDenied,
            GeoErrorArg::Unavailable => GeoError::PositionUnavailable,
            GeoErrorArg::Timeout => GeoError::Timeout,
            GeoErrorArg::Unsupported => GeoError::Unsupported,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Args)]
pub(crate) struct ScanArgs {
    /// Tag identifier printed on the collar
    #[arg(long)]
    pub tag: String,
    #[arg(long, requires = "lng", allow_negative_numbers = true)]
    pub lat: Option<f64>,
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lng: Option<f64>,
    /// Accuracy radius in meters
    #[arg(long, requires = "lat")]
    pub accuracy: Option<f64>,
    /// Simulate a geolocation failure instead of a position
    #[arg(long, value_enum, conflicts_with = "lat")]
    pub geo_error: Option<GeoErrorArg>,
    /// Take the "share my location" path instead of the automatic one
    #[arg(long)]
    pub manual: bool,
    /// Message from the finder (manual path only)
    #[arg(long, requires = "manual")]
    pub message: Option<String>,
    #[arg(long)]
    pub platform: Option<String>,
}

impl ScanArgs {
    fn geolocation(&self) -> FixedGeolocation {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => {
                let mut coords = Coordinates::new(lat, lng);
                coords.accuracy_meters = self.accuracy;
                FixedGeolocation::located(coords)
            }
            _ => FixedGeolocation::failing(self.geo_error.map_or(GeoError::Unsupported, Into::into)),
        }
    }

    fn device_info(&self, user_agent: &str) -> DeviceInfo {
        let mut info = DeviceInfo::new().with(DeviceInfo::USER_AGENT, user_agent);
        if let Some(platform) = &self.platform {
            info.insert(DeviceInfo::PLATFORM, platform.as_str());
        }
        info
    }
}

/// Upper bound on how long a run may take before it must have settled.
fn settle_bound(settings: &CoordinatorSettings, config: &AppConfig) -> Duration {
    settings.debounce
        + settings.geo_timeout.max(settings.manual_geo_timeout)
        + Duration::from_millis(config.recorder_timeout_ms)
        + Duration::from_millis(config.webhook_timeout_ms)
        + SETTLE_SLACK
}

/// Runs one visit against the configured backend and webhook.
///
/// # Errors
///
/// Returns an error if the HTTP clients cannot be built, the manual path
/// cannot be claimed, or the run does not settle in time.
pub(crate) async fn run_scan(
    config: &AppConfig,
    args: &ScanArgs,
) -> anyhow::Result<CoordinatorSnapshot> {
    let recorder = RpcScanRecorder::new(
        &config.backend_url,
        &config.backend_api_key,
        &config.record_scan_rpc,
        Duration::from_millis(config.recorder_timeout_ms),
        &config.http_user_agent,
    )?;
    let dispatcher = HttpWebhookDispatcher::new(
        &config.webhook_url,
        Duration::from_millis(config.webhook_timeout_ms),
        &config.http_user_agent,
    )?;

    let settings = CoordinatorSettings::from_app_config(config);
    let bound = settle_bound(&settings, config);
    let coordinator = ScanCoordinator::new(
        args.tag.as_str(),
        args.device_info(&config.http_user_agent),
        settings,
        Collaborators {
            geolocation: Arc::new(args.geolocation()),
            recorder: Arc::new(recorder),
            dispatcher: Arc::new(dispatcher),
        },
    );

    coordinator.mount();
    if args.manual && !coordinator.trigger_manual(args.message.clone()) {
        anyhow::bail!("manual notification could not be started");
    }
    tracing::debug!(tag = %args.tag, manual = args.manual, "scan started");

    tokio::time::timeout(bound, coordinator.settled())
        .await
        .map_err(|_| anyhow::anyhow!("scan did not settle within {}s", bound.as_secs()))
}

/// Human-readable summary of a settled run.
pub(crate) fn render_snapshot(snapshot: &CoordinatorSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "phase:    {}", snapshot.phase);
    if let Some(outcome) = &snapshot.outcome {
        let _ = writeln!(out, "severity: {:?}", outcome.severity);
        let _ = writeln!(out, "message:  {}", outcome.message);
        let _ = writeln!(out, "notified: {}", outcome.delivered);
    }
    if let Some(recorded) = &snapshot.recorded {
        let _ = writeln!(out, "scan id:  {}", recorded.scan_id);
        if let Some(dispatch) = &recorded.dispatch {
            let _ = writeln!(out, "pet:      {}", dispatch.pet_name);
            if let Some(link) = &dispatch.maps_link {
                let _ = writeln!(out, "maps:     {link}");
            }
        }
    }
    out
}
