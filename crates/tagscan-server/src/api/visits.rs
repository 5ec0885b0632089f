//! Visit handlers: the tag page's view of one scan coordinator.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Extension, Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tagscan_core::{Coordinates, DeviceInfo, NotificationOutcome, ScanSource};
use tagscan_notify::GeoError;
use uuid::Uuid;

use crate::middleware::RequestId;
use crate::visits::Visit;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

const MAX_TAG_LEN: usize = 64;
const MAX_FINDER_MESSAGE_LEN: usize = 500;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(super) struct OpenVisitRequest {
    pub platform: Option<String>,
}

/// The browser's geolocation callback, success or error.
#[derive(Debug, Default, Deserialize)]
pub(super) struct PositionReport {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    /// `GeolocationPositionError.code`.
    pub error_code: Option<u16>,
    #[serde(default)]
    pub unsupported: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ShareLocationRequest {
    #[serde(flatten)]
    pub position: PositionReport,
    pub finder_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct VisitView {
    visit_id: Uuid,
    tag: String,
    phase: &'static str,
    source: Option<ScanSource>,
    outcome: Option<NotificationOutcome>,
    can_share_location: bool,
    recording_attempted: bool,
    scan_id: Option<String>,
    contact_link: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct PositionAccepted {
    accepted: bool,
}

impl VisitView {
    fn of(visit: &Visit) -> Self {
        let snapshot = visit.coordinator.snapshot();
        Self {
            visit_id: visit.id,
            tag: visit.coordinator.tag().to_owned(),
            phase: snapshot.phase.as_str(),
            source: snapshot.source,
            contact_link: Visit::contact_link(&snapshot),
            scan_id: snapshot.recorded.as_ref().map(|r| r.scan_id.clone()),
            outcome: snapshot.outcome,
            can_share_location: visit.coordinator.can_trigger_manual(),
            recording_attempted: visit.coordinator.recording_attempted(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_tag(req_id: &str, raw: &str) -> Result<String, ApiError> {
    let tag = raw.trim();
    let valid = !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(tag.to_owned())
    } else {
        Err(ApiError::new(
            req_id,
            "validation_error",
            format!("tag must be 1-{MAX_TAG_LEN} characters of letters, digits, '-' or '_'"),
        ))
    }
}

fn parse_visit_id(req_id: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::new(req_id, "bad_request", format!("invalid visit id '{raw}'")))
}

/// Parses an optional JSON body; an empty body yields the default.
fn parse_optional_body<T: DeserializeOwned + Default>(
    req_id: &str,
    body: &Bytes,
) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError::new(req_id, "bad_request", format!("invalid JSON body: {e}"))
    })
}

async fn resolve_visit(
    state: &AppState,
    req_id: &str,
    raw_id: &str,
) -> Result<std::sync::Arc<Visit>, ApiError> {
    let id = parse_visit_id(req_id, raw_id)?;
    state
        .visits
        .get(id)
        .await
        .ok_or_else(|| ApiError::new(req_id, "not_found", format!("visit {id} not found")))
}

impl PositionReport {
    fn is_empty(&self) -> bool {
        self.latitude.is_none()
            && self.longitude.is_none()
            && self.error_code.is_none()
            && !self.unsupported
    }

    fn into_result(self, req_id: &str) -> Result<Result<Coordinates, GeoError>, ApiError> {
        if self.unsupported {
            return Ok(Err(GeoError::Unsupported));
        }
        if let Some(code) = self.error_code {
            return Ok(Err(GeoError::from_platform_code(code)));
        }
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => {
                let mut coords = Coordinates::new(latitude, longitude);
                coords.accuracy_meters = self.accuracy;
                if coords.is_valid() {
                    Ok(Ok(coords))
                } else {
                    Err(ApiError::new(
                        req_id,
                        "validation_error",
                        "latitude/longitude out of range",
                    ))
                }
            }
            _ => Err(ApiError::new(
                req_id,
                "validation_error",
                "provide latitude and longitude, error_code, or unsupported",
            )),
        }
    }
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn device_info_from(headers: &HeaderMap, platform: Option<String>) -> DeviceInfo {
    let mut info = DeviceInfo::new();
    if let Some(ua) = header_text(headers, header::USER_AGENT.as_str()) {
        info.insert(DeviceInfo::USER_AGENT, ua);
    }
    if let Some(lang) = header_text(headers, header::ACCEPT_LANGUAGE.as_str()) {
        let primary = lang.split([',', ';']).next().unwrap_or_default();
        info.insert(DeviceInfo::LANGUAGE, primary);
    }
    if let Some(forwarded) = header_text(headers, "x-forwarded-for") {
        let client = forwarded.split(',').next().unwrap_or_default();
        info.insert(DeviceInfo::IP, client);
    }
    if let Some(platform) = platform {
        info.insert(DeviceInfo::PLATFORM, platform);
    }
    info
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/tags/:tag/visits: open a visit and start the automatic path.
pub(super) async fn open_visit(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(tag): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<VisitView>>), ApiError> {
    let rid = &req_id.0;
    let tag = validate_tag(rid, &tag)?;
    let request: OpenVisitRequest = parse_optional_body(rid, &body)?;

    let visit = state
        .visits
        .open(&tag, device_info_from(&headers, request.platform))
        .await;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: VisitView::of(&visit),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

/// GET /api/v1/visits/:visit_id: current snapshot.
pub(super) async fn get_visit(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(visit_id): Path<String>,
) -> Result<Json<ApiResponse<VisitView>>, ApiError> {
    let visit = resolve_visit(&state, &req_id.0, &visit_id).await?;
    Ok(Json(ApiResponse {
        data: VisitView::of(&visit),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// POST /api/v1/visits/:visit_id/position: deliver the geolocation callback.
pub(super) async fn report_position(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(visit_id): Path<String>,
    body: Bytes,
) -> Result<Json<ApiResponse<PositionAccepted>>, ApiError> {
    let rid = &req_id.0;
    let visit = resolve_visit(&state, rid, &visit_id).await?;
    let report: PositionReport = parse_optional_body(rid, &body)?;
    let result = report.into_result(rid)?;

    let accepted = visit.reporter.report(result);
    tracing::debug!(visit_id = %visit.id, accepted, "position reported");

    Ok(Json(ApiResponse {
        data: PositionAccepted { accepted },
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// POST /api/v1/visits/:visit_id/share-location: the manual path.
///
/// Answers 409 when a notification was already attempted for this visit.
pub(super) async fn share_location(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(visit_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<VisitView>>), ApiError> {
    let rid = &req_id.0;
    let visit = resolve_visit(&state, rid, &visit_id).await?;
    let request: ShareLocationRequest = parse_optional_body(rid, &body)?;

    if let Some(message) = &request.finder_message {
        if message.chars().count() > MAX_FINDER_MESSAGE_LEN {
            return Err(ApiError::new(
                rid,
                "validation_error",
                format!("finder_message must be at most {MAX_FINDER_MESSAGE_LEN} characters"),
            ));
        }
    }
    let position = if request.position.is_empty() {
        None
    } else {
        Some(request.position.into_result(rid)?)
    };

    if !visit.coordinator.trigger_manual(request.finder_message) {
        return Err(ApiError::new(
            rid,
            "conflict",
            "a notification was already attempted for this visit",
        ));
    }
    if let Some(position) = position {
        visit.reporter.report(position);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: VisitView::of(&visit),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

/// DELETE /api/v1/visits/:visit_id: the page was closed.
pub(super) async fn close_visit(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(visit_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let rid = &req_id.0;
    let id = parse_visit_id(rid, &visit_id)?;
    if !state.visits.close(id).await {
        return Err(ApiError::new(rid, "not_found", format!("visit {id} not found")));
    }

    Ok(Json(ApiResponse {
        data: serde_json::json!({ "closed": true }),
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn device_info_is_taken_from_request_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("es-ES,es;q=0.9"),
        );
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        let info = device_info_from(&headers, Some("iPhone".to_owned()));
        assert_eq!(info.get(DeviceInfo::USER_AGENT), Some("Mozilla/5.0"));
        assert_eq!(info.get(DeviceInfo::LANGUAGE), Some("es-ES"));
        assert_eq!(info.get(DeviceInfo::IP), Some("203.0.113.7"));
        assert_eq!(info.get(DeviceInfo::PLATFORM), Some("iPhone"));
    }

    #[test]
    fn position_report_maps_browser_errors() {
        let report = PositionReport {
            error_code: Some(1),
            ..PositionReport::default()
        };
        assert_eq!(
            report.into_result("r").expect("valid report"),
            Err(GeoError::PermissionDenied)
        );

        let unsupported = PositionReport {
            unsupported: true,
            ..PositionReport::default()
        };
        assert_eq!(
            unsupported.into_result("r").expect("valid report"),
            Err(GeoError::Unsupported)
        );
    }

    #[test]
    fn position_report_rejects_out_of_range_coordinates() {
        let report = PositionReport {
            latitude: Some(123.0),
            longitude: Some(0.0),
            ..PositionReport::default()
        };
        assert!(report.into_result("r").is_err());
    }

    #[test]
    fn tags_are_validated() {
        assert_eq!(validate_tag("r", " TAG-1 ").expect("valid"), "TAG-1");
        assert!(validate_tag("r", "").is_err());
        assert!(validate_tag("r", "tag with spaces").is_err());
        assert!(validate_tag("r", &"x".repeat(65)).is_err());
    }
}
