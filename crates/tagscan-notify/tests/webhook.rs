//! Integration tests for `HttpWebhookDispatcher::dispatch` against a local
//! `wiremock` receiver.

use std::net::TcpListener;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tagscan_core::{Coordinates, DeviceInfo, ScanEvent, ScanSource};
use tagscan_notify::{
    DispatchData, DispatchError, HttpWebhookDispatcher, RecordedScan, WebhookDispatcher,
    WebhookPayload,
};

fn payload() -> WebhookPayload {
    let event = ScanEvent::new(
        "TAG-1",
        Some(Coordinates::new(40.0, -3.0)),
        &DeviceInfo::new().with(DeviceInfo::PLATFORM, "iPhone"),
        None,
        ScanSource::Manual,
    );
    let dispatch = DispatchData {
        pet_name: "Luna".to_owned(),
        owner_whatsapp: "+34600000000".to_owned(),
        maps_link: None,
    };
    let recorded = RecordedScan {
        scan_id: "scan-1".to_owned(),
        tag_identifier: "TAG-1".to_owned(),
        dispatch: Some(dispatch.clone()),
    };
    let utc = FixedOffset::east_opt(0).expect("zero offset");
    WebhookPayload::build(&event, &recorded, &dispatch, utc, Utc::now())
}

fn dispatcher(url: &str, timeout: Duration) -> HttpWebhookDispatcher {
    HttpWebhookDispatcher::new(url, timeout, "tagscan-test/0.1")
        .expect("failed to build test dispatcher")
}

#[tokio::test]
async fn dispatch_posts_payload_and_returns_ack() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/scan"))
        .and(body_partial_json(json!({
            "tag_identifier": "TAG-1",
            "pet_name": "Luna",
            "scan_id": "scan-1",
            "location": { "coordinates_string": "40,-3" },
            "ip_info": { "platform": "iPhone", "scan_type": "manual" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/hooks/scan", server.uri());
    let ack = dispatcher(&url, Duration::from_secs(5))
        .dispatch(&payload())
        .await
        .expect("dispatch should succeed");

    assert_eq!(ack.status, 200);
}

#[tokio::test]
async fn dispatch_maps_non_2xx_to_remote_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("relay down"))
        .expect(1)
        .mount(&server)
        .await;

    let err = dispatcher(&server.uri(), Duration::from_secs(5))
        .dispatch(&payload())
        .await
        .expect_err("500 should fail");

    assert!(
        matches!(err, DispatchError::RemoteRejected { status: 500, ref body } if body == "relay down"),
        "expected RemoteRejected(500), got: {err:?}"
    );
}

#[tokio::test]
async fn dispatch_times_out_as_no_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let err = dispatcher(&server.uri(), Duration::from_millis(200))
        .dispatch(&payload())
        .await
        .expect_err("slow receiver should time out");

    assert!(
        matches!(err, DispatchError::NoResponse),
        "expected NoResponse, got: {err:?}"
    );
}

#[tokio::test]
async fn dispatch_is_attempted_exactly_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let result = dispatcher(&server.uri(), Duration::from_secs(5))
        .dispatch(&payload())
        .await;

    assert!(result.is_err());
    server.verify().await;
}

#[tokio::test]
async fn dispatch_reports_unreachable_relay() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let err = dispatcher(&format!("http://{addr}/notify"), Duration::from_secs(5))
        .dispatch(&payload())
        .await
        .expect_err("closed port should fail");

    assert!(
        matches!(err, DispatchError::Unreachable(_)),
        "expected Unreachable, got: {err:?}"
    );
}
