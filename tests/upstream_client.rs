//! Upstream client behavior against a mock pipeline stage.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use usage_resilience::config::{RetryConfig, UpstreamConfig};
use usage_resilience::http::{UpstreamCall, UpstreamClient, UpstreamError};
use usage_resilience::resilience::{Retry, Throttle};

mod common;

fn client_for(addr: std::net::SocketAddr, retries: u32) -> UpstreamClient {
    let config = UpstreamConfig {
        base_url: format!("http://{}", addr),
        ..UpstreamConfig::default()
    };
    let retry = Retry::new(RetryConfig {
        retries,
        min_delay_ms: 5,
        max_delay_ms: 20,
        factor: 2.0,
        randomize: false,
    });
    UpstreamClient::new(&config, Throttle::new("upstream", 2), retry).unwrap()
}

#[tokio::test]
async fn test_retry_on_failure() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            let count = cc.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                (503, "{\"error\":\"warming up\"}".into())
            } else {
                (200, "{\"accepted\":true}".into())
            }
        }
    })
    .await;

    let client = client_for(addr, 3);
    let reply = client
        .post_json(UpstreamCall::post("/usage", serde_json::json!({ "tenant": "acme" })))
        .await
        .expect("should eventually succeed after retries");

    assert_eq!(reply, serde_json::json!({ "accepted": true }));
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
    assert_eq!(client.throttle().running(), 0);
}

#[tokio::test]
async fn test_exhausted_retries_report_first_failure() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            let count = cc.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                (503, "{}".into())
            } else {
                (500, "{}".into())
            }
        }
    })
    .await;

    let client = client_for(addr, 2);
    let err = client
        .get_json(UpstreamCall::get("/usage/acme").with_request_id("req-42"))
        .await
        .unwrap_err();

    assert_eq!(call_count.load(Ordering::SeqCst), 3);
    match err {
        UpstreamError::Status { status, .. } => assert_eq!(status.as_u16(), 503),
        other => panic!("unexpected error: {}", other),
    }
}
