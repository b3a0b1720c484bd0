//! Correlating client tests against a running server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use ssr_gateway::bus::{ClientError, InMemoryBus, RenderClient, RequestEnvelope, RequestOptions};
use ssr_gateway::config::ServerConfig;
use ssr_gateway::render::PageRenderer;
use ssr_gateway::Server;

mod common;

async fn setup(
    config: ServerConfig,
    engine: Arc<dyn PageRenderer>,
) -> (Arc<Server>, RenderClient) {
    let bus = Arc::new(InMemoryBus::new());
    let client = RenderClient::from_config(bus.clone(), &config)
        .await
        .unwrap()
        .with_timeout(Duration::from_secs(5));
    let server = common::start_server(config, engine, bus).await;
    (server, client)
}

#[tokio::test]
async fn test_request_receives_correlated_response() {
    let (server, client) = setup(common::test_config(), common::renderer()).await;

    let options = RequestOptions {
        body: Some(json!({ "name": "team" })),
        ..Default::default()
    };
    let response = client.request("/about", options).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.markup, "<h1>About team</h1>");
    assert_eq!(response.state.unwrap()["data"]["name"], json!("team"));
    assert_eq!(client.pending(), 0);

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_resolve_out_of_order() {
    let mut config = common::test_config();
    config.bridge.workers = 4;
    let (server, client) = setup(config, common::SlowRenderer::new(Duration::ZERO)).await;

    let slow = RequestOptions {
        body: Some(json!({ "delay_ms": 300, "name": "slow" })),
        ..Default::default()
    };
    let fast = RequestOptions {
        body: Some(json!({ "delay_ms": 10, "name": "fast" })),
        ..Default::default()
    };

    let (slow, fast) = tokio::join!(client.request("/about", slow), async {
        // Published second, answered first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let response = client.request("/about", fast).await;
        (response, client.pending())
    });

    let (fast, pending_after_fast) = fast;
    assert_eq!(fast.unwrap().markup, "<h1>About fast</h1>");
    assert_eq!(pending_after_fast, 1);
    assert_eq!(slow.unwrap().markup, "<h1>About slow</h1>");
    assert_eq!(client.pending(), 0);

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_times_out_when_bridge_disabled() {
    let mut config = common::test_config();
    config.bridge.enabled = false;
    let (server, client) = setup(config, common::renderer()).await;

    let options = RequestOptions {
        timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let err = client.request("/", options).await.unwrap_err();

    assert!(matches!(err, ClientError::Timeout(t) if t == Duration::from_millis(100)));
    assert_eq!(client.pending(), 0);

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_render_failure_surfaces_as_error() {
    let (server, client) = setup(common::test_config(), common::renderer()).await;

    let options = RequestOptions {
        body: Some(json!(["not", "an", "object"])),
        ..Default::default()
    };
    let err = client.request("/about", options).await.unwrap_err();
    match err {
        ClientError::Render { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "invalid context payload");
        }
        other => panic!("unexpected error: {other}"),
    }

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_caller_chosen_id_is_echoed() {
    let (server, client) = setup(common::test_config(), common::renderer()).await;

    let envelope = RequestEnvelope::new("order-7", "/products/7");
    let response = client.send(envelope, Duration::from_secs(5)).await.unwrap();
    assert_eq!(response.request_id, "order-7");
    assert_eq!(response.markup, "<h1>Product 7</h1>");

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_disconnects_when_bus_closes() {
    let mut config = common::test_config();
    config.bridge.enabled = false;
    let (server, client) = setup(config, common::renderer()).await;

    let request = client.request("/", RequestOptions::default());
    let close = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown(Duration::from_secs(2)).await.unwrap();
    };
    let (result, ()) = tokio::join!(request, close);

    assert!(matches!(result, Err(ClientError::Disconnected)));
}
