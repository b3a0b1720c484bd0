//! Management CLI against a live server.

use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use ssr_gateway::bus::InMemoryBus;
use ssr_gateway::Server;
use tokio::process::Command;

mod common;

async fn start() -> Arc<Server> {
    common::start_server(
        common::test_config(),
        common::renderer(),
        Arc::new(InMemoryBus::new()),
    )
    .await
}

async fn cli(server: &Server, args: &[&str]) -> Output {
    let url = format!("http://{}", server.local_addr().unwrap());
    let run = Command::new(env!("CARGO_BIN_EXE_ssr-cli"))
        .env_remove("SSR_GATEWAY_URL")
        .arg("--url")
        .arg(url)
        .args(args)
        .output();
    tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("ssr-cli did not exit")
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[tokio::test]
async fn test_health_prints_echo() {
    let server = start().await;

    let output = cli(&server, &["health"]).await;
    assert!(output.status.success());
    let body: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(body["path"], json!("/health"));
    assert!(body["time"].as_str().is_some_and(|t| !t.is_empty()));

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_render_prints_markup() {
    let server = start().await;

    let output = cli(&server, &["render", "/products/42"]).await;
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim_end(), "<h1>Product 42</h1>");

    let output = cli(&server, &["render", "about", "--body", r#"{"name":"cli"}"#]).await;
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim_end(), "<h1>About cli</h1>");

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_render_json_prints_envelope() {
    let server = start().await;

    let output = cli(&server, &["render", "/about", "--json"]).await;
    assert!(output.status.success());
    let body: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(body["html"], json!("<h1>About</h1>"));

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_failed_render_exits_nonzero() {
    let server = start().await;

    let output = cli(&server, &["render", "/products"]).await;
    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("server returned status 500"));

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_malformed_body_rejected_locally() {
    let server = start().await;

    let output = cli(&server, &["render", "/about", "--body", "{ nope"]).await;
    assert!(!output.status.success());

    server.shutdown(Duration::from_secs(2)).await.unwrap();
}
