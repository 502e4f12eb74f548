//! Integration test: start the gateway on a free port, GET /, assert health JSON.
//! No platform is contacted; channel availability comes from configured credentials only.

use parley::config::{Config, InstagramConfig, MessengerConfig, WhatsAppConfig};
use parley::gateway;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn config_on(port: u16) -> (Config, PathBuf) {
    let mut config = Config::default();
    config.gateway.port = port;
    config.gateway.bind = "127.0.0.1".to_string();
    let path = std::env::temp_dir()
        .join(format!("parley-health-test-{}", uuid::Uuid::new_v4()))
        .join("config.json");
    (config, path)
}

/// Spawn the gateway and poll `/` until it answers; the server task is aborted afterwards.
async fn health_of(config: Config, config_path: PathBuf) -> Value {
    let url = format!("http://127.0.0.1:{}/", config.gateway.port);
    let handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config, config_path).await;
    });
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let json = resp.json().await.expect("parse JSON");
                handle.abort();
                return json;
            }
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    handle.abort();
    panic!("GET {} gave no health JSON within 5s; last error: {:?}", url, last_err);
}

#[tokio::test]
async fn health_without_credentials_lists_no_channels() {
    let port = free_port();
    let (config, path) = config_on(port);

    let health = health_of(config, path).await;
    assert_eq!(health["runtime"], "running");
    assert_eq!(health["port"], port);
    assert_eq!(health["channels"], json!([]));
}

#[tokio::test]
async fn health_lists_only_available_channels() {
    let port = free_port();
    let (mut config, path) = config_on(port);
    config.channels.whatsapp = WhatsAppConfig {
        enabled: true,
        access_token: "EAAG-token".to_string(),
        phone_number_id: "1098".to_string(),
        verify_token: "verify-me".to_string(),
        app_secret: "wa-secret".to_string(),
        ..WhatsAppConfig::default()
    };
    config.channels.messenger = MessengerConfig {
        enabled: true,
        page_access_token: "page-token".to_string(),
        verify_token: "fb-verify".to_string(),
        app_secret: "fb-secret".to_string(),
        ..MessengerConfig::default()
    };
    // complete credentials but switched off
    config.channels.instagram = InstagramConfig {
        enabled: false,
        access_token: "ig-token".to_string(),
        verify_token: "ig-verify".to_string(),
        app_secret: "ig-secret".to_string(),
        ..InstagramConfig::default()
    };

    let health = health_of(config, path).await;
    assert_eq!(health["runtime"], "running");
    assert_eq!(health["channels"], json!(["messenger", "whatsapp"]));
}
