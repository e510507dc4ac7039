//! Integration tests for the DSI engine HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use dsi_engine::config::Config;
    use dsi_engine::server::{run, ServerConfig};
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn start_server() -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let config = ServerConfig::new(0, Config::default());
        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx) = start_server().await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["subscribers"], 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (addr, shutdown_tx) = start_server().await;
        let client = reqwest::Client::new();
        let base = format!("http://{}/sessions/tab-1", addr);

        let response = client.post(&base).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let response = client.post(&base).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["created"], false);

        let events = serde_json::json!([
            { "type": "click", "x": 10.0, "y": 10.0, "timestamp": 1000.0 },
            { "type": "click", "x": 10.0, "y": 10.0, "timestamp": 1100.0 },
            { "type": "scroll", "position": 400.0, "timestamp": 900.0 }
        ]);
        let response = client
            .post(format!("{base}/events"))
            .json(&events)
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["accepted"], 3);
        assert_eq!(body["rejected"], 0);

        let response = client
            .post(format!("{base}/context"))
            .json(&serde_json::json!({ "category": "Social", "timestamp": 1200.0 }))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["category"], "social");

        let response = client
            .put(format!("{base}/score"))
            .json(&serde_json::json!({ "score": 72.0 }))
            .send()
            .await
            .unwrap();
        let snapshot: serde_json::Value = response.json().await.unwrap();
        assert_eq!(snapshot["level"], 2);
        assert_eq!(snapshot["category"], "social");

        let polled: Vec<serde_json::Value> = client
            .get(format!("http://{}/events", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(polled
            .iter()
            .any(|e| e["type"] == "level_changed" && e["level"] == 2 && e["session_id"] == "tab-1"));

        let response = client
            .post(format!("{base}/mode"))
            .json(&serde_json::json!({ "mode": "therapy", "active": true }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        let snapshot: serde_json::Value = client.get(&base).send().await.unwrap().json().await.unwrap();
        assert_eq!(snapshot["mode"], "therapy_locked");

        let response = client
            .post(format!("{base}/complete"))
            .json(&serde_json::json!({ "mode": "therapy" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        let snapshot: serde_json::Value = client.get(&base).send().await.unwrap().json().await.unwrap();
        assert_eq!(snapshot["score"], 45.0);

        let response = client.delete(&base).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        let response = client.get(&base).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let (addr, shutdown_tx) = start_server().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/sessions/ghost/events", addr))
            .json(&serde_json::json!({ "type": "click", "x": 1.0, "y": 1.0, "timestamp": 1.0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let created: serde_json::Value = client
            .post(format!("http://{}/sessions", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["session_id"].as_str().unwrap().to_string();
        let base = format!("http://{}/sessions/{}", addr, id);

        let response = client
            .post(format!("{base}/events"))
            .json(&serde_json::json!({ "type": "scroll", "position": 10.0, "timestamp": -5.0 }))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["accepted"], 0);
        assert_eq!(body["rejected"], 1);

        let response = client
            .post(format!("{base}/context"))
            .json(&serde_json::json!({ "category": "casino", "timestamp": 1.0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let stats: serde_json::Value = client
            .get(format!("http://{}/stats", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["events_rejected"], 2);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (addr, shutdown_tx) = start_server().await;

        // Send OPTIONS request to check CORS
        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/sessions/tab-1/events", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .expect("Failed to send request");

        // CORS preflight should succeed
        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        let _ = shutdown_tx.send(());
    }
}
