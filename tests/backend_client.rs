//! Integration tests for the REST backend client against a canned HTTP server

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use voice2eye_stream::backend::{BackendClient, BackendError};

/// Serve `routes` (path → (status, body)) until the test ends
async fn spawn_http(routes: HashMap<&'static str, (u16, &'static str)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }

            let request = String::from_utf8_lossy(&request);
            let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
            let (status, body) = routes
                .get(path.as_str())
                .copied()
                .unwrap_or((404, r#"{"detail":"Not Found"}"#));

            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn health_and_vocabulary_decode() {
    let base = spawn_http(HashMap::from([
        (
            "/api/health",
            (
                200,
                r#"{"status":"healthy","message":"VOICE2EYE Backend API is running","services":{"speech":"operational","gesture":"operational"}}"#,
            ),
        ),
        (
            "/api/gestures/vocabulary",
            (
                200,
                r#"{"gestures":{"fist":{"description":"Stop listening for voice commands","emergency":false,"finger_count":0},"two_fingers":{"description":"Emergency alert trigger","emergency":true,"finger_count":2}},"total_count":2,"confidence_threshold":0.7}"#,
            ),
        ),
        (
            "/api/health/speech",
            (
                200,
                r#"{"service":"speech","status":"operational","details":"Speech recognition and TTS services ready"}"#,
            ),
        ),
    ]))
    .await;
    let client = BackendClient::new(base).unwrap();

    let health = client.health().await.unwrap();
    assert!(health.is_healthy());
    assert!(health.degraded_services().is_empty());

    let vocabulary = client.gesture_vocabulary().await.unwrap();
    assert_eq!(vocabulary.total_count, 2);
    assert_eq!(vocabulary.emergency_gestures(), vec!["two_fingers"]);

    let speech = client.service_health("speech").await.unwrap();
    assert_eq!(speech.status, "operational");
}

#[tokio::test]
async fn error_status_maps_to_api_error() {
    let base = spawn_http(HashMap::from([(
        "/api/speech/status",
        (500, r#"{"detail":"Speech recognition failed"}"#),
    )]))
    .await;
    let client = BackendClient::new(base).unwrap();

    assert_eq!(
        client.speech_status().await,
        Err(BackendError::Api {
            status: 500,
            message: "Speech recognition failed".to_string(),
        })
    );
    assert!(matches!(
        client.gesture_status().await,
        Err(BackendError::Api { status: 404, .. })
    ));
}

#[tokio::test]
async fn unexpected_body_is_parse_error() {
    let base = spawn_http(HashMap::from([(
        "/api/gestures/status",
        (200, r#"{"unexpected":true}"#),
    )]))
    .await;
    let client = BackendClient::new(base).unwrap();

    assert!(matches!(
        client.gesture_status().await,
        Err(BackendError::Parse(_))
    ));
}
