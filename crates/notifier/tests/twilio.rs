//! `TwilioWhatsAppTransport` against a local stand-in for the Messages API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use herald_common::config::ChannelCredentials;
use herald_notifier::{ChannelTransport, TransportError, TwilioWhatsAppTransport};

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(String, Option<String>, HashMap<String, String>)>>>,
}

async fn create_message(
    State(captured): State<Captured>,
    Path(sid): Path<String>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let to = form.get("To").cloned().unwrap_or_default();
    captured.requests.lock().unwrap().push((sid, auth, form));

    if to.ends_with("+400") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": 21211, "message": "Invalid 'To' Phone Number" })),
        );
    }
    (
        StatusCode::CREATED,
        Json(json!({ "sid": "SM0001", "status": "queued" })),
    )
}

async fn spawn_provider() -> (String, Captured) {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/2010-04-01/Accounts/{sid}/Messages.json",
            post(create_message),
        )
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), captured)
}

fn transport(base_url: &str) -> TwilioWhatsAppTransport {
    TwilioWhatsAppTransport::new(&ChannelCredentials {
        account_id: "AC123".to_string(),
        auth_token: "secret".to_string(),
        sender_address: "+15550000".to_string(),
    })
    .with_base_url(base_url)
}

#[tokio::test]
async fn test_accepted_message_is_acknowledged() {
    let (base_url, captured) = spawn_provider().await;

    let receipt = transport(&base_url)
        .send("Hello", "+15550000", "+15551111")
        .await
        .unwrap();

    assert!(receipt.is_acknowledged());
    assert_eq!(receipt.message_id.as_deref(), Some("SM0001"));
    assert_eq!(receipt.status.as_deref(), Some("queued"));

    let requests = captured.requests.lock().unwrap();
    let (sid, auth, form) = &requests[0];
    assert_eq!(sid, "AC123");
    assert!(auth.as_deref().is_some_and(|a| a.starts_with("Basic ")));
    assert_eq!(form["Body"], "Hello");
    assert_eq!(form["From"], "whatsapp:+15550000");
    assert_eq!(form["To"], "whatsapp:+15551111");
}

#[tokio::test]
async fn test_provider_error_is_surfaced() {
    let (base_url, _captured) = spawn_provider().await;

    let err = transport(&base_url)
        .send("Hello", "+15550000", "+400")
        .await
        .unwrap_err();

    match err {
        TransportError::Provider { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("Invalid 'To' Phone Number"));
            assert!(message.contains("21211"));
        }
        other => panic!("expected provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_provider_is_http_error() {
    // Nothing listens on the discard port
    let err = transport("http://127.0.0.1:9")
        .send("Hello", "+15550000", "+15551111")
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Http(_)));
}
