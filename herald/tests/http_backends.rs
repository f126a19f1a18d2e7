use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use herald::domain::{JsonMap, Notification, NotificationType};
use herald::notifier::{
    DeliveryPayload, Notifier, PagerDutyNotifier, SlackNotifier, WebhookNotifier, http_client,
};

/// Requests seen by the fake server: headers and JSON body.
type Seen = Arc<Mutex<Vec<(HeaderMap, Value)>>>;

#[derive(Clone)]
struct Fake {
    seen: Seen,
    status: StatusCode,
    reply: Value,
}

async fn record(
    State(fake): State<Fake>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let body = serde_json::from_str(&body).unwrap_or(Value::Null);
    fake.seen.lock().unwrap().push((headers, body));
    (fake.status, fake.reply.to_string())
}

/// Serve `path` on an ephemeral port; returns the base URL and the request log.
async fn serve(path: &str, status: StatusCode, reply: Value) -> (String, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new().route(path, post(record)).with_state(Fake {
        seen: seen.clone(),
        status,
        reply,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

fn config(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn payload() -> DeliveryPayload {
    let notification = Notification::new(NotificationType::Subscriber)
        .with_namespace(1)
        .with_label("team", "x")
        .with_data("text", "disk almost full");
    DeliveryPayload::new(&notification, 7, Some(3))
}

#[tokio::test]
async fn slack_posts_to_the_channel() {
    let (host, seen) = serve("/chat.postMessage", StatusCode::OK, json!({ "ok": true })).await;
    let notifier = SlackNotifier::new(http_client(Duration::from_secs(5)), &host, Duration::ZERO);

    let prepared = notifier
        .prepare_config(config(json!({ "token": "xoxb-1", "channel_name": "alerts" })))
        .await
        .unwrap();
    notifier.send(&payload(), &prepared).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (headers, body) = &seen[0];
    assert_eq!(headers["authorization"], "Bearer xoxb-1");
    assert_eq!(body["channel"], "#alerts");
    assert_eq!(body["text"], "disk almost full");
}

#[tokio::test]
async fn slack_classifies_api_errors() {
    let (host, _) = serve(
        "/chat.postMessage",
        StatusCode::OK,
        json!({ "ok": false, "error": "channel_not_found" }),
    )
    .await;
    let notifier = SlackNotifier::new(http_client(Duration::from_secs(5)), &host, Duration::ZERO);
    let err = notifier
        .send(&payload(), &config(json!({ "token": "t", "channel_name": "gone" })))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());

    let (host, _) = serve(
        "/chat.postMessage",
        StatusCode::OK,
        json!({ "ok": false, "error": "ratelimited" }),
    )
    .await;
    let notifier = SlackNotifier::new(http_client(Duration::from_secs(5)), &host, Duration::ZERO);
    let err = notifier
        .send(&payload(), &config(json!({ "token": "t", "channel_name": "busy" })))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn pagerduty_creates_trigger_event() {
    let (host, seen) = serve(
        "/generic/2010-04-15/create_event.json",
        StatusCode::OK,
        json!({ "status": "success", "message": "Event processed", "incident_key": "k" }),
    )
    .await;
    let notifier = PagerDutyNotifier::new(http_client(Duration::from_secs(5)), &host);

    notifier
        .send(&payload(), &config(json!({ "service_key": "svc" })))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let (_, body) = &seen[0];
    assert_eq!(body["service_key"], "svc");
    assert_eq!(body["event_type"], "trigger");
    assert_eq!(body["description"], "disk almost full");
}

#[tokio::test]
async fn pagerduty_server_errors_are_retryable() {
    let (host, _) = serve(
        "/generic/2010-04-15/create_event.json",
        StatusCode::SERVICE_UNAVAILABLE,
        json!({}),
    )
    .await;
    let notifier = PagerDutyNotifier::new(http_client(Duration::from_secs(5)), &host);
    let err = notifier
        .send(&payload(), &config(json!({ "service_key": "svc" })))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let (host, _) = serve(
        "/generic/2010-04-15/create_event.json",
        StatusCode::BAD_REQUEST,
        json!({ "status": "invalid event" }),
    )
    .await;
    let notifier = PagerDutyNotifier::new(http_client(Duration::from_secs(5)), &host);
    let err = notifier
        .send(&payload(), &config(json!({ "service_key": "svc" })))
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn webhook_posts_payload_with_headers() {
    let (host, seen) = serve("/hook", StatusCode::OK, Value::Null).await;
    let notifier = WebhookNotifier::new(http_client(Duration::from_secs(5)));

    let prepared = notifier
        .prepare_config(config(json!({
            "url": format!("{host}/hook"),
            "headers": { "x-team": "x" },
            "auth": { "type": "bearer", "token": "secret" }
        })))
        .await
        .unwrap();
    notifier.send(&payload(), &prepared).await.unwrap();

    let seen = seen.lock().unwrap();
    let (headers, body) = &seen[0];
    assert_eq!(headers["x-team"], "x");
    assert_eq!(headers["authorization"], "Bearer secret");
    assert_eq!(body["receiver_id"], 7);
    assert_eq!(body["subscription_id"], 3);
    assert_eq!(body["labels"]["team"], "x");
}

#[tokio::test]
async fn webhook_rejections_are_classified() {
    let (host, _) = serve("/hook", StatusCode::TOO_MANY_REQUESTS, Value::Null).await;
    let notifier = WebhookNotifier::new(http_client(Duration::from_secs(5)));
    let hook = config(json!({ "url": format!("{host}/hook") }));
    assert!(notifier.send(&payload(), &hook).await.unwrap_err().is_retryable());

    let (host, _) = serve("/hook", StatusCode::NOT_FOUND, Value::Null).await;
    let hook = config(json!({ "url": format!("{host}/hook") }));
    assert!(!notifier.send(&payload(), &hook).await.unwrap_err().is_retryable());

    // Nothing listening: transport failure.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let hook = config(json!({ "url": format!("http://{addr}/hook") }));
    assert!(notifier.send(&payload(), &hook).await.unwrap_err().is_retryable());
}
