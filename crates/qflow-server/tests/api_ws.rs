//! HTTP routes and the viewer WebSocket, over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use qflow_core::ManualClock;
use qflow_engine::MockNotifier;
use qflow_server::{seed, AppConfig, Services};
use qflow_store::{DynStore, MemoryStore};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

const CONFIG: &str = r#"
[[identity.tokens]]
token = "t-1"
first_name = "Somchai"
last_name = "Jaidee"
student_id = "6401234"

[[seed.topics]]
code = "A"
name_th = "งานทะเบียน"
name_en = "Registration"

[[seed.topics]]
code = "B"
name_th = "การเงิน"
name_en = "Finance"

[[seed.counters]]
label = "1"
closes_at = "16:30"
topics = ["A", "B"]

[[seed.counters]]
label = "2"
closes_at = "16:30"
topics = ["A"]
"#;

async fn services() -> Services {
    let config = AppConfig::from_toml_str(CONFIG).unwrap();
    let store: DynStore = Arc::new(MemoryStore::new());
    seed(&store, &config.seed).await.unwrap();
    // 10:00 local.
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap()));
    Services::build(&config, store, Arc::new(MockNotifier::new()), clock).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn walk_in(topic: i64, first_name: &str) -> Request<Body> {
    json_request(
        "POST",
        "/api/v1/queues",
        json!({"topic": topic, "firstName": first_name, "lastName": "Visitor"}),
    )
}

#[tokio::test]
async fn reserve_then_call() {
    let app = services().await.router();

    let (status, body) = send(&app, walk_in(1, "Anong")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "success");
    assert_eq!(body["data"]["ticket"]["no"], "A001");
    assert_eq!(body["data"]["ticket"]["status"], "WAITING");
    assert_eq!(body["data"]["ticket"]["origin"], "walkIn");
    assert_eq!(body["data"]["waiting"], 0);

    let (_, body) = send(&app, walk_in(1, "Boon")).await;
    assert_eq!(body["data"]["ticket"]["no"], "A002");
    assert_eq!(body["data"]["waiting"], 1);

    let (status, body) = send(
        &app,
        json_request("PUT", "/api/v1/queues/1", json!({"counter": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["current"]["status"], "IN_PROGRESS");
    assert_eq!(body["data"]["current"]["counterId"], 1);
    assert_eq!(body["data"]["called"], Value::Null);

    let (status, body) = send(
        &app,
        json_request("PUT", "/api/v1/queues/2", json!({"counter": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["called"]["no"], "A001");
    assert_eq!(body["data"]["called"]["status"], "CALLED");

    // Already served.
    let (status, body) = send(
        &app,
        json_request("PUT", "/api/v1/queues/1", json!({"counter": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["statusCode"], 409);
    assert_eq!(body["status"], "Conflict");

    let (status, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/v1/queues/1/feedback")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["feedback"], true);
}

#[tokio::test]
async fn reserve_requires_identity_or_names() {
    let app = services().await.router();

    let (status, body) = send(&app, json_request("POST", "/api/v1/queues", json!({"topic": 1}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["statusCode"], 401);
    assert_eq!(body["status"], "Unauthorized");

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/queues")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer t-1")
        .body(Body::from(json!({"topic": 2, "note": "transcript"}).to_string()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ticket"]["no"], "B001");
    assert_eq!(body["data"]["ticket"]["origin"], "authenticated");
    assert_eq!(body["data"]["ticket"]["studentId"], "6401234");
    assert_eq!(body["data"]["ticket"]["note"], "transcript");

    let (status, _) = send(&app, json_request("POST", "/api/v1/queues", json!({"topic": 0}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, walk_in(9, "Anong")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn counter_outside_topic_is_forbidden() {
    let app = services().await.router();
    send(&app, walk_in(2, "Anong")).await;

    let (status, body) = send(
        &app,
        json_request("PUT", "/api/v1/queues/1", json!({"counter": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["statusCode"], 403);
}

#[tokio::test]
async fn queue_views() {
    let app = services().await.router();
    send(&app, walk_in(1, "Anong")).await;
    send(&app, walk_in(2, "Boon")).await;
    send(&app, walk_in(1, "Chai")).await;

    let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();

    let (status, body) = send(&app, get("/api/v1/queues?counter=2")).await;
    assert_eq!(status, StatusCode::OK);
    let waiting = body["data"]["waiting"].as_array().unwrap();
    let numbers: Vec<&str> = waiting.iter().map(|t| t["no"].as_str().unwrap()).collect();
    assert_eq!(numbers, vec!["A001", "A002"]);
    assert_eq!(body["data"]["current"], Value::Null);

    let (status, body) = send(&app, get("/api/v1/queues?counter=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Counter must be a valid integer");

    let (status, body) = send(&app, get("/api/v1/queues/mine?firstName=Chai&lastName=Visitor")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ticket"]["no"], "A002");
    assert_eq!(body["data"]["waiting"], 1);

    let (status, _) = send(&app, get("/api/v1/queues/mine?firstName=Chai")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/api/v1/queues/mine?firstName=No&lastName=One")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&text).contains("qflow_tickets_issued_total"));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn recall_and_delete() {
    let app = services().await.router();
    send(&app, walk_in(1, "Anong")).await;

    let post = |uri: &str| {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send(&app, post("/api/v1/counters/1/recall")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(
        &app,
        json_request("PUT", "/api/v1/queues/1", json!({"counter": 1})),
    )
    .await;
    let (status, body) = send(&app, post("/api/v1/counters/1/recall")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["no"], "A001");

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/v1/queues/1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["no"], "A001");

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/v1/queues/1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn viewer_receives_events_over_websocket() {
    let services = services().await;
    let app = services.router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_app = app.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, server_app).await.unwrap();
    });

    let (mut viewer, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    // Wait until the hub has registered the viewer.
    let registered = timeout(Duration::from_secs(2), async {
        loop {
            if services.hub.subscriber_count().await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(registered.is_ok(), "viewer should register");

    send(&app, walk_in(1, "Anong")).await;
    send(
        &app,
        json_request("PUT", "/api/v1/queues/1", json!({"counter": 1})),
    )
    .await;

    let mut events = Vec::new();
    while events.len() < 2 {
        let message = timeout(Duration::from_secs(2), viewer.next())
            .await
            .expect("event expected")
            .expect("stream open")
            .unwrap();
        if let Message::Text(text) = message {
            events.push(serde_json::from_str::<Value>(&text).unwrap());
        }
    }

    assert_eq!(events[0]["event"], "addQueue");
    assert_eq!(events[0]["data"]["queue"]["no"], "A001");
    assert_eq!(events[0]["data"]["waiting"], 0);
    assert_eq!(events[1]["event"], "updateQueue");
    assert_eq!(events[1]["data"]["current"]["no"], "A001");
    assert_eq!(events[1]["data"]["counter"], 1);

    drop(viewer);
    server.abort();
}
