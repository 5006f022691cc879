//! End-to-end tests of the HTTP API over an in-memory store and a fake
//! extractor that derives the embedding from the image's pixel color.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use doorman_core::{Embedding, EmbeddingProvider, ExtractionError};
use doorman_store::SqliteStore;
use doormand::{build_router, spawn_engine, AppState, Config, EngineSettings};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use tower::ServiceExt;

const RED: [u8; 3] = [255, 0, 0];
const NEAR_RED: [u8; 3] = [250, 12, 0];
const GREEN: [u8; 3] = [0, 255, 0];
const BLUE: [u8; 3] = [0, 0, 255];
/// No face in frame.
const BLACK: [u8; 3] = [0, 0, 0];
/// Several faces in frame.
const WHITE: [u8; 3] = [255, 255, 255];

/// Reads the top-left pixel and returns its normalized RGB as the embedding.
struct ColorProvider;

impl EmbeddingProvider for ColorProvider {
    fn extract(&self, image: &[u8]) -> Result<Embedding, ExtractionError> {
        let img = image::load_from_memory(image)
            .map_err(|e| ExtractionError::ExtractionFailed(e.to_string()))?
            .to_rgb8();
        let [r, g, b] = img.get_pixel(0, 0).0;
        match (r, g, b) {
            (0..=5, 0..=5, 0..=5) => Err(ExtractionError::NoFaceDetected),
            (250..=255, 250..=255, 250..=255) => Err(ExtractionError::MultipleFacesDetected),
            _ => Ok(Embedding::new(vec![r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0])?),
        }
    }

    fn model(&self) -> &str {
        "Facenet512"
    }
}

fn encode(color: [u8; 3], format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb(color));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), format).unwrap();
    out
}

fn png_b64(color: [u8; 3]) -> String {
    STANDARD.encode(encode(color, image::ImageFormat::Png))
}

fn app_with(config: Config) -> Router {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let engine = spawn_engine(
        Arc::new(ColorProvider),
        store.clone(),
        store,
        EngineSettings::from_config(&config),
    )
    .unwrap();
    build_router(AppState::new(config, engine))
}

fn app() -> Router {
    app_with(Config::default())
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    dispatch(app, req).await
}

async fn dispatch(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &Router, color: [u8; 3], name: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/api/register",
        Some(json!({ "image": png_b64(color), "name": name })),
    )
    .await
}

async fn recognize(app: &Router, color: [u8; 3]) -> Value {
    let (status, body) = send(app, Method::POST, "/api/recognize", Some(json!({ "image": png_b64(color) }))).await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_register_then_recognize() {
    let app = app();
    let (status, body) = register(&app, RED, "Alice").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let user_id = body["user_id"].as_str().unwrap().to_string();
    assert!(user_id.starts_with("user_"));

    let body = recognize(&app, NEAR_RED).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["authorized"], true);
    assert_eq!(body["identity"]["user_id"], user_id.as_str());
    assert_eq!(body["identity"]["name"], "Alice");
    assert!(body["confidence"].as_f64().unwrap() > 0.9);

    let (_, logs) = send(&app, Method::GET, "/api/logs", None).await;
    assert_eq!(logs["count"], 1);
    assert_eq!(logs["logs"][0]["authorized"], true);
    assert_eq!(logs["logs"][0]["identity_id"], user_id.as_str());
}

#[tokio::test]
async fn test_recognize_unknown_and_empty_gallery() {
    let app = app();
    let body = recognize(&app, RED).await;
    assert_eq!(body["authorized"], false);
    assert_eq!(body["reason"], "no registered identities");
    assert!(body["distance"].is_null());

    register(&app, RED, "Alice").await;
    let body = recognize(&app, BLUE).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["authorized"], false);
    assert_eq!(body["confidence"], 0.0);
    assert_eq!(body["reason"], "below threshold");
    assert!(body.get("identity").is_none());

    let (_, logs) = send(&app, Method::GET, "/api/logs", None).await;
    assert_eq!(logs["count"], 2);
    assert_eq!(logs["logs"][0]["identity_id"], "unknown");
    assert_eq!(logs["logs"][0]["identity_name"], "Unknown");
}

#[tokio::test]
async fn test_recognize_extraction_failures_are_audited() {
    let app = app();
    register(&app, RED, "Alice").await;

    let body = recognize(&app, BLACK).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["authorized"], false);
    assert_eq!(body["reason"], "no face detected");

    let body = recognize(&app, WHITE).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["reason"], "multiple faces");

    let (_, logs) = send(&app, Method::GET, "/api/logs?order=insertion", None).await;
    assert_eq!(logs["count"], 2);
    assert_eq!(logs["logs"][0]["reason"], "no face detected");
    assert_eq!(logs["logs"][1]["reason"], "multiple faces");
}

#[tokio::test]
async fn test_recognize_raw_jpeg_body() {
    let app = app();
    register(&app, RED, "Alice").await;

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/recognize")
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(Body::from(encode(RED, image::ImageFormat::Jpeg)))
        .unwrap();
    let (status, body) = dispatch(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorized"], true);
    assert_eq!(body["identity"]["name"], "Alice");
}

#[tokio::test]
async fn test_register_rejections() {
    let app = app();
    register(&app, RED, "Alice").await;

    let (status, body) = register(&app, NEAR_RED, "Alice Again").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "DUPLICATE_IDENTITY");
    assert_eq!(body["error"]["details"]["existing_name"], "Alice");

    let (status, body) = register(&app, BLACK, "Nobody").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NO_FACE_DETECTED");

    let (status, body) = send(&app, Method::POST, "/api/register", Some(json!({ "image": png_b64(GREEN) }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/register",
        Some(json!({ "image": "not base64!", "name": "Bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Registration attempts are never audited
    let (_, logs) = send(&app, Method::GET, "/api/logs", None).await;
    assert_eq!(logs["count"], 0);
}

#[tokio::test]
async fn test_register_with_chosen_id() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/register",
        Some(json!({ "image": png_b64(GREEN), "name": "Bob", "email": "bob@example.com", "user_id": "bob-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user_id"], "bob-01");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/register",
        Some(json!({ "image": png_b64(BLUE), "name": "Carol", "user_id": "bob-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "IDENTITY_EXISTS");
}

#[tokio::test]
async fn test_user_management() {
    let app = app();
    let (_, body) = register(&app, RED, "Alice").await;
    let id = body["user_id"].as_str().unwrap().to_string();
    register(&app, GREEN, "Bob").await;

    let (status, users) = send(&app, Method::GET, "/api/users", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users["count"], 2);
    assert_eq!(users["users"][0]["name"], "Alice");
    assert_eq!(users["users"][0]["embedding_dim"], 3);
    assert!(users["users"][0].get("embedding").is_none());

    let uri = format!("/api/user/{id}");
    let (status, user) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["user"]["status"], "active");

    let (status, _) = send(&app, Method::PUT, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::PUT, &uri, Some(json!({ "status": "suspended" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, updated) = send(
        &app,
        Method::PUT,
        &uri,
        Some(json!({ "name": "Alice Liddell", "phone": "555-0100" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["user"]["name"], "Alice Liddell");
    assert_eq!(updated["user"]["phone"], "555-0100");

    let (status, body) = send(&app, Method::GET, "/api/user/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "IDENTITY_NOT_FOUND");
    let (status, _) = send(&app, Method::PUT, "/api/user/ghost", Some(json!({ "name": "x" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, users) = send(&app, Method::GET, "/api/users", None).await;
    assert_eq!(users["count"], 1);
}

#[tokio::test]
async fn test_deactivation_denies_but_keeps_history() {
    let app = app();
    let (_, body) = register(&app, RED, "Alice").await;
    let uri = format!("/api/user/{}", body["user_id"].as_str().unwrap());

    assert_eq!(recognize(&app, RED).await["authorized"], true);

    let (status, _) = send(&app, Method::PUT, &uri, Some(json!({ "status": "inactive" }))).await;
    assert_eq!(status, StatusCode::OK);
    let body = recognize(&app, RED).await;
    assert_eq!(body["authorized"], false);
    assert_eq!(body["reason"], "no registered identities");

    send(&app, Method::DELETE, &uri, None).await;
    let (_, logs) = send(&app, Method::GET, "/api/logs?order=insertion", None).await;
    assert_eq!(logs["count"], 2);
    assert_eq!(logs["logs"][0]["authorized"], true);
    assert_eq!(logs["logs"][0]["identity_name"], "Alice");
}

#[tokio::test]
async fn test_logs_limit_order_and_clear() {
    let app = app();
    register(&app, RED, "Alice").await;
    recognize(&app, RED).await;
    recognize(&app, BLUE).await;
    recognize(&app, BLACK).await;

    let (_, logs) = send(&app, Method::GET, "/api/logs?limit=2", None).await;
    assert_eq!(logs["count"], 2);
    assert_eq!(logs["order"], "newest_first");
    assert_eq!(logs["logs"][0]["reason"], "no face detected");
    assert_eq!(logs["logs"][1]["reason"], "below threshold");

    let (status, _) = send(&app, Method::GET, "/api/logs?order=sideways", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, Method::GET, "/api/logs?limit=lots", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, cleared) = send(&app, Method::DELETE, "/api/logs/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["removed"], 3);
    let (_, logs) = send(&app, Method::GET, "/api/logs", None).await;
    assert_eq!(logs["count"], 0);

    // Identities are untouched by a log clear
    let (_, users) = send(&app, Method::GET, "/api/users", None).await;
    assert_eq!(users["count"], 1);
}

#[tokio::test]
async fn test_verify() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/verify",
        Some(json!({ "image1": png_b64(RED), "image2": png_b64(NEAR_RED) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert_eq!(body["model"], "Facenet512");
    assert_eq!(body["metric"], "cosine");
    assert!(body["similarity"].as_f64().unwrap() > 99.0);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/verify",
        Some(json!({ "image1": png_b64(RED), "image2": png_b64(GREEN) })),
    )
    .await;
    assert_eq!(body["verified"], false);
    assert!((body["distance"].as_f64().unwrap() - 1.0).abs() < 1e-5);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/verify",
        Some(json!({ "image1": png_b64(RED), "image2": png_b64(WHITE) })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MULTIPLE_FACES_DETECTED");
}

#[tokio::test]
async fn test_min_confidence_gate_from_config() {
    let app = app_with(Config {
        min_confidence: Some(0.9999),
        ..Config::default()
    });
    register(&app, RED, "Alice").await;
    let body = recognize(&app, NEAR_RED).await;
    assert_eq!(body["authorized"], false);
    assert_eq!(body["reason"], "confidence below minimum");
}

#[tokio::test]
async fn test_system_endpoints() {
    let app = app_with(Config {
        metric: doorman_core::DistanceMetric::EuclideanL2,
        recognition_threshold: 0.8,
        ..Config::default()
    });

    let (status, health) = send(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["model"], "Facenet512");

    let (_, config) = send(&app, Method::GET, "/api/config", None).await;
    assert_eq!(config["metric"], "euclidean_l2");
    assert!((config["recognition_threshold"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    assert_eq!(config["confidence_policy"], "linear");
    assert!(config["min_confidence"].is_null());

    let (status, body) = send(&app, Method::GET, "/api/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let app = app_with(Config {
        max_body_mb: 0,
        ..Config::default()
    });
    let (status, _) = register(&app, RED, "Alice").await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_oversized_body_rejected_by_declared_length() {
    let app = app_with(Config {
        max_body_mb: 0,
        ..Config::default()
    });
    let body = json!({ "image": png_b64(RED) }).to_string();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/recognize")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_cors_preflight_allowed() {
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/recognize")
        .header(header::ORIGIN, "http://dashboard.local")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
