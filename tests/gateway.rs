#![cfg(unix)]

mod support;

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use support::{BOUNDARY, Deployment, multipart_body};

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn get(app: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, request).await
}

async fn upload(app: &Router, session: &str, filename: &str, content: &[u8]) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/app/{session}/upload"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body("file", filename, content)))
        .expect("request should build");
    send(app, request).await
}

async fn render_json(app: &Router, session: &str, params: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/app/{session}/render_svg"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(params.to_string()))
        .expect("request should build");
    send(app, request).await
}

async fn body_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

async fn wait_until_idle(app: &Router) -> Value {
    for _ in 0..500 {
        let status = body_json(get(app, "/plotter/status").await).await;
        if status["busy"] == json!(false) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("plotter never became idle");
}

#[tokio::test]
async fn root_redirects_to_a_fresh_session() {
    let deployment = Deployment::new("none");
    let app = deployment.router();

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .expect("location header");
    let session = location.strip_prefix("/app/").expect("app prefix");
    assert_eq!(session.len(), 12);
    assert!(session.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[tokio::test]
async fn opening_a_session_creates_its_workspace() {
    let deployment = Deployment::new("none");
    let app = deployment.router();

    let response = get(&app, "/app/Session_1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "session": "Session_1" }));
    assert!(deployment.workspace_dir("Session_1").is_dir());
}

#[tokio::test]
async fn unsafe_session_ids_are_not_found() {
    let deployment = Deployment::new("none");
    let app = deployment.router();

    let too_long = format!("/app/{}", "a".repeat(33));
    for uri in ["/app/bad-id", "/app/..%2F..%2Fetc", too_long.as_str()] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn health_check_has_no_content() {
    let deployment = Deployment::new("none");
    let response = get(&deployment.router(), "/_health").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn upload_then_fetch_original() {
    let deployment = Deployment::new("none");
    let app = deployment.router();

    let response = upload(&app, "s1", "drawing.SVG", b"<svg>hello</svg>").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["size_bytes"], 16);

    let response = get(&app, "/app/s1/original/123").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).expect("type"),
        "image/svg+xml"
    );
    assert_eq!(body_text(response).await, "<svg>hello</svg>");
}

#[tokio::test]
async fn upload_rejects_non_svg_files() {
    let deployment = Deployment::new("none");
    let app = deployment.router();

    let response = upload(&app, "s1", "drawing.png", b"\x89PNG").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_text(response).await, "Invalid Image");
    assert!(!deployment.workspace_dir("s1").join("image.svg").exists());
}

#[tokio::test]
async fn upload_without_file_field_is_bad_request() {
    let deployment = Deployment::new("none");
    let app = deployment.router();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/app/s1/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body("other", "drawing.svg", b"<svg/>")))
        .expect("request should build");
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "No files were uploaded.");
}

#[tokio::test]
async fn preview_is_missing_before_render() {
    let deployment = Deployment::new("none");
    let response = get(&deployment.router(), "/app/s1/preview").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_render_parameters_are_rejected_per_field() {
    let deployment = Deployment::new("none");
    let app = deployment.router();

    let response = render_json(
        &app,
        "s1",
        json!({ "color_key": "red", "cut": "yes", "hatch_density": 0.01 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let body = body_json(response).await;
    let errors = body["errors"].as_object().expect("errors object");
    for field in ["scale", "color_key", "cut", "hatch_density"] {
        assert!(errors.contains_key(field), "missing error for {field}: {body}");
    }
    assert!(!deployment.workspace_dir("s1").join("box.wild").exists());
}

#[tokio::test]
async fn urlencoded_render_request_is_accepted() {
    let deployment = Deployment::new("none");
    let app = deployment.router();
    upload(&app, "s1", "a.svg", b"<svg/>").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/app/s1/render_svg")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("scale=1.5&cut=on&color_key=%23ff0000+%2300ff00"))
        .expect("request should build");
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);
}

#[tokio::test]
async fn render_stage_failure_is_reported_in_body() {
    let deployment = Deployment::new("dry_run");
    let app = deployment.router();
    upload(&app, "s1", "a.svg", b"<svg/>").await;

    let response = render_json(&app, "s1", json!({ "scale": 2 })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["step"], 2);
    assert_eq!(body["error"]["exit_code"], 3);
    assert!(
        body["error"]["stderr"]
            .as_str()
            .unwrap_or_default()
            .contains("renderer rejected dry_run")
    );

    let ws = deployment.workspace_dir("s1");
    assert!(ws.join("box.wild").exists());
    assert!(!ws.join("dry_run.wild").exists());
    assert!(!ws.join("draw.wild").exists());
}

#[tokio::test]
async fn render_then_plot_streams_artifact_to_device() {
    let deployment = Deployment::new("none");
    let app = deployment.router();
    upload(&app, "s1", "a.svg", b"<svg/>").await;

    let response = render_json(&app, "s1", json!({ "scale": "2", "hatch": "on" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "success": true, "stdout": "{\"mode\":\"draw\"}\n" }));

    let preview = get(&app, "/app/s1/preview/42").await;
    assert_eq!(preview.status(), StatusCode::OK);
    assert!(body_text(preview).await.contains("draw"));

    let response = get(&app, "/app/s1/run/draw").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "success" }));

    let status = wait_until_idle(&app).await;
    assert_eq!(status["last_output"], "success");
    assert_eq!(status["author"], "s1");
    assert_eq!(status["target"], "draw");
    assert_eq!(status["size_cur"], status["size_total"]);

    let expected = std::fs::read(deployment.workspace_dir("s1").join("draw.wild"))
        .expect("draw artifact");
    assert_eq!(std::fs::read(&deployment.device).expect("device"), expected);
}

#[tokio::test]
async fn run_rejects_unknown_targets_and_missing_artifacts() {
    let deployment = Deployment::new("none");
    let app = deployment.router();

    let response = get(&app, "/app/s1/run/vis").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, "Invalid endpoint");

    let response = get(&app, "/app/s1/run/box").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let status = body_json(get(&app, "/plotter/status").await).await;
    assert_eq!(status["busy"], false);
    assert_eq!(status["last_output"], "copy failed");
}

#[tokio::test]
async fn control_routes_conflict_without_a_job() {
    let deployment = Deployment::new("none");
    let app = deployment.router();

    for uri in ["/plotter/pause", "/plotter/resume", "/plotter/stop"] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::CONFLICT, "{uri}");
        assert_eq!(body_text(response).await, "Not running");
    }

    let status = body_json(get(&app, "/plotter/status").await).await;
    assert_eq!(status["busy"], false);
    assert_eq!(status["size_cur"], 0);
    assert_eq!(status["size_total"], 1);
    assert_eq!(status["paused"], false);
}
