mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;

use self::error::ErrorResponse;
pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health_handler,
        api::gallery_handler,
        api::stats_handler,
        api::search_handler,
        api::rebuild_handler,
    ),
    components(schemas(
        types::SearchForm,
        types::SearchResponseView,
        types::GalleryResponse,
        types::HealthResponse,
        ErrorResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    let images = ServeDir::new(state.retrieval.dataset_dir());
    let max_upload = state.max_upload;
    Router::new()
        .route("/api/health", get(api::health_handler))
        .route("/api/gallery", get(api::gallery_handler))
        .route("/api/stats", get(api::stats_handler))
        .route("/api/search", post(api::search_handler))
        .route("/api/rebuild", post(api::rebuild_handler))
        .route("/metrics", get(api::metrics_handler))
        .route("/api-docs/openapi.json", get(api::openapi_handler))
        .nest_service(&state.static_prefix, images)
        .fallback(api::not_found_handler)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use image::ImageFormat;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::cli::server::ServerCommand;
    use crate::engine::RetrievalBuilder;
    use crate::testing::{image_bytes, sample_dataset};

    const BOUNDARY: &str = "imretrieval-test-boundary";

    fn app(root: &Path, opts: ServerCommand) -> Router {
        let dataset = root.join("dataset");
        if !dataset.exists() {
            sample_dataset(&dataset);
        }
        let retrieval = RetrievalBuilder::new(root.join("artifacts"), dataset).open().unwrap();
        create_app(AppState::new(retrieval, &opts))
    }

    fn multipart(parts: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = vec![];
        for (name, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match *name {
                "image" => body.extend_from_slice(
                    b"Content-Disposition: form-data; name=\"image\"; filename=\"query.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
                ),
                _ => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/api/search")
            .header(header::CONTENT_LENGTH, body.len())
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path(), ServerCommand::default());
        let (status, json) = send_json(app, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path(), ServerCommand::default());
        let query = image_bytes(3, ImageFormat::Jpeg);

        let request = multipart(&[("image", query.as_slice()), ("topK", b"2".as_slice())]);
        let (status, json) = send_json(app, request).await;
        assert_eq!(status, StatusCode::OK);
        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["rank"], 1);
        assert_eq!(results[0]["relative_path"], "dog/c.jpg");
        assert_eq!(results[0]["label"], "dog");
        assert_eq!(results[0]["filename"], "c.jpg");
        assert_eq!(results[0]["imageUrl"], "/dataset/dog/c.jpg");
        assert!(results[0]["score"].as_f64().unwrap() > 0.999);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_lenient_top_k() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path(), ServerCommand { top_k: 2, ..Default::default() });
        let query = image_bytes(3, ImageFormat::Jpeg);

        for top_k in ["abc", "0", ""] {
            let request = multipart(&[("image", query.as_slice()), ("topK", top_k.as_bytes())]);
            let (status, json) = send_json(app.clone(), request).await;
            assert_eq!(status, StatusCode::OK, "topK={top_k:?}");
            assert_eq!(json["results"].as_array().unwrap().len(), 2, "topK={top_k:?}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_missing_image() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path(), ServerCommand::default());
        let (status, json) = send_json(app, multipart(&[("topK", b"2".as_slice())])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "bad_request");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_invalid_image() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path(), ServerCommand::default());
        let request = multipart(&[("image", b"this is not an image".as_slice())]);
        let (status, json) = send_json(app.clone(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "invalid_image");

        let query = image_bytes(1, ImageFormat::Png);
        let (status, _) = send_json(app, multipart(&[("image", query.as_slice())])).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upload_limit() {
        let dir = TempDir::new().unwrap();
        let opts = ServerCommand { max_upload_mb: 1, ..Default::default() };
        let app = app(dir.path(), opts);
        let large = vec![0u8; 2 * 1024 * 1024];
        let (status, _) = send(app, multipart(&[("image", large.as_slice())])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_gallery() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path(), ServerCommand::default());
        let (status, json) = send_json(app, get("/api/gallery?limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 3);
        assert_eq!(json["categories"], serde_json::json!(["cat", "dog"]));
        assert_eq!(json["items"].as_array().unwrap().len(), 2);
        assert_eq!(json["items"][0]["imageUrl"], "/dataset/cat/a.jpg");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_gallery_lenient_limit() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path(), ServerCommand::default());
        for uri in ["/api/gallery?limit=0", "/api/gallery?limit=abc", "/api/gallery"] {
            let (status, json) = send_json(app.clone(), get(uri)).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(json["items"].as_array().unwrap().len(), 3, "{uri}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stats_and_rebuild() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path(), ServerCommand::default());

        let (status, stats) = send_json(app.clone(), get("/api/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_images"], 3);
        assert_eq!(stats["device"], "cpu");

        crate::testing::write_image(&dir.path().join("dataset/bird/d.png"), 7);
        let request = Request::post("/api/rebuild").body(Body::empty()).unwrap();
        let (status, stats) = send_json(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_images"], 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_dataset_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("dataset")).unwrap();
        let app = app(dir.path(), ServerCommand::default());
        let (status, json) = send_json(app, get("/api/stats")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "empty_dataset");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_static_images() {
        let dir = TempDir::new().unwrap();
        let opts = ServerCommand { static_prefix: "/images/".to_string(), ..Default::default() };
        let app = app(dir.path(), opts);
        let (status, body) = send(app, get("/images/cat/a.jpg")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, fs::read(dir.path().join("dataset/cat/a.jpg")).unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_not_found_and_docs() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path(), ServerCommand::default());

        let (status, _) = send_json(app.clone(), get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = send_json(app.clone(), get("/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "not_found");

        let (status, json) = send_json(app.clone(), get("/api-docs/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["paths"]["/api/search"].is_object());

        let (status, body) = send(app, get("/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("imretrieval_"));
    }
}
