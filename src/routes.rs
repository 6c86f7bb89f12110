//! Router for the image directory.
//!
//! Every path is served from the root directory, so there is a single handler
//! behind a catch-all route. GET (and HEAD) only; other methods get 405.

use axum::{middleware, routing::get, Router};
use http::header::{HeaderValue, CACHE_CONTROL, SERVER};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::{CACHE_CONTROL_IMAGES, SERVER_HEADER};
use crate::http::static_files;
use crate::middleware::request_id_layer;
use crate::state::AppState;

/// Creates the Axum router serving the image directory.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(static_files::serve))
        .route("/{*path}", get(static_files::serve))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_IMAGES),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            SERVER,
            HeaderValue::from_static(SERVER_HEADER),
        ))
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::ServerConfig;

    fn router_for(dir: &std::path::Path) -> Router {
        let config = ServerConfig::new(dir, "127.0.0.1", 0, None, None).unwrap();
        create_router(AppState::new(Arc::new(config)))
    }

    async fn send_get(router: Router, uri: &str) -> axum::response::Response {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_serves_file_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.bin"), vec![7u8; 1024]).unwrap();

        let response = send_get(router_for(dir.path()), "/firmware.bin").await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["content-length"], "1024");
        assert_eq!(headers["content-type"], "application/octet-stream");
        assert_eq!(headers["cache-control"], CACHE_CONTROL_IMAGES);
        assert_eq!(headers["server"], SERVER_HEADER);
        assert!(headers.contains_key("x-request-id"));
        assert_eq!(body_bytes(response).await, vec![7u8; 1024]);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = send_get(router_for(dir.path()), "/missing.bin").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_used_as_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.bin"), b"x").unwrap();
        let response = send_get(router_for(dir.path()), "/firmware.bin/more").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_is_not_found() {
        let parent = tempfile::tempdir().unwrap();
        std::fs::write(parent.path().join("secret"), b"top secret").unwrap();
        let root = parent.path().join("images");
        std::fs::create_dir(&root).unwrap();

        let response = send_get(router_for(&root), "/../secret").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send_get(router_for(&root), "/%2e%2e/secret").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_encoding_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let response = send_get(router_for(dir.path()), "/%FF.bin").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_directory_without_slash_redirects() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("v2")).unwrap();

        let response = send_get(router_for(dir.path()), "/v2?x=1").await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()["location"], "/v2/?x=1");
    }

    #[tokio::test]
    async fn test_redirect_never_points_off_host() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("v2")).unwrap();

        let response = send_get(router_for(dir.path()), "//v2").await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()["location"], "/v2/");
    }

    #[tokio::test]
    async fn test_file_with_trailing_slash_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.bin"), b"x").unwrap();

        let response = send_get(router_for(dir.path()), "/firmware.bin/").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_directory_serves_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"<h1>images</h1>").unwrap();

        let response = send_get(router_for(dir.path()), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        assert_eq!(body_bytes(response).await, b"<h1>images</h1>");
    }

    #[tokio::test]
    async fn test_directory_without_index_lists_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.bin"), b"x").unwrap();

        let response = send_get(router_for(dir.path()), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(html.contains("<a href=\"app.bin\">app.bin</a>"));
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.bin"), vec![1u8; 64]).unwrap();

        let response = router_for(dir.path())
            .oneshot(
                Request::builder()
                    .method("HEAD")
                    .uri("/firmware.bin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-length"], "64");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_range_request_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        std::fs::write(dir.path().join("firmware.bin"), &data).unwrap();

        let response = router_for(dir.path())
            .oneshot(
                Request::builder()
                    .uri("/firmware.bin")
                    .header("range", "bytes=0-99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_bytes(response).await, &data[..100]);
    }

    #[tokio::test]
    async fn test_post_is_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.bin"), b"x").unwrap();

        let response = router_for(dir.path())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/firmware.bin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_is_forbidden() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.bin");
        std::fs::write(&path, b"x").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read it anyway.
        if std::fs::File::open(&path).is_ok() {
            eprintln!(
                "SKIPPED test_unreadable_file_is_forbidden: process can read mode 000 files"
            );
            return;
        }

        let response = send_get(router_for(dir.path()), "/locked.bin").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
