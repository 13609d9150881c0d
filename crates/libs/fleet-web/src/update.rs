//! Dynamic `SHA256SUMS` for the per-fleet update directories.
//!
//! Devices fetch `/update/<fleet>/SHA256SUMS` before downloading artifacts.
//! The manifest is computed on every request from whatever the fleet
//! directory currently holds, so it always matches the live artifacts.

use std::path::PathBuf;

use axum::{
    extract::{Request, State},
    http::{HeaderName, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use fleet_pipeline::{checksums::render_manifest, layout::UpdatesLayout};
use tracing::{error, warn};
use uuid::Uuid;

const UPDATE_PREFIX: &str = "/update/";
const MANIFEST_SUFFIX: &str = "/SHA256SUMS";
const ROOT_MANIFEST_PATH: &str = "/update/SHA256SUMS";

/// Fleet ID addressed by a manifest request path, if the path is one.
///
/// Only the hyphenated UUID form counts; anything else is left to the
/// static file service.
pub fn manifest_fleet(path: &str) -> Option<&str> {
    let fleet = path
        .strip_prefix(UPDATE_PREFIX)?
        .strip_suffix(MANIFEST_SUFFIX)?;
    (fleet.len() == 36 && Uuid::try_parse(fleet).is_ok()).then_some(fleet)
}

/// Middleware answering manifest requests before the static file service sees them.
pub async fn mw_update_manifest(
    State(layout): State<UpdatesLayout>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path() == ROOT_MANIFEST_PATH {
        return StatusCode::NOT_FOUND.into_response();
    }
    match manifest_fleet(req.uri().path()).map(|fleet| layout.fleet_dir(fleet)) {
        Some(dir) => manifest_response(dir, req.method()).await,
        None => next.run(req).await,
    }
}

/// Serves the manifest of `dir`.
pub async fn manifest_response(dir: PathBuf, method: &Method) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
        )
            .into_response();
    }

    let rendered = tokio::task::spawn_blocking({
        let dir = dir.clone();
        move || render_manifest(&dir)
    })
    .await;
    let content = match rendered {
        Ok(Ok(content)) => content,
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response();
        }
        Ok(Err(err)) => {
            error!("Failed to render checksums for {}: {}", dir.display(), err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            warn!("Checksum task for {} failed: {}", dir.display(), err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let headers: [(HeaderName, String); 5] = [
        (header::CONTENT_TYPE, String::from("text/plain; charset=utf-8")),
        (header::CACHE_CONTROL, String::from("no-store, max-age=0")),
        (header::PRAGMA, String::from("no-cache")),
        (header::EXPIRES, String::from("0")),
        (header::CONTENT_LENGTH, content.len().to_string()),
    ];
    if method == Method::HEAD {
        return (StatusCode::OK, headers).into_response();
    }
    (StatusCode::OK, headers, content).into_response()
}

#[cfg(test)]
mod test {
    use std::fs;

    use axum::{Router, body::Body, body::to_bytes, middleware, routing::get};
    use tower::util::ServiceExt;

    use super::*;

    const FLEET: &str = "0b7e3f0c-3c1e-4a43-9e55-3f3f3b5c2a10";

    fn app(layout: UpdatesLayout) -> Router {
        Router::new()
            .route("/update/{*path}", get(|| async { "static" }))
            .layer(middleware::from_fn_with_state(layout, mw_update_manifest))
    }

    fn request(method: Method, uri: &str) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn fixture() -> (tempfile::TempDir, UpdatesLayout) {
        let root = tempfile::tempdir().unwrap();
        let layout = UpdatesLayout::new(root.path());
        let fleet = layout.fleet_dir(FLEET);
        fs::create_dir_all(&fleet).unwrap();
        fs::write(fleet.join("fleet_v1.efi"), "uki").unwrap();
        fs::write(fleet.join("fleet_v1.nix-store.raw"), "store").unwrap();
        fs::write(fleet.join("notes.txt"), "ignored").unwrap();
        (root, layout)
    }

    #[test]
    fn matches_only_uuid_segments() {
        assert_eq!(manifest_fleet(&format!("/update/{FLEET}/SHA256SUMS")), Some(FLEET));
        assert_eq!(manifest_fleet("/update/edge/SHA256SUMS"), None);
        assert_eq!(manifest_fleet("/update/SHA256SUMS"), None);
        assert_eq!(
            manifest_fleet(&format!("/update/{}/SHA256SUMS", FLEET.replace('-', ""))),
            None
        );
        assert_eq!(manifest_fleet(&format!("/update/a/{FLEET}/SHA256SUMS")), None);
    }

    #[tokio::test]
    async fn serves_manifest_with_cache_headers() {
        let (_root, layout) = fixture();
        let response = app(layout)
            .oneshot(request(Method::GET, &format!("/update/{FLEET}/SHA256SUMS")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store, max-age=0");
        assert_eq!(response.headers()[header::EXPIRES], "0");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        let names: Vec<_> = body
            .lines()
            .map(|line| line.split_once("  ").unwrap().1)
            .collect();
        assert_eq!(names, ["fleet_v1.efi", "fleet_v1.nix-store.raw"]);
    }

    #[tokio::test]
    async fn head_has_length_but_no_body() {
        let (_root, layout) = fixture();
        let uri = format!("/update/{FLEET}/SHA256SUMS");
        let get = app(layout.clone())
            .oneshot(request(Method::GET, &uri))
            .await
            .unwrap();
        let length = get.headers()[header::CONTENT_LENGTH].clone();

        let head = app(layout).oneshot(request(Method::HEAD, &uri)).await.unwrap();
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(head.headers()[header::CONTENT_LENGTH], length);
        let body = to_bytes(head.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn rejects_other_methods() {
        let (_root, layout) = fixture();
        let response = app(layout)
            .oneshot(request(Method::POST, &format!("/update/{FLEET}/SHA256SUMS")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");
    }

    #[tokio::test]
    async fn missing_fleet_and_root_manifest_are_not_found() {
        let (_root, layout) = fixture();
        let missing = app(layout.clone())
            .oneshot(request(
                Method::GET,
                "/update/11111111-2222-3333-4444-555555555555/SHA256SUMS",
            ))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let root = app(layout)
            .oneshot(request(Method::GET, "/update/SHA256SUMS"))
            .await
            .unwrap();
        assert_eq!(root.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_paths_fall_through() {
        let (_root, layout) = fixture();
        let response = app(layout)
            .oneshot(request(Method::GET, "/update/edge/SHA256SUMS"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"static");
    }
}
