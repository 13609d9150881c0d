//! HTTP API of the daemon.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use fleet_models::build::Build;
use fleet_models::build::build_log::LogStream;
use fleet_models::release::Release;
use fleet_models::rollout::Rollout;
use fleet_pipeline::orchestrator::Pipeline;
use fleet_web::{
    build_log::{LiveLogQuery, LiveLogResponse, live_log, parse_after},
    payloads::{CreateRelease, DeployRelease, SubmitBuild, Submitted},
    prelude::Result as WebResult,
    update::mw_update_manifest,
};
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, TraceLayer},
};
use uuid::Uuid;

fn v1(path: &str) -> String {
    format!("/v1/{path}")
}

/// Builds the application router over a pipeline.
pub fn router(pipeline: Pipeline) -> Router {
    let layout = pipeline.layout().clone();

    Router::new()
        .route(&v1("builds"), post(submit_build))
        .route(&v1("builds/{id}"), get(fetch_build))
        .route(&v1("builds/{id}/installer"), post(submit_installer))
        .route(&v1("builds/{id}/logs/live"), get(build_log_live))
        .route(
            &v1("builds/{id}/installer/logs/live"),
            get(installer_log_live),
        )
        .route(&v1("profiles/{id}/releases"), post(create_release))
        .route(&v1("rollouts"), post(deploy_release))
        .route(&v1("releases/{id}/withdraw"), post(withdraw_release))
        .nest_service("/update", ServeDir::new(layout.root()))
        .layer(middleware::from_fn_with_state(layout, mw_update_manifest))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

async fn submit_build(
    State(pipeline): State<Pipeline>,
    Json(payload): Json<SubmitBuild>,
) -> WebResult<(StatusCode, Json<Submitted>)> {
    let build = pipeline.submit_build(payload.into())?;
    Ok((StatusCode::ACCEPTED, Json(Submitted { id: build.id })))
}

async fn fetch_build(
    State(pipeline): State<Pipeline>,
    Path(id): Path<Uuid>,
) -> WebResult<Json<Build>> {
    Ok(Json(pipeline.store().fetch_build(&id)?))
}

async fn submit_installer(
    State(pipeline): State<Pipeline>,
    Path(id): Path<Uuid>,
) -> WebResult<(StatusCode, Json<Submitted>)> {
    pipeline.submit_installer(id)?;
    Ok((StatusCode::ACCEPTED, Json(Submitted { id })))
}

async fn build_log_live(
    State(pipeline): State<Pipeline>,
    Path(id): Path<Uuid>,
    Query(query): Query<LiveLogQuery>,
) -> WebResult<Json<LiveLogResponse>> {
    let after = parse_after(query.after.as_deref());
    Ok(Json(live_log(
        pipeline.store().as_ref(),
        &id,
        LogStream::Build,
        after,
    )?))
}

async fn installer_log_live(
    State(pipeline): State<Pipeline>,
    Path(id): Path<Uuid>,
    Query(query): Query<LiveLogQuery>,
) -> WebResult<Json<LiveLogResponse>> {
    let after = parse_after(query.after.as_deref());
    Ok(Json(live_log(
        pipeline.store().as_ref(),
        &id,
        LogStream::Installer,
        after,
    )?))
}

async fn create_release(
    State(pipeline): State<Pipeline>,
    Path(profile): Path<Uuid>,
    Json(payload): Json<CreateRelease>,
) -> WebResult<(StatusCode, Json<Release>)> {
    let release = pipeline.create_release(profile, payload.into())?;
    Ok((StatusCode::CREATED, Json(release)))
}

async fn deploy_release(
    State(pipeline): State<Pipeline>,
    Json(payload): Json<DeployRelease>,
) -> WebResult<(StatusCode, Json<Rollout>)> {
    let rollout = pipeline
        .deploy_release(payload.fleet_id, payload.release_id)
        .await?;
    Ok((StatusCode::CREATED, Json(rollout)))
}

async fn withdraw_release(
    State(pipeline): State<Pipeline>,
    Path(id): Path<Uuid>,
) -> WebResult<StatusCode> {
    pipeline.withdraw_release(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod test {
    use std::{fs, sync::Arc};

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, header};
    use fleet_models::build::BuildRequest;
    use fleet_models::build::build_status::BuildStatus;
    use fleet_pipeline::layout::UpdatesLayout;
    use fleet_pipeline::orchestrator::PipelineSettings;
    use fleet_pipeline::store::{BuildStore, MemoryStore};
    use serde_json::{Value, json};
    use tower::util::ServiceExt;

    use super::*;

    struct Fixture {
        root: tempfile::TempDir,
        store: Arc<MemoryStore>,
        app: Router,
        fleet: Uuid,
        profile: Uuid,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let fleet = store.add_fleet("edge");
        let profile = store.add_profile("{}", &[fleet]);
        let pipeline = Pipeline::new(
            store.clone(),
            PipelineSettings {
                source_dir: root.path().join("missing-source"),
                build_command: String::from("nix"),
                update_base_url: String::from("http://updates.example.org"),
                allowed_kernels: Vec::new(),
            },
            UpdatesLayout::new(root.path().join("updates")),
        );
        Fixture {
            app: router(pipeline),
            root,
            store,
            fleet,
            profile,
        }
    }

    impl Fixture {
        fn queued_build(&self, version: &str) -> Build {
            self.store
                .create_build(BuildRequest {
                    profile_id: self.profile,
                    fleet_id: self.fleet,
                    version: version.to_string(),
                })
                .unwrap()
        }

        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
            let request = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(body) => request
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string())),
                None => request.body(Body::empty()),
            }
            .unwrap();
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, body.to_vec())
        }
    }

    fn json_body(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn submits_build() {
        let fx = fixture();
        let (status, body) = fx
            .send(
                Method::POST,
                "/v1/builds",
                Some(json!({
                    "profile_id": fx.profile,
                    "fleet_id": fx.fleet,
                    "version": "v1.4.0",
                })),
            )
            .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let id: Uuid = serde_json::from_value(json_body(&body)["id"].clone()).unwrap();
        assert_eq!(fx.store.fetch_build(&id).unwrap().version, "v1.4.0");
    }

    #[tokio::test]
    async fn rejects_invalid_submissions() {
        let fx = fixture();
        let (status, body) = fx
            .send(
                Method::POST,
                "/v1/builds",
                Some(json!({
                    "profile_id": fx.profile,
                    "fleet_id": fx.fleet,
                    "version": "1.4",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(&body)["error"]["message"],
            "version must follow semver format (e.g. v1.1.0)"
        );

        fx.queued_build("v1.0.0");
        let (status, _) = fx
            .send(
                Method::POST,
                "/v1/builds",
                Some(json!({
                    "profile_id": fx.profile,
                    "fleet_id": fx.fleet,
                    "version": "v1.0.0",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = fx
            .send(
                Method::POST,
                "/v1/builds",
                Some(json!({
                    "profile_id": fx.profile,
                    "fleet_id": Uuid::new_v4(),
                    "version": "v1.0.1",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn fetches_builds() {
        let fx = fixture();
        let build = fx.queued_build("v1.0.0");

        let (status, body) = fx
            .send(Method::GET, &format!("/v1/builds/{}", build.id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["status"], "queued");

        let (status, _) = fx
            .send(Method::GET, &format!("/v1/builds/{}", Uuid::new_v4()), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn installer_requires_succeeded_build() {
        let fx = fixture();
        let build = fx.queued_build("v1.0.0");

        let (status, body) = fx
            .send(Method::POST, &format!("/v1/builds/{}/installer", build.id), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            json_body(&body)["error"]["message"],
            "build must succeed before installer can be built"
        );
    }

    #[tokio::test]
    async fn streams_live_logs() {
        let fx = fixture();
        let build = fx.queued_build("v1.0.0");
        fx.store
            .append_log_chunk(&build.id, LogStream::Build, "hello\n")
            .unwrap();
        fx.store
            .update_build_status(&build.id, BuildStatus::Failed, "")
            .unwrap();

        let (status, body) = fx
            .send(
                Method::GET,
                &format!("/v1/builds/{}/logs/live?after=bogus", build.id),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["chunk"], "hello\n");
        assert_eq!(body["status"], "failed");
        assert_eq!(body["done"], true);

        let (_, body) = fx
            .send(
                Method::GET,
                &format!("/v1/builds/{}/installer/logs/live", build.id),
                None,
            )
            .await;
        let body = json_body(&body);
        assert_eq!(body["status"], "not_requested");
        assert_eq!(body["chunk"], "");
    }

    #[tokio::test]
    async fn deploys_and_withdraws_releases() {
        let fx = fixture();
        let build = fx.queued_build("v1.0.0");
        fx.store
            .update_build_status(&build.id, BuildStatus::Succeeded, "/update/artifacts/x/a.efi")
            .unwrap();
        let published = fx
            .root
            .path()
            .join("updates/artifacts")
            .join(build.id.to_string());
        fs::create_dir_all(&published).unwrap();
        fs::write(published.join("fleet_v1.0.0.efi"), "uki").unwrap();

        let (status, body) = fx
            .send(
                Method::POST,
                &format!("/v1/profiles/{}/releases", fx.profile),
                Some(json!({ "build_id": build.id })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let release: Release = serde_json::from_slice(&body).unwrap();
        assert_eq!(release.version, "v1.0.0");
        assert_eq!(release.channel, "stable");

        let (status, body) = fx
            .send(
                Method::POST,
                "/v1/rollouts",
                Some(json!({ "fleet_id": fx.fleet, "release_id": release.id })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json_body(&body)["status"], "completed");

        let (status, body) = fx
            .send(Method::GET, &format!("/update/{}/SHA256SUMS", fx.fleet), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().ends_with("  fleet_v1.0.0.efi\n"));

        let (status, _) = fx
            .send(Method::POST, &format!("/v1/releases/{}/withdraw", release.id), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = fx
            .send(Method::GET, &format!("/update/{}/SHA256SUMS", fx.fleet), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn release_creation_checks_the_profile() {
        let fx = fixture();
        let build = fx.queued_build("v1.0.0");
        let other = fx.store.add_profile("{}", &[fx.fleet]);

        let (status, body) = fx
            .send(
                Method::POST,
                &format!("/v1/profiles/{other}/releases"),
                Some(json!({ "build_id": build.id, "version": "v1.0.0" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_body(&body)["error"]["message"], "build not found");

        let (status, body) = fx
            .send(
                Method::POST,
                &format!("/v1/profiles/{}/releases", fx.profile),
                Some(json!({ "build_id": build.id, "version": "v2", "channel": "Beta" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(&body)["error"]["message"],
            "version must follow semver format (e.g. v1.1.0)"
        );

        let (status, body) = fx
            .send(
                Method::POST,
                &format!("/v1/profiles/{}/releases", fx.profile),
                Some(json!({ "build_id": build.id, "version": "v1.1.0", "channel": "Beta" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json_body(&body)["channel"], "beta");

        let (status, _) = fx
            .send(
                Method::POST,
                &format!("/v1/profiles/{}/releases", fx.profile),
                Some(json!({ "build_id": build.id, "version": "v1.1.0" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn serves_static_updates() {
        let fx = fixture();
        let dir = fx.root.path().join("updates/artifacts/abc");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("fleet_v1.efi"), "uki").unwrap();

        let (status, body) = fx
            .send(Method::GET, "/update/artifacts/abc/fleet_v1.efi", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"uki");

        let (status, _) = fx.send(Method::GET, "/update/SHA256SUMS", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
