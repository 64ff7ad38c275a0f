//! REST API server.
//!
//! Request-per-call and synchronous: handlers validate, write the ledger and
//! enqueue. Extraction and post-processing never run on this path.

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::AuthenticatedUser;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::CredentialStore;
use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::queue::{DbBroker, DbResultBackend, ResultBackend, TaskBroker};
use crate::repository::DbContext;
use crate::scheduler::{open_store, ScheduleRegistry, SchedulerStore};

/// Shared state for the API server.
#[derive(Clone)]
pub struct AppState {
    pub ctx: DbContext,
    pub settings: Arc<Settings>,
    pub credentials: CredentialStore,
    pub dispatcher: Dispatcher,
    pub broker: Arc<dyn TaskBroker>,
    pub registry: ScheduleRegistry,
}

impl AppState {
    /// Open the ledger, the local broker and the configured scheduler store.
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let ctx = settings.create_db_context();
        ctx.init_schema().await?;

        let broker: Arc<dyn TaskBroker> = Arc::new(DbBroker::new(ctx.pool().clone()));
        let results: Arc<dyn ResultBackend> = Arc::new(DbResultBackend::new(ctx.pool().clone()));
        let store = open_store(&settings.scheduler_store_url()).await?;

        Ok(Self::from_parts(ctx, Arc::new(settings), broker, results, store))
    }

    pub fn from_parts(
        ctx: DbContext,
        settings: Arc<Settings>,
        broker: Arc<dyn TaskBroker>,
        results: Arc<dyn ResultBackend>,
        store: Arc<dyn SchedulerStore>,
    ) -> Self {
        let catalog = Arc::new(settings.datasets.clone());
        Self {
            credentials: CredentialStore::new(ctx.clone()),
            dispatcher: Dispatcher::new(ctx.clone(), broker.clone(), results, catalog),
            registry: ScheduleRegistry::new(ctx.clone(), store),
            ctx,
            settings,
            broker,
        }
    }
}

/// Start the API server.
pub async fn serve(settings: Settings, bind: &str) -> anyhow::Result<()> {
    let state = AppState::new(settings).await?;
    let app = create_router(state);

    let addr: SocketAddr = bind.parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use base64::Engine;
    use chrono::Utc;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::models::{DataFormat, Dataset, DatasetCategory, RequestArgs, User};
    use crate::repository::{NewRequestSpec, UserSpec};
    use crate::scheduler::MemoryStore;

    struct TestApp {
        app: axum::Router,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    fn dataset(name: &str, category: DatasetCategory, public: bool) -> Dataset {
        Dataset {
            name: name.to_string(),
            description: format!("{} dataset", name),
            category,
            format: DataFormat::Bufr,
            license: None,
            attribution: None,
            public,
        }
    }

    async fn setup_test_app() -> TestApp {
        let dir = tempdir().unwrap();
        let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
        settings.datasets = vec![
            dataset("agrmet", DatasetCategory::Observed, true),
            dataset("lm5", DatasetCategory::Forecast, false),
            dataset("radar_sri", DatasetCategory::Radar, false),
        ];
        settings.ensure_directories().unwrap();

        let ctx = settings.create_db_context();
        ctx.init_schema().await.unwrap();

        let broker: Arc<dyn TaskBroker> = Arc::new(DbBroker::new(ctx.pool().clone()));
        let results: Arc<dyn ResultBackend> = Arc::new(DbResultBackend::new(ctx.pool().clone()));
        let state = AppState::from_parts(
            ctx,
            Arc::new(settings),
            broker,
            results,
            Arc::new(MemoryStore::new()),
        );

        TestApp {
            app: create_router(state.clone()),
            state,
            _dir: dir,
        }
    }

    /// Create a user with a key and return it with its Basic header value.
    async fn user_with_key(state: &AppState, email: &str) -> (User, String) {
        let user = state
            .ctx
            .users()
            .create(&UserSpec::new(email, "Test"))
            .await
            .unwrap();
        let key = state.credentials.regenerate(user.id, None, None).await.unwrap();
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", email, key.token));
        (user, format!("Basic {}", encoded))
    }

    fn get(uri: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, auth: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let t = setup_test_app().await;
        let response = t.app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_datasets_anonymous_and_granted() {
        let t = setup_test_app().await;
        let (user, auth) = user_with_key(&t.state, "a@example.org").await;
        t.state.ctx.users().grant_dataset(user.id, "lm5").await.unwrap();

        let response = t.app.clone().oneshot(get("/datasets", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let authorized: Vec<_> = json
            .as_array()
            .unwrap()
            .iter()
            .filter(|d| d["authorized"] == true)
            .map(|d| d["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(authorized, ["agrmet"]);

        let response = t
            .app
            .clone()
            .oneshot(get("/datasets/lm5", Some(&auth)))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["authorized"], true);
        assert_eq!(json["is_public"], false);

        let response = t.app.oneshot(get("/datasets/nope", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unauthorized_is_opaque() {
        let t = setup_test_app().await;
        user_with_key(&t.state, "a@example.org").await;

        let response = t.app.clone().oneshot(get("/usage", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "Unauthorized");

        let bad = base64::engine::general_purpose::STANDARD.encode("a@example.org:wrong");
        let response = t
            .app
            .oneshot(get("/usage", Some(&format!("Basic {}", bad))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_submit_list_and_revoke() {
        let t = setup_test_app().await;
        let (_user, auth) = user_with_key(&t.state, "a@example.org").await;

        let response = t
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/data",
                &auth,
                serde_json::json!({
                    "request_name": "stations",
                    "datasets": ["agrmet"],
                    "reftime": {"from": "2020-01-01T00:00:00"},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        let request_id = json["request_id"].as_i64().unwrap();
        assert!(json["task_id"].as_str().is_some());

        let response = t.app.clone().oneshot(get("/requests", Some(&auth))).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["status"], "PENDING");
        assert_eq!(json[0]["name"], "stations");

        let response = t
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/requests/{}", request_id))
                    .header(header::AUTHORIZATION, &auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "REVOKED");

        let response = t
            .app
            .oneshot(get("/hourly", Some(&auth)))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["limit"], 0);
    }

    #[tokio::test]
    async fn test_submit_rejections() {
        let t = setup_test_app().await;
        let (_user, auth) = user_with_key(&t.state, "a@example.org").await;

        let cases = [
            (serde_json::json!({"datasets": ["lm5"]}), StatusCode::FORBIDDEN),
            (serde_json::json!({"datasets": ["missing"]}), StatusCode::NOT_FOUND),
            (serde_json::json!({"datasets": []}), StatusCode::BAD_REQUEST),
            (
                serde_json::json!({
                    "datasets": ["agrmet"],
                    "postprocessors": [{"processor_type": "quality_filter"}],
                    "output_format": "bufr"
                }),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (body, status) in cases {
            let response = t
                .app
                .clone()
                .oneshot(json_request("POST", "/data", &auth, body))
                .await
                .unwrap();
            assert_eq!(response.status(), status);
        }
    }

    #[tokio::test]
    async fn test_download_checks_owner() {
        let t = setup_test_app().await;
        let (owner, owner_auth) = user_with_key(&t.state, "owner@example.org").await;
        let (_other, other_auth) = user_with_key(&t.state, "other@example.org").await;

        let request = t
            .state
            .ctx
            .requests()
            .create(
                &NewRequestSpec {
                    user_id: owner.id,
                    name: "r".to_string(),
                    args: RequestArgs::default(),
                    task_id: "task-1".to_string(),
                    schedule_id: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let user_dir = t.state.settings.user_download_dir(owner.id);
        std::fs::create_dir_all(&user_dir).unwrap();
        std::fs::write(user_dir.join("out.json"), b"{\"ok\":true}\n").unwrap();
        t.state
            .ctx
            .file_outputs()
            .create("out.json", 12, owner.id, request.id)
            .await
            .unwrap();

        let response = t
            .app
            .clone()
            .oneshot(get("/data/out.json", Some(&owner_auth)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{\"ok\":true}\n");

        for (uri, auth) in [
            ("/data/out.json", &other_auth),
            ("/data/missing.json", &owner_auth),
        ] {
            let response = t.app.clone().oneshot(get(uri, Some(auth))).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_schedule_lifecycle_and_data_ready() {
        let t = setup_test_app().await;
        let (user, auth) = user_with_key(&t.state, "a@example.org").await;
        t.state.ctx.users().grant_dataset(user.id, "radar_sri").await.unwrap();

        let response = t
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/schedules",
                &auth,
                serde_json::json!({
                    "name": "latest-radar",
                    "args": {"datasets": ["radar_sri"]},
                    "schedule": {"type": "interval", "every": 1, "period": "hours"},
                    "on_data_ready": true,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        let id = json["id"].as_i64().unwrap();
        assert_eq!(json["state"], "committed");

        let response = t
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/schedules",
                &auth,
                serde_json::json!({
                    "name": "forever",
                    "args": {"datasets": ["radar_sri"]},
                    "schedule": {"type": "interval", "every": 4294967295u32, "period": "days"},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = t
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/data/ready",
                &auth,
                serde_json::json!({"dataset": "radar_sri"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["fired"], 1);

        let response = t
            .app
            .clone()
            .oneshot(json_request(
                "PATCH",
                &format!("/schedules/{}", id),
                &auth,
                serde_json::json!({"enabled": false}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["enabled"], false);

        let response = t
            .app
            .clone()
            .oneshot(json_request(
                "POST",
                "/data/ready",
                &auth,
                serde_json::json!({"dataset": "radar_sri"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["fired"], 0);

        let response = t
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/schedules/{}", id))
                    .header(header::AUTHORIZATION, &auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = t.app.oneshot(get("/schedules", Some(&auth))).await.unwrap();
        assert!(body_json(response).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_access_key_regeneration() {
        let t = setup_test_app().await;
        let (_user, auth) = user_with_key(&t.state, "a@example.org").await;

        let response = t
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/access-key")
                    .header(header::AUTHORIZATION, &auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let token = body_json(response).await["token"].as_str().unwrap().to_string();

        // The old key no longer works.
        let response = t.app.clone().oneshot(get("/access-key", Some(&auth))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("a@example.org:{}", token));
        let response = t
            .app
            .oneshot(get("/access-key", Some(&format!("Basic {}", encoded))))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["token"], token);
    }
}
