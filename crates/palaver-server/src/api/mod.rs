//! REST API.

mod calls;
mod files;
mod groups;
mod messages;
mod users;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::Method,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use palaver_shared::constants::MAX_PAGE_LIMIT;
use palaver_store::Database;
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::blob_store::BlobStore;
use crate::calls::CallService;
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub hub: Hub,
    pub calls: CallService,
    pub blob_store: Arc<BlobStore>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Database, blob_store: BlobStore, config: ServerConfig) -> Self {
        let db = Arc::new(Mutex::new(db));
        let hub = Hub::default();
        let calls = CallService::new(db.clone(), hub.clone(), config.ring_timeout);
        Self {
            db,
            hub,
            calls,
            blob_store: Arc::new(blob_store),
            rate_limiter: RateLimiter::default(),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Multipart framing needs a little room on top of the file itself.
    let body_limit = state.config.max_blob_size + 64 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/admin/users", post(users::admin_create_user))
        .route("/me", get(users::me).put(users::update_me))
        .route("/contacts", get(users::contacts))
        .route("/users/:id", get(users::show))
        // messages
        .route("/messages", post(messages::send))
        .route(
            "/messages/:id",
            get(messages::conversation).delete(messages::hide),
        )
        .route("/messages/:id/everyone", delete(messages::delete_for_everyone))
        // groups
        .route("/groups", get(groups::list).post(groups::create))
        .route("/groups/:id", get(groups::show))
        .route("/groups/:id/members", post(groups::add_member))
        .route("/groups/:id/members/:user_id", delete(groups::remove_member))
        .route(
            "/groups/:id/messages",
            get(groups::messages).post(groups::send_message),
        )
        .route("/groups/:id/messages/:message_id", delete(groups::hide_message))
        .route(
            "/groups/:id/calls",
            get(calls::group_history).post(calls::start_group),
        )
        // files
        .route("/files", post(files::upload))
        .route("/files/:id", get(files::download))
        // personal calls
        .route("/calls", get(calls::history).post(calls::invite))
        .route("/calls/:id", get(calls::show))
        .route("/calls/:id/events", get(calls::events))
        .route("/calls/:id/answer", post(calls::answer))
        .route("/calls/:id/reject", post(calls::reject))
        .route("/calls/:id/cancel", post(calls::cancel))
        .route("/calls/:id/end", post(calls::end))
        // group calls
        .route("/group-calls/:id", get(calls::show_group))
        .route("/group-calls/:id/join", post(calls::join_group))
        .route("/group-calls/:id/decline", post(calls::decline_group))
        .route("/group-calls/:id/leave", post(calls::leave_group))
        .route("/group-calls/:id/end", post(calls::end_group))
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Clamp a client supplied page size.
fn page_limit(requested: Option<u32>, default: u32) -> u32 {
    requested.unwrap_or(default).clamp(1, MAX_PAGE_LIMIT)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    ring_timeout_secs: u64,
    max_upload_bytes: usize,
    uptime_secs: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        ring_timeout_secs: state.config.ring_timeout.as_secs(),
        max_upload_bytes: state.blob_store.max_size(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use palaver_store::{NewUser, User};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    pub(crate) const ADMIN_TOKEN: &str = "admin-secret";

    pub(crate) struct TestApp {
        pub state: AppState,
        pub router: Router,
        _blobs: TempDir,
    }

    impl TestApp {
        pub(crate) async fn new() -> Self {
            let blobs = TempDir::new().unwrap();
            let config = ServerConfig {
                admin_token: Some(ADMIN_TOKEN.to_string()),
                blob_storage_path: blobs.path().to_path_buf(),
                max_blob_size: 1024,
                ..ServerConfig::default()
            };
            let store = BlobStore::new(config.blob_storage_path.clone(), config.max_blob_size)
                .await
                .unwrap();
            let state = AppState::new(Database::open_in_memory().unwrap(), store, config);
            let router = build_router(state.clone());
            Self {
                state,
                router,
                _blobs: blobs,
            }
        }

        /// Create a user whose API token is `token-<name>`.
        pub(crate) async fn user(&self, name: &str) -> User {
            let new = NewUser {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                phone: None,
            };
            let db = self.state.db.lock().await;
            db.create_user(&new, &token(name)).unwrap()
        }

        pub(crate) async fn request(
            &self,
            method: &str,
            uri: &str,
            auth: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(auth) = auth {
                builder = builder.header("authorization", format!("Bearer {auth}"));
            }
            let req = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            self.send(req).await
        }

        pub(crate) async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let resp = self.router.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }
    }

    pub(crate) fn token(name: &str) -> String {
        format!("token-{name}")
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let app = TestApp::new().await;

        let (status, body) = app.request("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = app.request("GET", "/info", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ring_timeout_secs"], 30);
    }

    #[tokio::test]
    async fn test_requires_token() {
        let app = TestApp::new().await;
        let (status, body) = app.request("GET", "/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = app.request("GET", "/me", Some("nope"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_creates_user() {
        let app = TestApp::new().await;
        let payload = json!({ "name": "Dana", "email": "dana@example.com" });

        let (status, _) = app
            .request("POST", "/admin/users", Some("wrong"), Some(payload.clone()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .request("POST", "/admin/users", Some(ADMIN_TOKEN), Some(payload.clone()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let api_token = body["api_token"].as_str().unwrap().to_string();

        let (status, me) = app.request("GET", "/me", Some(&api_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "dana@example.com");

        let (status, _) = app
            .request("POST", "/admin/users", Some(ADMIN_TOKEN), Some(payload))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_page_limit() {
        assert_eq!(page_limit(None, 50), 50);
        assert_eq!(page_limit(Some(0), 50), 1);
        assert_eq!(page_limit(Some(10_000), 50), MAX_PAGE_LIMIT);
    }
}
