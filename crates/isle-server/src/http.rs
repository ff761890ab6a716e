//! HTTP API.
//!
//! ## Endpoints
//!
//! - `GET /healthcheck` - Health check
//! - `POST /api/v1/function` - Run a function
//! - `GET /api/v1/admin/jails` - List running sandboxes
//! - `DELETE /api/v1/admin/jails` - Stop every running sandbox
//! - `GET /api/v1/admin/jail/:id` - Inspect a running sandbox
//! - `DELETE /api/v1/admin/jail/:id` - Stop a running sandbox
//! - `GET /api/v1/admin/ips[?state=available|unavailable]` - Address pool
//! - `PUT /api/v1/admin/ips` - Reserve or free an address
//! - `GET /api/v1/admin/stats` - Pool and cache counters
//!
//! Admin endpoints require the configured token in the configured header.

use crate::error::ApiError;
use crate::types::{
    FunctionRequest, FunctionResponse, IpStateUpdate, IpsQuery, JailDetailsResponse,
    JailsResponse, KillAllResponse, KillResponse, PoolResponse, StatsResponse,
};
use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use isle_core::{AddressState, Orchestrator};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Owner tag for addresses reserved through the admin API.
const ADMIN_OWNER: &str = "admin";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    admin_token: Arc<str>,
    admin_header: Arc<str>,
}

impl AppState {
    /// Create handler state.
    pub fn new(
        orchestrator: Orchestrator,
        admin_token: impl Into<Arc<str>>,
        admin_header: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            orchestrator,
            admin_token: admin_token.into(),
            admin_header: admin_header.into(),
        }
    }

    /// The orchestrator behind the API.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    tracing::debug!("Building HTTP router");

    let admin = Router::new()
        .route("/jails", get(list_jails).delete(kill_all_jails))
        .route("/jail/:id", get(jail_details).delete(kill_jail))
        .route("/ips", get(list_ips).put(update_ip_state))
        .route("/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/api/v1/function", post(run_function))
        .nest("/api/v1/admin", admin)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server.
///
/// Runs until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(state);

    tracing::info!(%addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.admin_token.is_empty() {
        tracing::warn!("Admin request rejected, no admin token configured");
        return Err(ApiError::Unauthorized);
    }
    let presented = request
        .headers()
        .get(&*state.admin_header)
        .and_then(|v| v.to_str().ok());
    if presented != Some(&*state.admin_token) {
        tracing::warn!(path = %request.uri().path(), "Admin request with bad token");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

async fn healthcheck() -> StatusCode {
    StatusCode::OK
}

async fn run_function(
    State(state): State<AppState>,
    body: Result<Json<FunctionRequest>, JsonRejection>,
) -> Result<Json<FunctionResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let result = state.orchestrator.invoke(req.into()).await?;
    Ok(Json(FunctionResponse {
        timestamp: result.timestamp.timestamp(),
        data: String::from_utf8_lossy(&result.output).into_owned(),
    }))
}

fn jail_id(path: Result<Path<i32>, PathRejection>) -> Result<i32, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

async fn list_jails(State(state): State<AppState>) -> Result<Json<JailsResponse>, ApiError> {
    let jails = state.orchestrator.jails().list_running().await?;
    Ok(Json(JailsResponse { jails }))
}

async fn jail_details(
    State(state): State<AppState>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<JailDetailsResponse>, ApiError> {
    let details = state.orchestrator.jails().inspect(jail_id(path)?).await?;
    Ok(Json(JailDetailsResponse { details }))
}

async fn kill_jail(
    State(state): State<AppState>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<KillResponse>, ApiError> {
    let jid = jail_id(path)?;
    let jails = state.orchestrator.jails();
    jails.inspect(jid).await?;
    jails.stop(jid).await?;
    Ok(Json(KillResponse { deleted: jid }))
}

async fn kill_all_jails(
    State(state): State<AppState>,
) -> Result<Json<KillAllResponse>, ApiError> {
    let deleted = state.orchestrator.jails().stop_all().await?;
    Ok(Json(KillAllResponse { deleted }))
}

async fn list_ips(
    State(state): State<AppState>,
    Query(query): Query<IpsQuery>,
) -> Result<Response, ApiError> {
    let pool = state.orchestrator.pool().snapshot();

    let Some(filter) = query.state else {
        let all: PoolResponse = pool
            .iter()
            .map(|(ip, s)| (ip.to_string(), u8::from(!s.is_available())))
            .collect();
        return Ok(Json(all).into_response());
    };

    let wanted = match filter.as_str() {
        "available" => true,
        "unavailable" => false,
        _ => return Err(ApiError::Unprocessable("unrecognized IP state".into())),
    };
    let ips: Vec<String> = pool
        .iter()
        .filter(|(_, s)| s.is_available() == wanted)
        .map(|(ip, _)| ip.to_string())
        .collect();
    Ok(Json(BTreeMap::from([(filter, ips)])).into_response())
}

async fn update_ip_state(
    State(state): State<AppState>,
    body: Result<Json<IpStateUpdate>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(update) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let ip: Ipv4Addr = update
        .ip
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid IP4 address".into()))?;
    let new_state = match update.state {
        0 => AddressState::Available,
        1 => AddressState::Leased(ADMIN_OWNER.into()),
        _ => return Err(ApiError::BadRequest("invalid state".into())),
    };
    state.orchestrator.pool().set_state(ip, new_state)?;
    tracing::info!(%ip, state = update.state, "Address state updated");
    Ok(StatusCode::OK)
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let pool = state.orchestrator.pool();
    let counters = pool.stats();
    Json(StatsResponse {
        pool_size: pool.len(),
        pool_available: pool.available(),
        allocated: counters.allocated(),
        exhausted: counters.exhausted(),
        released: counters.released(),
        cached_binaries: state.orchestrator.cache().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method};
    use isle_core::{
        AddressPool, BinaryCache, Builder, CommandOutput, CommandRunner, CoreError, Executor,
        Filesystem, HostConfig, JailManager, RepoFetcher, SandboxId, SandboxInstance,
    };
    use std::path::{Path as FsPath, PathBuf};
    use tower::ServiceExt;

    const TOKEN: &str = "s3cret";
    const HEADER: &str = "X-Isle-Token";

    struct HostRunner;

    #[async_trait]
    impl CommandRunner for HostRunner {
        async fn run(&self, program: &str, _args: &[String]) -> std::io::Result<CommandOutput> {
            if program == "jls" {
                return Ok(CommandOutput::ok(
                    "host=new ip4=disable jid=7 name=build path=/zroot/jails/build host.hostname=build\n",
                ));
            }
            Ok(CommandOutput::ok(""))
        }
    }

    struct DirFs(PathBuf);

    #[async_trait]
    impl Filesystem for DirFs {
        async fn create_base_dataset(&self) -> isle_core::Result<()> {
            Ok(())
        }
        async fn clone_base_to_sandbox(&self, name: &str) -> isle_core::Result<()> {
            std::fs::create_dir_all(self.0.join(name).join("etc"))?;
            Ok(())
        }
        async fn create_dataset(&self) -> isle_core::Result<()> {
            Ok(())
        }
        async fn create_snapshot(&self) -> isle_core::Result<()> {
            Ok(())
        }
        async fn remove_dataset(&self, name: &str) -> isle_core::Result<()> {
            let _ = std::fs::remove_dir_all(self.0.join(name));
            Ok(())
        }
    }

    struct NoopRepo;

    #[async_trait]
    impl RepoFetcher for NoopRepo {
        async fn clone_source(&self, _dest: &FsPath, _source: &str) -> isle_core::Result<()> {
            Ok(())
        }
        async fn remove(&self, _source: &str) -> isle_core::Result<()> {
            Ok(())
        }
    }

    struct StubBuilder {
        fail: bool,
    }

    #[async_trait]
    impl Builder for StubBuilder {
        async fn build(&self, id: &SandboxId, _source: &str, _call: &str) -> isle_core::Result<PathBuf> {
            if self.fail {
                return Err(CoreError::Compile {
                    output: "/zroot/jails/build: undefined".into(),
                });
            }
            Ok(PathBuf::from(format!("/bin/{id}")))
        }
    }

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(
            &self,
            _sandbox: &mut SandboxInstance,
            _binary: &FsPath,
            _wants_address: bool,
        ) -> isle_core::Result<Vec<u8>> {
            Ok(b"Hello, world".to_vec())
        }
    }

    fn router_with(dir: &tempfile::TempDir, fail_build: bool) -> Router {
        let config = HostConfig::builder()
            .base_dir(dir.path())
            .ip4_range("10.0.0.1", 3)
            .build()
            .unwrap();
        let pool = Arc::new(AddressPool::new(&config.ip4).unwrap());
        let jails = Arc::new(JailManager::new(
            config,
            Arc::new(DirFs(dir.path().to_path_buf())),
            Arc::new(HostRunner),
        ));
        let orchestrator = Orchestrator::new(
            jails,
            Arc::new(NoopRepo),
            Arc::new(StubBuilder { fail: fail_build }),
            Arc::new(EchoExecutor),
            Arc::new(BinaryCache::new()),
            pool,
        );
        build_router(AppState::new(orchestrator, TOKEN, HEADER))
    }

    fn admin(method: Method, uri: &str, body: Body) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(HEADER, TOKEN)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(&dir, false)
            .oneshot(
                axum::http::Request::get("/healthcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_run_function() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(&dir, false)
            .oneshot(
                axum::http::Request::post("/api/v1/function")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"url":"example.com/pkg","call":"Greet()","ip4":false,"cache_bust":false}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["data"], "Hello, world");
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_run_function_failure_is_generic() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(&dir, true)
            .oneshot(
                axum::http::Request::post("/api/v1/function")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"url":"example.com/pkg","call":"Greet()"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json(response).await;
        assert_eq!(body["error"], "Internal Server Error");
    }

    #[tokio::test]
    async fn test_run_function_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(&dir, false);

        let response = router
            .clone()
            .oneshot(
                axum::http::Request::post("/api/v1/function")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(
                axum::http::Request::post("/api/v1/function")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"url":"../../etc","call":"Greet()"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(&dir, false)
            .oneshot(
                axum::http::Request::get("/api/v1/admin/jails")
                    .header(HEADER, "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_list_and_inspect_jails() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(&dir, false);

        let response = router
            .clone()
            .oneshot(admin(Method::GET, "/api/v1/admin/jails", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["jails"][0]["jid"], 7);
        assert_eq!(body["jails"][0]["name"], "build");

        let response = router
            .clone()
            .oneshot(admin(Method::GET, "/api/v1/admin/jail/7", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["details"]["path"], "/zroot/jails/build");

        let response = router
            .clone()
            .oneshot(admin(Method::GET, "/api/v1/admin/jail/99", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .oneshot(admin(Method::GET, "/api/v1/admin/jail/abc", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_kill_jails() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(&dir, false);

        let response = router
            .clone()
            .oneshot(admin(Method::DELETE, "/api/v1/admin/jail/7", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["deleted"], 7);

        let response = router
            .oneshot(admin(Method::DELETE, "/api/v1/admin/jails", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["deleted"], serde_json::json!([7]));
    }

    #[tokio::test]
    async fn test_ip_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(&dir, false);

        let response = router
            .clone()
            .oneshot(admin(
                Method::PUT,
                "/api/v1/admin/ips",
                Body::from(r#"{"ip":"10.0.0.2","state":1}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(admin(Method::GET, "/api/v1/admin/ips?state=unavailable", Body::empty()))
            .await
            .unwrap();
        assert_eq!(
            json(response).await,
            serde_json::json!({ "unavailable": ["10.0.0.2"] })
        );

        let response = router
            .clone()
            .oneshot(admin(Method::GET, "/api/v1/admin/ips", Body::empty()))
            .await
            .unwrap();
        assert_eq!(
            json(response).await,
            serde_json::json!({ "10.0.0.1": 0, "10.0.0.2": 1, "10.0.0.3": 0 })
        );

        let response = router
            .oneshot(admin(Method::GET, "/api/v1/admin/ips?state=bogus", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_ip_state_update_errors() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with(&dir, false);

        for (body, status) in [
            (r#"{"ip":"10.9.9.9","state":1}"#, StatusCode::NOT_FOUND),
            (r#"{"ip":"not-an-ip","state":1}"#, StatusCode::BAD_REQUEST),
            (r#"{"ip":"10.0.0.1","state":5}"#, StatusCode::BAD_REQUEST),
        ] {
            let response = router
                .clone()
                .oneshot(admin(Method::PUT, "/api/v1/admin/ips", Body::from(body)))
                .await
                .unwrap();
            assert_eq!(response.status(), status, "body {body}");
        }
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let response = router_with(&dir, false)
            .oneshot(admin(Method::GET, "/api/v1/admin/stats", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["pool_size"], 3);
        assert_eq!(body["pool_available"], 3);
    }
}
