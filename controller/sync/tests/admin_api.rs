//! Exercises the admin client against an in-process mock of the data plane's admin API.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use gateway_sync_controller_core::{
    dataplane::{Config, Route, Target, Upstream},
    EntityValidator, Verdict,
};
use gateway_sync_controller_sync::{
    client::ADMIN_TOKEN_HEADER, AdminApi, AdminClient, AdminError, Backoff, ClientConfig,
    Fingerprint, Status, SyncMetrics, SyncOutcome, Syncer, WorkspaceManager,
};
use pretty_assertions::assert_eq;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

const VERSION: &str = "3.4.1";
const WORKSPACE: &str = "workspace";

#[derive(Clone, Debug)]
struct MockAdmin {
    ready: bool,
    workspace_exists: bool,
    configuration_hash: Option<String>,
    config_post_error: Option<serde_json::Value>,
    route_rejection: Option<String>,
}

#[derive(Default)]
struct Recorded {
    config: Option<Vec<u8>>,
    workspace_created: bool,
    config_posts: usize,
    tokens: Vec<Option<String>>,
    custom_headers: Vec<Option<String>>,
}

#[derive(Clone)]
struct Shared {
    mock: MockAdmin,
    recorded: Arc<Mutex<Recorded>>,
}

struct Server {
    url: String,
    recorded: Arc<Mutex<Recorded>>,
}

impl Default for MockAdmin {
    fn default() -> Self {
        Self {
            ready: true,
            workspace_exists: false,
            configuration_hash: None,
            config_post_error: None,
            route_rejection: None,
        }
    }
}

impl MockAdmin {
    async fn serve(self) -> Server {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let state = Shared {
            mock: self,
            recorded: recorded.clone(),
        };
        let router = Router::new()
            .route("/", get(root))
            .route("/status", get(status))
            .route("/{ws}/workspaces/{id}", get(workspace))
            .route("/workspaces", post(create_workspace))
            .route("/config", get(get_config).post(post_config))
            .route("/schemas/routes/validate", post(validate_route))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to random port");
        let addr = listener.local_addr().expect("listener must have an address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("server error");
        });

        Server {
            url: format!("http://{addr}"),
            recorded,
        }
    }
}

impl Shared {
    fn record_headers(&self, headers: &HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let mut recorded = self.recorded.lock().unwrap();
        recorded.tokens.push(header(ADMIN_TOKEN_HEADER));
        recorded.custom_headers.push(header("x-tenant"));
    }
}

async fn root(State(s): State<Shared>, headers: HeaderMap) -> impl IntoResponse {
    s.record_headers(&headers);
    Json(serde_json::json!({
        "version": VERSION,
        "configuration": {
            "database": "off",
            "router_flavor": "traditional",
            "role": "traditional",
        },
    }))
}

async fn status(State(s): State<Shared>) -> axum::response::Response {
    if !s.mock.ready {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let mut body = serde_json::json!({
        "database": { "reachable": true },
        "server": { "connections_accepted": 1 },
    });
    if let Some(hash) = &s.mock.configuration_hash {
        body["configuration_hash"] = hash.clone().into();
    }
    Json(body).into_response()
}

async fn workspace(State(s): State<Shared>, Path((ws, id)): Path<(String, String)>) -> StatusCode {
    if ws == WORKSPACE && id == WORKSPACE && s.mock.workspace_exists {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn create_workspace(
    State(s): State<Shared>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    if s.mock.workspace_exists {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "message": "unique constraint violation" })),
        )
            .into_response();
    }
    assert_eq!(body, serde_json::json!({ "name": WORKSPACE }));
    s.recorded.lock().unwrap().workspace_created = true;
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": WORKSPACE })),
    )
        .into_response()
}

async fn get_config(State(s): State<Shared>) -> axum::response::Response {
    match s.recorded.lock().unwrap().config.clone() {
        Some(config) => config.into_response(),
        None => Json(serde_json::json!({ "version": VERSION })).into_response(),
    }
}

async fn post_config(
    State(s): State<Shared>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    s.record_headers(&headers);
    let mut recorded = s.recorded.lock().unwrap();
    recorded.config_posts += 1;
    if let Some(error) = &s.mock.config_post_error {
        return (StatusCode::BAD_REQUEST, Json(error.clone())).into_response();
    }
    recorded.config = Some(body.to_vec());
    StatusCode::NO_CONTENT.into_response()
}

async fn validate_route(
    State(s): State<Shared>,
    Json(route): Json<Route>,
) -> axum::response::Response {
    assert!(!route.name.is_empty(), "validated routes must be named");
    match &s.mock.route_rejection {
        Some(message) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "message": message })),
        )
            .into_response(),
        None => (
            StatusCode::OK,
            Json(serde_json::json!({ "message": "schema validation successful" })),
        )
            .into_response(),
    }
}

fn client(server: &Server) -> AdminClient {
    AdminClient::new(
        &server.url,
        &ClientConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
    )
    .expect("client must build")
}

fn desired() -> Config {
    Config::new(
        vec![],
        vec![Upstream {
            name: "httproute.default.web.0".to_string(),
            targets: vec![Target {
                target: "web.default.svc:80".to_string(),
                weight: 1,
            }],
            tags: vec![],
        }],
    )
}

#[tokio::test]
async fn discovers_dbless_data_plane() {
    let server = MockAdmin::default().serve().await;
    let root = client(&server).root().await.expect("root must be reachable");
    assert_eq!(root.version, VERSION);
    assert!(root.is_dbless());
    assert!(!root.supports_expressions());
}

#[tokio::test]
async fn reports_readiness() {
    let server = MockAdmin::default().serve().await;
    assert_eq!(
        client(&server).status().await.expect("status must succeed"),
        Status::Ready {
            configuration_hash: None
        }
    );

    let server = MockAdmin {
        configuration_hash: Some("8f1c0ab2d3".to_string()),
        ..Default::default()
    }
    .serve()
    .await;
    assert_eq!(
        client(&server).status().await.expect("status must succeed"),
        Status::Ready {
            configuration_hash: Some("8f1c0ab2d3".to_string())
        }
    );

    let server = MockAdmin {
        ready: false,
        ..Default::default()
    }
    .serve()
    .await;
    assert_eq!(
        client(&server).status().await.expect("status must succeed"),
        Status::NotReady
    );
}

#[tokio::test]
async fn sends_token_and_headers() {
    let server = MockAdmin::default().serve().await;
    let client = AdminClient::new(
        &server.url,
        &ClientConfig {
            token: Some("s3cr3t".to_string()),
            headers: vec![("x-tenant".to_string(), "blue".to_string())],
            timeout: Duration::from_secs(5),
        },
    )
    .expect("client must build");

    client.root().await.expect("root must be reachable");
    client
        .post_config(b"{}")
        .await
        .expect("config must be accepted");

    let recorded = server.recorded.lock().unwrap();
    assert_eq!(recorded.tokens, vec![Some("s3cr3t".to_string()); 2]);
    assert_eq!(recorded.custom_headers, vec![Some("blue".to_string()); 2]);
}

#[tokio::test]
async fn reads_back_pushed_config() {
    let server = MockAdmin::default().serve().await;
    let client = client(&server);

    // Only a version stub is reported before anything is pushed.
    assert_eq!(client.applied_config().await.expect("config must read"), None);

    let (payload, _) = Fingerprint::encode(&desired()).expect("config must encode");
    client
        .post_config(&payload)
        .await
        .expect("config must be accepted");
    assert_eq!(
        client.applied_config().await.expect("config must read"),
        Some(desired())
    );
}

#[tokio::test]
async fn parses_config_rejections() {
    let server = MockAdmin {
        config_post_error: Some(serde_json::json!({
            "code": 14,
            "name": "invalid declarative configuration",
            "message": "declarative config is invalid: {}",
            "flattened_errors": [{
                "entity_name": "httproute.default.web.0",
                "entity_type": "upstream",
                "errors": [{ "field": "name", "message": "must not be empty" }],
            }],
        })),
        ..Default::default()
    }
    .serve()
    .await;

    let error = client(&server)
        .post_config(b"{}")
        .await
        .expect_err("config must be rejected");
    let AdminError::Rejected(rejection) = &error else {
        panic!("unexpected error: {error}");
    };
    assert_eq!(rejection.code, 14);
    assert_eq!(rejection.flattened_errors.len(), 1);
    assert!(!error.is_transient());
    assert_eq!(
        error.to_string(),
        "configuration rejected by the data plane: declarative config is invalid: {}; upstream httproute.default.web.0: name: must not be empty"
    );
}

#[tokio::test]
async fn manages_workspaces() {
    let server = MockAdmin::default().serve().await;
    let client = client(&server);
    assert!(!client
        .workspace_exists(WORKSPACE)
        .await
        .expect("lookup must succeed"));
    WorkspaceManager::new(WORKSPACE)
        .ensure(&client)
        .await
        .expect("workspace must be created");
    assert!(server.recorded.lock().unwrap().workspace_created);

    let server = MockAdmin {
        workspace_exists: true,
        ..Default::default()
    }
    .serve()
    .await;
    let client = self::client(&server);
    let error = client
        .create_workspace(WORKSPACE)
        .await
        .expect_err("workspace already exists");
    assert!(error.is_conflict());
    WorkspaceManager::new(WORKSPACE)
        .ensure(&client)
        .await
        .expect("existing workspace must be accepted");
    assert!(!server.recorded.lock().unwrap().workspace_created);
}

#[tokio::test]
async fn validates_routes() {
    let route = Route {
        name: "httproute.default.web.0.0".to_string(),
        paths: vec!["/".to_string()],
        ..Default::default()
    };

    let server = MockAdmin::default().serve().await;
    assert_eq!(
        client(&server)
            .validate_route(&route)
            .await
            .expect("validation must complete"),
        Verdict::Valid
    );

    let server = MockAdmin {
        route_rejection: Some("schema violation (paths.1: should start with: /)".to_string()),
        ..Default::default()
    }
    .serve()
    .await;
    assert_eq!(
        client(&server)
            .validate_route(&route)
            .await
            .expect("validation must complete"),
        Verdict::Invalid("schema violation (paths.1: should start with: /)".to_string())
    );
}

#[tokio::test]
async fn syncs_into_workspace() {
    let server = MockAdmin::default().serve().await;
    let mut syncer = Syncer::new(client(&server), Backoff::default(), SyncMetrics::default())
        .with_workspace(WorkspaceManager::new(WORKSPACE));
    let cancel = CancellationToken::new();

    let result = syncer.sync(&desired(), &cancel).await;
    assert_eq!(result.outcome, SyncOutcome::Converged);
    let result = syncer.sync(&desired(), &cancel).await;
    assert_eq!(result.outcome, SyncOutcome::SkippedNoChange);

    let recorded = server.recorded.lock().unwrap();
    assert!(recorded.workspace_created);
    assert_eq!(recorded.config_posts, 1);
}

#[tokio::test]
async fn skips_config_already_applied_before_restart() {
    let server = MockAdmin::default().serve().await;
    let (payload, _) = Fingerprint::encode(&desired()).expect("config must encode");
    client(&server)
        .post_config(&payload)
        .await
        .expect("config must be accepted");

    // A fresh syncer has no record of earlier pushes.
    let mut syncer = Syncer::new(client(&server), Backoff::default(), SyncMetrics::default());
    let result = syncer.sync(&desired(), &CancellationToken::new()).await;
    assert_eq!(result.outcome, SyncOutcome::SkippedNoChange);
    assert_eq!(server.recorded.lock().unwrap().config_posts, 1);
}
