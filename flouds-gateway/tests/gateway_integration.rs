//! End-to-end gateway tests over the in-memory mock cluster
//!
//! Each case builds a fresh gateway with temp storage, drives the axum
//! router with `tower::ServiceExt::oneshot`, and inspects the mock cluster
//! for backend side effects.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use flouds_config::GatewayConfig;
use flouds_core::mocks::{MockBackendConnector, MockCluster};
use flouds_core::types::tenant::TenantCode;
use flouds_gateway::{build_gateway, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestEnv {
    app: Router,
    state: AppState,
    cluster: Arc<MockCluster>,
    admin_secret: String,
    _data_dir: tempfile::TempDir,
}

async fn setup() -> TestEnv {
    setup_with(|_| {}).await
}

async fn setup_with(tweak: impl FnOnce(&mut GatewayConfig)) -> TestEnv {
    let data_dir = tempfile::tempdir().expect("temp dir");
    let mut config = GatewayConfig::default();
    config.storage.clients_db_path = data_dir
        .path()
        .join("flouds.db")
        .to_string_lossy()
        .into_owned();
    config.storage.secrets_dir = data_dir
        .path()
        .join("secrets")
        .to_string_lossy()
        .into_owned();
    config.database.password = Some("root-pw".to_string());
    tweak(&mut config);

    let cluster = MockCluster::new();
    let connector = Arc::new(MockBackendConnector::new(cluster.clone()));
    let gateway = build_gateway(config, connector).await.expect("bootstrap");

    let admin_secret = std::fs::read_to_string(
        std::path::Path::new(&gateway.state.config.storage.secrets_dir).join("admin.secret"),
    )
    .expect("seeded admin credential");

    TestEnv {
        app: gateway.router,
        state: gateway.state,
        cluster,
        admin_secret,
        _data_dir: data_dir,
    }
}

impl TestEnv {
    fn admin_auth(&self) -> String {
        format!("Bearer admin:{}", self.admin_secret)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.expect("infallible");
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn post_json(
        &self,
        path: &str,
        auth: &str,
        tenant: Option<&str>,
        db_token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .header("authorization", auth);
        if let Some(tenant) = tenant {
            builder = builder.header("x-tenant-code", tenant);
        }
        if let Some(token) = db_token {
            builder = builder.header("flouds-vectordb-token", token);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        self.send(request).await
    }

    async fn get(&self, path: &str, auth: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        let request = builder.body(Body::empty()).unwrap();
        self.send(request).await
    }

    /// Provision the demo tenant and a schema; returns the tenant db token
    async fn provision_demo(&self) -> String {
        let (status, body) = self
            .post_json(
                "/api/v1/vector_store/set_vector_store",
                &self.admin_auth(),
                Some("demo"),
                Some("root|root-pw"),
                json!({}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "provisioning failed: {body}");
        let results = &body["results"];
        assert_eq!(results["database_created"], json!(true));
        let username = results["username"].as_str().unwrap().to_string();
        let password = results["password"].as_str().unwrap().to_string();

        let (status, body) = self
            .post_json(
                "/api/v1/vector_store/generate_schema",
                &self.admin_auth(),
                Some("demo"),
                Some(&format!("{username}|{password}")),
                json!({"model_name": "m1", "dimension": 4, "metric_type": "COSINE"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "schema failed: {body}");
        assert_eq!(body["results"]["created"], json!(true));

        format!("{username}|{password}")
    }

    /// Create a tenant-bound data-plane client
    fn data_client(&self, username: &str, secret: &str) -> String {
        self.state
            .key_manager
            .create_client(
                username,
                secret,
                &TenantCode::parse("demo").unwrap(),
                &["read", "write"],
            )
            .unwrap();
        format!("Bearer {username}:{secret}")
    }
}

#[tokio::test]
async fn test_provision_insert_search_flow() {
    let env = setup().await;
    let db_token = env.provision_demo().await;
    let user_auth = env.data_client("svc-demo", "svc-secret-1");

    // Second provisioning call is idempotent
    let (status, body) = env
        .post_json(
            "/api/v1/vector_store/set_vector_store",
            &env.admin_auth(),
            Some("demo"),
            Some("root|root-pw"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["database_created"], json!(false));
    assert_eq!(body["results"]["username"], json!("demo_user"));
    assert!(body["results"]["password"].is_null());

    // Insert two vectors
    let (status, body) = env
        .post_json(
            "/api/v1/vector_store/insert",
            &user_auth,
            Some("demo"),
            Some(&db_token),
            json!({
                "model_name": "m1",
                "data": [
                    {"key": "a", "chunk": "hello world", "vector": [1.0, 0.0, 0.0, 0.0]},
                    {"key": "b", "chunk": "goodbye", "vector": [0.0, 1.0, 0.0, 0.0]},
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "insert failed: {body}");
    assert_eq!(body["results"]["inserted"], json!(2));
    assert!(body["success"].as_bool().unwrap());
    assert!(body["time_taken_ms"].is_u64());

    // Dense search ranks the aligned vector first
    let (status, body) = env
        .post_json(
            "/api/v1/vector_store/search",
            &user_auth,
            Some("demo"),
            Some(&db_token),
            json!({"model": "m1", "vector": [1.0, 0.0, 0.0, 0.0], "limit": 2}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "search failed: {body}");
    let results = body["results"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["id"], json!("a"));
    assert!(results[0]["score"].as_f64().unwrap() >= results[1]["score"].as_f64().unwrap());
    assert_eq!(body["results"]["total_count"], json!(2));
}

#[tokio::test]
async fn test_hybrid_rrf_promotes_sparse_match() {
    let env = setup().await;
    let db_token = env.provision_demo().await;
    let user_auth = env.data_client("svc-demo", "svc-secret-1");

    env.post_json(
        "/api/v1/vector_store/insert",
        &user_auth,
        Some("demo"),
        Some(&db_token),
        json!({
            "model_name": "m1",
            "data": [
                {"key": "a", "chunk": "hello world", "vector": [1.0, 0.0, 0.0, 0.0]},
                {"key": "b", "chunk": "goodbye", "vector": [0.0, 1.0, 0.0, 0.0]},
            ],
        }),
    )
    .await;

    // Dense-only prefers a
    let (_, body) = env
        .post_json(
            "/api/v1/vector_store/search",
            &user_auth,
            Some("demo"),
            Some(&db_token),
            json!({"model": "m1", "vector": [0.9, 0.1, 0.0, 0.0], "limit": 2}),
        )
        .await;
    assert_eq!(body["results"]["results"][0]["id"], json!("a"));

    // Hybrid: b is rank 1 sparse + rank 2 dense, beating a's single rank 1
    let (status, body) = env
        .post_json(
            "/api/v1/vector_store/search",
            &user_auth,
            Some("demo"),
            Some(&db_token),
            json!({
                "model": "m1",
                "vector": [0.9, 0.1, 0.0, 0.0],
                "limit": 2,
                "hybrid_search": true,
                "text_filter": "goodbye",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"]["results"].as_array().unwrap();
    assert_eq!(results[0]["id"], json!("b"));
    assert_eq!(results[1]["id"], json!("a"));
    let score_b = results[0]["score"].as_f64().unwrap();
    let score_a = results[1]["score"].as_f64().unwrap();
    assert!((score_b - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-4);
    assert!((score_a - 1.0 / 61.0).abs() < 1e-4);
}

#[tokio::test]
async fn test_provisioning_rollback_on_grant_failure() {
    let env = setup().await;
    env.cluster.fail_once("grant_role", "grant refused").await;

    let (status, body) = env
        .post_json(
            "/api/v1/vector_store/set_vector_store",
            &env.admin_auth(),
            Some("demo"),
            Some("root|root-pw"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "expected failure: {body}");
    assert_eq!(body["type"], json!("operation_error"));

    // Reverse rollback removed the user and role created before the failure
    assert!(!env.cluster.has_user("demo_user").await);
    assert!(!env.cluster.has_role("flouds_demo_role").await);
}

#[tokio::test]
async fn test_ip_rate_limit_shape() {
    let env = setup_with(|config| {
        config.rate_limit.ip_limit = 3;
    })
    .await;
    let auth = env.admin_auth();

    for _ in 0..3 {
        let (status, _) = env.get("/api/v1/admin/fingerprints", Some(&auth)).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = env.get("/api/v1/admin/fingerprints", Some(&auth)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], json!("Rate Limit Exceeded"));
    assert_eq!(body["type"], json!("rate_limit_error"));
    assert_eq!(body["limit_info"]["limit"], json!(3));
    assert_eq!(body["limit_info"]["period"], json!(60));
    assert_eq!(body["limit_info"]["limit_type"], json!("ip"));
    let retry_after = body["limit_info"]["retry_after"].as_u64().unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn test_tenant_rate_limit_includes_tier() {
    let env = setup_with(|config| {
        config.rate_limit.tenant_default_limit = 2;
    })
    .await;
    let auth = env.admin_auth();

    for _ in 0..2 {
        let (status, _) = env
            .post_json(
                "/api/v1/config/add",
                &auth,
                Some("busy-tenant"),
                None,
                json!({"key": "k", "value": "v"}),
            )
            .await;
        // First add succeeds, second conflicts; both count against the window
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);
    }
    let (status, body) = env
        .post_json(
            "/api/v1/config/add",
            &auth,
            Some("busy-tenant"),
            None,
            json!({"key": "k2", "value": "v"}),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["limit_info"]["limit_type"], json!("tenant"));
    assert_eq!(body["limit_info"]["tier"], json!("default"));
    assert_eq!(
        body["suggestion"],
        json!("Consider upgrading your tier for higher limits")
    );
}

#[tokio::test]
async fn test_error_details_are_sanitised() {
    let env = setup().await;
    env.cluster
        .fail_once(
            "create_database",
            "connection to mongodb://admin:p@ss@10.0.0.1 failed",
        )
        .await;

    let (status, body) = env
        .post_json(
            "/api/v1/vector_store/set_vector_store",
            &env.admin_auth(),
            Some("demo"),
            Some("root|root-pw"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let details = body["details"].as_str().unwrap();
    assert!(details.contains("[REDACTED]"), "details: {details}");
    assert!(!details.contains("mongodb://"));
    assert!(!details.contains("10.0.0.1"));
    assert!(!details.contains("p@ss"));
}

#[tokio::test]
async fn test_config_cache_invalidation_drives_cors() {
    let env = setup_with(|config| {
        // Global default denies everything so the tenant entry decides
        config.security.cors_origins = vec!["https://nothing.example".to_string()];
    })
    .await;
    let auth = env.admin_auth();

    let preflight = |origin: &'static str| {
        let app = env.app.clone();
        async move {
            let request = Request::builder()
                .method("OPTIONS")
                .uri("/api/v1/vector_store/search")
                .header("origin", origin)
                .header("x-tenant-code", "t1")
                .body(Body::empty())
                .unwrap();
            app.oneshot(request).await.unwrap().status()
        }
    };

    let (status, _) = env
        .post_json(
            "/api/v1/config/add",
            &auth,
            Some("t1"),
            None,
            json!({"key": "cors_origins", "value": "https://v1.example"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(preflight("https://v1.example").await, StatusCode::NO_CONTENT);
    assert_eq!(preflight("https://v2.example").await, StatusCode::FORBIDDEN);

    // Update the origin list; the very next preflight must see it
    let request = Request::builder()
        .method("PUT")
        .uri("/api/v1/config/update")
        .header("content-type", "application/json")
        .header("authorization", &auth)
        .header("x-tenant-code", "t1")
        .body(Body::from(
            json!({"key": "cors_origins", "value": "https://v2.example"}).to_string(),
        ))
        .unwrap();
    let (status, _) = env.send(request).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(preflight("https://v2.example").await, StatusCode::NO_CONTENT);
    assert_eq!(preflight("https://v1.example").await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_auth_and_authorization_failures() {
    let env = setup().await;
    let db_token = env.provision_demo().await;

    // Missing credentials
    let (status, body) = env.get("/api/v1/admin/fingerprints", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["type"], json!("authentication_error"));

    // Wrong secret
    let (status, _) = env
        .get("/api/v1/admin/fingerprints", Some("Bearer admin:wrong"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Tenant-bound client cannot act as another tenant
    env.data_client("svc-demo", "svc-secret-1");
    let (status, body) = env
        .post_json(
            "/api/v1/vector_store/insert",
            "Bearer svc-demo:svc-secret-1",
            Some("other-tenant"),
            Some(&db_token),
            json!({"model_name": "m1", "data": []}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], json!("tenant_error"));

    // Read-only client cannot insert
    env.state
        .key_manager
        .create_client(
            "reader",
            "reader-secret",
            &TenantCode::parse("demo").unwrap(),
            &["read"],
        )
        .unwrap();
    let (status, body) = env
        .post_json(
            "/api/v1/vector_store/insert",
            "Bearer reader:reader-secret",
            Some("demo"),
            Some(&db_token),
            json!({
                "model_name": "m1",
                "data": [{"key": "x", "chunk": "c", "vector": [0.0, 0.0, 0.0, 1.0]}],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["type"], json!("authorization_error"));

    // Non-admin cannot provision
    let (status, _) = env
        .post_json(
            "/api/v1/vector_store/set_vector_store",
            "Bearer svc-demo:svc-secret-1",
            Some("demo"),
            Some("root|root-pw"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_dimension_and_limit_boundaries() {
    let env = setup().await;
    let db_token = env.provision_demo().await;

    for bad_dim in [0, 4097] {
        let (status, body) = env
            .post_json(
                "/api/v1/vector_store/generate_schema",
                &env.admin_auth(),
                Some("demo"),
                Some(&db_token),
                json!({"model_name": "m-bad", "dimension": bad_dim}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], json!("validation_error"));
    }

    // Boundary dimensions are accepted
    for (model, dim) in [("m-min", 1), ("m-max", 4096)] {
        let (status, _) = env
            .post_json(
                "/api/v1/vector_store/generate_schema",
                &env.admin_auth(),
                Some("demo"),
                Some(&db_token),
                json!({"model_name": model, "dimension": dim}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    // Schema conflict on a differing dimension
    let (status, body) = env
        .post_json(
            "/api/v1/vector_store/generate_schema",
            &env.admin_auth(),
            Some("demo"),
            Some(&db_token),
            json!({"model_name": "m-min", "dimension": 2}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["type"], json!("schema_conflict"));

    // limit = 0 is rejected
    let user_auth = env.data_client("svc-demo", "svc-secret-1");
    let (status, _) = env
        .post_json(
            "/api/v1/vector_store/search",
            &user_auth,
            Some("demo"),
            Some(&db_token),
            json!({"model": "m1", "vector": [0.0, 0.0, 0.0, 0.0], "limit": 0}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upsert_overwrites_on_repeated_key() {
    let env = setup().await;
    let db_token = env.provision_demo().await;
    let user_auth = env.data_client("svc-demo", "svc-secret-1");

    for chunk in ["original text", "replacement text"] {
        let (status, _) = env
            .post_json(
                "/api/v1/vector_store/insert",
                &user_auth,
                Some("demo"),
                Some(&db_token),
                json!({
                    "model_name": "m1",
                    "data": [{"key": "a", "chunk": chunk, "vector": [1.0, 0.0, 0.0, 0.0]}],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = env
        .post_json(
            "/api/v1/vector_store/search",
            &user_auth,
            Some("demo"),
            Some(&db_token),
            json!({"model": "m1", "vector": [1.0, 0.0, 0.0, 0.0], "limit": 1}),
        )
        .await;
    assert_eq!(body["results"]["results"][0]["chunk"], json!("replacement text"));
}

#[tokio::test]
async fn test_health_endpoints() {
    let env = setup().await;

    let (status, body) = env.get("/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("alive"));

    let (status, _) = env.get("/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = env.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["milvus"]["connected"], json!(true));
    assert_eq!(body["configuration"]["valid"], json!(true));

    // Pool stats require admin
    let (status, _) = env.get("/health/connections", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = env
        .get("/health/connections", Some(&env.admin_auth()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["max_entries"].is_u64());

    // Backend outage flips readiness
    env.cluster.reject_connections(true);
    let (status, _) = env.get("/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_reset_password_rotates_and_returns_once() {
    let env = setup().await;
    env.provision_demo().await;
    let before = env.cluster.password_of("demo_user").await.unwrap();

    let (status, body) = env
        .post_json(
            "/api/v1/vector_store_users/reset_password",
            &env.admin_auth(),
            Some("demo"),
            Some("root|root-pw"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_password = body["results"]["new_password"].as_str().unwrap();
    assert_ne!(new_password, before);
    assert_eq!(
        env.cluster.password_of("demo_user").await.unwrap(),
        new_password
    );
}

#[tokio::test]
async fn test_config_encrypted_value_masked() {
    let env = setup().await;
    let auth = env.admin_auth();

    let (status, _) = env
        .post_json(
            "/api/v1/config/add",
            &auth,
            Some("t1"),
            None,
            json!({"key": "external_api_credential", "value": "super-secret", "encrypted": true}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = env
        .get(
            "/api/v1/config/get?key=external_api_credential&tenant_code=t1",
            Some(&auth),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["value"], json!("<encrypted>"));
    assert_eq!(body["results"]["encrypted"], json!(true));
    // The raw secret never crosses the API surface
    assert!(!body.to_string().contains("super-secret"));
}

#[tokio::test]
async fn test_trusted_host_rejection() {
    let env = setup_with(|config| {
        config.security.trusted_hosts = vec!["*.example.com".to_string()];
    })
    .await;

    let request = Request::builder()
        .method("GET")
        .uri("/health/live")
        .header("host", "api.example.com:443")
        .body(Body::empty())
        .unwrap();
    let (status, _) = env.send(request).await;
    assert_eq!(status, StatusCode::OK);

    // Bare apex is matched by the leading-wildcard pattern
    let request = Request::builder()
        .method("GET")
        .uri("/health/live")
        .header("host", "example.com")
        .body(Body::empty())
        .unwrap();
    let (status, _) = env.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .method("GET")
        .uri("/health/live")
        .header("host", "evil.invalid")
        .body(Body::empty())
        .unwrap();
    let (status, body) = env.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], json!("validation_error"));
}

#[tokio::test]
async fn test_pool_reuses_clients_across_requests() {
    let env = setup().await;
    let db_token = env.provision_demo().await;
    let user_auth = env.data_client("svc-demo", "svc-secret-1");

    let before = env.cluster.connect_count();
    for _ in 0..3 {
        let (status, _) = env
            .post_json(
                "/api/v1/vector_store/search",
                &user_auth,
                Some("demo"),
                Some(&db_token),
                json!({"model": "m1", "vector": [0.0, 0.0, 0.0, 1.0], "limit": 1}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    // All three searches reuse the client pooled during schema generation
    assert_eq!(env.cluster.connect_count(), before);
    assert!(env.state.pool.stats().total >= 1);
}
