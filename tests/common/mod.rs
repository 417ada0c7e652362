use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use hookline::config::{Config, WorkerConfig};
use hookline::db::MemoryStore;
use hookline::delivery::HttpTransport;
use hookline::state::SharedState;
use hookline::worker::{DeliveryWorker, RunSummary};

/// A running test server on the in-memory store, with a bootstrapped tenant.
pub struct TestApp {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub state: SharedState,
    pub client: Client,
    pub tenant_id: Uuid,
    /// Full-scope key for `tenant_id`.
    pub admin_key: String,
    pub worker: DeliveryWorker,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// One delivery pass against whatever the subscriptions point at.
    pub async fn run_worker(&self) -> RunSummary {
        self.worker.run_once().await.expect("worker pass failed")
    }

    /// Issue a key for the admin's tenant with the given scopes, return the secret.
    pub async fn issue_key(&self, scopes: &[&str]) -> String {
        let (body, status) = self
            .post_auth(
                "/api/v1/credentials",
                &self.admin_key,
                &json!({ "name": "test", "scopes": scopes }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "issue key failed: {body}");
        body["secret"].as_str().unwrap().to_string()
    }

    /// Bootstrap a second tenant and return its full-scope key.
    pub async fn other_tenant_key(&self) -> String {
        self.state
            .verifier
            .bootstrap(Uuid::new_v4())
            .await
            .unwrap()
            .unwrap()
            .secret
    }

    /// Create a subscription, return the subscription JSON.
    pub async fn create_subscription(&self, key: &str, target_url: &str, events: &[&str]) -> Value {
        let (body, status) = self
            .post_auth(
                "/api/v1/subscriptions",
                key,
                &json!({ "target_url": target_url, "event_types": events }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create subscription failed: {body}");
        body
    }

    /// Publish an event, return the number of deliveries created.
    pub async fn publish(&self, key: &str, event_type: &str, payload: Value) -> u64 {
        let (body, status) = self
            .post_auth(
                "/api/v1/events",
                key,
                &json!({ "event_type": event_type, "payload": payload }),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED, "publish failed: {body}");
        body["deliveries"].as_u64().unwrap()
    }

    /// Make an authenticated GET request.
    pub async fn get_auth(&self, path: &str, key: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(key)
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make an authenticated POST request with JSON body.
    pub async fn post_auth(&self, path: &str, key: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make an authenticated PUT request with JSON body.
    pub async fn put_auth(&self, path: &str, key: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .put(self.url(path))
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .expect("put request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make an authenticated DELETE request.
    pub async fn delete_auth(&self, path: &str, key: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .delete(self.url(path))
            .bearer_auth(key)
            .send()
            .await
            .expect("delete request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: None,
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        max_body_size: 1_048_576,
        trusted_proxies: vec![],
        log_level: "warn".to_string(),
        bootstrap_tenant: None,
        worker: WorkerConfig {
            worker_count: 1,
            poll_interval: Duration::from_secs(3600),
            batch_size: 50,
            per_tenant_batch: 10,
            concurrency: 4,
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        },
    }
}

/// Spawn a test app on a fresh in-memory store. The worker is driven by the
/// test through `run_worker`, never in the background.
pub async fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let config = test_config();
    let worker_config = config.worker.clone();

    let (app, state) = hookline::build_app(store.clone(), config);

    let tenant_id = Uuid::new_v4();
    let admin_key = state
        .verifier
        .bootstrap(tenant_id)
        .await
        .expect("bootstrap failed")
        .expect("tenant already bootstrapped")
        .secret;

    let transport = HttpTransport::new(worker_config.attempt_timeout).unwrap();
    let worker = DeliveryWorker::new(
        store.clone(),
        Arc::new(transport),
        worker_config,
        state.signal.clone(),
    );

    // Bind to random port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    // Spawn server in background
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    let client = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestApp {
        addr,
        store,
        state,
        client,
        tenant_id,
        admin_key,
        worker,
    }
}

/// A migrated scratch database, or `None` when `DATABASE_URL` is not set.
pub async fn test_pool() -> Option<(PgPool, String)> {
    let _ = dotenvy::dotenv();
    let base_url = std::env::var("DATABASE_URL").ok()?;

    let db_name = format!("hookline_test_{}", Uuid::now_v7().simple());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    Some((pool, db_name))
}

/// Drop the scratch database created by `test_pool`.
pub async fn cleanup_pool(pool: PgPool, db_name: String) {
    pool.close().await;

    let Ok(base_url) = std::env::var("DATABASE_URL") else {
        return;
    };

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)"))
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;
}

fn admin_url(base_url: &str) -> String {
    base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.to_string())
}
