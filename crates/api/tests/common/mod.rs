#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use reelforge_api::config::ServerConfig;
use reelforge_api::router::build_app_router;
use reelforge_api::state::{AppState, Services};
use reelforge_events::EventBus;
use reelforge_pipeline::proposer::ProposerConfig;
use reelforge_pipeline::{FsProjectStore, StaticProposer};
use reelforge_provider::download::download_to_path;
use reelforge_provider::{
    ImageProvider, PredictionOptions, PredictionOutput, ProviderConfig, ProviderError,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const PROJECT: &str = "demo";

// ---------------------------------------------------------------------------
// Fake provider
// ---------------------------------------------------------------------------

/// Returns `data:` URIs immediately, or waits for [`TestProvider::open`]
/// when built with [`TestProvider::held`].
pub struct TestProvider {
    configured: bool,
    gate: Option<Semaphore>,
}

impl TestProvider {
    pub fn ready() -> Self {
        Self {
            configured: true,
            gate: None,
        }
    }

    pub fn held() -> Self {
        Self {
            configured: true,
            gate: Some(Semaphore::new(0)),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            gate: None,
        }
    }

    pub fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }
}

#[async_trait]
impl ImageProvider for TestProvider {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn create_prediction(
        &self,
        _prompt: &str,
        options: &PredictionOptions,
        cancel: &CancellationToken,
    ) -> Result<PredictionOutput, ProviderError> {
        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Canceled),
                _ = gate.acquire() => {}
            }
        }
        let output = ["data:image/png;base64,Zmlyc3Q=", "data:image/png;base64,bGFzdA=="]
            .into_iter()
            .take(options.output_count.max(1) as usize)
            .map(String::from)
            .collect();
        Ok(PredictionOutput {
            output,
            prediction_id: "pred-test".into(),
            duration: Duration::from_millis(1),
        })
    }

    async fn cancel_prediction(&self, _prediction_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn download_image(&self, uri: &str, dest: &Path) -> Result<u64, ProviderError> {
        download_to_path(&reqwest::Client::new(), uri, dest).await
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub projects: tempfile::TempDir,
    pub data: tempfile::TempDir,
}

impl TestApp {
    pub fn write(&self, relative: &str, bytes: impl AsRef<[u8]>) {
        let path = self.projects.path().join(PROJECT).join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    pub fn read(&self, relative: &str) -> Option<Vec<u8>> {
        std::fs::read(self.projects.path().join(PROJECT).join(relative)).ok()
    }
}

/// Build a test `ServerConfig` with safe defaults over the given dirs.
pub fn test_config(projects: &Path, data: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        projects_root: projects.to_path_buf(),
        data_dir: data.to_path_buf(),
        event_history_capacity: 100,
        provider: ProviderConfig::default(),
        proposer: ProposerConfig {
            api_key: None,
            base_url: "http://127.0.0.1:9".into(),
            model: "test".into(),
        },
    }
}

/// Build the full application router with the production middleware stack
/// over temp project and data directories.
pub fn build_test_app(provider: Arc<TestProvider>) -> TestApp {
    let projects = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(projects.path().join(PROJECT)).unwrap();

    let config = test_config(projects.path(), data.path());
    let store = Arc::new(FsProjectStore::new(projects.path()));
    let state = AppState::assemble(
        config.clone(),
        Services {
            store: store.clone(),
            reindexer: store,
            provider,
            proposer: Arc::new(StaticProposer::Template),
        },
        Arc::new(EventBus::default()),
    );
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        projects,
        data,
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn post_empty(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `GET uri` until `data.status` is one of `terminal`.
pub async fn wait_for_status(app: &Router, uri: &str, terminal: &[&str]) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let response = get(app, uri).await;
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            if terminal.contains(&json["data"]["status"].as_str().unwrap_or_default()) {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("resource did not reach a terminal status")
}
