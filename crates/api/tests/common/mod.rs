#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use vidgen_api::config::ServerConfig;
use vidgen_api::router::build_app_router;
use vidgen_api::state::AppState;
use vidgen_pipeline::{StageExecutor, StageSet};
use vidgen_worker::{Engine, EngineConfig, InMemoryArtifactStore};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

/// Engine settings with no simulated stage latency.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        checkpoint_delay: Duration::ZERO,
        store_retry_backoff: Duration::ZERO,
        ..EngineConfig::default()
    }
}

/// Full application router backed by the reference stages and an
/// in-memory artifact store.
pub fn build_test_app() -> (Router, Arc<Engine>) {
    build_test_app_with(StageSet::reference(Duration::ZERO))
}

pub fn build_test_app_with(stages: StageSet) -> (Router, Arc<Engine>) {
    let config = test_config();
    let engine = Arc::new(
        Engine::start(engine_config(), stages, Arc::new(InMemoryArtifactStore::new())).unwrap(),
    );
    let state = AppState {
        config: Arc::new(config.clone()),
        engine: Arc::clone(&engine),
    };
    (build_app_router(state, &config), engine)
}

/// Reference stages with the generator held for `delay` before running.
pub fn slow_generate_stages(delay: Duration) -> StageSet {
    let reference = StageSet::reference(Duration::ZERO);
    let generate = Arc::clone(reference.executor(vidgen_core::stage::StageKind::Generate));
    reference.with_executor(Arc::new(Delayed {
        inner: generate,
        delay,
    }))
}

struct Delayed {
    inner: Arc<dyn StageExecutor>,
    delay: Duration,
}

#[async_trait::async_trait]
impl StageExecutor for Delayed {
    fn kind(&self) -> vidgen_core::stage::StageKind {
        self.inner.kind()
    }

    async fn execute(
        &self,
        input: vidgen_pipeline::StageData,
        config: &vidgen_pipeline::StageConfig,
        progress: &vidgen_pipeline::StageProgress,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<vidgen_pipeline::StageData, vidgen_pipeline::StageError> {
        vidgen_pipeline::stage::pace(self.delay, cancel).await?;
        self.inner.execute(input, config, progress, cancel).await
    }
}

/// A valid generation request body.
pub fn request_body() -> serde_json::Value {
    serde_json::json!({
        "prompt": "a paper boat drifting down a gutter",
        "aspect_ratio": [16, 9],
        "resolution": 512,
        "fps": 8,
        "video_length": 1,
        "base_model": "sd15",
        "inference_steps": 4,
        "seed": 1234,
    })
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Submit the default request and return the new job id.
pub async fn submit(app: &Router) -> String {
    let response = post_json(app, "/api/v1/jobs", request_body()).await;
    let json = body_json(response).await;
    json["data"]["job_id"].as_str().unwrap().to_string()
}

/// Poll the snapshot endpoint until `status` is reached.
pub async fn wait_for_status(app: &Router, job_id: &str, status: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let json = body_json(get(app, &format!("/api/v1/jobs/{job_id}")).await).await;
        if json["data"]["status"] == status {
            return json;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {job_id} never reached {status}; last seen {json}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
