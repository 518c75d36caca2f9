use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use scribe_engine::{JobDirectory, JobManager};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a whole request body, audio included.
    pub max_upload_bytes: u64,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_upload_bytes: 512 * 1024 * 1024,
            request_timeout_secs: 600,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: JobManager,
    pub directory: JobDirectory,
    pub max_upload_bytes: u64,
    /// Renders `/metrics`; `None` when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes).unwrap_or(usize::MAX);
    Router::new()
        .route("/transcribe", post(handlers::create_transcription))
        .route("/transcripts", get(handlers::list_transcripts))
        .route(
            "/transcripts/{id}",
            get(handlers::get_transcript).delete(handlers::delete_transcript),
        )
        .route("/transcripts/{id}/download", get(handlers::download_transcript))
        .route("/models", get(handlers::list_models))
        .route("/languages", get(handlers::list_languages))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns once the listener is bound.
pub async fn start(
    config: ServerConfig,
    manager: JobManager,
    directory: JobDirectory,
    metrics: Option<PrometheusHandle>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState {
        manager,
        directory,
        max_upload_bytes: config.max_upload_bytes,
        metrics,
    };
    let router = build_router(state, Duration::from_secs(config.request_timeout_secs));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "scribe server started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown_tx: Some(shutdown_tx),
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.server).await;
        tracing::info!("scribe server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::multipart::{Form, Part};
    use reqwest::StatusCode;
    use scribe_core::retry::RetryConfig;
    use scribe_core::JobStatus;
    use scribe_engine::{MockEngine, MockResponse, TranscriptionEngine};
    use scribe_store::{ArtifactStore, MetadataStore};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::Notify;

    struct TestServer {
        base: String,
        manager: JobManager,
        handle: ServerHandle,
        _dir: tempfile::TempDir,
    }

    async fn serve(engine: MockEngine, max_upload_bytes: u64) -> TestServer {
        serve_with_metrics(engine, max_upload_bytes, None).await
    }

    async fn serve_with_metrics(
        engine: MockEngine,
        max_upload_bytes: u64,
        metrics: Option<PrometheusHandle>,
    ) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            MetadataStore::open(dir.path().join("transcripts"), RetryConfig::none())
                .await
                .unwrap(),
        );
        let artifacts = Arc::new(
            ArtifactStore::open(dir.path().join("transcripts"), dir.path().join("uploads"))
                .await
                .unwrap(),
        );
        let engine: Arc<dyn TranscriptionEngine> = Arc::new(engine);
        let manager = JobManager::new(Arc::clone(&store), Arc::clone(&artifacts), engine);
        let directory = JobDirectory::new(store, artifacts);

        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0, // Random port
            max_upload_bytes,
            ..Default::default()
        };
        let handle = start(config, manager.clone(), directory, metrics).await.unwrap();
        assert!(handle.port > 0);
        TestServer {
            base: format!("http://127.0.0.1:{}", handle.port),
            manager,
            handle,
            _dir: dir,
        }
    }

    fn audio_form(formats: &str) -> Form {
        Form::new()
            .part(
                "file",
                Part::bytes(vec![1u8; 2048]).file_name("standup.wav"),
            )
            .text("output_format", formats.to_string())
            .text("language", "en")
    }

    async fn submit(server: &TestServer, form: Form) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/transcribe", server.base))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_active_jobs() {
        let server = serve(MockEngine::new(vec![]), 1024).await;
        let body: Value = reqwest::get(format!("{}/health", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["active_jobs"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_installed_recorder() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("jobs_submitted_total").increment(3);
        });
        let server = serve_with_metrics(MockEngine::new(vec![]), 1024, Some(handle)).await;

        let resp = reqwest::get(format!("{}/metrics", server.base)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.text().await.unwrap().contains("jobs_submitted_total 3"));
    }

    #[tokio::test]
    async fn metrics_endpoint_absent_without_recorder() {
        let server = serve(MockEngine::new(vec![]), 1024).await;
        let resp = reqwest::get(format!("{}/metrics", server.base)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submit_poll_download_scenario() {
        let server = serve(
            MockEngine::repeating(MockResponse::text("good morning\neveryone")),
            1024 * 1024,
        )
        .await;

        let resp = submit(&server, audio_form("json,srt")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let job: Value = resp.json().await.unwrap();
        assert_eq!(job["status"], "pending");
        assert_eq!(job["filename"], "standup.wav");
        assert_eq!(job["filesize"], 2048);
        assert_eq!(job["output_formats"], serde_json::json!(["json", "srt"]));
        let id = job["id"].as_str().unwrap().to_string();

        let mut status = String::new();
        for _ in 0..200 {
            let job: Value = reqwest::get(format!("{}/transcripts/{id}", server.base))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            status = job["status"].as_str().unwrap().to_string();
            if status == JobStatus::Completed.as_str() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, "completed");

        let srt = reqwest::get(format!("{}/transcripts/{id}/download?format=srt", server.base))
            .await
            .unwrap();
        assert_eq!(srt.status(), StatusCode::OK);
        assert_eq!(
            srt.headers()["content-disposition"],
            "attachment; filename=\"transcript_standup.wav.srt\""
        );
        let text = srt.text().await.unwrap();
        assert!(text.starts_with("1\n00:00:00,000 --> 00:00:01,000\ngood morning\n\n"));

        let json = reqwest::get(format!("{}/transcripts/{id}/download", server.base))
            .await
            .unwrap();
        assert_eq!(json.status(), StatusCode::OK);
        let body: Value = json.json().await.unwrap();
        assert_eq!(body["segments"].as_array().unwrap().len(), 2);

        let vtt = reqwest::get(format!("{}/transcripts/{id}/download?format=vtt", server.base))
            .await
            .unwrap();
        assert_eq!(vtt.status(), StatusCode::BAD_REQUEST);
        let body: Value = vtt.json().await.unwrap();
        assert_eq!(body["detail"], "Transcription not available in vtt format");

        let listed: Vec<Value> = reqwest::get(format!("{}/transcripts", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        server.handle.shutdown().await;
    }

    #[tokio::test]
    async fn delete_while_pending_then_not_found() {
        let gate = Arc::new(Notify::new());
        let server = serve(
            MockEngine::new(vec![MockResponse::gated(
                Arc::clone(&gate),
                MockResponse::text("never seen"),
            )]),
            1024 * 1024,
        )
        .await;

        let job: Value = submit(&server, audio_form("json")).await.json().await.unwrap();
        let id = job["id"].as_str().unwrap().to_string();

        let client = reqwest::Client::new();
        let resp = client
            .delete(format!("{}/transcripts/{id}", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "Transcription deleted successfully");

        gate.notify_one();
        server.manager.wait_all().await;

        let resp = reqwest::get(format!("{}/transcripts/{id}", server.base))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn download_before_completion_is_400() {
        let gate = Arc::new(Notify::new());
        let server = serve(
            MockEngine::new(vec![MockResponse::gated(
                Arc::clone(&gate),
                MockResponse::text("later"),
            )]),
            1024 * 1024,
        )
        .await;
        let job: Value = submit(&server, audio_form("txt")).await.json().await.unwrap();
        let id = job["id"].as_str().unwrap();

        let resp = reqwest::get(format!("{}/transcripts/{id}/download?format=txt", server.base))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["detail"], "Transcription is not yet completed");
        gate.notify_one();
    }

    #[tokio::test]
    async fn rejects_bad_submissions() {
        let server = serve(MockEngine::new(vec![]), 1024 * 1024).await;

        let no_file = Form::new().text("model", "base");
        assert_eq!(submit(&server, no_file).await.status(), StatusCode::BAD_REQUEST);

        let bad_model = audio_form("json").text("model", "gigantic");
        assert_eq!(submit(&server, bad_model).await.status(), StatusCode::BAD_REQUEST);

        let bad_vad = audio_form("json").text("vad_threshold", "1.5");
        let resp = submit(&server, bad_vad).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert!(body["detail"].as_str().unwrap().contains("vad_threshold"));

        let listed: Vec<Value> = reqwest::get(format!("{}/transcripts", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let server = serve(MockEngine::new(vec![]), 4096).await;
        let form = Form::new().part(
            "file",
            Part::bytes(vec![0u8; 64 * 1024]).file_name("big.wav"),
        );
        let resp = submit(&server, form).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(server.manager.active_count(), 0);
    }

    #[tokio::test]
    async fn unknown_ids_are_404() {
        let server = serve(MockEngine::new(vec![]), 1024).await;
        for path in ["/transcripts/job_missing", "/transcripts/job_missing/download"] {
            let resp = reqwest::get(format!("{}{path}", server.base)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{path}");
        }
        let resp = reqwest::get(format!("{}/transcripts/job_missing/download?format=pdf", server.base))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn models_and_languages_pass_through() {
        let server = serve(MockEngine::new(vec![]), 1024).await;
        let models: Value = reqwest::get(format!("{}/models", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(models["models"].as_array().unwrap().len(), 5);

        let languages: Value = reqwest::get(format!("{}/languages", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(languages["languages"]["nl"], "dutch");
    }
}
