use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scribe_core::{Segment, SegmentedResult, TranscriptionParams};
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::engine::{EngineError, EngineRequest, ProgressSink, TranscriptionEngine};

/// Pre-programmed engine outcomes for deterministic tests.
#[derive(Clone)]
pub enum MockResponse {
    Success(SegmentedResult),
    Error(EngineError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Block until the notify fires, then resolve the inner response.
    WaitFor(Arc<Notify>, Box<MockResponse>),
    /// Report each `(processed, total)` pair, then resolve the inner response.
    Progress(Vec<(u64, Option<u64>)>, Box<MockResponse>),
    /// Panic inside `transcribe` with the given message.
    Panic(String),
}

impl MockResponse {
    /// One segment per line of `text`, each one second long.
    pub fn text(text: &str) -> Self {
        let segments = text
            .lines()
            .enumerate()
            .map(|(i, line)| Segment::new(i as f64, (i + 1) as f64, format!(" {line}")))
            .collect();
        let mut result = SegmentedResult::from_segments(segments);
        result.language = Some("en".into());
        Self::Success(result)
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    pub fn gated(gate: Arc<Notify>, inner: MockResponse) -> Self {
        Self::WaitFor(gate, Box::new(inner))
    }
}

/// Engine that answers calls in order from a scripted list.
pub struct MockEngine {
    responses: Vec<MockResponse>,
    fallback: Option<MockResponse>,
    call_count: AtomicUsize,
    calls: Mutex<Vec<TranscriptionParams>>,
}

impl MockEngine {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            fallback: None,
            call_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `response`.
    pub fn repeating(response: MockResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Parameters of every call so far.
    pub fn calls(&self) -> Vec<TranscriptionParams> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TranscriptionEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcribe(
        &self,
        request: EngineRequest<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<SegmentedResult, EngineError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(request.params.clone());

        let Some(response) = self.responses.get(idx).or(self.fallback.as_ref()) else {
            return Err(EngineError::Unavailable(format!(
                "MockEngine: no response configured for call {idx}"
            )));
        };
        resolve_response(response, progress).await
    }

    async fn languages(&self) -> Result<Value, EngineError> {
        Ok(json!({"languages": {"en": "english", "nl": "dutch", "de": "german"}}))
    }
}

/// Unrolls nested wrappers iteratively to avoid recursive async.
async fn resolve_response(
    response: &MockResponse,
    progress: &dyn ProgressSink,
) -> Result<SegmentedResult, EngineError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Success(result) => return Ok(result.clone()),
            MockResponse::Error(e) => return Err(e.clone()),
            MockResponse::Panic(message) => panic!("{message}"),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
            MockResponse::WaitFor(gate, inner) => {
                gate.notified().await;
                current = inner;
            }
            MockResponse::Progress(updates, inner) => {
                for &(processed, total) in updates {
                    progress.update(processed, total).await;
                }
                current = inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NoProgress;
    use std::path::Path;

    fn request(params: &TranscriptionParams) -> EngineRequest<'_> {
        EngineRequest {
            audio: Path::new("/dev/null"),
            filename: "clip.wav",
            params,
        }
    }

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockEngine::new(vec![
            MockResponse::text("first"),
            MockResponse::Error(EngineError::Inference("boom".into())),
        ]);
        let params = TranscriptionParams::default();

        let first = mock.transcribe(request(&params), &NoProgress).await.unwrap();
        assert_eq!(first.text, " first");
        assert!(mock.transcribe(request(&params), &NoProgress).await.is_err());

        let err = mock.transcribe(request(&params), &NoProgress).await.unwrap_err();
        assert!(err.to_string().contains("no response configured for call 2"));
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn repeating_never_runs_out() {
        let mock = MockEngine::repeating(MockResponse::text("again"));
        let params = TranscriptionParams::default();
        for _ in 0..5 {
            assert!(mock.transcribe(request(&params), &NoProgress).await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delay_sleeps_before_resolving() {
        let mock = MockEngine::new(vec![MockResponse::delayed(
            Duration::from_secs(30),
            MockResponse::text("late"),
        )]);
        let params = TranscriptionParams::default();
        let before = tokio::time::Instant::now();
        mock.transcribe(request(&params), &NoProgress).await.unwrap();
        assert!(before.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn gate_blocks_until_notified() {
        let gate = Arc::new(Notify::new());
        let mock = Arc::new(MockEngine::new(vec![MockResponse::gated(
            Arc::clone(&gate),
            MockResponse::text("open"),
        )]));

        let task = {
            let mock = Arc::clone(&mock);
            tokio::spawn(async move {
                let params = TranscriptionParams::default();
                mock.transcribe(request(&params), &NoProgress).await
            })
        };
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        gate.notify_one();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn progress_reaches_sink() {
        struct Recorder(Mutex<Vec<(u64, Option<u64>)>>);

        #[async_trait]
        impl ProgressSink for Recorder {
            async fn update(&self, processed: u64, total: Option<u64>) {
                self.0.lock().push((processed, total));
            }
        }

        let mock = MockEngine::new(vec![MockResponse::Progress(
            vec![(1, Some(3)), (3, Some(3))],
            Box::new(MockResponse::text("done")),
        )]);
        let sink = Recorder(Mutex::new(Vec::new()));
        let params = TranscriptionParams::default();
        mock.transcribe(request(&params), &sink).await.unwrap();
        assert_eq!(*sink.0.lock(), vec![(1, Some(3)), (3, Some(3))]);
    }
}
