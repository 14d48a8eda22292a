//! Scoped test lifecycle
//!
//! `run_scoped` opens a recording session, runs the test body, and then
//! finalizes the capture against the test's outcome on every exit path:
//! normal return, returned error, panic, and cancellation of the enclosing
//! future.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use keepframe_common::{ArtifactKind, FrameSize, KeepframeConfig, TestOutcome, UploadResult};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::recording::{CaptureRoot, Recorder, RecordingSession};
use crate::report::ReportSink;
use crate::retention::RetentionPolicy;
use crate::store::StoreClient;

/// Message recorded when the enclosing future is dropped mid-test
pub const CANCELLED: &str = "cancelled";

/// What the test body gets to see of its scope
#[derive(Clone)]
pub struct ScopeContext {
    pub test_id: String,
    pub video_dir: Option<PathBuf>,
    pub screenshot_dir: Option<PathBuf>,
    pub frame: FrameSize,
    failure: Arc<Mutex<Option<String>>>,
}

impl ScopeContext {
    /// Record a failure without returning an error from the body, e.g. a
    /// soft assertion. The last message wins.
    pub fn mark_failed(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Where a screenshot for this test should be written
    pub fn screenshot_path(&self) -> Option<PathBuf> {
        self.screenshot_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", self.test_id, ArtifactKind::Screenshot.extension())))
    }
}

/// Full result of one scoped run
#[derive(Debug)]
pub struct ScopedRun<T, E> {
    pub result: Result<T, E>,
    pub outcome: TestOutcome,
    /// One entry per claimed capture, in path order
    pub artifacts: Vec<UploadResult>,
}

struct LifecycleInner {
    store: Arc<StoreClient>,
    report: Arc<dyn ReportSink>,
    policy: RetentionPolicy,
    roots: Vec<CaptureRoot>,
    frame: FrameSize,
}

/// Coordinates recording, retention and upload for each test
#[derive(Clone)]
pub struct TestLifecycle {
    inner: Arc<LifecycleInner>,
}

impl TestLifecycle {
    pub fn new(
        store: Arc<StoreClient>,
        report: Arc<dyn ReportSink>,
        policy: RetentionPolicy,
        roots: Vec<CaptureRoot>,
        frame: FrameSize,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                store,
                report,
                policy,
                roots,
                frame,
            }),
        }
    }

    pub fn from_config(
        config: &KeepframeConfig,
        store: Arc<StoreClient>,
        report: Arc<dyn ReportSink>,
    ) -> Self {
        Self::new(
            store,
            report,
            RetentionPolicy::from_config(&config.retention),
            CaptureRoot::from_config(&config.capture),
            config.capture.frame,
        )
    }

    pub fn store(&self) -> &StoreClient {
        &self.inner.store
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.inner.policy
    }

    /// Run `body` inside a recording scope and return its result unchanged.
    ///
    /// Panics from the body are re-raised after cleanup.
    pub async fn run_scoped<R, F, Fut, T, E>(&self, test_id: &str, recorder: R, body: F) -> Result<T, E>
    where
        R: Recorder + 'static,
        F: FnOnce(ScopeContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_scoped_detailed(test_id, recorder, body).await.result
    }

    /// Like [`run_scoped`](Self::run_scoped), also reporting the outcome and
    /// what happened to each capture
    pub async fn run_scoped_detailed<R, F, Fut, T, E>(
        &self,
        test_id: &str,
        recorder: R,
        body: F,
    ) -> ScopedRun<T, E>
    where
        R: Recorder + 'static,
        F: FnOnce(ScopeContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start_ms = chrono::Utc::now().timestamp_millis();
        let session = RecordingSession::open(
            test_id,
            Box::new(recorder),
            self.inner.roots.clone(),
            self.inner.frame,
        )
        .await;

        let failure = Arc::new(Mutex::new(None));
        let ctx = ScopeContext {
            test_id: test_id.to_string(),
            video_dir: session.video_dir().map(Path::to_path_buf),
            screenshot_dir: session.dir_for(ArtifactKind::Screenshot).map(Path::to_path_buf),
            frame: self.inner.frame,
            failure: failure.clone(),
        };

        let mut guard = ScopeGuard {
            lifecycle: self.clone(),
            test_id: test_id.to_string(),
            start_ms,
            session: Some(session),
        };

        let ran = AssertUnwindSafe(body(ctx)).catch_unwind().await;

        let (outcome, ran) = match ran {
            Ok(Ok(value)) => {
                let marked = failure.lock().take();
                let outcome = match marked {
                    Some(message) => TestOutcome::failed(test_id, message),
                    None => TestOutcome::passed(test_id),
                };
                (outcome, Ok(Ok(value)))
            }
            Ok(Err(e)) => (TestOutcome::failed(test_id, e.to_string()), Ok(Err(e))),
            Err(panic) => (
                TestOutcome::failed(test_id, panic_message(panic.as_ref())),
                Err(panic),
            ),
        };

        if outcome.failed {
            info!(
                "Test '{}' failed: {}",
                test_id,
                outcome.message.as_deref().unwrap_or("unknown error")
            );
        } else {
            debug!("Test '{}' passed", test_id);
        }

        let artifacts = match guard.session.take() {
            Some(session) => self.finalize_detached(session, outcome.clone(), start_ms).await,
            None => Vec::new(),
        };

        match ran {
            Ok(result) => ScopedRun {
                result,
                outcome,
                artifacts,
            },
            Err(panic) => resume_unwind(panic),
        }
    }

    /// Finalize on its own task so that dropping the caller mid-cleanup
    /// does not cut retention short
    async fn finalize_detached(
        &self,
        session: RecordingSession,
        outcome: TestOutcome,
        start_ms: i64,
    ) -> Vec<UploadResult> {
        let lifecycle = self.clone();
        let test_id = outcome.test_id.clone();
        match tokio::spawn(async move { lifecycle.finalize(session, outcome, start_ms).await }).await {
            Ok(results) => results,
            Err(e) => {
                error!("Cleanup for '{}' did not complete: {}", test_id, e);
                Vec::new()
            }
        }
    }

    /// Retention for every capture, then the report entry for the test
    async fn finalize(&self, session: RecordingSession, outcome: TestOutcome, start_ms: i64) -> Vec<UploadResult> {
        let artifacts = session.close().await;
        if artifacts.is_empty() {
            debug!("No captures for '{}'", outcome.test_id);
        }

        let mut results = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let result = self
                .inner
                .policy
                .apply(&outcome, artifact, &self.inner.store, self.inner.report.as_ref())
                .await;
            results.push(result);
        }

        let stop_ms = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self.inner.report.finish(&outcome, start_ms, stop_ms).await {
            warn!("Could not record result for '{}': {}", outcome.test_id, e);
        }
        results
    }
}

/// Owns the open session while the body runs. If the scope is dropped
/// before the body finishes, cleanup is handed to the runtime with a
/// cancelled outcome.
struct ScopeGuard {
    lifecycle: TestLifecycle,
    test_id: String,
    start_ms: i64,
    session: Option<RecordingSession>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("Test '{}' was cancelled; finalizing its capture in the background", self.test_id);
            let outcome = TestOutcome::failed(self.test_id.as_str(), CANCELLED);

            match Handle::try_current() {
                Ok(handle) => {
                    let lifecycle = self.lifecycle.clone();
                    let start_ms = self.start_ms;
                    handle.spawn(async move {
                        lifecycle.finalize(session, outcome, start_ms).await;
                    });
                }
                Err(_) => {
                    error!(
                        "No async runtime to finalize '{}'; capture left on disk",
                        self.test_id
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
