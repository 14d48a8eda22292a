//! Per-test recording sessions
//!
//! Capture directories are shared by every test running concurrently, so a
//! session never assumes it owns them. It snapshots the files present when it
//! opens and, on close, claims only files that appeared afterwards.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use keepframe_common::{ArtifactHandle, ArtifactKind, CaptureConfig, FrameSize};
use tracing::{debug, info, warn};

use crate::error::RecordingError;

/// Something that captures a test run into a directory
#[async_trait]
pub trait Recorder: Send {
    /// Begin capturing into `output_dir`
    async fn start(&mut self, output_dir: &Path, frame: FrameSize) -> Result<(), RecordingError>;

    /// Stop capturing and flush everything to disk
    async fn stop(&mut self) -> Result<(), RecordingError>;
}

/// Recorder for captures produced by a separate browser process, such as a
/// Playwright context launched with `recordVideo`. Only prepares the
/// directory; the browser flushes the file when its context closes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalRecorder;

#[async_trait]
impl Recorder for ExternalRecorder {
    async fn start(&mut self, output_dir: &Path, frame: FrameSize) -> Result<(), RecordingError> {
        tokio::fs::create_dir_all(output_dir).await?;
        debug!(
            "Expecting external capture in {} ({}x{})",
            output_dir.display(),
            frame.width,
            frame.height
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RecordingError> {
        Ok(())
    }
}

/// A watched directory and the kind of capture written there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRoot {
    pub dir: PathBuf,
    pub kind: ArtifactKind,
}

impl CaptureRoot {
    pub fn new(dir: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
        Self {
            dir: dir.into(),
            kind,
        }
    }

    /// Video and screenshot roots from configuration
    pub fn from_config(capture: &CaptureConfig) -> Vec<CaptureRoot> {
        [ArtifactKind::Video, ArtifactKind::Screenshot]
            .into_iter()
            .map(|kind| CaptureRoot::new(capture.dir_for(kind), kind))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    /// Closed and artifacts handed off. Terminal.
    Finalized,
    /// Failed to open. Terminal.
    Aborted,
}

/// Recording resource for exactly one test execution
pub struct RecordingSession {
    test_id: String,
    roots: Vec<CaptureRoot>,
    baseline: HashSet<PathBuf>,
    recorder: Option<Box<dyn Recorder>>,
    state: SessionState,
}

impl RecordingSession {
    /// Snapshot the capture roots and start the recorder.
    ///
    /// Never fails: a session that could not start is returned `Aborted`
    /// and closes to nothing.
    pub async fn open(
        test_id: &str,
        recorder: Box<dyn Recorder>,
        roots: Vec<CaptureRoot>,
        frame: FrameSize,
    ) -> Self {
        let mut session = Self {
            test_id: test_id.to_string(),
            roots,
            baseline: HashSet::new(),
            recorder: None,
            state: SessionState::Idle,
        };

        match session.start(recorder, frame).await {
            Ok(()) => {
                debug!(
                    "Recording '{}' ({} pre-existing capture(s) ignored)",
                    session.test_id,
                    session.baseline.len()
                );
                session.state = SessionState::Recording;
            }
            Err(e) => {
                warn!("Recording for '{}' could not start: {}", session.test_id, e);
                session.state = SessionState::Aborted;
            }
        }

        session
    }

    async fn start(&mut self, mut recorder: Box<dyn Recorder>, frame: FrameSize) -> Result<(), RecordingError> {
        for root in &self.roots {
            tokio::fs::create_dir_all(&root.dir).await?;
        }

        self.baseline = scan(&self.roots)
            .await?
            .into_iter()
            .map(|(path, _)| path)
            .collect();

        let output_dir = self
            .roots
            .iter()
            .find(|r| r.kind == ArtifactKind::Video)
            .or_else(|| self.roots.first())
            .map(|r| r.dir.clone())
            .ok_or_else(|| RecordingError::Start("no capture directory configured".to_string()))?;

        recorder.start(&output_dir, frame).await?;
        self.recorder = Some(recorder);
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Directory a video recorder should write into
    pub fn video_dir(&self) -> Option<&Path> {
        self.dir_for(ArtifactKind::Video)
    }

    pub fn dir_for(&self, kind: ArtifactKind) -> Option<&Path> {
        self.roots
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.dir.as_path())
    }

    /// Stop capture and return one handle per new, non-empty file.
    ///
    /// Consumes the session, so a capture is closed at most once.
    pub async fn close(mut self) -> Vec<ArtifactHandle> {
        if self.state != SessionState::Recording {
            debug!("Session for '{}' has nothing to close ({:?})", self.test_id, self.state);
            return Vec::new();
        }

        if let Some(mut recorder) = self.recorder.take() {
            if let Err(e) = recorder.stop().await {
                warn!("Recorder for '{}' did not stop cleanly: {}", self.test_id, e);
            }
        }
        self.state = SessionState::Finalized;

        let current = match scan(&self.roots).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Could not list captures for '{}': {}", self.test_id, e);
                return Vec::new();
            }
        };

        let mut artifacts = Vec::new();
        for (path, kind) in current {
            if self.baseline.contains(&path) {
                continue;
            }

            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("Capture {} vanished before it could be claimed: {}", path.display(), e);
                    continue;
                }
            };

            if size == 0 {
                warn!("Skipping empty {}: {}", kind, path.display());
                continue;
            }

            info!("Captured {} for '{}': {} ({} bytes)", kind, self.test_id, path.display(), size);
            artifacts.push(ArtifactHandle::new(path, size, kind));
        }

        artifacts
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.state == SessionState::Recording {
            warn!(
                "Recording session for '{}' dropped without close; capture may be left open",
                self.test_id
            );
        }
    }
}

/// Files in each root carrying the root's extension, sorted by path
async fn scan(roots: &[CaptureRoot]) -> std::io::Result<Vec<(PathBuf, ArtifactKind)>> {
    let mut found = Vec::new();

    for root in roots {
        let mut entries = match tokio::fs::read_dir(&root.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && root.kind.matches(&path) {
                found.push((path, root.kind));
            }
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    found.dedup_by(|a, b| a.0 == b.0);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Writes `outputs` into the capture directory when stopped, the way a
    /// browser flushes its video on context close
    struct FlushingRecorder {
        dir: Option<PathBuf>,
        outputs: Vec<(&'static str, &'static str)>,
        stops: Arc<AtomicUsize>,
    }

    impl FlushingRecorder {
        fn new(outputs: Vec<(&'static str, &'static str)>) -> (Self, Arc<AtomicUsize>) {
            let stops = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    dir: None,
                    outputs,
                    stops: stops.clone(),
                },
                stops,
            )
        }
    }

    #[async_trait]
    impl Recorder for FlushingRecorder {
        async fn start(&mut self, output_dir: &Path, _frame: FrameSize) -> Result<(), RecordingError> {
            self.dir = Some(output_dir.to_path_buf());
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), RecordingError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            let dir = self.dir.as_ref().ok_or_else(|| RecordingError::Stop("never started".into()))?;
            for (name, data) in &self.outputs {
                tokio::fs::write(dir.join(name), data).await?;
            }
            Ok(())
        }
    }

    struct FailingRecorder;

    #[async_trait]
    impl Recorder for FailingRecorder {
        async fn start(&mut self, _output_dir: &Path, _frame: FrameSize) -> Result<(), RecordingError> {
            Err(RecordingError::Start("browser crashed".to_string()))
        }

        async fn stop(&mut self) -> Result<(), RecordingError> {
            Ok(())
        }
    }

    fn video_root(tmp: &TempDir) -> Vec<CaptureRoot> {
        vec![CaptureRoot::new(tmp.path().join("videos"), ArtifactKind::Video)]
    }

    #[tokio::test]
    async fn test_close_returns_only_new_files() {
        let tmp = TempDir::new().unwrap();
        let roots = video_root(&tmp);
        std::fs::create_dir_all(&roots[0].dir).unwrap();
        for i in 0..3 {
            std::fs::write(roots[0].dir.join(format!("old-{}.webm", i)), b"old").unwrap();
        }
        std::fs::write(roots[0].dir.join("notes.txt"), b"ignored").unwrap();

        let (recorder, stops) = FlushingRecorder::new(vec![("new-a.webm", "aaaa"), ("new-b.webm", "bb")]);
        let session = RecordingSession::open("t1", Box::new(recorder), roots.clone(), FrameSize::default()).await;
        assert_eq!(session.state(), SessionState::Recording);

        let artifacts = session.close().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        let names: Vec<String> = artifacts.iter().map(|a| a.file_name()).collect();
        assert_eq!(names, vec!["new-a.webm", "new-b.webm"]);
        assert_eq!(artifacts[0].size_bytes, 4);
        assert!(artifacts.iter().all(|a| a.kind == ArtifactKind::Video));
    }

    #[tokio::test]
    async fn test_zero_byte_capture_is_skipped_but_kept_on_disk() {
        let tmp = TempDir::new().unwrap();
        let roots = video_root(&tmp);

        let (recorder, _) = FlushingRecorder::new(vec![("empty.webm", "")]);
        let session = RecordingSession::open("t1", Box::new(recorder), roots.clone(), FrameSize::default()).await;
        let artifacts = session.close().await;

        assert!(artifacts.is_empty());
        assert!(roots[0].dir.join("empty.webm").exists());
    }

    #[tokio::test]
    async fn test_failed_start_aborts_session() {
        let tmp = TempDir::new().unwrap();
        let session = RecordingSession::open("t1", Box::new(FailingRecorder), video_root(&tmp), FrameSize::default()).await;
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(session.close().await.is_empty());
    }

    #[tokio::test]
    async fn test_roots_are_created_on_demand() {
        let tmp = TempDir::new().unwrap();
        let roots = vec![
            CaptureRoot::new(tmp.path().join("a/videos"), ArtifactKind::Video),
            CaptureRoot::new(tmp.path().join("b/shots"), ArtifactKind::Screenshot),
        ];
        let session = RecordingSession::open("t1", Box::new(ExternalRecorder), roots, FrameSize::default()).await;

        assert!(tmp.path().join("a/videos").is_dir());
        assert!(tmp.path().join("b/shots").is_dir());
        assert_eq!(session.video_dir(), Some(tmp.path().join("a/videos").as_path()));

        std::fs::write(tmp.path().join("b/shots/fail.png"), b"png").unwrap();
        let artifacts = session.close().await;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, ArtifactKind::Screenshot);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_claim_disjoint_files() {
        let tmp = TempDir::new().unwrap();
        let roots = video_root(&tmp);
        std::fs::create_dir_all(&roots[0].dir).unwrap();

        let first = RecordingSession::open("first", Box::new(ExternalRecorder), roots.clone(), FrameSize::default()).await;
        std::fs::write(roots[0].dir.join("first.webm"), b"1").unwrap();

        // Opens after first.webm exists, so must never claim it
        let second = RecordingSession::open("second", Box::new(ExternalRecorder), roots.clone(), FrameSize::default()).await;
        std::fs::write(roots[0].dir.join("second.webm"), b"2").unwrap();

        let second_artifacts = second.close().await;
        assert_eq!(second_artifacts.len(), 1);
        assert_eq!(second_artifacts[0].file_name(), "second.webm");

        // The baseline technique can't tell files apart that both appear
        // after an open; first sees both
        let first_artifacts = first.close().await;
        let names: Vec<String> = first_artifacts.iter().map(|a| a.file_name()).collect();
        assert_eq!(names, vec!["first.webm", "second.webm"]);
    }
}
