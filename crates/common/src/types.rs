//! Core data model shared by the recording, retention and store components

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of captured artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Video,
    Screenshot,
}

impl ArtifactKind {
    /// File extension written by the recorder (without the dot)
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Video => "webm",
            ArtifactKind::Screenshot => "png",
        }
    }

    /// Folder used for this kind inside the remote bucket
    pub fn remote_folder(&self) -> &'static str {
        match self {
            ArtifactKind::Video => "videos",
            ArtifactKind::Screenshot => "screenshots",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ArtifactKind::Video => "video/webm",
            ArtifactKind::Screenshot => "image/png",
        }
    }

    /// Whether `path` carries this kind's extension
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.eq_ignore_ascii_case(self.extension()))
            .unwrap_or(false)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Video => write!(f, "video"),
            ArtifactKind::Screenshot => write!(f, "screenshot"),
        }
    }
}

/// A finalized capture handed from a recording session to the retention engine.
///
/// Deliberately not `Clone`: a handle is consumed exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub kind: ArtifactKind,
}

impl ArtifactHandle {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64, kind: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            kind,
        }
    }

    /// Zero-byte captures are treated as "nothing to process"
    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Result of one test execution, supplied once at completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test_id: String,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TestOutcome {
    pub fn passed(test_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            failed: false,
            message: None,
        }
    }

    pub fn failed(test_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            failed: true,
            message: Some(message.into()),
        }
    }
}

/// What happened to one artifact after retention was applied
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Remote URL, `None` when no upload happened or it failed
    pub url: Option<String>,
    /// Whether the local file was removed
    pub deleted_local: bool,
    /// Whether the raw bytes were embedded into the report
    pub embedded: bool,
}

impl UploadResult {
    pub fn untouched() -> Self {
        Self::default()
    }

    pub fn deleted() -> Self {
        Self {
            deleted_local: true,
            ..Self::default()
        }
    }
}

/// Recording frame size hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl Default for FrameSize {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}
