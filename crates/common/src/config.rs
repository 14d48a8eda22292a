//! Keepframe configuration
//!
//! Values come from an optional TOML file and are then overlaid with
//! environment variables, so a suite can run with nothing but
//! `GCS_BUCKET_NAME` exported.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{ArtifactKind, FrameSize};

/// Public endpoint of Google Cloud Storage
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepframeConfig {
    /// Remote object store
    pub store: StoreConfig,

    /// Local capture directories
    pub capture: CaptureConfig,

    /// Retention behaviour
    pub retention: RetentionConfig,

    /// Report output
    pub report: ReportConfig,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bucket receiving artifacts. Uploads are disabled when unset.
    pub bucket_name: Option<String>,

    /// Project billed for requests (sent as the user project)
    pub project_id: Option<String>,

    /// API endpoint override, e.g. a local storage emulator
    pub endpoint: Option<String>,

    /// Static OAuth access token. Never written back to disk.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    /// Folder prefix for per-test artifacts
    pub folder: String,

    /// Upper bound on a single upload
    pub upload_timeout_secs: u64,

    /// Try to make uploaded objects publicly readable
    pub make_public: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket_name: None,
            project_id: None,
            endpoint: None,
            access_token: None,
            folder: "test-artifacts".to_string(),
            upload_timeout_secs: 120,
            make_public: false,
        }
    }
}

impl StoreConfig {
    /// Uploads are enabled iff a non-empty bucket name is configured
    pub fn enabled(&self) -> bool {
        self.bucket().is_some()
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket_name
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .map(|e| e.trim_end_matches('/'))
            .unwrap_or(DEFAULT_GCS_ENDPOINT)
    }

    /// True when pointed at something other than the public GCS endpoint
    pub fn uses_emulator(&self) -> bool {
        self.endpoint() != DEFAULT_GCS_ENDPOINT
    }
}

/// Where recorders write captures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub videos_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub frame: FrameSize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            videos_dir: PathBuf::from("videos"),
            screenshots_dir: PathBuf::from("screenshots/failures"),
            frame: FrameSize::default(),
        }
    }
}

impl CaptureConfig {
    /// Capture directory for an artifact kind
    pub fn dir_for(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Video => &self.videos_dir,
            ArtifactKind::Screenshot => &self.screenshots_dir,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Remove a failed test's local capture once it has been uploaded.
    /// Passing tests always lose their capture regardless of this flag.
    pub delete_local_after_upload: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            delete_local_after_upload: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Allure results directory receiving attachments
    pub results_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("allure-results"),
        }
    }
}

impl KeepframeConfig {
    /// Load configuration from file (defaults when the file is absent),
    /// then overlay the process environment
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from file only
    pub fn load_file(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Configuration from the environment alone
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overlay values from an environment lookup.
    ///
    /// Malformed values are logged and ignored; store settings never stop a run.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GCS_BUCKET_NAME") {
            self.store.bucket_name = Some(v);
        }
        if let Some(v) = lookup("GCS_PROJECT_ID") {
            self.store.project_id = Some(v);
        }
        if let Some(v) = lookup("STORAGE_EMULATOR_HOST") {
            self.store.endpoint = Some(normalize_endpoint(&v));
        }
        if let Some(v) = lookup("GCS_ACCESS_TOKEN") {
            self.store.access_token = Some(v);
        }
        if let Some(v) = lookup("GCS_UPLOAD_FOLDER") {
            self.store.folder = v;
        }
        if let Some(v) = lookup("GCS_UPLOAD_TIMEOUT_SECS") {
            match v.trim().parse() {
                Ok(secs) => self.store.upload_timeout_secs = secs,
                Err(_) => warn!(
                    "Ignoring GCS_UPLOAD_TIMEOUT_SECS={:?}: not a number, keeping {}s",
                    v, self.store.upload_timeout_secs
                ),
            }
        }
        if let Some(v) = lookup("VIDEOS_DIR") {
            self.capture.videos_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCREENSHOTS_DIR") {
            self.capture.screenshots_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DELETE_LOCAL_AFTER_GCS_UPLOAD") {
            self.retention.delete_local_after_upload = parse_flag(&v);
        }
        if let Some(v) = lookup("ALLURE_RESULTS_DIR") {
            self.report.results_dir = PathBuf::from(v);
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// `1`, `true` and `yes` (any case) are true; everything else is false
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Emulators are commonly configured as bare `host:port`
fn normalize_endpoint(value: &str) -> String {
    let value = value.trim().trim_end_matches('/');
    if value.starts_with("http://") || value.starts_with("https://") {
        value.to_string()
    } else {
        format!("http://{}", value)
    }
}
