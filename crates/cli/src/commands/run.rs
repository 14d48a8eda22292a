//! Run a test command inside a recording scope

use std::fmt;
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use keepframe_common::{KeepframeConfig, UploadResult};
use keepframe_e2e::{AllureResults, ExternalRecorder, ReportSink, ScopeContext, StoreClient, TestLifecycle};
use serde::Serialize;
use tokio::process::Command;
use tracing::info;

use crate::output::{self, OutputFormat, TableDisplay};

/// Exit code when the command could not be started at all
const LAUNCH_FAILED: i32 = 127;

#[derive(Args)]
pub struct RunArgs {
    /// Test identifier used for object names and report entries
    #[arg(long)]
    pub test_id: String,

    /// Allure results directory (default: configured results dir)
    #[arg(long)]
    pub results_dir: Option<std::path::PathBuf>,

    /// Command and arguments to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Debug)]
enum RunFailure {
    Launch(String),
    Exit(i32),
}

impl RunFailure {
    fn exit_code(&self) -> i32 {
        match self {
            RunFailure::Launch(_) => LAUNCH_FAILED,
            RunFailure::Exit(code) => *code,
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::Launch(msg) => write!(f, "failed to launch: {}", msg),
            RunFailure::Exit(code) => write!(f, "test command exited with status {}", code),
        }
    }
}

#[derive(Debug, Serialize)]
struct ArtifactRow {
    url: Option<String>,
    deleted_local: bool,
    embedded: bool,
}

impl From<&UploadResult> for ArtifactRow {
    fn from(result: &UploadResult) -> Self {
        Self {
            url: result.url.clone(),
            deleted_local: result.deleted_local,
            embedded: result.embedded,
        }
    }
}

impl TableDisplay for ArtifactRow {
    fn headers() -> Vec<&'static str> {
        vec!["URL", "Local deleted", "Embedded"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.url.clone().unwrap_or_else(|| "-".to_string()),
            yes_no(self.deleted_local),
            yes_no(self.embedded),
        ]
    }
}

fn yes_no(value: bool) -> String {
    let text = if value { "yes" } else { "no" };
    text.to_string()
}

pub async fn execute(args: RunArgs, cfg: &KeepframeConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store = Arc::new(StoreClient::connect(&cfg.store).await);
    let results_dir = args.results_dir.clone().unwrap_or_else(|| cfg.report.results_dir.clone());
    let allure = Arc::new(AllureResults::new(results_dir));
    let report: Arc<dyn ReportSink> = allure.clone();
    let lifecycle = TestLifecycle::from_config(cfg, store, report);

    let run = lifecycle
        .run_scoped_detailed(&args.test_id, ExternalRecorder, |ctx| run_command(ctx, args.command.clone()))
        .await;
    info!("Allure results in {}", allure.dir().display());

    let rows: Vec<ArtifactRow> = run.artifacts.iter().map(ArtifactRow::from).collect();
    if format != OutputFormat::Json {
        let status = if run.outcome.failed { "FAILED".red().bold() } else { "PASSED".green().bold() };
        println!("{} {}", args.test_id.bold(), status);
        if let Some(message) = &run.outcome.message {
            println!("   {}", message.dimmed());
        }
    }
    if !rows.is_empty() || format == OutputFormat::Json {
        output::print_list(&rows, format);
    }

    match run.result {
        Ok(()) if run.outcome.failed => std::process::exit(1),
        Ok(()) => Ok(()),
        Err(failure) => std::process::exit(failure.exit_code()),
    }
}

async fn run_command(ctx: ScopeContext, argv: Vec<String>) -> Result<(), RunFailure> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| RunFailure::Launch("no command given".to_string()))?;

    let mut command = Command::new(program);
    command
        .args(rest)
        .env("KEEPFRAME_TEST_ID", &ctx.test_id)
        .env("KEEPFRAME_VIDEO_WIDTH", ctx.frame.width.to_string())
        .env("KEEPFRAME_VIDEO_HEIGHT", ctx.frame.height.to_string())
        .kill_on_drop(true);
    if let Some(dir) = &ctx.video_dir {
        command.env("KEEPFRAME_VIDEO_DIR", dir);
    }
    if let Some(dir) = &ctx.screenshot_dir {
        command.env("KEEPFRAME_SCREENSHOT_DIR", dir);
    }

    let status = command
        .status()
        .await
        .map_err(|e| RunFailure::Launch(format!("{}: {}", program, e)))?;

    if status.success() {
        Ok(())
    } else {
        // Killed by a signal: no code
        Err(RunFailure::Exit(status.code().unwrap_or(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepframe_common::{ArtifactKind, FrameSize};
    use keepframe_e2e::{CaptureRoot, DisabledReason, MemoryReport, RetentionPolicy};
    use tempfile::TempDir;

    fn lifecycle(tmp: &TempDir, report: Arc<MemoryReport>) -> TestLifecycle {
        TestLifecycle::new(
            Arc::new(StoreClient::disabled(DisabledReason::NotConfigured)),
            report,
            RetentionPolicy::new(true),
            vec![
                CaptureRoot::new(tmp.path().join("videos"), ArtifactKind::Video),
                CaptureRoot::new(tmp.path().join("shots"), ArtifactKind::Screenshot),
            ],
            FrameSize::default(),
        )
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_failure_exit_codes() {
        assert_eq!(RunFailure::Exit(3).exit_code(), 3);
        assert_eq!(RunFailure::Launch("nope".into()).exit_code(), LAUNCH_FAILED);
        assert_eq!(
            RunFailure::Exit(2).to_string(),
            "test command exited with status 2"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_keeps_its_video() {
        let tmp = TempDir::new().unwrap();
        let report = Arc::new(MemoryReport::new());
        let lc = lifecycle(&tmp, report.clone());

        let script = sh(r#"test "$KEEPFRAME_VIDEO_WIDTH" = 1280 && printf frames > "$KEEPFRAME_VIDEO_DIR/$KEEPFRAME_TEST_ID.webm"; exit 3"#);
        let run = lc
            .run_scoped_detailed("cli-test", ExternalRecorder, |ctx| run_command(ctx, script))
            .await;

        assert_eq!(run.result.unwrap_err().exit_code(), 3);
        assert!(run.outcome.failed);
        assert_eq!(run.artifacts.len(), 1);
        assert!(run.artifacts[0].embedded);
        assert!(tmp.path().join("videos/cli-test.webm").exists());
        assert_eq!(report.for_test("cli-test").len(), 1);
        assert_eq!(report.finished()[0].message.as_deref(), Some("test command exited with status 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_passing_command_drops_its_video() {
        let tmp = TempDir::new().unwrap();
        let lc = lifecycle(&tmp, Arc::new(MemoryReport::new()));

        let script = sh(r#"printf frames > "$KEEPFRAME_VIDEO_DIR/ok.webm""#);
        let run = lc
            .run_scoped_detailed("ok", ExternalRecorder, |ctx| run_command(ctx, script))
            .await;

        assert!(run.result.is_ok());
        assert!(!run.outcome.failed);
        assert!(run.artifacts[0].deleted_local);
        assert!(!tmp.path().join("videos/ok.webm").exists());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_launch_failure() {
        let tmp = TempDir::new().unwrap();
        let lc = lifecycle(&tmp, Arc::new(MemoryReport::new()));

        let argv = vec!["keepframe-no-such-program".to_string()];
        let run = lc
            .run_scoped_detailed("missing", ExternalRecorder, |ctx| run_command(ctx, argv))
            .await;

        assert_eq!(run.result.unwrap_err().exit_code(), LAUNCH_FAILED);
        assert!(run.outcome.failed);
    }
}
