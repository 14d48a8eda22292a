//! Report directory upload

use std::path::{Path, PathBuf};

use clap::Args;
use colored::Colorize;
use keepframe_common::KeepframeConfig;
use keepframe_e2e::StoreClient;
use tracing::debug;
use walkdir::WalkDir;

use super::upload::UploadedFile;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct UploadReportArgs {
    /// Generated report directory
    #[arg(default_value = "allure-report")]
    pub dir: PathBuf,

    /// Folder the timestamped report directory is created under
    #[arg(long, default_value = "allure-reports")]
    pub prefix: String,

    /// Grant public read on every uploaded file
    #[arg(long)]
    pub public: bool,
}

pub async fn execute(args: UploadReportArgs, cfg: &KeepframeConfig, format: OutputFormat) -> anyhow::Result<()> {
    if !args.dir.is_dir() {
        output::print_error(&format!("Report directory not found: {}", args.dir.display()));
        output::print_info("Generate it first, e.g. allure generate allure-results -o allure-report");
        std::process::exit(1);
    }

    let client = StoreClient::connect(&cfg.store).await;
    if let Some(reason) = client.disabled_reason() {
        output::print_error(&format!("Uploads are disabled: {}", reason));
        std::process::exit(1);
    }

    let files = report_files(&args.dir)?;
    let folder = format!(
        "{}/{}",
        args.prefix.trim_matches('/'),
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    if format == OutputFormat::Table {
        println!("{} Uploading {} file(s) to {}", "→".cyan(), files.len(), folder.bold());
    }

    let mut uploaded = Vec::with_capacity(files.len());
    let mut index_url = None;
    for (path, relative) in files {
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let result = client.upload(&path, Some(&relative), &folder, args.public).await;
        if relative == "index.html" {
            index_url = result.as_ref().ok().cloned();
        }
        uploaded.push(UploadedFile {
            file: relative,
            size_bytes,
            url: result.as_ref().ok().cloned(),
            error: result.err().map(|e| e.to_string()),
        });
    }

    output::print_list(&uploaded, format);

    let failed = uploaded.iter().filter(|f| f.url.is_none()).count();
    if format != OutputFormat::Json {
        if failed == 0 {
            output::print_success(&format!("Uploaded {} file(s)", uploaded.len()));
        } else {
            output::print_warning(&format!("{} of {} file(s) failed", failed, uploaded.len()));
        }
        if let Some(console) = client.console_url(&folder) {
            println!("   Console: {}", console);
        }
        if let Some(url) = &index_url {
            println!("   Report:  {}", url);
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Every regular file under `dir` with its `/`-separated relative path,
/// sorted by that path
fn report_files(dir: &Path) -> anyhow::Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        debug!("Report file: {}", relative);
        files.push((entry.path().to_path_buf(), relative));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}
