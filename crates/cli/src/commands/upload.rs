//! Single file upload

use std::path::PathBuf;

use clap::Args;
use keepframe_common::KeepframeConfig;
use keepframe_e2e::StoreClient;
use serde::Serialize;

use crate::output::{self, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct UploadArgs {
    /// File to upload
    #[arg(required = true)]
    pub path: PathBuf,

    /// Object name inside the folder (default: timestamped file name)
    #[arg(long)]
    pub name: Option<String>,

    /// Destination folder (default: configured upload folder)
    #[arg(long)]
    pub folder: Option<String>,

    /// Grant public read on the uploaded object
    #[arg(long)]
    pub public: bool,
}

/// One uploaded file, shared with the report upload summary
#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub file: String,
    pub size_bytes: u64,
    pub url: Option<String>,
    pub error: Option<String>,
}

impl TableDisplay for UploadedFile {
    fn headers() -> Vec<&'static str> {
        vec!["File", "Size", "Result"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.file.clone(),
            format_size(self.size_bytes),
            match (&self.url, &self.error) {
                (Some(url), _) => url.clone(),
                (None, Some(e)) => format!("failed: {}", e),
                (None, None) => "-".to_string(),
            },
        ]
    }
}

pub async fn execute(args: UploadArgs, cfg: &KeepframeConfig, format: OutputFormat) -> anyhow::Result<()> {
    if !args.path.is_file() {
        output::print_error(&format!("File not found: {}", args.path.display()));
        std::process::exit(1);
    }

    let client = StoreClient::connect(&cfg.store).await;
    if let Some(reason) = client.disabled_reason() {
        output::print_error(&format!("Uploads are disabled: {}", reason));
        std::process::exit(1);
    }

    let folder = args.folder.as_deref().unwrap_or(&cfg.store.folder);
    let size_bytes = std::fs::metadata(&args.path)?.len();
    let result = client
        .upload(&args.path, args.name.as_deref(), folder, args.public)
        .await;

    let ok = result.is_ok();
    let uploaded = UploadedFile {
        file: args.path.display().to_string(),
        size_bytes,
        url: result.as_ref().ok().cloned(),
        error: result.err().map(|e| e.to_string()),
    };
    output::print_item(&uploaded, format);

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0 => "0 B")]
    #[test_case(1023 => "1023 B")]
    #[test_case(1536 => "1.5 KB")]
    #[test_case(5 * 1024 * 1024 => "5.0 MB")]
    fn test_format_size(bytes: u64) -> String {
        format_size(bytes)
    }
}
