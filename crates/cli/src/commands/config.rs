//! Configuration commands

use std::path::Path;

use clap::Subcommand;
use keepframe_common::KeepframeConfig;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (file plus environment)
    Show,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn execute(
    cmd: ConfigCommands,
    cfg: &KeepframeConfig,
    path: &Path,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show => {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(cfg)?),
                _ => print!("{}", cfg.to_toml()?),
            }
            Ok(())
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                output::print_error(&format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ));
                std::process::exit(1);
            }
            KeepframeConfig::default().save(path)?;
            output::print_success(&format!("Wrote {}", path.display()));
            Ok(())
        }
    }
}
