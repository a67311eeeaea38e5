//! Configuration commands

use anyhow::{bail, Result};
use clap::Subcommand;
use std::path::Path;

use crate::config::ControlConfig;
use crate::output::{print_success, OutputFormat};

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

pub fn execute(cmd: ConfigCommands, path: &Path, effective: &ControlConfig, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            ControlConfig::default().save(path)?;
            print_success(&format!("Wrote {}", path.display()));
        }

        ConfigCommands::Show => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(effective)?),
            _ => print!("{}", toml::to_string_pretty(effective)?),
        },
    }

    Ok(())
}
