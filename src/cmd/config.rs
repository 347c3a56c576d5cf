//! Configuration view: `pagesmith config`.

use anyhow::Result;
use std::path::Path;

use pagesmith::config::PagesmithConfig;

use super::super::ConfigCommands;

pub fn cmd_config(config_path: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let config = PagesmithConfig::load(config_path)?;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!("# Effective pagesmith configuration");
            if let Some(path) = config_path {
                println!("# file: {}", path.display());
            }
            println!();
            print!("{}", config.to_redacted_toml()?);
        }
        Some(ConfigCommands::Validate) => match config.validate_for_pipeline() {
            Ok(()) => println!("Configuration is valid."),
            Err(e) => anyhow::bail!("Configuration is invalid: {}", e),
        },
    }
    Ok(())
}
