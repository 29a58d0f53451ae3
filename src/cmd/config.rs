//! Configuration view and validation commands: `convoy config`.

use anyhow::{Context, Result};
use convoy::config::{CONFIG_FILE_NAME, ConvoyConfig, default_config_paths};
use std::path::{Path, PathBuf};

use super::super::ConfigCommands;

/// The file `config` commands read and write: the explicit path, else the
/// first default location that exists, else `./convoy.toml`.
fn config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => default_config_paths()
            .into_iter()
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME)),
    }
}

pub fn cmd_config(explicit: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let path = config_path(explicit);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", console::style("Convoy Configuration").bold().cyan());
            println!();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No {} found at {}, using defaults", CONFIG_FILE_NAME, path.display());
            }
            println!();

            let config = ConvoyConfig::resolve(path.exists().then_some(path.as_path()))?;
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("Effective values (with env overrides):");
            println!();
            print!("{}", rendered);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            if !path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE_NAME);
                return Ok(());
            }

            let config = ConvoyConfig::load(&path)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("{}", console::style("Configuration warnings:").yellow());
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if path.exists() {
                println!("{} already exists at {}", CONFIG_FILE_NAME, path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }

            ConvoyConfig::default().save(&path)?;
            println!("Created {} at {}", CONFIG_FILE_NAME, path.display());
            println!();
            println!("You can now customize:");
            println!("  - [timeouts] retry windows and the poll interval");
            println!("  - [cluster] pods root, scheduler service, security config map");
            println!("  - [logging] level and format (pretty or json)");
        }
    }

    Ok(())
}
