//! `config show` and `config init`

use crate::config::settings::Settings;
use anyhow::{Context, Result, bail};
use std::path::PathBuf;

/// Print the effective settings as TOML
pub fn show(settings: &Settings) -> Result<()> {
    match Settings::find_config_file() {
        Some(path) => println!("# Loaded from {}\n", path.display()),
        None => println!("# No config file found, using defaults\n"),
    }

    let rendered = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
    print!("{}", rendered);
    Ok(())
}

/// Write the example config file, to `path` or the per-user location
pub fn init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => Settings::user_config_path().context("Could not determine config directory")?,
    };

    if path.exists() && !force {
        bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, Settings::example_config()?)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    crate::log_info!("Wrote {}", path.display());
    println!("Created {}", path.display());
    Ok(())
}
