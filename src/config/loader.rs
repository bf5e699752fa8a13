use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::{ConfigOverrides, SidecarConfig};

/// Load a settings file using the config crate.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub fn load_config_file(config_path: &str) -> Result<SidecarConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let sidecar_config: SidecarConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(sidecar_config)
}

/// Resolve the effective configuration: the optional settings file first, then flags
/// and environment variables on top.
pub fn load_config(config_path: Option<&str>, overrides: ConfigOverrides) -> Result<SidecarConfig> {
    let mut config = match config_path {
        Some(path) => load_config_file(path)?,
        None => SidecarConfig::default(),
    };
    config.apply_overrides(overrides);
    Ok(config)
}
