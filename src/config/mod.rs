mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./reframer.toml", "~/.config/reframer/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let playback = &config.playback;
    if !playback.speed.is_finite() || playback.speed <= 0.0 {
        anyhow::bail!("Playback speed must be positive, got {}", playback.speed);
    }
    if !playback.fallback_fps.is_finite() || playback.fallback_fps <= 0.0 {
        anyhow::bail!(
            "Fallback frame rate must be positive, got {}",
            playback.fallback_fps
        );
    }

    let recording = &config.recording;
    match (recording.render_width, recording.render_height) {
        (Some(0), _) | (_, Some(0)) => anyhow::bail!("Render dimensions cannot be 0"),
        (Some(_), None) | (None, Some(_)) => {
            anyhow::bail!("render_width and render_height must be set together")
        }
        _ => {}
    }
    if recording.preset.trim().is_empty() {
        anyhow::bail!("Encoder preset cannot be empty");
    }
    if recording.profile.trim().is_empty() {
        anyhow::bail!("Encoder profile cannot be empty");
    }

    Ok(())
}
