//! Reading and writing the configuration document on disk.

use super::Config;
use crate::error::{ConfigError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Clone, Copy)]
enum Format {
    Json,
    Yaml,
}

fn format_of(path: &Path) -> Result<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("yaml") | Some("yml") => Ok(Format::Yaml),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Load a configuration document from a `.json`, `.yaml` or `.yml` file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let format = format_of(path)?;
    let data = fs::read(path).map_err(|e| ConfigError::io(path, e))?;

    let config = match format {
        Format::Json => serde_json::from_slice(&data)?,
        Format::Yaml => serde_yaml::from_slice(&data)?,
    };
    Ok(config)
}

/// Write a configuration document, replacing the file atomically.
///
/// The document is written to a sibling temp file and renamed over `path`,
/// so readers never observe a partially written file.
pub fn store_config(config: &Config, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = match format_of(path)? {
        Format::Json => serde_json::to_vec_pretty(config)?,
        Format::Yaml => serde_yaml::to_string(config)?.into_bytes(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| ConfigError::io(&tmp_path, e))?;
        file.write_all(&bytes)
            .map_err(|e| ConfigError::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| ConfigError::io(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| ConfigError::io(path, e))?;

    tracing::debug!(path = %path.display(), "Stored config");
    Ok(())
}
