#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use miette::Diagnostic;
use mosaic_core::TraceConfig;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("config error: {message}")]
#[diagnostic(code(mosaic::config), help("expected a TOML file with an optional [trace] table"))]
pub struct ConfigError {
    pub message: String,
}

/// Contents of `mosaic.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub trace: TraceConfig,
}

impl ToolConfig {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError {
            message: e.to_string(),
        })
    }

    /// Read `path`, or fall back to the defaults when no file was given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::parse(&raw).map_err(|e| ConfigError {
            message: format!("{}: {}", path.display(), e.message),
        })
    }
}
