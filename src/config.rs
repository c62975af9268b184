use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CanvasError, Result};
use crate::history::DEFAULT_MAX_ENTRIES;
use crate::storage::Storage;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub canvas: CanvasSection,

    #[serde(default)]
    pub history: HistorySection,

    #[serde(default)]
    pub templates: TemplatesSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CanvasSection {
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_height")]
    pub height: f64,
    #[serde(default)]
    pub background: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HistorySection {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TemplatesSection {
    #[serde(default = "default_templates_root")]
    pub root: PathBuf,
}

fn default_width() -> f64 {
    800.0
}

fn default_height() -> f64 {
    600.0
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_templates_root() -> PathBuf {
    PathBuf::from("templates")
}

impl Default for CanvasSection {
    fn default() -> Self {
        Self { width: default_width(), height: default_height(), background: None }
    }
}

impl Default for HistorySection {
    fn default() -> Self {
        Self { max_entries: default_max_entries() }
    }
}

impl Default for TemplatesSection {
    fn default() -> Self {
        Self { root: default_templates_root() }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.history.max_entries == 0 {
            return Err(CanvasError::InvalidArgument("history.max_entries must be at least 1".to_string()));
        }
        if !(config.canvas.width > 0.0 && config.canvas.height > 0.0) {
            return Err(CanvasError::InvalidDimension { width: config.canvas.width, height: config.canvas.height });
        }
        Ok(config)
    }

    pub fn load(storage: &dyn Storage, path: impl AsRef<Path>) -> Result<Self> {
        let content = storage.read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }
}
