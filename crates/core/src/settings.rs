use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::DEFAULT_SAMPLE_SIZE;
use crate::columns::{ColumnSizing, DEFAULT_MAX_COLUMN_WIDTH, DEFAULT_MIN_COLUMN_WIDTH};
use crate::window::WindowParams;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GridSettings {
    pub row_height: u32,
    pub viewport_rows: usize,
    pub buffer_rows: usize,
    pub scroll_debounce_ms: u64,
    pub sample_size: usize,
    pub min_column_width: u16,
    pub max_column_width: u16,
    pub max_expansion_rows: usize,
    pub audit_applied_changes: bool,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            row_height: 1,
            viewport_rows: 30,
            buffer_rows: 10,
            scroll_debounce_ms: 16,
            sample_size: DEFAULT_SAMPLE_SIZE,
            min_column_width: DEFAULT_MIN_COLUMN_WIDTH,
            max_column_width: DEFAULT_MAX_COLUMN_WIDTH,
            max_expansion_rows: 10,
            audit_applied_changes: true,
        }
    }
}

impl GridSettings {
    /// Clamps values a hand-edited file may have left unusable.
    fn normalize(&mut self) {
        self.row_height = self.row_height.max(1);
        self.viewport_rows = self.viewport_rows.max(1);
        self.sample_size = self.sample_size.max(1);
        self.min_column_width = self.min_column_width.max(1);
        if self.max_column_width < self.min_column_width {
            self.max_column_width = self.min_column_width;
        }
    }

    #[must_use]
    pub fn window_params(&self) -> WindowParams {
        WindowParams {
            row_height: self.row_height,
            viewport_rows: self.viewport_rows,
            buffer_rows: self.buffer_rows,
        }
    }

    #[must_use]
    pub fn column_sizing(&self) -> ColumnSizing {
        ColumnSizing {
            min_width: self.min_column_width,
            max_width: self.max_column_width,
            sample_size: self.sample_size,
        }
    }

    #[must_use]
    pub fn scroll_debounce(&self) -> Duration {
        Duration::from_millis(self.scroll_debounce_ms)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write settings file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    grid: GridSettings,
}

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
    settings: GridSettings,
}

impl FileSettingsStore {
    pub fn load_default() -> Result<Self, SettingsError> {
        let path = default_settings_path()?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                settings: GridSettings::default(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                settings: GridSettings::default(),
            });
        }

        let mut doc: SettingsDocument =
            toml::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        doc.grid.normalize();

        Ok(Self {
            path,
            settings: doc.grid,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn settings(&self) -> &GridSettings {
        &self.settings
    }

    pub fn update(&mut self, settings: GridSettings) {
        self.settings = settings;
        self.settings.normalize();
    }

    pub fn persist(&self) -> Result<(), SettingsError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SettingsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = SettingsDocument {
            grid: self.settings,
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| SettingsError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// `$GRIDLINE_CONFIG_DIR`, else the platform config directory joined with `gridline`.
pub fn default_config_dir() -> Result<PathBuf, SettingsError> {
    if let Some(custom) = env::var_os("GRIDLINE_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }
    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };
    Ok(base_dir.join("gridline"))
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    Ok(default_config_dir()?.join("settings.toml"))
}
