use std::{
    fs,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use which::which;

use crate::{MemoError, Result};

pub const DEFAULT_DAILY_NOTES_FOLDER: &str = "Daily";
pub const DEFAULT_STREAM_DAYS: u32 = 30;
pub const DEFAULT_HEATMAP_DAYS: u32 = 140;
pub const DEFAULT_WARM_CACHE_BATCH_SIZE: usize = 32;
/// Attachments folder used when none is configured.
pub const DEFAULT_ATTACHMENTS_FOLDER: &str = "{folder}/_attachments";

/// Application configuration settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Filesystem root of the vault; every other path is relative to it
    pub vault_dir: PathBuf,

    /// Folder holding the daily notes
    pub daily_notes_folder: String,

    /// Daily note path template using `{folder}`, `{yyyy}`, `{MM}`, `{dd}`,
    /// `{yyyy-MM-dd}` and `{yyyy-MM}`. `None` keeps `<folder>/<date>.md`.
    pub path_template: Option<String>,

    /// Heading under which new memos are appended, e.g. `## Memos`.
    /// `None` appends at the end of the file.
    pub memo_section_heading: Option<String>,

    /// Where stored attachments go; supports `{folder}`. Empty means
    /// `{folder}/_attachments`.
    pub attachments_folder: String,

    /// How many recent days the stream covers
    pub stream_days: u32,

    /// How many recent days the heatmap covers
    pub heatmap_days: u32,

    /// Files parsed per batch while warming the cache
    pub warm_cache_batch_size: usize,

    /// Default editor command
    pub editor_command: Option<String>,

    /// Whether to watch the vault for external changes
    pub watch_changes: bool,
}

impl Default for Config {
    fn default() -> Self {
        let vault_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Journal");

        Self {
            vault_dir,
            daily_notes_folder: DEFAULT_DAILY_NOTES_FOLDER.to_string(),
            path_template: None,
            memo_section_heading: None,
            attachments_folder: String::new(),
            stream_days: DEFAULT_STREAM_DAYS,
            heatmap_days: DEFAULT_HEATMAP_DAYS,
            warm_cache_batch_size: DEFAULT_WARM_CACHE_BATCH_SIZE,
            editor_command: None,
            watch_changes: true,
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "journal-memos").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Loads the configuration at `path`, or the default location when
    /// `None`. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)?;
        let config: Config = serde_json::from_str(&raw)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Writes the configuration as pretty JSON, creating parent folders.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Updates one setting from a `key=value` string.
    pub fn set(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| MemoError::ConfigError {
                message: format!("Expected key=value, got '{}'", assignment),
            })?;
        let value = value.trim();
        let optional = |value: &str| (!value.is_empty()).then(|| value.to_string());

        match key.trim() {
            "vault_dir" => self.vault_dir = PathBuf::from(value),
            "daily_notes_folder" => self.daily_notes_folder = value.to_string(),
            "path_template" => self.path_template = optional(value),
            "memo_section_heading" => self.memo_section_heading = optional(value),
            "attachments_folder" => self.attachments_folder = value.to_string(),
            "stream_days" => self.stream_days = parse_number(key, value)?,
            "heatmap_days" => self.heatmap_days = parse_number(key, value)?,
            "warm_cache_batch_size" => self.warm_cache_batch_size = parse_number(key, value)?,
            "editor_command" => self.editor_command = optional(value),
            "watch_changes" => {
                self.watch_changes = value.parse().map_err(|_| MemoError::ConfigError {
                    message: format!("watch_changes must be true or false, got '{}'", value),
                })?
            }
            other => {
                return Err(MemoError::ConfigError {
                    message: format!("Unknown setting: {}", other),
                })
            }
        }
        Ok(())
    }

    /// Stream window in days, never zero.
    pub fn stream_window(&self) -> u32 {
        positive_or(self.stream_days, DEFAULT_STREAM_DAYS)
    }

    /// Heatmap window in days, never zero.
    pub fn heatmap_window(&self) -> u32 {
        positive_or(self.heatmap_days, DEFAULT_HEATMAP_DAYS)
    }

    pub fn batch_size(&self) -> usize {
        if self.warm_cache_batch_size == 0 {
            DEFAULT_WARM_CACHE_BATCH_SIZE
        } else {
            self.warm_cache_batch_size
        }
    }

    /// The path template, if one is set and not blank.
    pub fn template(&self) -> Option<&str> {
        self.path_template
            .as_deref()
            .map(str::trim)
            .filter(|template| !template.is_empty())
    }

    /// The section heading, if one is set and not blank.
    pub fn section_heading(&self) -> Option<&str> {
        self.memo_section_heading
            .as_deref()
            .map(str::trim)
            .filter(|heading| !heading.is_empty())
    }

    /// Attachments folder template, defaulted when blank.
    pub fn attachments_template(&self) -> &str {
        let trimmed = self.attachments_folder.trim();
        if trimmed.is_empty() {
            DEFAULT_ATTACHMENTS_FOLDER
        } else {
            trimmed
        }
    }

    // This method provides smart fallbacks when no editor is configured
    pub fn get_editor_command(&self) -> String {
        // First try the configured editor
        if let Some(editor) = &self.editor_command {
            return editor.clone();
        }

        if let Ok(editor) = std::env::var("EDITOR") {
            return editor;
        }

        // Fall back to platform defaults
        if cfg!(windows) {
            "notepad".to_string()
        } else if cfg!(target_os = "macos") {
            "open -W -t".to_string()
        } else {
            for editor in &["nano", "vim", "vi", "emacs"] {
                if which(editor).is_ok() {
                    return editor.to_string();
                }
            }
            "nano".to_string()
        }
    }
}

fn positive_or(value: u32, fallback: u32) -> u32 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| MemoError::ConfigError {
        message: format!("{} must be a number, got '{}'", key.trim(), value),
    })
}
