//! Configuration for threadkeep
//!
//! Loaded from TOML. Secrets such as bot tokens never live here; the Discord
//! crate reads those from the environment.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::cache::CachePolicy;
use crate::document::{
    DEFAULT_MAX_EDIT_LEN, DEFAULT_MAX_FRAGMENT_LEN, DocumentSettings, MAX_EDIT_LEN,
};
use crate::error::ConfigError;
use crate::id::{StreamId, UserId};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadkeepConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub documents: DocumentsConfig,

    #[serde(default)]
    pub discord: DiscordAppConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Backfill page size, at most 100
    #[serde(default = "default_page_size")]
    pub page_size: u8,
    #[serde(default = "default_first_page_size")]
    pub first_page_size: u8,
}

fn default_max_streams() -> usize {
    256
}

fn default_max_records() -> usize {
    100_000
}

fn default_page_size() -> u8 {
    100
}

fn default_first_page_size() -> u8 {
    1
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_streams: default_max_streams(),
            max_records: default_max_records(),
            page_size: default_page_size(),
            first_page_size: default_first_page_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Directory of local documents, relative to the config file
    #[serde(default = "default_documents_dir")]
    pub directory: PathBuf,

    /// Stream holding the document locators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_stream: Option<StreamId>,

    #[serde(default = "default_max_fragment_len")]
    pub max_fragment_len: usize,

    #[serde(default = "default_max_edit_len")]
    pub max_edit_len: usize,

    /// Documents synced on startup
    #[serde(default)]
    pub names: Vec<String>,
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("documents")
}

fn default_max_fragment_len() -> usize {
    DEFAULT_MAX_FRAGMENT_LEN
}

fn default_max_edit_len() -> usize {
    DEFAULT_MAX_EDIT_LEN
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            directory: default_documents_dir(),
            control_stream: None,
            max_fragment_len: default_max_fragment_len(),
            max_edit_len: default_max_edit_len(),
            names: Vec::new(),
        }
    }
}

/// Non-secret Discord settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscordAppConfig {
    /// Users allowed to edit, lock and unlock documents
    #[serde(default)]
    pub admin_users: Vec<UserId>,
}

fn invalid(
    config_path: &str,
    field: &str,
    expected: &str,
    reason: impl Into<String>,
) -> crate::CoreError {
    crate::CoreError::ConfigurationError {
        config_path: config_path.to_string(),
        field: field.to_string(),
        expected: expected.to_string(),
        cause: ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        },
    }
}

impl CacheConfig {
    pub fn policy(&self) -> Result<CachePolicy> {
        let max_streams = NonZeroUsize::new(self.max_streams).ok_or_else(|| {
            invalid(
                "<cache>",
                "cache.max_streams",
                "a positive number",
                "must be at least 1",
            )
        })?;
        if self.page_size == 0 || self.page_size > 100 {
            return Err(invalid(
                "<cache>",
                "cache.page_size",
                "a number from 1 to 100",
                format!("got {}", self.page_size),
            ));
        }
        if self.first_page_size == 0 || self.first_page_size > self.page_size {
            return Err(invalid(
                "<cache>",
                "cache.first_page_size",
                "a number from 1 to cache.page_size",
                format!("got {}", self.first_page_size),
            ));
        }
        Ok(CachePolicy {
            max_streams,
            max_records: self.max_records,
            page_size: self.page_size,
            first_page_size: self.first_page_size,
        })
    }
}

impl DocumentsConfig {
    pub fn settings(&self) -> Result<DocumentSettings> {
        let control_stream = self.control_stream.ok_or_else(|| {
            invalid(
                "<documents>",
                "documents.control_stream",
                "the id of the stream holding document locators",
                "missing",
            )
        })?;
        if self.max_fragment_len == 0 {
            return Err(invalid(
                "<documents>",
                "documents.max_fragment_len",
                "a positive number",
                "must be at least 1",
            ));
        }
        if self.max_edit_len == 0 || self.max_edit_len > MAX_EDIT_LEN {
            return Err(invalid(
                "<documents>",
                "documents.max_edit_len",
                &format!("a number from 1 to {MAX_EDIT_LEN}"),
                format!("got {}", self.max_edit_len),
            ));
        }
        Ok(DocumentSettings::new(self.directory.clone(), control_stream)
            .with_names(self.names.iter().cloned())
            .with_max_fragment_len(self.max_fragment_len)
            .with_max_edit_len(self.max_edit_len))
    }
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<ThreadkeepConfig> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        crate::CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "readable TOML file".to_string(),
            cause: ConfigError::Io(e.to_string()),
        }
    })?;

    let mut config: ThreadkeepConfig =
        toml::from_str(&content).map_err(|e| crate::CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "content".to_string(),
            expected: "valid TOML configuration".to_string(),
            cause: ConfigError::TomlParse(e.to_string()),
        })?;

    let base_dir = path.parent().unwrap_or(Path::new("."));
    config.documents.directory = resolve_path(base_dir, &config.documents.directory);

    Ok(config)
}

/// Save configuration to a TOML file
pub async fn save_config(config: &ThreadkeepConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            crate::CoreError::ConfigurationError {
                config_path: parent.display().to_string(),
                field: "directory".to_string(),
                expected: "writable directory".to_string(),
                cause: ConfigError::Io(e.to_string()),
            }
        })?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| crate::CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "serialization".to_string(),
            expected: "serializable config structure".to_string(),
            cause: ConfigError::TomlSerialize(e.to_string()),
        })?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| crate::CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "writable file location".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })?;

    Ok(())
}

/// Standard config file locations
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("threadkeep.toml"));

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("threadkeep").join("config.toml"));
    }

    paths
}

/// Load configuration from the first standard location that exists
pub async fn load_config_from_standard_locations() -> Result<ThreadkeepConfig> {
    for path in config_paths() {
        if path.exists() {
            return load_config(&path).await;
        }
    }

    Ok(ThreadkeepConfig::default())
}

impl ThreadkeepConfig {
    pub async fn load() -> Result<Self> {
        load_config_from_standard_locations().await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        load_config(path).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        save_config(self, path).await
    }
}
