use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};

use crate::message::DEFAULT_SENDER_ID;

pub mod themes;

const APP_DOMAIN: &str = "com";
const APP_ORG: &str = "a101apps";
const APP_NAME: &str = "braindump";

pub const CONFIG_ENV: &str = "BRAINDUMP_CONFIG";
pub const DATA_ENV: &str = "BRAINDUMP_DATA";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub export_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

struct PlatformDirs {
    config_dir: PathBuf,
    data_dir: PathBuf,
    state_dir: Option<PathBuf>,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;
        let defaults = PlatformDirs {
            config_dir: project_dirs.config_dir().to_path_buf(),
            data_dir: project_dirs.data_dir().to_path_buf(),
            state_dir: project_dirs.state_dir().map(Path::to_path_buf),
        };
        Ok(Self::resolve(override_config, override_data, defaults))
    }

    /// Applies the config and data overrides on top of the platform layout.
    /// A data override relocates state and logs along with the database.
    fn resolve(
        override_config: Option<PathBuf>,
        override_data: Option<PathBuf>,
        defaults: PlatformDirs,
    ) -> Self {
        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or(defaults.config_dir);

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        match override_data {
            Some(data_root) => Self::rooted(config_dir, config_file, data_root, None),
            None => Self::rooted(
                config_dir,
                config_file,
                defaults.data_dir,
                defaults.state_dir.as_deref(),
            ),
        }
    }

    /// Lays every path out under one directory; used by tests and `--data-dir` style setups.
    pub fn under(root: &Path) -> Self {
        let config_dir = root.join("config");
        let config_file = config_dir.join("config.toml");
        Self::rooted(config_dir, config_file, root.join("data"), None)
    }

    fn rooted(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_root: PathBuf,
        state_dir: Option<&Path>,
    ) -> Self {
        let state_dir = state_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));
        Self {
            config_dir,
            config_file,
            database_path: data_root.join("braindump.db"),
            export_dir: data_root.join("exports"),
            log_dir: state_dir.join("logs"),
            data_dir: data_root,
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.log_dir, &self.state_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub theme: ThemeName,
    /// Author tag written on every new entry.
    pub sender_id: String,
    pub storage: StorageOptions,
    pub export: ExportOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: ThemeName::Dark,
            sender_id: DEFAULT_SENDER_ID.to_string(),
            storage: StorageOptions::default(),
            export: ExportOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        self.export.resolve(paths);
        if self.sender_id.trim().is_empty() {
            tracing::warn!("empty sender_id in config, falling back to {DEFAULT_SENDER_ID}");
            self.sender_id = DEFAULT_SENDER_ID.to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Where automatically named exports land. Empty means the user's
    /// Downloads directory, or `<data>/exports` when there is none.
    pub directory: PathBuf,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
        }
    }
}

impl ExportOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.directory.as_os_str().is_empty() {
            self.directory = UserDirs::new()
                .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
                .unwrap_or_else(|| paths.export_dir.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, std::hash::Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeName {
    Dark,
    Light,
}

impl Default for ThemeName {
    fn default() -> Self {
        ThemeName::Dark
    }
}
