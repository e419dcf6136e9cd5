use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use strum::EnumString;

use crate::config::themes::ThemeRegistry;
use crate::phrases::DEFAULT_SLOT;

pub mod themes;

pub use themes::Palette;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Phrasecards";
const APP_NAME: &str = "phrasecards";

pub const CONFIG_ENV: &str = "PHRASECARDS_CONFIG";
pub const DATA_ENV: &str = "PHRASECARDS_DATA";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

const CONFIG_HEADER: &str = "# phrasecards configuration\n\
# storage.backend: sqlite | json-file | memory\n\
# theme: dark | light | high-contrast | solarized\n\n";

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        ConfigPaths::discover().map(Self::from_paths)
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if self.paths.config_file.exists() {
            return self.load();
        }
        let mut cfg = AppConfig::default();
        cfg.post_load(&self.paths)?;
        self.write_default_config(&cfg)?;
        tracing::info!(path = %self.paths.config_file.display(), "wrote default config");
        Ok(cfg)
    }

    pub fn load(&self) -> Result<AppConfig> {
        let path = &self.paths.config_file;
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut cfg: AppConfig = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let path = &self.paths.config_file;
        let body = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        let mut file = fs::File::create(path)
            .with_context(|| format!("creating config {}", path.display()))?;
        file.write_all(CONFIG_HEADER.as_bytes())
            .and_then(|_| file.write_all(body.as_bytes()))
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub backup_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    /// Platform directories, with `PHRASECARDS_CONFIG` (a file or a directory)
    /// and `PHRASECARDS_DATA` taking precedence.
    pub fn discover() -> Result<Self> {
        let dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("no home directory to place phrasecards files in")?;

        let (config_dir, config_file) = match env::var_os(CONFIG_ENV).map(PathBuf::from) {
            Some(path) if path.is_dir() => (path.clone(), path.join("config.toml")),
            Some(path) => {
                let dir = path
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                (dir, path)
            }
            None => {
                let dir = dirs.config_dir().to_path_buf();
                let file = dir.join("config.toml");
                (dir, file)
            }
        };

        let data_dir = env::var_os(DATA_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| dirs.data_dir().to_path_buf());
        Ok(Self::rooted(config_dir, config_file, data_dir, dirs.state_dir()))
    }

    pub fn under(root: &Path) -> Self {
        let config_dir = root.join("config");
        let config_file = config_dir.join("config.toml");
        Self::rooted(config_dir, config_file, root.join("data"), None)
    }

    fn rooted(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_dir: PathBuf,
        state_dir: Option<&Path>,
    ) -> Self {
        let state_dir = match state_dir {
            Some(dir) => dir.to_path_buf(),
            None => data_dir.join("state"),
        };
        Self {
            database_path: data_dir.join("phrases.db"),
            backup_dir: data_dir.join("backups"),
            log_dir: state_dir.join("logs"),
            config_dir,
            config_file,
            data_dir,
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        let dirs = [
            &self.config_dir,
            &self.data_dir,
            &self.backup_dir,
            &self.log_dir,
        ];
        for dir in dirs {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("phrasecards.log")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(deserialize_with = "lenient_theme")]
    pub theme: ThemeName,
    pub storage: StorageOptions,
    pub celebration: CelebrationConfig,
    pub search: SearchOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: ThemeName::Dark,
            storage: StorageOptions::default(),
            celebration: CelebrationConfig::default(),
            search: SearchOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        Ok(())
    }

    pub fn palette(&self) -> Palette {
        ThemeRegistry::default().palette(&self.theme)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    Sqlite,
    JsonFile,
    Memory,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Sqlite
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    pub backend: StorageBackend,
    pub slot: String,
    pub wal_autocheckpoint: u32,
    pub backup_corrupt: bool,
    #[serde(skip)]
    pub database_path: PathBuf,
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(skip)]
    pub backup_dir: PathBuf,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            slot: DEFAULT_SLOT.to_string(),
            wal_autocheckpoint: 1000,
            backup_corrupt: true,
            database_path: PathBuf::new(),
            data_dir: PathBuf::new(),
            backup_dir: PathBuf::new(),
        }
    }
}

impl StorageOptions {
    pub fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        if self.data_dir.as_os_str().is_empty() {
            self.data_dir = paths.data_dir.clone();
        }
        if self.backup_dir.as_os_str().is_empty() {
            self.backup_dir = paths.backup_dir.clone();
        }
        let trimmed = self.slot.trim();
        if trimmed.is_empty() {
            tracing::warn!("empty storage slot name in config, using '{DEFAULT_SLOT}'");
            self.slot = DEFAULT_SLOT.to_string();
        } else if trimmed.len() != self.slot.len() {
            self.slot = trimmed.to_string();
        }
        Ok(())
    }

    pub fn json_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.slot))
    }

    pub fn corrupt_backup_dir(&self) -> Option<&Path> {
        if self.backup_corrupt {
            Some(self.backup_dir.as_path())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CelebrationConfig {
    pub enabled: bool,
    pub dismiss_after_ms: u64,
}

impl Default for CelebrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dismiss_after_ms: 3000,
        }
    }
}

impl CelebrationConfig {
    pub fn dismiss_after(&self) -> Duration {
        Duration::from_millis(self.dismiss_after_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub highlight_matches: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            highlight_matches: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, std::hash::Hash, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ThemeName {
    Dark,
    Light,
    HighContrast,
    Solarized,
}

impl Default for ThemeName {
    fn default() -> Self {
        ThemeName::Dark
    }
}

fn lenient_theme<'de, D>(deserializer: D) -> std::result::Result<ThemeName, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Ok(name.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(theme = %name, "unknown theme in config, using dark");
        ThemeName::default()
    }))
}
