use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;
const MAX_UPLOAD_CONCURRENCY: usize = 16;

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    cloud: CloudConfig,
    #[serde(default)]
    service: ServiceSection,
}

#[derive(Deserialize, Default)]
struct CloudConfig {
    projects_save_path: Option<String>,
}

#[derive(Deserialize, Default)]
struct ServiceSection {
    upload_concurrency: Option<usize>,
    remote_root: Option<String>,
}

/// Settings handed to every snapshot when it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub upload_concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
        }
    }
}

pub struct Config {
    cloud: CloudConfig,
    service: ServiceSection,
}

impl Config {
    /// Embedded defaults merged with `~/.config/skysync/config.toml`.
    pub fn load() -> Self {
        Self::load_from(user_config_path().as_deref())
    }

    pub fn load_from(user_path: Option<&Path>) -> Self {
        let mut base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).expect("Failed to parse embedded config.toml");

        if let Some(path) = user_path {
            if path.exists() {
                match std::fs::read_to_string(path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => {
                            merge_cloud(&mut base.cloud, user.cloud);
                            merge_service(&mut base.service, user.service);
                        }
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        Config {
            cloud: base.cloud,
            service: base.service,
        }
    }

    /// Directory where projects pending a cloud save are written.
    pub fn cloud_projects_save_path(&self) -> PathBuf {
        non_empty(self.cloud.projects_save_path.as_deref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("cloud-projects"))
    }

    /// Root directory of the filesystem remote.
    pub fn remote_root(&self) -> PathBuf {
        non_empty(self.service.remote_root.as_deref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("remote"))
    }

    /// Parallel block uploads per snapshot (clamped to 1..=16).
    pub fn upload_concurrency(&self) -> usize {
        self.service
            .upload_concurrency
            .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY)
            .clamp(1, MAX_UPLOAD_CONCURRENCY)
    }

    pub fn service(&self) -> ServiceConfig {
        ServiceConfig {
            upload_concurrency: self.upload_concurrency(),
        }
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("skysync").join("config.toml"))
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skysync")
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn merge_cloud(base: &mut CloudConfig, user: CloudConfig) {
    if user.projects_save_path.is_some() {
        base.projects_save_path = user.projects_save_path;
    }
}

fn merge_service(base: &mut ServiceSection, user: ServiceSection) {
    if user.upload_concurrency.is_some() {
        base.upload_concurrency = user.upload_concurrency;
    }
    if user.remote_root.is_some() {
        base.remote_root = user.remote_root;
    }
}
