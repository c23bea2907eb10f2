use crate::Config;
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "DEPOT_";
const EXTENSIONS: [&str; 3] = ["toml", "yaml", "json"];

/// Values given on the command line. They override every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Explicit configuration file; must exist.
    pub config: Option<PathBuf>,
    pub listen_addr: Option<IpAddr>,
    pub listen_port: Option<u16>,
    pub log_level: Option<String>,
    pub upstream_url: Option<String>,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "depot")
}

pub(crate) fn default_storage_root() -> PathBuf {
    project_dirs().map_or_else(|| PathBuf::from("collections"), |dirs| dirs.data_dir().join("collections"))
}

/// System-wide and per-user configuration files, lowest precedence first.
/// Files that don't exist are skipped when loading.
pub fn default_locations() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("/etc/depot")];
    if let Some(project) = project_dirs() {
        dirs.push(project.config_dir().to_path_buf());
    }
    dirs.iter()
        .flat_map(|dir| EXTENSIONS.iter().map(move |extension| dir.join(format!("config.{extension}"))))
        .collect()
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    let figment = match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    };
    tracing::debug!(path = %path.display(), "Loaded configuration file");
    Ok(figment)
}

impl Config {
    /// Merge every configuration source into one figment.
    pub fn figment(locations: impl IntoIterator<Item = PathBuf>, overrides: &Overrides) -> Result<Figment> {
        let mut figment = Figment::new();
        for path in locations {
            if path.is_file() {
                figment = merge_file(figment, &path)?;
            }
        }
        if let Some(path) = &overrides.config {
            if !path.is_file() {
                exn::bail!(ErrorKind::FileNotFound(path.clone()));
            }
            figment = merge_file(figment, path)?;
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(addr) = overrides.listen_addr {
            figment = figment.merge(Serialized::default("listen.addr", addr));
        }
        if let Some(port) = overrides.listen_port {
            figment = figment.merge(Serialized::default("listen.port", port));
        }
        if let Some(level) = &overrides.log_level {
            figment = figment.merge(Serialized::default("log.level", level));
        }
        if let Some(url) = &overrides.upstream_url {
            figment = figment.merge(Serialized::default("upstream.url", url));
        }
        Ok(figment)
    }

    /// Load and validate configuration from `locations`, the environment
    /// and `overrides`.
    pub fn load(locations: impl IntoIterator<Item = PathBuf>, overrides: &Overrides) -> Result<Self> {
        let config: Self = Self::figment(locations, overrides)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the [default locations](default_locations).
    pub fn discover(overrides: &Overrides) -> Result<Self> {
        Self::load(default_locations(), overrides)
    }
}
