#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_VTARCHIVE_PORT: u16 = 8200;
pub const DEFAULT_VTARCHIVE_HOST: &str = "127.0.0.1";

/// Resolved runtime configuration. The archive root holds the SQLite
/// database, the download lock marker and the settings file; the web
/// root is the static frontend served by the backend.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    pub archive_root: PathBuf,
    pub web_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub youtube_api_key: Option<String>,
}

pub fn load_runtime_paths() -> Result<RuntimePaths> {
    resolve_runtime_paths(RuntimeOverrides::default())
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub archive_root: Option<PathBuf>,
    pub web_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_paths(overrides: RuntimeOverrides) -> Result<RuntimePaths> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_paths_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_paths(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimePaths> {
    build_runtime_paths_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_paths_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimePaths> {
    let archive_root = overrides
        .archive_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("ARCHIVE_ROOT", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("ARCHIVE_ROOT not set"))?;
    let web_root = overrides
        .web_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("WEB_ROOT", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("WEB_ROOT not set"))?;
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("VTARCHIVE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_VTARCHIVE_PORT);
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        })
        .or_else(|| lookup_value("VTARCHIVE_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_VTARCHIVE_HOST.to_string());
    let youtube_api_key = lookup_value("YOUTUBE_API_KEY", file_vars, &env_lookup);
    Ok(RuntimePaths {
        archive_root: PathBuf::from(archive_root),
        web_root: PathBuf::from(web_root),
        port,
        host,
        youtube_api_key,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
