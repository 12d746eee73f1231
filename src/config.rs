//! Credential store: a small dotenv-format key-value file holding the server
//! address and the bearer token between invocations.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub const WEBSITE_KEY: &str = "WEBSITE";
pub const TOKEN_KEY: &str = "TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read credentials from '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: dotenvy::Error,
    },

    #[error("could not write credentials to '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("no server address configured; pass --website, set IRMS_WEBSITE or login first")]
    MissingWebsite,
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl CredentialStore {
    /// `<config dir>/irms/credentials`, or `./irms/credentials` when the
    /// platform has no config directory.
    pub fn default_path() -> PathBuf {
        let dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        dir.join("irms").join("credentials")
    }

    /// Loads the store; a missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut entries = BTreeMap::new();
        if path.exists() {
            let read_error = |source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            };
            for item in dotenvy::from_path_iter(&path).map_err(read_error)? {
                let (key, value) = item.map_err(read_error)?;
                entries.insert(key, value);
            }
        }
        debug!(path = %path.display(), keys = entries.len(), "loaded credential store");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value for `key`; empty values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    /// Rewrites the whole file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let contents: String = self
            .entries
            .iter()
            .map(|(key, value)| format!("{key}={}\n", quote(value)))
            .collect();
        fs::write(&self.path, contents).map_err(write_error)?;
        restrict_permissions(&self.path).map_err(write_error)?;
        debug!(path = %self.path.display(), "saved credential store");
        Ok(())
    }
}

/// Single quotes are literal in dotenv files; values that contain one fall
/// back to double quotes with escapes.
fn quote(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if matches!(ch, '"' | '\\' | '$') {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Server address: the command line (or `IRMS_WEBSITE`) wins over the
/// stored value.
pub fn resolve_website(flag: Option<&str>, store: &CredentialStore) -> Result<String, ConfigError> {
    flag.map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| store.get(WEBSITE_KEY))
        .map(|website| website.trim_end_matches('/').to_string())
        .ok_or(ConfigError::MissingWebsite)
}
