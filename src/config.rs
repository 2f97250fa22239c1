// Persisted settings: `~/.fakeoutrc` in INI form, plus environment
// overrides. Only `server` and `token` are read, and only at startup.
//
//   [DEFAULT]
//   server = https://koala.example.org
//   token = s3cret

use anyhow::{Context, Result};
use ::config::{Config, FileFormat};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const RC_FILE_NAME: &str = ".fakeoutrc";
pub const RC_PATH_VAR: &str = "FAKEOUT_RC";
pub const SERVER_VAR: &str = "FAKEOUT_SERVER";
pub const TOKEN_VAR: &str = "FAKEOUT_TOKEN";

/// Connection settings the shell starts with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub server: Option<String>,
    pub token: Option<String>,
    /// The rc file the values came from, if one was read.
    pub source: Option<PathBuf>,
}

impl Settings {
    /// Location of the rc file: `$FAKEOUT_RC`, else `~/.fakeoutrc`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(RC_PATH_VAR) {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|home| home.join(RC_FILE_NAME))
    }

    /// Read the rc file (if any) and apply environment overrides.
    pub fn load() -> Self {
        Self::load_from(
            Self::default_path(),
            std::env::var(SERVER_VAR).ok(),
            std::env::var(TOKEN_VAR).ok(),
        )
    }

    /// An unreadable rc file is logged and skipped; the shell still starts.
    pub fn load_from(path: Option<PathBuf>, server: Option<String>, token: Option<String>) -> Self {
        let mut settings = match path {
            Some(path) if path.exists() => Self::from_file(&path).unwrap_or_else(|err| {
                warn!("ignoring {}: {err:#}", path.display());
                Settings::default()
            }),
            _ => Settings::default(),
        };
        settings.apply_overrides(server, token);
        settings
    }

    /// Parse an rc file. Keys may sit under `[DEFAULT]` or before any section.
    pub fn from_file(path: &Path) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(::config::File::from(path).format(FileFormat::Ini))
            .build()
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Ok(Settings {
            server: lookup(&cfg, "server"),
            token: lookup(&cfg, "token"),
            source: Some(path.to_path_buf()),
        })
    }

    /// Non-empty values win over whatever the file said.
    pub fn apply_overrides(&mut self, server: Option<String>, token: Option<String>) {
        if let Some(server) = server.filter(|s| !s.trim().is_empty()) {
            self.server = Some(server);
        }
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.token = Some(token);
        }
    }
}

fn lookup(cfg: &Config, key: &str) -> Option<String> {
    ["DEFAULT", "default"]
        .iter()
        .map(|section| format!("{section}.{key}"))
        .chain(std::iter::once(key.to_string()))
        .find_map(|k| cfg.get_string(&k).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
