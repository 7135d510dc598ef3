//! On-disk persistence of the auth session.
//!
//! The session lives in `session.json` under the platform config directory
//! (`~/.config/bazaar/` on Linux, `~/Library/Application Support/bazaar/` on
//! macOS, `%APPDATA%\bazaar\` on Windows).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::auth::AuthSession;

const APP_DIR: &str = "bazaar";
const SESSION_FILE: &str = "session.json";

/// JSON file holding one [`AuthSession`].
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store in the platform config directory, if the platform has one.
    pub fn in_config_dir() -> Option<Self> {
        let dir = dirs::config_dir()?.join(APP_DIR);
        Some(Self::at(dir.join(SESSION_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> anyhow::Result<Option<AuthSession>> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        let session = serde_json::from_str(&json)
            .with_context(|| format!("parsing session in {}", self.path.display()))?;
        Ok(Some(session))
    }

    pub fn save(&self, session: &AuthSession) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(session).context("encoding session")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing {}", self.path.display()))
    }

    /// Removing a session that was never saved is not an error.
    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}
