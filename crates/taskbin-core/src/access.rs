use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_WRITE_SECRET: &str = "112233";

/// Single key-value slot that keeps the access token between sessions.
pub trait TokenSlot: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<String>>;
    fn store(&self, token: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileTokenSlot {
    path: PathBuf,
}

impl FileTokenSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenSlot for FileTokenSlot {
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> anyhow::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }

    #[tracing::instrument(skip(self, token), fields(path = %self.path.display()))]
    fn store(&self, token: &str) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        fs::write(&self.path, token)
            .with_context(|| format!("failed writing {}", self.path.display()))?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    fn clear(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed removing {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// In-process slot. Clones share the same value, which lets tests model a
/// token surviving into a later session.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenSlot {
    value: Arc<Mutex<Option<String>>>,
}

impl MemoryTokenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            value: Arc::new(Mutex::new(Some(token.to_string()))),
        }
    }

    pub fn peek(&self) -> Option<String> {
        self.value.lock().clone()
    }
}

impl TokenSlot for MemoryTokenSlot {
    fn load(&self) -> anyhow::Result<Option<String>> {
        Ok(self.value.lock().clone())
    }

    fn store(&self, token: &str) -> anyhow::Result<()> {
        *self.value.lock() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self.value.lock() = None;
        Ok(())
    }
}

/// Client-side write switch. The secret ships with the client, so this only
/// keeps honest users from editing by accident; it is not authorization.
pub struct AccessGate {
    slot: Box<dyn TokenSlot>,
    secret: String,
    token: Option<String>,
    writable: bool,
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("has_token", &self.token.is_some())
            .field("writable", &self.writable)
            .finish()
    }
}

impl AccessGate {
    /// Reads the persisted token and derives the writable flag from it.
    pub fn open(slot: Box<dyn TokenSlot>, secret: impl Into<String>) -> anyhow::Result<Self> {
        let secret = secret.into();
        let token = slot.load().context("failed to read access token")?;
        let writable = token.as_deref() == Some(secret.as_str());
        debug!(has_token = token.is_some(), writable, "access gate opened");
        Ok(Self {
            slot,
            secret,
            token,
            writable,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Succeeds, and persists the token, only on an exact match with the
    /// secret. A wrong candidate leaves every field as it was.
    #[tracing::instrument(skip_all)]
    pub fn unlock(&mut self, candidate: &str) -> anyhow::Result<bool> {
        if candidate != self.secret {
            warn!("rejected access token");
            return Ok(false);
        }

        self.slot
            .store(candidate)
            .context("failed to persist access token")?;
        self.token = Some(candidate.to_string());
        self.writable = true;
        info!("write access unlocked");
        Ok(true)
    }

    /// Always ends read-only, even if clearing the persisted slot fails.
    #[tracing::instrument(skip_all)]
    pub fn lock(&mut self) -> anyhow::Result<()> {
        self.token = None;
        self.writable = false;
        info!("write access locked");
        self.slot.clear().context("failed to clear access token")
    }
}
