//! Current identity and the stores that hold it.
//!
//! The gate only reads sessions; creating and invalidating them belongs to the identity provider.
//! `cached()` is the fast local path, `current()` the authoritative (possibly remote) one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity record of an authenticated client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub display_name: String,
    pub team: String,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        team: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            team: team.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session store unreachable: {0}")]
    Unreachable(String),
    #[error("malformed session record: {0}")]
    Malformed(String),
    #[error("session validation returned status {0}")]
    Status(u16),
    #[error("reading session: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of the current session. Implementations must not mutate the session on read.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Local cached identity, if any. Must not touch the network.
    fn cached(&self) -> Option<Session> {
        None
    }

    /// Authoritative lookup. `Ok(None)` means no session; `Err` means the store could not answer.
    async fn current(&self) -> Result<Option<Session>, SessionError>;
}

/// In-memory store (embedding hosts and tests).
pub struct MemorySessionStore {
    inner: Arc<std::sync::RwLock<Option<Session>>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemorySessionStore {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            inner: Arc::new(std::sync::RwLock::new(session)),
        }
    }

    pub fn set(&self, session: Session) {
        if let Ok(mut g) = self.inner.write() {
            *g = Some(session);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut g) = self.inner.write() {
            *g = None;
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn cached(&self) -> Option<Session> {
        self.inner.read().ok().and_then(|g| g.clone())
    }

    async fn current(&self) -> Result<Option<Session>, SessionError> {
        Ok(self.cached())
    }
}

/// Persisted identity file (JSON `{ id, displayName, team }`). Missing file means no session.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, s: &str) -> Result<Session, SessionError> {
        serde_json::from_str(s)
            .map_err(|e| SessionError::Malformed(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    /// Blocking read: `cached()` is synchronous and the identity file is a few hundred bytes on
    /// local disk, so it is read in place rather than on the blocking pool.
    fn cached(&self) -> Option<Session> {
        let s = std::fs::read_to_string(&self.path).ok()?;
        self.parse(&s).ok()
    }

    async fn current(&self) -> Result<Option<Session>, SessionError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => self.parse(&s).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::Io(e)),
        }
    }
}

/// Validates the session with a remote identity endpoint; the local file serves as cache.
pub struct RemoteSessionStore {
    url: String,
    token: Option<String>,
    cache: Option<FileSessionStore>,
    client: reqwest::Client,
}

impl RemoteSessionStore {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
            cache: None,
            client: reqwest::Client::new(),
        }
    }

    /// Use a persisted identity file as the fast local path.
    pub fn with_cache(mut self, cache: FileSessionStore) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[async_trait]
impl SessionStore for RemoteSessionStore {
    fn cached(&self) -> Option<Session> {
        self.cache.as_ref().and_then(|c| c.cached())
    }

    /// GET the validation URL. 200 => session; 401/403/404 => no session; other statuses are errors.
    async fn current(&self) -> Result<Option<Session>, SessionError> {
        let mut req = self.client.get(&self.url);
        if let Some(ref t) = self.token {
            req = req.bearer_auth(t);
        }
        let res = req
            .send()
            .await
            .map_err(|e| SessionError::Unreachable(e.to_string()))?;
        let status = res.status();
        if status.is_success() {
            let session: Session = res
                .json()
                .await
                .map_err(|e| SessionError::Malformed(e.to_string()))?;
            return Ok(Some(session));
        }
        match status.as_u16() {
            401 | 403 | 404 => Ok(None),
            code => Err(SessionError::Status(code)),
        }
    }
}
