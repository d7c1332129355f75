//! Session persistence adapters.
//!
//! The session manager never touches the filesystem directly; it goes through
//! an injected [`SessionStore`]. Two adapters ship with the crate:
//!
//! - [`FileStore`]: a JSON document on disk, written atomically
//! - [`MemoryStore`]: process-local, for tests and ephemeral shells
//!
//! # Document layout
//!
//! ```json
//! {
//!   "auth-storage": {
//!     "state": { "token": "...", "refreshToken": "...", "user": { ... } },
//!     "version": 0
//!   },
//!   "token": "...",
//!   "refreshToken": "..."
//! }
//! ```
//!
//! The top-level `token`/`refreshToken` keys mirror the blob. On load the blob
//! wins and the mirrored keys fill in whatever it lacks.

use std::{
    fmt,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    auth::session::UserProfile,
    error::{ClientError, Result},
};

/// Key of the persisted state blob.
pub const STORAGE_KEY: &str = "auth-storage";

/// Schema version written into the blob.
pub const STORAGE_VERSION: u32 = 0;

/// Session state as persisted.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    /// Access token.
    #[serde(default)]
    pub token: Option<String>,
    /// Refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// User profile snapshot.
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl PersistedSession {
    /// Whether there is nothing worth restoring.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.refresh_token.is_none()
    }
}

impl fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSession")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("user", &self.user)
            .finish()
    }
}

impl Drop for PersistedSession {
    fn drop(&mut self) {
        self.token.zeroize();
        self.refresh_token.zeroize();
    }
}

/// Persistence port for the session manager.
///
/// Implementations must be cheap enough to call on every login, refresh and
/// logout. Errors are logged by the caller and never abort a session
/// operation.
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Loads the persisted session, `None` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::StorageError`] if stored data cannot be read.
    fn load(&self) -> Result<Option<PersistedSession>>;

    /// Replaces the persisted session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::StorageError`] if the session cannot be written.
    fn save(&self, session: &PersistedSession) -> Result<()>;

    /// Removes any persisted session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::StorageError`] if stored data cannot be removed.
    fn clear(&self) -> Result<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Option<PersistedSession>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `session`.
    #[must_use]
    pub fn with_session(session: PersistedSession) -> Self {
        Self { inner: Mutex::new(Some(session)) }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<PersistedSession>>> {
        self.inner.lock().map_err(|_| ClientError::StorageError("store lock poisoned".to_owned()))
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedSession>> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        *self.lock()? = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StorageBlob {
    #[serde(default)]
    state: PersistedSession,
    #[serde(default)]
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct StorageDocument {
    #[serde(rename = "auth-storage", default)]
    auth_storage: Option<StorageBlob>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "refreshToken")]
    refresh_token: Option<String>,
}

impl StorageDocument {
    fn from_session(session: &PersistedSession) -> Self {
        Self {
            auth_storage: Some(StorageBlob { state: session.clone(), version: STORAGE_VERSION }),
            token: session.token.clone(),
            refresh_token: session.refresh_token.clone(),
        }
    }

    fn into_session(mut self) -> PersistedSession {
        let mut session = self.auth_storage.take().map(|blob| blob.state).unwrap_or_default();
        if session.token.is_none() {
            session.token = self.token.take();
        }
        if session.refresh_token.is_none() {
            session.refresh_token = self.refresh_token.take();
        }
        session
    }
}

impl Drop for StorageDocument {
    fn drop(&mut self) {
        self.token.zeroize();
        self.refresh_token.zeroize();
    }
}

/// JSON file store.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash never leaves a half-written session behind. On Unix the
/// file is created with mode `0600`.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Creates a store backed by `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn storage_error(&self, action: &str, err: &io::Error) -> ClientError {
        ClientError::StorageError(format!("failed to {action} {}: {err}", self.path.display()))
    }

    fn write_atomically(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &self.path)
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<Option<PersistedSession>> {
        let mut bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.storage_error("read", &e)),
        };

        let parsed: std::result::Result<StorageDocument, _> = serde_json::from_slice(&bytes);
        bytes.zeroize();
        let document = parsed.map_err(|e| {
            ClientError::StorageError(format!("corrupt session file {}: {e}", self.path.display()))
        })?;

        let session = document.into_session();
        Ok((!session.is_empty() || session.user.is_some()).then_some(session))
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        let document = StorageDocument::from_session(session);
        let mut bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| ClientError::StorageError(format!("failed to encode session: {e}")))?;
        let result = self.write_atomically(&bytes);
        bytes.zeroize();
        result.map_err(|e| self.storage_error("write", &e))
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.storage_error("remove", &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::Role;

    fn temp_store() -> FileStore {
        let dir = std::env::temp_dir().join(format!("pharmacy-client-{}", uuid::Uuid::new_v4()));
        FileStore::new(dir.join("auth-storage.json"))
    }

    fn sample() -> PersistedSession {
        PersistedSession {
            token: Some("access-1".to_owned()),
            refresh_token: Some("refresh-1".to_owned()),
            user: Some(UserProfile {
                id: "u-1".to_owned(),
                name: Some("Amina".to_owned()),
                email: "amina@example.com".to_owned(),
                role: Role::Owner,
                pharmacy_id: None,
            }),
        }
    }

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let store = temp_store();
        assert!(store.load().unwrap().is_none());
        assert!(store.clear().is_ok());
    }

    #[test]
    fn test_file_store_document_layout() {
        let store = temp_store();
        store.save(&sample()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["auth-storage"]["state"]["token"], "access-1");
        assert_eq!(raw["auth-storage"]["state"]["refreshToken"], "refresh-1");
        assert_eq!(raw["auth-storage"]["state"]["user"]["email"], "amina@example.com");
        assert_eq!(raw["auth-storage"]["version"], 0);
        assert_eq!(raw["token"], "access-1");
        assert_eq!(raw["refreshToken"], "refresh-1");

        assert_eq!(store.load().unwrap(), Some(sample()));
        assert!(!store.temp_path().exists());

        store.clear().unwrap();
        assert!(!store.path().exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_falls_back_to_mirrored_keys() {
        let store = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{"auth-storage":{"state":{"token":null,"user":null},"version":0},
                "token":"mirrored-access","refreshToken":"mirrored-refresh"}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token.as_deref(), Some("mirrored-access"));
        assert_eq!(loaded.refresh_token.as_deref(), Some("mirrored-refresh"));
        assert!(loaded.user.is_none());
    }

    #[test]
    fn test_file_store_blob_wins_over_mirror() {
        let store = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{"auth-storage":{"state":{"token":"blob"}},"token":"mirror","refreshToken":"r"}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token.as_deref(), Some("blob"));
        assert_eq!(loaded.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let store = temp_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(ClientError::StorageError(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let store = temp_store();
        store.save(&sample()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_persisted_session_debug_redacts() {
        let debug = format!("{:?}", sample());
        assert!(!debug.contains("access-1"));
        assert!(!debug.contains("refresh-1"));
    }
}
