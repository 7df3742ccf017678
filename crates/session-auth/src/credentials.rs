//! Credential storage for the access/refresh token pair
//!
//! `CredentialStore` is the single writer of the pair. Two implementations:
//! `FileCredentialStore` persists to a JSON file (atomic temp-file + rename,
//! mode 0600) so a session survives process restarts, and
//! `MemoryCredentialStore` keeps everything in-process.
//!
//! Both keep the in-memory state authoritative: a failed disk write is
//! reported as an error but `get()` still reflects the update.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// The bearer credential pair. Both tokens are opaque and never decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: Secret::new(refresh_token.into()),
        }
    }
}

/// Identity cached next to the tokens after login or signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Durable holder of the credential pair.
///
/// `get` never fails; absence is the normal not-yet-authenticated state.
/// `set` replaces both tokens under one lock so no reader observes a mixed
/// pair. `set_access` is the refresh-cycle update: the server rotates the
/// access token only, so the refresh token is left untouched.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Pin<Box<dyn Future<Output = Option<CredentialPair>> + Send + '_>>;

    fn set(&self, pair: CredentialPair) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Replace the access token of the pair whose refresh token is
    /// `refresh_token`.
    ///
    /// Returns `Error::NoSession` if no pair is stored (the session was
    /// cleared while a refresh was outstanding) and `Error::SessionChanged`
    /// if the stored pair now belongs to a different login.
    fn set_access<'a>(
        &'a self,
        refresh_token: &'a Secret<String>,
        access_token: Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Remove both tokens and the cached identity.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn user(&self) -> Pin<Box<dyn Future<Output = Option<UserIdentity>> + Send + '_>>;

    fn set_user(&self, user: UserIdentity)
    -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// On-disk layout: `{"access_token": "...", "refresh_token": "...", "user": {...}}`
#[derive(Default, Clone, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserIdentity>,
}

impl StoredSession {
    fn pair(&self) -> Option<CredentialPair> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Some(CredentialPair::new(access.clone(), refresh.clone()))
            }
            _ => None,
        }
    }

    fn set_pair(&mut self, pair: &CredentialPair) {
        self.access_token = Some(pair.access_token.expose().clone());
        self.refresh_token = Some(pair.refresh_token.expose().clone());
    }

    fn set_access(&mut self, refresh_token: &Secret<String>, access_token: &Secret<String>) -> Result<()> {
        let current = self.pair().ok_or(Error::NoSession)?;
        if current.refresh_token != *refresh_token {
            return Err(Error::SessionChanged);
        }
        self.access_token = Some(access_token.expose().clone());
        Ok(())
    }

    fn clear(&mut self) {
        *self = StoredSession::default();
    }

    /// A file holding only one of the two tokens is treated as no session.
    fn normalized(mut self) -> Self {
        if self.pair().is_none() && (self.access_token.is_some() || self.refresh_token.is_some())
        {
            warn!("credential file holds an incomplete token pair, ignoring it");
            self.access_token = None;
            self.refresh_token = None;
        }
        self
    }
}

/// Process-local store. State is lost on exit.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<StoredSession>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a pair.
    pub fn with_pair(pair: CredentialPair) -> Self {
        let mut state = StoredSession::default();
        state.set_pair(&pair);
        Self {
            state: Mutex::new(state),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Pin<Box<dyn Future<Output = Option<CredentialPair>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.pair() })
    }

    fn set(&self, pair: CredentialPair) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.state.lock().await.set_pair(&pair);
            Ok(())
        })
    }

    fn set_access<'a>(
        &'a self,
        refresh_token: &'a Secret<String>,
        access_token: Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.state
                .lock()
                .await
                .set_access(refresh_token, &access_token)
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.state.lock().await.clear();
            Ok(())
        })
    }

    fn user(&self) -> Pin<Box<dyn Future<Output = Option<UserIdentity>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.user.clone() })
    }

    fn set_user(
        &self,
        user: UserIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.state.lock().await.user = Some(user);
            Ok(())
        })
    }
}

/// JSON-file store.
///
/// The Mutex serializes all writes; each mutation updates memory first and
/// then persists the whole file while still holding the lock.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<StoredSession>,
}

impl FileCredentialStore {
    /// Load the store from `path`.
    ///
    /// If the file doesn't exist, creates it as `{}` (no session yet).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let stored: StoredSession = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            let stored = stored.normalized();
            info!(
                path = %path.display(),
                session = stored.pair().is_some(),
                "loaded credentials"
            );
            stored
        } else {
            info!(path = %path.display(), "credential file not found, starting unauthenticated");
            let stored = StoredSession::default();
            write_atomic(&path, &stored).await?;
            stored
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Pin<Box<dyn Future<Output = Option<CredentialPair>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.pair() })
    }

    fn set(&self, pair: CredentialPair) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.set_pair(&pair);
            debug!("stored credential pair");
            write_atomic(&self.path, &state).await
        })
    }

    fn set_access<'a>(
        &'a self,
        refresh_token: &'a Secret<String>,
        access_token: Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.set_access(refresh_token, &access_token)?;
            debug!("stored refreshed access token");
            write_atomic(&self.path, &state).await
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.clear();
            debug!("cleared credentials");
            write_atomic(&self.path, &state).await
        })
    }

    fn user(&self) -> Pin<Box<dyn Future<Output = Option<UserIdentity>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.user.clone() })
    }

    fn set_user(
        &self,
        user: UserIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.user = Some(user);
            write_atomic(&self.path, &state).await
        })
    }
}

/// Write the session file atomically with 0600 permissions.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target, so a crash mid-write never leaves a truncated file.
async fn write_atomic(path: &Path, data: &StoredSession) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;
    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;
    }

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(suffix: &str) -> CredentialPair {
        CredentialPair::new(format!("at_{suffix}"), format!("rt_{suffix}"))
    }

    #[tokio::test]
    async fn memory_store_starts_empty() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().await.is_none());
        assert!(store.user().await.is_none());
    }

    #[tokio::test]
    async fn set_access_keeps_refresh_token() {
        let store = MemoryCredentialStore::with_pair(pair("1"));
        store
            .set_access(&Secret::from("rt_1"), Secret::from("at_2"))
            .await
            .unwrap();

        let current = store.get().await.unwrap();
        assert_eq!(current.access_token.expose(), "at_2");
        assert_eq!(current.refresh_token.expose(), "rt_1");
    }

    #[tokio::test]
    async fn set_access_without_session_errors() {
        let store = MemoryCredentialStore::new();
        let err = store
            .set_access(&Secret::from("rt_x"), Secret::from("at_x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSession));
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn set_access_for_replaced_login_is_refused() {
        let store = MemoryCredentialStore::with_pair(pair("1"));
        // A second login replaced the pair while a refresh for rt_1 ran
        store.set(pair("2")).await.unwrap();

        let err = store
            .set_access(&Secret::from("rt_1"), Secret::from("at_from_old_refresh"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionChanged));

        let current = store.get().await.unwrap();
        assert_eq!(current.access_token.expose(), "at_2");
        assert_eq!(current.refresh_token.expose(), "rt_2");
    }

    #[tokio::test]
    async fn file_set_access_for_replaced_login_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(pair("2")).await.unwrap();

        let result = store
            .set_access(&Secret::from("rt_1"), Secret::from("at_old"))
            .await;
        assert!(matches!(result, Err(Error::SessionChanged)));

        let reloaded = FileCredentialStore::load(path).await.unwrap();
        assert_eq!(reloaded.get().await.unwrap().access_token.expose(), "at_2");
    }

    #[tokio::test]
    async fn clear_removes_tokens_and_identity() {
        let store = MemoryCredentialStore::with_pair(pair("1"));
        store
            .set_user(UserIdentity {
                email: "ada@example.com".into(),
                username: Some("ada".into()),
            })
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.get().await.is_none());
        assert!(store.user().await.is_none());
    }

    #[tokio::test]
    async fn file_roundtrip_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(pair("1")).await.unwrap();
        store
            .set_user(UserIdentity {
                email: "ada@example.com".into(),
                username: None,
            })
            .await
            .unwrap();

        let reloaded = FileCredentialStore::load(path).await.unwrap();
        let current = reloaded.get().await.unwrap();
        assert_eq!(current.access_token.expose(), "at_1");
        assert_eq!(current.refresh_token.expose(), "rt_1");
        assert_eq!(reloaded.user().await.unwrap().email, "ada@example.com");
    }

    #[tokio::test]
    async fn file_uses_access_and_refresh_token_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(pair("k")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["access_token"], "at_k");
        assert_eq!(json["refresh_token"], "rt_k");
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        assert!(!path.exists());
        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        assert!(store.get().await.is_none());
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.trim(), "{}");
    }

    #[tokio::test]
    async fn clear_persists_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(pair("1")).await.unwrap();
        store.clear().await.unwrap();

        let reloaded = FileCredentialStore::load(path).await.unwrap();
        assert!(reloaded.get().await.is_none());
    }

    #[tokio::test]
    async fn incomplete_pair_on_disk_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, r#"{"access_token":"at_only"}"#)
            .await
            .unwrap();

        let store = FileCredentialStore::load(path).await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let result = FileCredentialStore::load(path).await;
        assert!(matches!(result, Err(Error::CredentialParse(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(pair("1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_sets_leave_a_consistent_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = std::sync::Arc::new(FileCredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(pair(&i.to_string())).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Whichever write landed last, access and refresh must come from the same login
        let current = store.get().await.unwrap();
        let access_suffix = current.access_token.expose().trim_start_matches("at_").to_string();
        let refresh_suffix = current.refresh_token.expose().trim_start_matches("rt_").to_string();
        assert_eq!(access_suffix, refresh_suffix);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["access_token"], format!("at_{access_suffix}"));
    }
}
