//! Session state and its durable mirror.
//!
//! The store keeps the authenticated `{user, credential}` pair in
//! memory and mirrored to disk as two files that are always written
//! and removed together. The pair never drifts: login sets both,
//! logout clears both, and startup restores state only when both are
//! present.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{api::ApiClient, models::User};

const USER_FILE: &str = "user.json";
const CREDENTIAL_FILE: &str = "credential";

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    /// The signed-in user.
    pub user: User,
    /// Credential token returned at login.
    pub credential: String,
}

/// Holds the current session and mirrors it to durable storage.
pub struct SessionStore {
    root: PathBuf,
    state: RwLock<Option<Session>>,
}

impl SessionStore {
    /// Create an empty store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: RwLock::new(None),
        }
    }

    /// Read durable storage once and adopt it as the initial state.
    ///
    /// State is restored only if the user object and the credential
    /// are both present; a half-written pair counts as logged out.
    pub fn init_from_disk(root: impl Into<PathBuf>) -> Self {
        let store = Self::new(root);
        match store.read_mirror() {
            Ok(Some(session)) => {
                debug!(user = %session.user.username, "restored session from disk");
                *store.state.write() = Some(session);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("ignoring unreadable session mirror: {err}");
            }
        }
        store
    }

    /// Store the authenticated pair in memory and on disk.
    pub fn login(&self, user: User, credential: String) -> Result<()> {
        let session = Session { user, credential };
        self.write_mirror(&session)?;
        *self.state.write() = Some(session);
        Ok(())
    }

    /// Clear the session from memory and disk.
    pub fn logout(&self) -> Result<()> {
        *self.state.write() = None;
        for name in [USER_FILE, CREDENTIAL_FILE] {
            let path = self.root.join(name);
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    /// Current session, if signed in.
    pub fn current(&self) -> Option<Session> {
        self.state.read().clone()
    }

    /// Current user, if signed in.
    pub fn user(&self) -> Option<User> {
        self.state.read().as_ref().map(|session| session.user.clone())
    }

    /// Re-fetch the balance for the current user and, if it changed,
    /// update memory and re-persist the full user object.
    ///
    /// Fail-open: any error keeps the last known good state.
    pub async fn refresh_user(&self, api: &ApiClient) {
        let Some(session) = self.current() else {
            return;
        };
        match api.token_balance(session.user.id).await {
            Ok(balance) if balance != session.user.tokens => {
                let mut user = session.user;
                user.tokens = balance;
                {
                    let mut guard = self.state.write();
                    if let Some(state) = guard.as_mut() {
                        state.user = user.clone();
                    }
                }
                if let Err(err) = self.persist_user(&user) {
                    warn!("failed to re-persist refreshed user: {err}");
                }
            }
            Ok(_) => {}
            Err(err) => {
                debug!("balance refresh failed, keeping last known state: {err}");
            }
        }
    }

    fn read_mirror(&self) -> Result<Option<Session>> {
        let user_path = self.root.join(USER_FILE);
        let credential_path = self.root.join(CREDENTIAL_FILE);
        if !user_path.exists() || !credential_path.exists() {
            return Ok(None);
        }

        let user = read_user(&user_path)?;
        let credential = fs::read_to_string(&credential_path)
            .with_context(|| format!("failed to read {}", credential_path.display()))?
            .trim()
            .to_string();
        if credential.is_empty() {
            return Ok(None);
        }
        Ok(Some(Session { user, credential }))
    }

    fn write_mirror(&self, session: &Session) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        self.persist_user(&session.user)?;
        let credential_path = self.root.join(CREDENTIAL_FILE);
        fs::write(&credential_path, &session.credential)
            .with_context(|| format!("failed to write {}", credential_path.display()))
    }

    fn persist_user(&self, user: &User) -> Result<()> {
        let path = self.root.join(USER_FILE);
        let serialized = serde_json::to_vec_pretty(user).context("failed to serialize user")?;
        fs::write(&path, serialized).with_context(|| format!("failed to write {}", path.display()))
    }
}

fn read_user(path: &Path) -> Result<User> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_user() -> User {
        User {
            id: 7,
            username: "asha".to_string(),
            email: "asha@example.com".to_string(),
            level: "basic".to_string(),
            tokens: 120,
        }
    }

    #[test]
    fn login_round_trips_through_disk() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStore::new(dir.path());
        store.login(sample_user(), "tok-abc".to_string())?;

        let restored = SessionStore::init_from_disk(dir.path());
        let session = restored.current().expect("session restored");
        assert_eq!(session.user, sample_user());
        assert_eq!(session.credential, "tok-abc");
        Ok(())
    }

    #[test]
    fn logout_clears_memory_and_disk() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStore::new(dir.path());
        store.login(sample_user(), "tok-abc".to_string())?;
        store.logout()?;

        assert!(store.current().is_none());
        assert!(!dir.path().join(USER_FILE).exists());
        assert!(!dir.path().join(CREDENTIAL_FILE).exists());
        assert!(SessionStore::init_from_disk(dir.path()).current().is_none());
        Ok(())
    }

    #[test]
    fn half_written_mirror_counts_as_logged_out() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStore::new(dir.path());
        store.login(sample_user(), "tok-abc".to_string())?;
        fs::remove_file(dir.path().join(CREDENTIAL_FILE))?;

        assert!(SessionStore::init_from_disk(dir.path()).current().is_none());
        Ok(())
    }

    #[test]
    fn corrupt_user_file_is_ignored() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join(USER_FILE), "not json")?;
        fs::write(dir.path().join(CREDENTIAL_FILE), "tok")?;

        assert!(SessionStore::init_from_disk(dir.path()).current().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_known_state() -> Result<()> {
        let dir = tempdir()?;
        let store = SessionStore::new(dir.path());
        store.login(sample_user(), "tok-abc".to_string())?;

        // Nothing listens here; the refresh must fail silently.
        let api = ApiClient::new("http://127.0.0.1:1");
        store.refresh_user(&api).await;

        let session = store.current().expect("state retained");
        assert_eq!(session.user.tokens, 120);
        Ok(())
    }
}
