//! Profile storage
//!
//! Manages a JSON file holding every profile and the id of the active one.
//! All writes use atomic temp-file + rename to prevent corruption on crash. A
//! tokio Mutex serializes concurrent writes from the refresh cycle and the
//! admin API.
//!
//! The file is the source of truth: every operation re-reads it under the
//! mutex before reading or modifying, so changes made by another process (the
//! CLI, a hand edit) are never overwritten with a stale in-memory copy.
//!
//! Readers get cloned snapshots, so a rotation evaluation always works on a
//! consistent view even while a fetch writes new usage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::profile::{Profile, ProfileId, UsageSnapshot, now_millis};

/// The on-disk store document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<ProfileId>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl StoreDocument {
    fn find(&self, id: &ProfileId) -> Option<&Profile> {
        self.profiles.iter().find(|p| &p.id == id)
    }

    fn find_mut(&mut self, id: &ProfileId) -> Result<&mut Profile> {
        self.profiles
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

/// Credentials of the active profile, written for consumers that read a
/// single "current session" file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub profile_id: ProfileId,
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Unix milliseconds
    pub activated_at: u64,
}

/// Read and parse the store file. `None` if it does not exist.
async fn read_document(path: &Path) -> Result<Option<StoreDocument>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(format!("reading profile store: {e}"))),
    };
    let document = serde_json::from_str(&contents)
        .map_err(|e| Error::Parse(format!("parsing profile store: {e}")))?;
    Ok(Some(document))
}

/// Thread-safe profile file manager.
pub struct ProfileStore {
    path: PathBuf,
    /// Last document read from or written to disk
    state: Mutex<StoreDocument>,
}

impl ProfileStore {
    /// Load profiles from the given file path.
    ///
    /// If the file doesn't exist, creates it as an empty document (cold start
    /// with zero profiles).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = match read_document(&path).await? {
            Some(document) => {
                info!(
                    path = %path.display(),
                    profiles = document.profiles.len(),
                    active = document.active.as_ref().map(ProfileId::as_str),
                    "loaded profiles"
                );
                document
            }
            None => {
                info!(path = %path.display(), "profile store not found, starting empty");
                let document = StoreDocument::default();
                write_atomic(&path, &document).await?;
                document
            }
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the document and bring it up to date with the file.
    ///
    /// A deleted file keeps the last known document; the next write
    /// recreates it.
    async fn lock_current(&self) -> Result<MutexGuard<'_, StoreDocument>> {
        let mut state = self.state.lock().await;
        if let Some(document) = read_document(&self.path).await? {
            *state = document;
        }
        Ok(state)
    }

    /// Like `lock_current`, for infallible readers: an unreadable file falls
    /// back to the last known document.
    async fn lock_for_read(&self) -> MutexGuard<'_, StoreDocument> {
        let mut state = self.state.lock().await;
        match read_document(&self.path).await {
            Ok(Some(document)) => *state = document,
            Ok(None) => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "re-reading profile store failed, using last known state");
            }
        }
        state
    }

    /// Cloned snapshot of every profile, in store order.
    pub async fn profiles(&self) -> Vec<Profile> {
        self.lock_for_read().await.profiles.clone()
    }

    /// Cloned snapshot of the whole document (profiles + active id).
    pub async fn snapshot(&self) -> StoreDocument {
        self.lock_for_read().await.clone()
    }

    pub async fn get(&self, id: &ProfileId) -> Option<Profile> {
        self.lock_for_read().await.find(id).cloned()
    }

    pub async fn active_id(&self) -> Option<ProfileId> {
        self.lock_for_read().await.active.clone()
    }

    pub async fn active(&self) -> Option<Profile> {
        let state = self.lock_for_read().await;
        state.active.as_ref().and_then(|id| state.find(id)).cloned()
    }

    /// Add or replace a profile (matched by id) and persist.
    pub async fn upsert(&self, profile: Profile) -> Result<()> {
        let mut state = self.lock_current().await?;
        match state.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => {
                debug!(profile_id = %profile.id, "replaced profile");
                *existing = profile;
            }
            None => {
                debug!(profile_id = %profile.id, "added profile");
                state.profiles.push(profile);
            }
        }
        write_atomic(&self.path, &*state).await
    }

    /// Remove a profile and persist. Clears the active id if it pointed here.
    ///
    /// Returns the removed profile if it existed.
    pub async fn remove(&self, id: &ProfileId) -> Result<Option<Profile>> {
        let mut state = self.lock_current().await?;
        let Some(index) = state.profiles.iter().position(|p| &p.id == id) else {
            return Ok(None);
        };
        let removed = state.profiles.remove(index);
        if state.active.as_ref() == Some(id) {
            state.active = None;
        }
        debug!(profile_id = %id, "removed profile");
        write_atomic(&self.path, &*state).await?;
        Ok(Some(removed))
    }

    /// Replace a profile's usage snapshot. `None` marks usage as unknown.
    pub async fn update_usage(&self, id: &ProfileId, usage: Option<UsageSnapshot>) -> Result<()> {
        let mut state = self.lock_current().await?;
        state.find_mut(id)?.usage = usage;
        debug!(profile_id = %id, known = usage.is_some(), "updated usage");
        write_atomic(&self.path, &*state).await
    }

    /// Mark a profile's usage unknown unless it was written after `cutoff`
    /// (Unix milliseconds). Returns whether the snapshot was cleared.
    ///
    /// Lets a failed fetch drop stale data without erasing a snapshot pushed
    /// by another writer since the cutoff.
    pub async fn expire_usage(&self, id: &ProfileId, cutoff: u64) -> Result<bool> {
        let mut state = self.lock_current().await?;
        let profile = state.find_mut(id)?;
        if profile.usage.is_some_and(|u| u.fetched_at > cutoff) {
            return Ok(false);
        }
        profile.usage = None;
        debug!(profile_id = %id, cutoff, "expired usage");
        write_atomic(&self.path, &*state).await?;
        Ok(true)
    }

    pub async fn set_auto_rotate(&self, id: &ProfileId, enabled: bool) -> Result<()> {
        let mut state = self.lock_current().await?;
        state.find_mut(id)?.auto_rotate_enabled = enabled;
        write_atomic(&self.path, &*state).await
    }

    /// Mark a profile as active without touching the credential file.
    pub async fn set_active(&self, id: &ProfileId) -> Result<()> {
        let mut state = self.lock_current().await?;
        if state.find(id).is_none() {
            return Err(Error::NotFound(id.to_string()));
        }
        state.active = Some(id.clone());
        write_atomic(&self.path, &*state).await
    }

    /// Swap a profile's credentials into the active-session file and mark it
    /// active.
    ///
    /// The credential file is written before the store document, so a crash
    /// in between leaves the store pointing at the previous profile.
    pub async fn activate_credentials(&self, id: &ProfileId, target: &Path) -> Result<()> {
        let mut state = self.lock_current().await?;
        let profile = state
            .find(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let Some(credentials) = profile
            .credentials
            .as_ref()
            .filter(|_| profile.has_session_credentials())
        else {
            return Err(Error::MissingCredentials(id.to_string()));
        };

        let session = ActiveSession {
            profile_id: id.clone(),
            session_key: credentials.session_key.clone(),
            organization_id: credentials.organization_id.clone(),
            activated_at: now_millis(),
        };
        write_atomic(target, &session).await?;

        let previous = state.active.replace(id.clone());
        write_atomic(&self.path, &*state).await?;
        info!(
            profile_id = %id,
            previous = previous.as_ref().map(ProfileId::as_str),
            "activated profile credentials"
        );
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.lock_for_read().await.profiles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write a JSON document to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// both the store and the active-session file contain session keys.
async fn write_atomic<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing {}: {e}", path.display())))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => return Err(Error::Io("store path has no parent directory".into())),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Io(format!("invalid file name: {}", path.display())))?;

    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp file for {file_name}: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting permissions on {file_name}: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp file over {file_name}: {e}")))?;

    debug!(path = %path.display(), "persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{AccountTier, SessionCredentials};

    fn test_profile(id: &str) -> Profile {
        Profile::new(id, format!("Profile {id}"))
            .with_credentials(SessionCredentials::new(format!("sk-ant-sid-{id}")))
            .with_tier(AccountTier::Pro)
            .with_auto_rotate(true)
    }

    async fn empty_store(dir: &tempfile::TempDir) -> ProfileStore {
        ProfileStore::load(dir.path().join("profiles.json"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");

        assert!(!path.exists());
        let store = ProfileStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(store.active_id().await.is_none());
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: StoreDocument = serde_json::from_str(&contents).unwrap();
        assert!(parsed.profiles.is_empty());
    }

    #[tokio::test]
    async fn profiles_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");

        let store = ProfileStore::load(path.clone()).await.unwrap();
        store.upsert(test_profile("work")).await.unwrap();
        store
            .update_usage(&"work".into(), Some(UsageSnapshot::new(42.0, 10.0)))
            .await
            .unwrap();
        store.set_active(&"work".into()).await.unwrap();

        let reloaded = ProfileStore::load(path).await.unwrap();
        let profile = reloaded.get(&"work".into()).await.unwrap();
        assert_eq!(profile.usage.unwrap().session_percentage, 42.0);
        assert_eq!(profile.account_tier, Some(AccountTier::Pro));
        assert_eq!(reloaded.active_id().await, Some("work".into()));
    }

    #[tokio::test]
    async fn upsert_replaces_by_id_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;

        store.upsert(test_profile("a")).await.unwrap();
        store.upsert(test_profile("b")).await.unwrap();
        store
            .upsert(test_profile("a").with_tier(AccountTier::Max5x))
            .await
            .unwrap();

        let profiles = store.profiles().await;
        let ids: Vec<&str> = profiles.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(profiles[0].account_tier, Some(AccountTier::Max5x));
    }

    #[tokio::test]
    async fn remove_clears_active_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store.upsert(test_profile("a")).await.unwrap();
        store.set_active(&"a".into()).await.unwrap();

        let removed = store.remove(&"a".into()).await.unwrap();
        assert!(removed.is_some());
        assert!(store.active_id().await.is_none());

        let removed_again = store.remove(&"a".into()).await.unwrap();
        assert!(removed_again.is_none());
    }

    #[tokio::test]
    async fn update_usage_none_marks_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store
            .upsert(test_profile("a").with_usage(UsageSnapshot::new(5.0, 5.0)))
            .await
            .unwrap();

        store.update_usage(&"a".into(), None).await.unwrap();
        assert!(store.get(&"a".into()).await.unwrap().usage.is_none());
    }

    #[tokio::test]
    async fn update_usage_unknown_profile_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        let result = store
            .update_usage(&"ghost".into(), Some(UsageSnapshot::new(1.0, 1.0)))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn set_active_unknown_profile_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        let result = store.set_active(&"ghost".into()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn set_auto_rotate_toggles_flag() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store.upsert(test_profile("a")).await.unwrap();

        store.set_auto_rotate(&"a".into(), false).await.unwrap();
        assert!(!store.get(&"a".into()).await.unwrap().auto_rotate_enabled);
    }

    #[tokio::test]
    async fn activate_credentials_writes_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store.upsert(test_profile("a")).await.unwrap();
        store.upsert(test_profile("b")).await.unwrap();
        store.set_active(&"a".into()).await.unwrap();

        let target = dir.path().join("active-session.json");
        store
            .activate_credentials(&"b".into(), &target)
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&target).await.unwrap();
        let session: ActiveSession = serde_json::from_str(&contents).unwrap();
        assert_eq!(session.profile_id, ProfileId::from("b"));
        assert_eq!(session.session_key, "sk-ant-sid-b");
        assert_eq!(store.active_id().await, Some("b".into()));
    }

    #[tokio::test]
    async fn activate_credentials_without_credentials_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store.upsert(Profile::new("bare", "Bare")).await.unwrap();

        let target = dir.path().join("active-session.json");
        let result = store.activate_credentials(&"bare".into(), &target).await;
        assert!(matches!(result, Err(Error::MissingCredentials(_))));
        assert!(!target.exists());
        assert!(store.active_id().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn files_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        store.upsert(test_profile("a")).await.unwrap();
        let target = dir.path().join("active-session.json");
        store
            .activate_credentials(&"a".into(), &target)
            .await
            .unwrap();

        for path in [store.path().to_path_buf(), target] {
            let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600, "{} must be 0600, got {mode:o}", path.display());
        }
    }

    #[tokio::test]
    async fn invalid_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let result = ProfileStore::load(path).await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn concurrent_usage_updates_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let store = std::sync::Arc::new(ProfileStore::load(path.clone()).await.unwrap());
        for i in 0..10 {
            store.upsert(test_profile(&format!("p{i}"))).await.unwrap();
        }

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_usage(
                        &format!("p{i}").into(),
                        Some(UsageSnapshot::new(i as f64, 0.0)),
                    )
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: StoreDocument = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.profiles.len(), 10);
        assert!(parsed.profiles.iter().all(|p| p.usage.is_some()));
    }


    #[tokio::test]
    async fn expire_usage_keeps_snapshots_newer_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = empty_store(&dir).await;
        let mut fresh = UsageSnapshot::new(50.0, 50.0);
        fresh.fetched_at = 2_000;
        let mut stale = UsageSnapshot::new(50.0, 50.0);
        stale.fetched_at = 1_000;
        store.upsert(test_profile("fresh").with_usage(fresh)).await.unwrap();
        store.upsert(test_profile("stale").with_usage(stale)).await.unwrap();

        assert!(!store.expire_usage(&"fresh".into(), 1_000).await.unwrap());
        assert!(store.expire_usage(&"stale".into(), 1_000).await.unwrap());
        assert!(store.get(&"fresh".into()).await.unwrap().usage.is_some());
        assert!(store.get(&"stale".into()).await.unwrap().usage.is_none());
        assert!(matches!(
            store.expire_usage(&"ghost".into(), 0).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn writes_from_another_store_instance_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let daemon = ProfileStore::load(path.clone()).await.unwrap();
        daemon.upsert(test_profile("alice")).await.unwrap();
        daemon.upsert(test_profile("bob")).await.unwrap();
        daemon.set_active(&"alice".into()).await.unwrap();

        // A second process opens the same file and activates bob
        let cli = ProfileStore::load(path.clone()).await.unwrap();
        let target = dir.path().join("active-session.json");
        cli.activate_credentials(&"bob".into(), &target).await.unwrap();

        // The daemon's next write must not restore its old active id
        daemon
            .update_usage(&"alice".into(), Some(UsageSnapshot::new(10.0, 10.0)))
            .await
            .unwrap();

        let reloaded = ProfileStore::load(path).await.unwrap();
        assert_eq!(reloaded.active_id().await, Some("bob".into()));
        assert_eq!(daemon.active_id().await, Some("bob".into()));
        let alice = reloaded.get(&"alice".into()).await.unwrap();
        assert_eq!(alice.usage.unwrap().session_percentage, 10.0);
    }

    #[tokio::test]
    async fn hand_edited_profiles_are_seen_by_readers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let store = ProfileStore::load(path.clone()).await.unwrap();
        store.upsert(test_profile("a")).await.unwrap();

        let mut edited: StoreDocument =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        edited.profiles.push(test_profile("b"));
        tokio::fs::write(&path, serde_json::to_string(&edited).unwrap())
            .await
            .unwrap();

        assert_eq!(store.len().await, 2);
        store.set_auto_rotate(&"b".into(), false).await.unwrap();
        assert!(!store.get(&"b".into()).await.unwrap().auto_rotate_enabled);
    }

    #[tokio::test]
    async fn corrupt_file_fails_writes_but_not_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let store = ProfileStore::load(path.clone()).await.unwrap();
        store.upsert(test_profile("a")).await.unwrap();

        tokio::fs::write(&path, "{ half written").await.unwrap();
        assert_eq!(store.len().await, 1);
        let result = store.upsert(test_profile("b")).await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
