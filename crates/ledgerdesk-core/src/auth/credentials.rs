use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Keychain service name for the keyring backend
const SERVICE_NAME: &str = "ledgerdesk";

/// Keychain account holding the serialized credential
const KEYRING_ACCOUNT: &str = "session";

/// Session file name in the data directory
pub const SESSION_FILE: &str = "session.json";

/// The bearer token together with the endpoint it was issued by.
///
/// Both fields are always present together: a token is meaningless without
/// the service that accepts it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub endpoint: String,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: String, endpoint: String, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token,
            endpoint,
            issued_at: Utc::now(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|e| Utc::now() >= e).unwrap_or(false)
    }

    /// True once `now` is inside the safety window before expiry.
    /// Credentials without a tracked expiry never need proactive renewal.
    pub fn needs_renewal(&self, window: Duration) -> bool {
        match self.expires_at {
            // An expiry too close to the calendar's start is already due
            Some(expiry) => expiry
                .checked_sub_signed(window)
                .map(|due| Utc::now() >= due)
                .unwrap_or(true),
            None => false,
        }
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at.map(|e| e - Utc::now())
    }

    /// Join a request path onto the endpoint, tolerating a trailing slash.
    pub fn url(&self, path: &str) -> String {
        join_url(&self.endpoint, path)
    }

    fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            bail!("Refusing to store an empty token");
        }
        if self.endpoint.trim().is_empty() {
            bail!("Refusing to store a token without an endpoint");
        }
        Ok(())
    }
}

// Tokens must never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub(crate) fn join_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Durable storage for a single credential record.
///
/// Implementations must write and erase the whole record at once; a reader
/// never observes a half-written credential.
pub trait CredentialBackend: Send + Sync {
    fn read(&self) -> Result<Option<Credential>>;
    fn write(&self, credential: &Credential) -> Result<()>;
    fn erase(&self) -> Result<()>;
}

/// JSON file backend. Writes land in a temporary sibling that is renamed
/// over the target.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialBackend for FileBackend {
    fn read(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        let credential: Credential =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(credential))
    }

    fn write(&self, credential: &Credential) -> Result<()> {
        let contents = serde_json::to_string_pretty(credential)?;
        write_atomic(&self.path, contents.as_bytes())
    }

    fn erase(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}

/// Replace `path` with `contents` in one rename, readable by the owner only.
///
/// Each write stages into its own uniquely named file beside `path`, so
/// concurrent writers never share a staging file and readers see either
/// the old or the new contents.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut staged = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to stage write to {}", path.display()))?;
    staged
        .write_all(contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    restrict_permissions(staged.path())?;
    staged
        .persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions: {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// OS keychain backend; the whole credential is one secret.
pub struct KeyringBackend {
    account: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self {
            account: KEYRING_ACCOUNT.to_string(),
        }
    }

    pub fn with_account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialBackend for KeyringBackend {
    fn read(&self) -> Result<Option<Credential>> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                let credential: Credential = serde_json::from_str(&secret)
                    .context("Failed to parse credential from keychain")?;
                Ok(Some(credential))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credential from keychain"),
        }
    }

    fn write(&self, credential: &Credential) -> Result<()> {
        let secret = serde_json::to_string(credential)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store credential in keychain")
    }

    fn erase(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

/// In-process backend, used by tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<Credential>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialBackend for MemoryBackend {
    fn read(&self) -> Result<Option<Credential>> {
        let slot = self.slot.lock().map_err(|_| anyhow!("credential lock poisoned"))?;
        Ok(slot.clone())
    }

    fn write(&self, credential: &Credential) -> Result<()> {
        let mut slot = self.slot.lock().map_err(|_| anyhow!("credential lock poisoned"))?;
        *slot = Some(credential.clone());
        Ok(())
    }

    fn erase(&self) -> Result<()> {
        let mut slot = self.slot.lock().map_err(|_| anyhow!("credential lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}

/// Sole durable owner of the current credential.
/// Clone is cheap - the backend is shared.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn CredentialBackend>,
}

impl CredentialStore {
    pub fn new(backend: impl CredentialBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Persist the credential, replacing any previous one.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        credential.validate()?;
        self.backend.write(credential)?;
        debug!(endpoint = %credential.endpoint, expires_at = ?credential.expires_at, "Credential saved");
        Ok(())
    }

    /// Load the stored credential. Unreadable records are reported as empty.
    pub fn load(&self) -> Option<Credential> {
        match self.backend.read() {
            Ok(Some(credential)) if credential.validate().is_ok() => Some(credential),
            Ok(Some(_)) => {
                warn!("Stored credential is incomplete, ignoring it");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load stored credential");
                None
            }
        }
    }

    /// Remove token, endpoint and expiry together.
    pub fn clear(&self) -> Result<()> {
        self.backend.erase()?;
        debug!("Credential cleared");
        Ok(())
    }

    pub fn has_credential(&self) -> bool {
        self.load().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(expires_in: Option<Duration>) -> Credential {
        Credential::new(
            "tok-1".to_string(),
            "http://localhost:8801".to_string(),
            expires_in.map(|d| Utc::now() + d),
        )
    }

    #[test]
    fn test_needs_renewal_inside_window() {
        let window = Duration::seconds(60);
        assert!(sample(Some(Duration::seconds(30))).needs_renewal(window));
        assert!(sample(Some(Duration::seconds(-5))).needs_renewal(window));
        assert!(!sample(Some(Duration::minutes(10))).needs_renewal(window));
    }

    #[test]
    fn test_needs_renewal_with_extreme_values() {
        let mut credential = sample(None);
        credential.expires_at = Some(DateTime::<Utc>::MAX_UTC);
        assert!(!credential.needs_renewal(Duration::seconds(60)));

        // Subtracting the window would go past the earliest representable time
        credential.expires_at = Some(DateTime::<Utc>::MIN_UTC);
        assert!(credential.needs_renewal(Duration::seconds(60)));
    }

    #[test]
    fn test_no_expiry_never_needs_renewal() {
        let credential = sample(None);
        assert!(!credential.needs_renewal(Duration::seconds(60)));
        assert!(!credential.is_expired());
        assert!(credential.time_until_expiry().is_none());
    }

    #[test]
    fn test_url_join() {
        let mut credential = sample(None);
        assert_eq!(credential.url("/user/enroll"), "http://localhost:8801/user/enroll");
        credential.endpoint = "http://localhost:8801/".to_string();
        assert_eq!(credential.url("/user/enroll"), "http://localhost:8801/user/enroll");
        assert_eq!(credential.url("user/enroll"), "http://localhost:8801/user/enroll");
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", sample(None));
        assert!(!rendered.contains("tok-1"));
        assert!(rendered.contains("localhost:8801"));
    }

    #[test]
    fn test_memory_store_save_load_clear() {
        let store = CredentialStore::in_memory();
        assert!(store.load().is_none());

        let credential = sample(Some(Duration::minutes(10)));
        store.save(&credential).expect("save");
        assert_eq!(store.load(), Some(credential));

        store.clear().expect("clear");
        assert!(store.load().is_none());
        assert!(!store.has_credential());
    }

    #[test]
    fn test_save_overwrites_previous() {
        let store = CredentialStore::in_memory();
        store.save(&sample(None)).expect("save");
        let mut newer = sample(None);
        newer.token = "tok-2".to_string();
        store.save(&newer).expect("save");
        assert_eq!(store.load().map(|c| c.token), Some("tok-2".to_string()));
    }

    #[test]
    fn test_save_rejects_token_without_endpoint() {
        let store = CredentialStore::in_memory();
        let mut credential = sample(None);
        credential.endpoint = String::new();
        assert!(store.save(&credential).is_err());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_file_backend_round_trip_and_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::in_dir(dir.path());
        let path = backend.path().to_path_buf();
        let store = CredentialStore::new(backend);

        let credential = sample(Some(Duration::minutes(10)));
        store.save(&credential).expect("save");
        assert!(path.exists());
        assert_eq!(store.load(), Some(credential));

        store.clear().expect("clear");
        assert!(!path.exists());
        assert!(store.load().is_none());
        // Clearing twice is fine
        store.clear().expect("clear again");
    }

    #[test]
    fn test_file_backend_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CredentialStore::new(FileBackend::in_dir(dir.path()));
        store.save(&sample(None)).expect("save");

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![SESSION_FILE.to_string()]);
    }

    #[test]
    fn test_concurrent_file_writes_never_expose_partial_record() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempfile::tempdir().expect("tempdir");
        let backend = Arc::new(FileBackend::in_dir(dir.path()));
        backend.write(&sample(None)).expect("seed");

        let writers: Vec<_> = (0..4)
            .map(|n| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || {
                    for i in 0..25 {
                        let mut credential = sample(Some(Duration::minutes(10)));
                        credential.token = format!("tok-{}-{}", n, i);
                        backend.write(&credential).expect("concurrent write");
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            let loaded = backend.read().expect("read during writes");
            assert!(loaded.is_some_and(|c| c.token.starts_with("tok-")));
        }
        for writer in writers {
            writer.join().expect("writer");
        }

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![SESSION_FILE.to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_backend_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::in_dir(dir.path());
        backend.write(&sample(None)).expect("write");
        let mode = std::fs::metadata(backend.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_malformed_file_loads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(SESSION_FILE), r#"{"token":"abc"}"#).expect("write");
        let store = CredentialStore::new(FileBackend::in_dir(dir.path()));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_blank_endpoint_on_disk_loads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let json = format!(
            r#"{{"token":"abc","endpoint":"","issued_at":"{}"}}"#,
            Utc::now().to_rfc3339()
        );
        std::fs::write(dir.path().join(SESSION_FILE), json).expect("write");
        let store = CredentialStore::new(FileBackend::in_dir(dir.path()));
        assert!(store.load().is_none());
    }
}
