use std::path::{Path, PathBuf};

use super::{AuthError, Session};

const KEYRING_SERVICE: &str = "shoplist-auth";
const KEYRING_USER: &str = "session";

/// Persists the current [`Session`] across restarts.
///
/// The file under `<data_dir>/.credentials/` is authoritative. The OS
/// keyring holds a best-effort mirror and is consulted only when the file
/// is missing.
#[derive(Debug, Clone)]
pub struct SessionStore {
    data_dir: PathBuf,
    use_keyring: bool,
}

impl SessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            use_keyring: true,
        }
    }

    /// File store only
    pub fn without_keyring(mut self) -> Self {
        self.use_keyring = false;
        self
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(".credentials").join("session.json")
    }

    pub fn load(&self) -> Result<Option<Session>, AuthError> {
        let path = self.path();
        if let Ok(data) = std::fs::read_to_string(&path) {
            return Ok(Some(serde_json::from_str(&data)?));
        }

        if !self.use_keyring {
            return Ok(None);
        }

        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
            .map_err(|e| AuthError::Keyring(e.to_string()))?;
        match entry.get_password() {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => {
                log::debug!("keyring unavailable: {}", e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), AuthError> {
        let value = serde_json::to_string(session)?;

        let path = self.path();
        write_private(&path, &value)?;

        if self.use_keyring {
            if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER) {
                let _ = entry.set_password(&value);
            }
        }

        Ok(())
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(self.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if self.use_keyring {
            if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER) {
                let _ = entry.delete_credential();
            }
        }

        Ok(())
    }
}

fn write_private(path: &Path, contents: &str) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        // `mode` only applies on creation; tighten an older file before writing
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    std::fs::write(path, contents)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use tempfile::TempDir;

    fn session() -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: 1_900_000_000,
            user: Identity {
                id: "u1".to_string(),
                email: Some("a@x.com".to_string()),
            },
        }
    }

    #[test]
    fn test_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path()).without_keyring();

        assert_eq!(store.load().unwrap(), None);

        store.save(&session()).unwrap();
        assert_eq!(store.load().unwrap(), Some(session()));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path()).without_keyring();
        store.save(&session()).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_loose_file_is_tightened() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path()).without_keyring();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{}").unwrap();
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        store.save(&session()).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load().unwrap(), Some(session()));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path()).without_keyring();
        write_private(&store.path(), "not json").unwrap();

        assert!(matches!(store.load(), Err(AuthError::Json(_))));
    }
}
