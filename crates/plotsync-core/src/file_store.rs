//! Filesystem-backed durable store.
//!
//! One file per key under a root directory, written atomically via a
//! temporary file and rename so a crash mid-write never exposes a partial
//! value. Writes and removals take an advisory lock on a shared lock file,
//! so two processes pointed at the same root serialize their writes instead
//! of interleaving them.
//!
//! Change notification covers contexts *within this process* (each
//! [`new_context`](FileStore::new_context) handle is one context). Detecting
//! writes from other processes would need a file watcher, which belongs to
//! the embedding application, not this adapter.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;

use fs2::FileExt;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::StoreError;
use crate::store::{ChangeEvent, ChangeHub, DurableStore, Subscription};

const LOCK_FILE: &str = ".lock";
const VALUE_EXT: &str = "json";
const TMP_EXT: &str = "json.tmp";

/// Longest key used verbatim as a file stem before falling back to a digest.
const MAX_LITERAL_KEY: usize = 64;

struct FileShared {
    root: PathBuf,
    hub: Arc<ChangeHub>,
    next_context: AtomicU64,
}

/// Filesystem [`DurableStore`]: one JSON file per key.
pub struct FileStore {
    shared: Arc<FileShared>,
    context_id: u64,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        ensure_root(&root).map_err(|err| StoreError::Io {
            key: String::new(),
            detail: format!("creating store root {}: {err}", root.display()),
        })?;
        Ok(Self {
            shared: Arc::new(FileShared {
                root,
                hub: ChangeHub::new(),
                next_context: AtomicU64::new(2),
            }),
            context_id: 1,
        })
    }

    /// Conventional per-user store root: the platform data directory joined
    /// with `app`. `None` when the platform has no data directory.
    #[must_use]
    pub fn default_root(app: &str) -> Option<PathBuf> {
        dirs_next::data_dir().map(|dir| dir.join(app))
    }

    /// Open another context onto the same root, sharing the in-process
    /// notification hub.
    #[must_use]
    pub fn new_context(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            context_id: self.shared.next_context.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The directory holding the value files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.shared
            .root
            .join(format!("{}.{VALUE_EXT}", file_stem(key)))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.shared
            .root
            .join(format!("{}.{TMP_EXT}", file_stem(key)))
    }

    /// Take the store-wide advisory lock. Held for the duration of one
    /// write or removal; readers take it shared.
    fn lock(&self, key: &str, exclusive: bool) -> Result<File, StoreError> {
        let path = self.shared.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| map_io(key, &err))?;
        if exclusive {
            file.lock_exclusive().map_err(|err| map_io(key, &err))?;
        } else {
            file.lock_shared().map_err(|err| map_io(key, &err))?;
        }
        Ok(file)
    }
}

impl DurableStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _lock = self.lock(key, false)?;
        let path = self.value_path(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(map_io(key, &err)),
        };
        let mut value = String::new();
        file.read_to_string(&mut value)
            .map_err(|err| map_io(key, &err))?;
        Ok(Some(value))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _lock = self.lock(key, true)?;
        let tmp = self.tmp_path(key);
        let dest = self.value_path(key);

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &dest)
        };
        if let Err(err) = write() {
            // Best effort: do not leave a stray temp file behind.
            let _ = fs::remove_file(&tmp);
            return Err(map_io(key, &err));
        }

        debug!(key, bytes = value.len(), path = %dest.display(), "wrote value file");
        self.shared.hub.broadcast(
            self.context_id,
            &ChangeEvent {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _lock = self.lock(key, true)?;
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => {
                self.shared.hub.broadcast(
                    self.context_id,
                    &ChangeEvent {
                        key: key.to_string(),
                        value: None,
                    },
                );
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(map_io(key, &err)),
        }
    }

    fn subscribe(&self, key: &str, tx: Sender<ChangeEvent>) -> Subscription {
        self.shared.hub.attach(key, self.context_id, tx)
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("root", &self.shared.root)
            .field("context_id", &self.context_id)
            .finish()
    }
}

fn map_io(key: &str, err: &std::io::Error) -> StoreError {
    if err.kind() == ErrorKind::PermissionDenied {
        StoreError::AccessDenied {
            key: key.to_string(),
            detail: err.to_string(),
        }
    } else {
        StoreError::io(key, err)
    }
}

fn ensure_root(root: &Path) -> std::io::Result<()> {
    fs::create_dir_all(root)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(root, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Map a key to a filename stem. Short keys made of filename-safe characters
/// are used verbatim so the store directory stays inspectable; anything else
/// falls back to a SHA-256 hex digest.
fn file_stem(key: &str) -> String {
    let literal_safe = !key.is_empty()
        && key.len() <= MAX_LITERAL_KEY
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !key.starts_with('.');
    if literal_safe {
        key.to_string()
    } else {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save("allotment", r#"{"version":5}"#).unwrap();
        assert_eq!(
            store.load("allotment").unwrap(),
            Some(r#"{"version":5}"#.to_string())
        );
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.load("absent").unwrap(), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save("k", "v1").unwrap();
        store.save("k", "v2").unwrap();
        assert_eq!(store.load("k").unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn remove_clears_value_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save("k", "v").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.load("k").unwrap(), None);
        store.remove("k").unwrap();
    }

    #[test]
    fn no_temp_files_left_after_save() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save("k", "v").unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {leftovers:?}");
    }

    #[test]
    fn unsafe_keys_are_digested() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = "../escape attempt/with spaces";
        store.save(key, "v").unwrap();
        assert_eq!(store.load(key).unwrap(), Some("v".to_string()));

        // Nothing escaped the root.
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(names.iter().all(|name| !name.contains("escape")));
    }

    #[test]
    fn literal_and_digested_stems() {
        assert_eq!(file_stem("allotment-v5"), "allotment-v5");
        assert_eq!(file_stem("notes_2026.draft"), "notes_2026.draft");
        // Digest fallbacks are 64 hex chars.
        for key in ["has spaces", "", ".hidden", &"x".repeat(65)] {
            let stem = file_stem(key);
            assert_eq!(stem.len(), 64);
            assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn in_process_contexts_hear_each_other() {
        let dir = tempdir().unwrap();
        let a = FileStore::open(dir.path()).unwrap();
        let b = a.new_context();
        let (tx, rx) = mpsc::channel();
        let _sub = b.subscribe("k", tx);

        a.save("k", "v").unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.value, Some("v".to_string()));
    }

    #[test]
    fn writer_does_not_hear_its_own_write() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let (tx, rx) = mpsc::channel();
        let _sub = store.subscribe("k", tx);
        store.save("k", "v").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn two_stores_on_one_root_share_files() {
        let dir = tempdir().unwrap();
        let a = FileStore::open(dir.path()).unwrap();
        let b = FileStore::open(dir.path()).unwrap();
        a.save("k", "from a").unwrap();
        assert_eq!(b.load("k").unwrap(), Some("from a".to_string()));
    }

    #[test]
    fn default_root_appends_app_name() {
        if let Some(root) = FileStore::default_root("plotsync") {
            assert!(root.ends_with("plotsync"));
        }
    }
}
