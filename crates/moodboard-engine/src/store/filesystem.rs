use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use moodboard_contracts::state_file::StateFile;
use moodboard_contracts::{ConversationId, ImageRef};
use serde_json::Value;
use tracing::warn;

use super::{ReferenceStore, SessionModeTracker, StoreError};
use crate::resolve::{extension_for_mime, ImageResolver};

const BACKEND: &str = "filesystem";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub const SESSION_MODES_FILE: &str = "session_modes.json";

/// References stored as `{conversation}_{timestamp_ms}.{ext}` files in one
/// directory. The timestamp orders them.
pub struct FsReferenceStore {
    dir: PathBuf,
    resolver: Arc<dyn ImageResolver>,
    locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl FsReferenceStore {
    pub fn open(dir: impl Into<PathBuf>, resolver: Arc<dyn ImageResolver>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            StoreError::unavailable(BACKEND, format!("{}: {err}", dir.display()))
        })?;
        Ok(Self {
            dir,
            resolver,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn conversation_lock(&self, conversation: &ConversationId) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::unavailable(BACKEND, "lock table poisoned"))?;
        Ok(Arc::clone(locks.entry(conversation.clone()).or_default()))
    }

    fn entries(&self, conversation: &ConversationId) -> Result<Vec<(u64, PathBuf)>, StoreError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::unavailable(BACKEND, err)),
        };

        let mut out = Vec::new();
        for entry in read_dir {
            let path = entry.map_err(|err| StoreError::unavailable(BACKEND, err))?.path();
            if let Some(stamp) = reference_timestamp(&path, conversation) {
                out.push((stamp, path));
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Timestamp of `path` when it is a reference file owned by `conversation`.
fn reference_timestamp(path: &Path, conversation: &ConversationId) -> Option<u64> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (owner, stamp) = stem.rsplit_once('_')?;
    if owner != conversation.as_str() || stamp.is_empty() {
        return None;
    }
    if !stamp.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    stamp.parse().ok()
}

impl ReferenceStore for FsReferenceStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn list(&self, conversation: &ConversationId) -> Result<Vec<ImageRef>, StoreError> {
        Ok(self
            .entries(conversation)?
            .into_iter()
            .map(|(_, path)| ImageRef::local(path))
            .collect())
    }

    fn append(&self, conversation: &ConversationId, image: ImageRef) -> Result<(), StoreError> {
        // Held across the download so same-id appends keep arrival order.
        let lock = self.conversation_lock(conversation)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::unavailable(BACKEND, "conversation lock poisoned"))?;

        let resolved = self
            .resolver
            .resolve(&image)
            .map_err(|err| StoreError::unavailable(BACKEND, err))?;
        let ext = extension_for_mime(resolved.effective_mime());

        // Never go below the newest existing file so arrival order holds even
        // when the clock steps back.
        let newest = self
            .entries(conversation)?
            .last()
            .map(|(stamp, _)| stamp.saturating_add(1))
            .unwrap_or(0);
        let mut stamp = (chrono::Utc::now().timestamp_millis().max(0) as u64).max(newest);
        let mut path = self.dir.join(format!("{conversation}_{stamp}.{ext}"));
        while path.exists() {
            stamp = stamp.checked_add(1).ok_or_else(|| {
                StoreError::unavailable(BACKEND, format!("no timestamp left after {}", path.display()))
            })?;
            path = self.dir.join(format!("{conversation}_{stamp}.{ext}"));
        }

        fs::write(&path, &resolved.bytes).map_err(|err| {
            StoreError::unavailable(BACKEND, format!("{}: {err}", path.display()))
        })
    }

    fn clear(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        let lock = self.conversation_lock(conversation)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::unavailable(BACKEND, "conversation lock poisoned"))?;

        let mut failed = Vec::new();
        for (_, path) in self.entries(conversation)? {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "failed to remove reference file");
                failed.push(path.display().to_string());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(StoreError::unavailable(
                BACKEND,
                format!("could not remove {}", failed.join(", ")),
            ))
        }
    }
}

/// Session modes kept in a JSON object file next to the reference images,
/// so collecting mode survives restarts like the references do.
#[derive(Debug)]
pub struct FileSessionModes {
    state: StateFile,
    lock: Mutex<()>,
}

impl FileSessionModes {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            state: StateFile::new(path),
            lock: Mutex::new(()),
        }
    }
}

impl SessionModeTracker for FileSessionModes {
    fn get(&self, conversation: &ConversationId) -> Result<bool, StoreError> {
        let value = self
            .state
            .get(conversation.as_str())
            .map_err(|err| StoreError::unavailable(BACKEND, format!("{err:#}")))?;
        Ok(value.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    fn set(&self, conversation: &ConversationId, collecting: bool) -> Result<(), StoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::unavailable(BACKEND, "session mode lock poisoned"))?;
        let written = if collecting {
            self.state.set(conversation.as_str(), Value::Bool(true))
        } else {
            self.state.remove(conversation.as_str())
        };
        written.map_err(|err| StoreError::unavailable(BACKEND, format!("{err:#}")))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use moodboard_contracts::{ConversationId, ImageRef};

    use super::{reference_timestamp, FileSessionModes, FsReferenceStore, SESSION_MODES_FILE};
    use crate::resolve::{FetchError, ImageBytes, ImageResolver, LocalResolver};
    use crate::store::contract::{check_reference_store, check_session_modes};
    use crate::store::{ReferenceStore, SessionModeTracker};

    fn same_bytes(stored: &ImageRef, input: &ImageRef) -> bool {
        match (LocalResolver.resolve(stored), LocalResolver.resolve(input)) {
            (Ok(a), Ok(b)) => a.bytes == b.bytes && stored.local_path().is_some(),
            _ => false,
        }
    }

    #[test]
    fn fs_store_honours_contract() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FsReferenceStore::open(temp.path().join("styles"), Arc::new(LocalResolver))?;
        check_reference_store(&store, same_bytes)?;
        check_session_modes(&FileSessionModes::new(
            temp.path().join("styles").join(SESSION_MODES_FILE),
        ))
    }

    #[test]
    fn files_follow_naming_convention() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FsReferenceStore::open(temp.path(), Arc::new(LocalResolver))?;
        let chat = ConversationId::from(12_i64);
        store.append(&chat, ImageRef::inline(vec![1], Some("image/png")))?;
        store.append(&chat, ImageRef::inline(vec![2], None))?;

        let listed = store.list(&chat)?;
        assert_eq!(listed.len(), 2);
        let names: Vec<String> = listed
            .iter()
            .filter_map(|image| image.local_path())
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .map(str::to_string)
            .collect();
        assert!(names[0].starts_with("12_") && names[0].ends_with(".png"));
        assert!(names[1].starts_with("12_") && names[1].ends_with(".jpg"));
        Ok(())
    }

    #[test]
    fn listing_ignores_other_conversations_and_foreign_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path();
        fs::write(dir.join("12_1000.jpg"), b"a")?;
        fs::write(dir.join("12_900.png"), b"b")?;
        fs::write(dir.join("123_500.jpg"), b"c")?;
        fs::write(dir.join("12_abc.jpg"), b"d")?;
        fs::write(dir.join("12_700.txt"), b"e")?;
        fs::write(dir.join(SESSION_MODES_FILE), b"{}")?;

        let store = FsReferenceStore::open(dir, Arc::new(LocalResolver))?;
        let listed = store.list(&ConversationId::from(12_i64))?;
        assert_eq!(
            listed,
            vec![
                ImageRef::local(dir.join("12_900.png")),
                ImageRef::local(dir.join("12_1000.jpg")),
            ]
        );

        store.clear(&ConversationId::from(12_i64))?;
        assert!(dir.join("123_500.jpg").exists());
        assert!(dir.join("12_abc.jpg").exists());
        Ok(())
    }

    #[test]
    fn timestamps_parse_only_for_owner() {
        let chat = ConversationId::from(-100_i64);
        assert_eq!(
            reference_timestamp(std::path::Path::new("/s/-100_1700000000000.jpeg"), &chat),
            Some(1_700_000_000_000)
        );
        assert_eq!(
            reference_timestamp(std::path::Path::new("/s/-1000_17.jpg"), &chat),
            None
        );
        assert_eq!(reference_timestamp(std::path::Path::new("/s/-100_.jpg"), &chat), None);
    }

    #[test]
    fn remote_refs_need_a_resolver_that_can_fetch() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FsReferenceStore::open(temp.path(), Arc::new(LocalResolver))?;
        assert!(store
            .append(&ConversationId::from(1_i64), ImageRef::remote("file-id"))
            .is_err());
        Ok(())
    }

    #[test]
    fn session_modes_persist_across_handles() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join(SESSION_MODES_FILE);
        let chat = ConversationId::from(5_i64);
        FileSessionModes::new(&path).set(&chat, true)?;
        assert!(FileSessionModes::new(&path).get(&chat)?);
        FileSessionModes::new(&path).set(&chat, false)?;
        assert!(!FileSessionModes::new(&path).get(&chat)?);
        Ok(())
    }

    #[test]
    fn stray_max_timestamp_fails_instead_of_overflowing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path();
        fs::write(dir.join(format!("7_{}.jpg", u64::MAX)), b"x")?;
        let store = FsReferenceStore::open(dir, Arc::new(LocalResolver))?;
        let chat = ConversationId::from(7_i64);

        assert!(store
            .append(&chat, ImageRef::inline(vec![1], Some("image/jpeg")))
            .is_err());
        assert_eq!(store.list(&chat)?.len(), 1);
        Ok(())
    }

    /// Signals when the slow download starts, then takes its time.
    struct SlowDownloads {
        started: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl ImageResolver for SlowDownloads {
        fn resolve(&self, image: &ImageRef) -> Result<ImageBytes, FetchError> {
            let ImageRef::Remote { token } = image else {
                return Err(FetchError::Unsupported { kind: image.kind() });
            };
            if token == "slow" {
                if let Some(started) = self.started.lock().ok().and_then(|mut tx| tx.take()) {
                    let _ = started.send(());
                }
                thread::sleep(Duration::from_millis(150));
            }
            Ok(ImageBytes::new(
                token.as_bytes().to_vec(),
                Some("image/jpeg".to_string()),
            ))
        }
    }

    #[test]
    fn concurrent_appends_keep_arrival_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (tx, rx) = mpsc::channel();
        let resolver = Arc::new(SlowDownloads {
            started: Mutex::new(Some(tx)),
        });
        let store = Arc::new(FsReferenceStore::open(temp.path(), resolver)?);
        let chat = ConversationId::from(21_i64);

        let slow = {
            let store = Arc::clone(&store);
            let chat = chat.clone();
            thread::spawn(move || store.append(&chat, ImageRef::remote("slow")))
        };
        rx.recv()?;
        store.append(&chat, ImageRef::remote("fast"))?;
        slow.join().map_err(|_| anyhow::anyhow!("append thread panicked"))??;

        let contents: Vec<Vec<u8>> = store
            .list(&chat)?
            .iter()
            .filter_map(|image| image.local_path())
            .map(fs::read)
            .collect::<Result<_, _>>()?;
        assert_eq!(contents, vec![b"slow".to_vec(), b"fast".to_vec()]);
        Ok(())
    }
}
