use std::path::{Path, PathBuf};

use snafu::ResultExt;

use super::error::{
    CreateStoreDirectorySnafu, ReadStoreSnafu, RenameTempFileSnafu, SerializeThreadsSnafu,
    StoreError, StoreResult, WriteStoreSnafu,
};
use super::ids::ThreadId;
use super::types::Thread;

pub const STORE_DIRECTORY_NAME: &str = "portal";
pub const THREADS_FILE_NAME: &str = "threads.json";

/// Write-through store of every conversation thread.
///
/// The whole thread list is rewritten on each mutation. The store has exactly one writer;
/// callers confine it to a single task instead of locking.
#[derive(Debug)]
pub struct ThreadStore {
    path: PathBuf,
    threads: Vec<Thread>,
    selected_id: Option<ThreadId>,
}

impl ThreadStore {
    pub fn default_store_dir() -> PathBuf {
        dirs::data_dir()
            .map(|path| path.join(STORE_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".portal"))
    }

    pub fn default_store_path() -> PathBuf {
        Self::default_store_dir().join(THREADS_FILE_NAME)
    }

    /// Loads the store, seeding one empty selected thread when nothing usable is on disk.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let threads = load_threads(&path);
        let mut store = Self {
            path,
            threads,
            selected_id: None,
        };

        if store.threads.is_empty() {
            let thread = Thread::new();
            tracing::info!(thread_id = %thread.id, path = ?store.path, "seeding empty thread store");
            store.selected_id = Some(thread.id);
            store.threads.push(thread);
            store.save()?;
        } else {
            store.selected_id = store.threads.first().map(|thread| thread.id);
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Threads in display order (newest created first).
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn thread(&self, thread_id: ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.id == thread_id)
    }

    pub fn selected_id(&self) -> Option<ThreadId> {
        self.selected_id
    }

    pub fn selected(&self) -> Option<&Thread> {
        self.selected_id.and_then(|thread_id| self.thread(thread_id))
    }

    /// Selection is runtime state and is not persisted.
    pub fn select(&mut self, thread_id: ThreadId) -> bool {
        if self.thread(thread_id).is_none() {
            return false;
        }

        self.selected_id = Some(thread_id);
        true
    }

    /// Inserts a fresh thread at the front and selects it.
    pub fn create_thread(&mut self) -> StoreResult<ThreadId> {
        let thread = Thread::new();
        let thread_id = thread.id;
        self.threads.insert(0, thread);
        self.selected_id = Some(thread_id);
        self.save()?;
        Ok(thread_id)
    }

    pub fn delete_thread(&mut self, thread_id: ThreadId) -> StoreResult<bool> {
        let before = self.threads.len();
        self.update(|threads| threads.retain(|thread| thread.id != thread_id))?;
        Ok(self.threads.len() != before)
    }

    /// Mutates one thread resolved by id against current state, then persists.
    ///
    /// Returns `Ok(None)` without touching disk when the thread no longer exists.
    pub fn update_thread<R>(
        &mut self,
        thread_id: ThreadId,
        mutate: impl FnOnce(&mut Thread) -> R,
    ) -> StoreResult<Option<R>> {
        let Some(thread) = self.threads.iter_mut().find(|thread| thread.id == thread_id) else {
            return Ok(None);
        };

        let result = mutate(thread);
        self.save()?;
        Ok(Some(result))
    }

    /// Mutates the whole thread list, repairs the selection, then persists.
    pub fn update<R>(&mut self, mutate: impl FnOnce(&mut Vec<Thread>) -> R) -> StoreResult<R> {
        let result = mutate(&mut self.threads);
        self.repair_selection();
        self.save()?;
        Ok(result)
    }

    pub fn save(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateStoreDirectorySnafu {
                stage: "create-store-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_vec(&self.threads).context(SerializeThreadsSnafu {
            stage: "serialize-threads-json",
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteStoreSnafu {
            stage: "write-temporary-store-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.path).context(RenameTempFileSnafu {
            stage: "rename-temporary-store-file",
            from: temp_path,
            to: self.path.clone(),
        })?;

        tracing::trace!(path = ?self.path, threads = self.threads.len(), "saved thread store");
        Ok(())
    }

    fn repair_selection(&mut self) {
        let selection_valid = self
            .selected_id
            .is_some_and(|thread_id| self.threads.iter().any(|thread| thread.id == thread_id));

        if !selection_valid {
            self.selected_id = self.threads.first().map(|thread| thread.id);
        }
    }
}

/// Missing or undecodable files load as an empty store.
fn load_threads(path: &Path) -> Vec<Thread> {
    let content = match read_store_text(path) {
        Ok(Some(content)) => content,
        Ok(None) => {
            tracing::info!("thread store not found at {:?}, starting empty", path);
            return Vec::new();
        }
        Err(error) => {
            tracing::warn!(error = %error, "thread store unreadable, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<Thread>>(&content) {
        Ok(threads) => threads,
        Err(error) => {
            tracing::warn!(
                "failed to parse thread store at {:?}: {}. starting empty",
                path,
                error
            );
            Vec::new()
        }
    }
}

fn read_store_text(path: &Path) -> Result<Option<String>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(source).context(ReadStoreSnafu {
            stage: "read-store",
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEFAULT_THREAD_TITLE, Message};

    fn store_in(dir: &tempfile::TempDir) -> ThreadStore {
        ThreadStore::open(dir.path().join("threads.json")).unwrap()
    }

    #[test]
    fn missing_file_seeds_one_selected_thread() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.threads().len(), 1);
        let seeded = &store.threads()[0];
        assert_eq!(store.selected_id(), Some(seeded.id));
        assert_eq!(seeded.title, DEFAULT_THREAD_TITLE);
        assert!(seeded.messages.is_empty());
        assert!(store.path().exists());
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threads.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let store = ThreadStore::open(&path).unwrap();
        assert_eq!(store.threads().len(), 1);
        assert!(store.selected().is_some());
    }

    #[test]
    fn reload_reproduces_ids_order_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        for index in 0..3 {
            let thread_id = store.create_thread().unwrap();
            store
                .update_thread(thread_id, |thread| {
                    thread.push_message(Message::system("You are helpful"));
                    thread.push_message(Message::user(format!("question {index}"), Vec::new()));
                    thread.push_message(Message::assistant(format!("answer {index}")));
                })
                .unwrap();
        }

        let reloaded = ThreadStore::open(store.path()).unwrap();
        assert_eq!(reloaded.threads().len(), 4);

        for (original, loaded) in store.threads().iter().zip(reloaded.threads()) {
            assert_eq!(original.id, loaded.id);
            assert_eq!(original.title, loaded.title);
            let original_ids = original.messages.iter().map(|m| m.id).collect::<Vec<_>>();
            let loaded_ids = loaded.messages.iter().map(|m| m.id).collect::<Vec<_>>();
            assert_eq!(original_ids, loaded_ids);
            let original_text = original.messages.iter().map(|m| m.text.clone()).collect::<Vec<_>>();
            let loaded_text = loaded.messages.iter().map(|m| m.text.clone()).collect::<Vec<_>>();
            assert_eq!(original_text, loaded_text);
        }
    }

    #[test]
    fn created_threads_go_first_and_become_selected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let seeded_id = store.threads()[0].id;

        let created_id = store.create_thread().unwrap();
        assert_eq!(store.threads()[0].id, created_id);
        assert_eq!(store.threads()[1].id, seeded_id);
        assert_eq!(store.selected_id(), Some(created_id));
    }

    #[test]
    fn deleting_selected_thread_moves_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let seeded_id = store.threads()[0].id;
        let created_id = store.create_thread().unwrap();

        assert!(store.delete_thread(created_id).unwrap());
        assert_eq!(store.selected_id(), Some(seeded_id));

        assert!(store.delete_thread(seeded_id).unwrap());
        assert!(store.threads().is_empty());
        assert_eq!(store.selected_id(), None);
    }

    #[test]
    fn deleting_unknown_thread_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        assert!(!store.delete_thread(ThreadId::new_v7()).unwrap());
        assert_eq!(store.threads().len(), 1);
    }

    #[test]
    fn update_of_missing_thread_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let outcome = store
            .update_thread(ThreadId::new_v7(), |thread| thread.title.clone())
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn select_rejects_unknown_thread() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let selected = store.selected_id();
        assert!(!store.select(ThreadId::new_v7()));
        assert_eq!(store.selected_id(), selected);
    }

    #[test]
    fn every_mutation_is_flushed_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let thread_id = store.threads()[0].id;

        store
            .update_thread(thread_id, |thread| {
                thread.push_message(Message::user("Hi", Vec::new()));
            })
            .unwrap();

        let on_disk: Vec<Thread> =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk[0].messages.len(), 1);
        assert_eq!(on_disk[0].messages[0].text.as_deref(), Some("Hi"));
    }
}
