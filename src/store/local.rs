// Local fallback persistence.
//
// A single JSON file holding progress and favorites keyed by episode id,
// plus the cached anonymous user id. Used whenever the backend can't be
// reached so listening progress is never silently lost.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::catalog::{EpisodeId, ProgressEntry, UserData};
use crate::error::StoreResult;

pub const LOCAL_STORE_FILE: &str = "local_store.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct LocalData {
    user_id: Option<String>,
    progress: HashMap<EpisodeId, ProgressEntry>,
    favorites: HashMap<EpisodeId, bool>,
}

#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    data: Mutex<LocalData>,
}

impl LocalStore {
    // A missing or unreadable file starts an empty store
    pub fn open(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "local store is corrupted, starting fresh");
                LocalData::default()
            }),
            Err(_) => LocalData::default(),
        };
        LocalStore {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::open(&dir.join(LOCAL_STORE_FILE))
    }

    fn lock(&self) -> MutexGuard<'_, LocalData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, data: &LocalData) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn cached_user_id(&self) -> Option<String> {
        self.lock().user_id.clone()
    }

    pub fn set_user_id(&self, user_id: &str) -> StoreResult<()> {
        let mut data = self.lock();
        data.user_id = Some(user_id.to_string());
        self.persist(&data)
    }

    pub fn progress(&self, id: EpisodeId) -> Option<ProgressEntry> {
        self.lock().progress.get(&id).copied()
    }

    pub fn set_progress(&self, id: EpisodeId, entry: ProgressEntry) -> StoreResult<()> {
        let mut data = self.lock();
        data.progress.insert(id, entry);
        self.persist(&data)
    }

    pub fn is_favorite(&self, id: EpisodeId) -> bool {
        self.lock().favorites.get(&id).copied().unwrap_or(false)
    }

    pub fn set_favorite(&self, id: EpisodeId, favorite: bool) -> StoreResult<()> {
        let mut data = self.lock();
        data.favorites.insert(id, favorite);
        self.persist(&data)
    }

    pub fn favorite_ids(&self) -> Vec<EpisodeId> {
        let data = self.lock();
        let mut ids: Vec<_> = data
            .favorites
            .iter()
            .filter(|(_, fav)| **fav)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn in_progress_ids(&self) -> Vec<EpisodeId> {
        self.progress_ids(|entry| {
            (entry.percent > 0 && entry.percent < 100) || (entry.position > 0.0 && entry.percent < 100)
        })
    }

    pub fn completed_ids(&self) -> Vec<EpisodeId> {
        self.progress_ids(|entry| entry.percent >= 100)
    }

    fn progress_ids<F>(&self, keep: F) -> Vec<EpisodeId>
    where
        F: Fn(&ProgressEntry) -> bool,
    {
        let data = self.lock();
        let mut ids: Vec<_> = data
            .progress
            .iter()
            .filter(|(_, entry)| keep(entry))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn user_data(&self) -> UserData {
        let data = self.lock();
        UserData {
            progress: data.progress.clone(),
            favorites: data.favorites.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) fn temp_dir(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!(
        "juricast-{name}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_survives_reopen() {
        let dir = temp_dir("reopen");
        {
            let store = LocalStore::in_dir(&dir);
            store
                .set_progress(
                    7,
                    ProgressEntry {
                        percent: 42,
                        position: 84.0,
                    },
                )
                .unwrap();
            store.set_favorite(7, true).unwrap();
            store.set_user_id("203.0.113.9").unwrap();
        }

        let store = LocalStore::in_dir(&dir);
        assert_eq!(store.progress(7).map(|p| p.percent), Some(42));
        assert!(store.is_favorite(7));
        assert_eq!(store.cached_user_id().as_deref(), Some("203.0.113.9"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupted_file_starts_empty() {
        let dir = temp_dir("corrupt");
        fs::write(dir.join(LOCAL_STORE_FILE), "{not json").unwrap();
        let store = LocalStore::in_dir(&dir);
        assert!(store.progress(1).is_none());
        assert!(store.favorite_ids().is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn progress_buckets() {
        let dir = temp_dir("buckets");
        let store = LocalStore::in_dir(&dir);
        let entry = |percent, position| ProgressEntry { percent, position };
        store.set_progress(1, entry(50, 100.0)).unwrap();
        store.set_progress(2, entry(100, 300.0)).unwrap();
        store.set_progress(3, entry(0, 5.0)).unwrap();
        store.set_progress(4, entry(0, 0.0)).unwrap();

        assert_eq!(store.in_progress_ids(), vec![1, 3]);
        assert_eq!(store.completed_ids(), vec![2]);

        store.set_favorite(2, true).unwrap();
        store.set_favorite(3, false).unwrap();
        assert_eq!(store.favorite_ids(), vec![2]);
        let _ = fs::remove_dir_all(dir);
    }
}
