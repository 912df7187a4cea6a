//! Favorites Store (component H, spec.md §4.8).
//!
//! File-backed singleton: a single JSON document under the platform app
//! data directory, rewritten atomically (write to a `.tmp` sibling, then
//! rename) on every mutation. No example repo in the pack persists local
//! app state this way, so this is grounded directly on spec.md's own
//! contract — write-temp-then-rename is the standard way to avoid a torn
//! write corrupting the store mid-process-kill, and `directories` is the
//! idiomatic crate for resolving a per-OS app data path.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use kubeview_core::{CoreError, EventBus, StatusEvent};
use kubeview_transport::Gvk;
use serde::{Deserialize, Serialize};

use crate::model::Favorite;

const STORE_VERSION: u64 = 1;

#[derive(Serialize, Deserialize)]
struct StoreDocument {
    version: u64,
    favorites: Vec<Favorite>,
    /// Unknown top-level keys from a newer store format are preserved
    /// verbatim across a rewrite rather than silently dropped.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        StoreDocument {
            version: STORE_VERSION,
            favorites: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

/// `List`, `Create`, `Rename`, `Delete` over a single file-backed favorites
/// document (spec.md §4.8). All mutation goes through `self.lock` so
/// concurrent callers serialize rather than racing on the same file.
pub struct FavoritesStore {
    path: PathBuf,
    lock: Mutex<()>,
    status_events: EventBus<StatusEvent>,
}

impl FavoritesStore {
    /// Resolves the platform app-data path via `directories::ProjectDirs`
    /// (qualifier/organization/application `io`/`kubeview`/`kubeview`).
    pub fn new(status_events: EventBus<StatusEvent>) -> Result<Self, CoreError> {
        let project_dirs = ProjectDirs::from("io", "kubeview", "kubeview")
            .ok_or_else(|| CoreError::Configuration("could not resolve app data directory".to_string()))?;
        let dir = project_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CoreError::Storage(format!("failed to create app data directory: {e}")))?;
        Ok(FavoritesStore {
            path: dir.join("favorites.json"),
            lock: Mutex::new(()),
            status_events,
        })
    }

    pub fn at_path(path: PathBuf, status_events: EventBus<StatusEvent>) -> Self {
        FavoritesStore {
            path,
            lock: Mutex::new(()),
            status_events,
        }
    }

    /// `List() → [Favorite…]` (spec.md §4.8). A missing or corrupt store is
    /// never an error to the caller — it's treated as empty, with a
    /// warning surfaced on the Event Bus (spec.md §8 scenario S4).
    pub fn list(&self) -> Vec<Favorite> {
        let _guard = self.lock.lock().unwrap();
        self.read_document().favorites
    }

    /// `Create(name, gvk, fields) → Favorite` (spec.md §4.8).
    pub fn create(&self, name: String, gvk: Gvk, fields: Vec<Vec<String>>) -> Result<Favorite, CoreError> {
        let _guard = self.lock.lock().unwrap();
        let mut document = self.read_document();
        let favorite = Favorite {
            id: new_favorite_id(&document.favorites),
            name,
            gvk,
            fields,
            created_at: epoch_seconds_now(),
        };
        document.favorites.push(favorite.clone());
        self.write_document(&document)?;
        Ok(favorite)
    }

    /// `Rename(id, newName)` (spec.md §4.8).
    pub fn rename(&self, id: &str, new_name: String) -> Result<(), CoreError> {
        let _guard = self.lock.lock().unwrap();
        let mut document = self.read_document();
        let favorite = document
            .favorites
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        favorite.name = new_name;
        self.write_document(&document)
    }

    /// `Delete(id)` (spec.md §4.8).
    pub fn delete(&self, id: &str) -> Result<(), CoreError> {
        let _guard = self.lock.lock().unwrap();
        let mut document = self.read_document();
        let before = document.favorites.len();
        document.favorites.retain(|f| f.id != id);
        if document.favorites.len() == before {
            return Err(CoreError::NotFound(id.to_string()));
        }
        self.write_document(&document)
    }

    fn read_document(&self) -> StoreDocument {
        match std::fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<StoreDocument>(&bytes) {
                Ok(document) => document,
                Err(err) => {
                    self.status_events.publish(StatusEvent::warning(
                        "favorites",
                        format!("favorites store at {} is corrupt, treating as empty: {err}", self.path.display()),
                    ));
                    StoreDocument::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(err) => {
                self.status_events.publish(StatusEvent::warning(
                    "favorites",
                    format!("favorites store at {} is unreadable, treating as empty: {err}", self.path.display()),
                ));
                StoreDocument::default()
            }
        }
    }

    fn write_document(&self, document: &StoreDocument) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| CoreError::Storage(format!("failed to serialize favorites: {e}")))?;
        write_atomically(&self.path, &bytes)
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, bytes)
        .map_err(|e| CoreError::Storage(format!("failed to write temp favorites file: {e}")))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| CoreError::Storage(format!("failed to rename temp favorites file into place: {e}")))
}

fn new_favorite_id(existing: &[Favorite]) -> String {
    // Deterministic, collision-free within a single store without pulling
    // in a UUID dependency the rest of the workspace has no other use for.
    let next = existing
        .iter()
        .filter_map(|f| f.id.strip_prefix("fav-").and_then(|n| n.parse::<u64>().ok()))
        .max()
        .unwrap_or(0)
        + 1;
    format!("fav-{next}")
}

fn epoch_seconds_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(dir: &tempfile::TempDir) -> FavoritesStore {
        FavoritesStore::at_path(dir.path().join("favorites.json"), EventBus::default())
    }

    #[test]
    fn list_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        assert!(store.list().is_empty());
    }

    #[test]
    fn create_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let created = store
            .create("my deployments".to_string(), Gvk::new("apps", "v1", "Deployment"), vec![vec!["spec".into(), "replicas".into()]])
            .unwrap();
        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].name, "my deployments");
    }

    #[test]
    fn rename_updates_existing_favorite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let created = store.create("old".to_string(), Gvk::new("", "v1", "Pod"), vec![]).unwrap();
        store.rename(&created.id, "new".to_string()).unwrap();
        assert_eq!(store.list()[0].name, "new");
    }

    #[test]
    fn rename_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let err = store.rename("fav-999", "x".to_string()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn delete_removes_favorite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let created = store.create("a".to_string(), Gvk::new("", "v1", "Pod"), vec![]).unwrap();
        store.delete(&created.id).unwrap();
        assert!(store.list().is_empty());
    }

    /// Spec.md §8 scenario S4: a corrupted favorites file never crashes
    /// the store — `List` returns empty with a warning, and the store
    /// keeps working afterward.
    #[test]
    fn corrupted_file_degrades_to_empty_and_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("favorites.json"), b"not valid json{{{").unwrap();
        let store = store_at(&dir);
        assert!(store.list().is_empty());

        let created = store.create("recovered".to_string(), Gvk::new("", "v1", "Pod"), vec![]).unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.list()[0].id, created.id);
    }

    #[test]
    fn ids_are_unique_across_creates() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let a = store.create("a".to_string(), Gvk::new("", "v1", "Pod"), vec![]).unwrap();
        let b = store.create("b".to_string(), Gvk::new("", "v1", "Pod"), vec![]).unwrap();
        assert_ne!(a.id, b.id);
    }
}
