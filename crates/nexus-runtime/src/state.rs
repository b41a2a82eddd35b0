//! Persistent state management.
//!
//! Each node owns one directory under the state root holding a JSON
//! record. Claiming the directory is the compare-and-create step that makes
//! node IDs unique; record writes go through a temporary file and a rename
//! so a reader never sees a torn record.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nexus_common::constants::STATE_FILE_NAME;
use nexus_common::error::{NexusError, Result};
use nexus_common::types::{NodeId, NodeState};

const STATE_ROOT_MODE: u32 = 0o755;

/// On-disk store of node records.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Opens the store, creating the root directory with mode 0755.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        fs::set_permissions(&root, fs::Permissions::from_mode(STATE_ROOT_MODE))
            .map_err(|e| io_error(&root, e))?;
        tracing::debug!(path = %root.display(), "state root ready");
        Ok(Self { root })
    }

    /// Returns the state root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory owned by node `id`.
    #[must_use]
    pub fn node_dir(&self, id: &NodeId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Atomically claims the directory for `id`.
    ///
    /// Uses a single `mkdir(2)`, so of several concurrent callers exactly one
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`NexusError::AlreadyExists`] if the directory exists.
    pub fn claim(&self, id: &NodeId) -> Result<PathBuf> {
        let dir = self.node_dir(id);
        match fs::create_dir(&dir) {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(NexusError::AlreadyExists {
                id: id.to_string(),
            }),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    /// Loads the record of node `id`.
    ///
    /// # Errors
    ///
    /// Returns [`NexusError::NotFound`] if no record exists, or an error if
    /// it cannot be read or parsed.
    pub fn load(&self, id: &NodeId) -> Result<NodeState> {
        let path = self.node_dir(id).join(STATE_FILE_NAME);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(NexusError::NotFound {
                    kind: "node",
                    id: id.to_string(),
                });
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        let state: NodeState = serde_json::from_str(&content)?;
        tracing::debug!(id = %id, status = %state.status, "state loaded");
        Ok(state)
    }

    /// Persists `state` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn save(&self, state: &NodeState) -> Result<()> {
        let dir = self.node_dir(state.id());
        let path = dir.join(STATE_FILE_NAME);
        let tmp = dir.join(format!(".{STATE_FILE_NAME}.tmp"));
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, json).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;
        tracing::debug!(id = %state.id(), status = %state.status, "state saved");
        Ok(())
    }

    /// Deletes the directory of node `id`. A missing directory is success.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be removed.
    pub fn release(&self, id: &NodeId) -> Result<()> {
        let dir = self.node_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(id = %id, "state directory removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    /// Returns the IDs of every node directory, sorted.
    ///
    /// Entries whose names are not valid node IDs are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the state root cannot be read.
    pub fn ids(&self) -> Result<Vec<NodeId>> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))?;
        let mut ids: Vec<NodeId> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| NodeId::new(name).ok())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> NexusError {
    NexusError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use nexus_common::error::ErrorKind as NexusErrorKind;
    use nexus_common::types::{NodeConfig, NodeStatus};

    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state")).unwrap();
        (dir, store)
    }

    fn state(id: &str) -> NodeState {
        NodeState::new(NodeConfig {
            id: NodeId::new(id).unwrap(),
            hostname: id.into(),
            memory_mb: 64,
            cpu_shares: 0,
            rootfs_path: PathBuf::from("/var/lib/nexus/images/alpine-base"),
            command: vec!["/bin/sh".into()],
        })
    }

    #[test]
    fn open_creates_root_with_mode_755() {
        let (_dir, store) = store();
        let mode = fs::metadata(store.root()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn save_then_load_returns_same_record() {
        let (_dir, store) = store();
        let mut record = state("web1");
        let _ = store.claim(record.id()).unwrap();
        record.status = NodeStatus::Running;
        record.pid = Some(4242);
        store.save(&record).unwrap();
        assert_eq!(store.load(record.id()).unwrap(), record);
        assert!(!store.node_dir(record.id()).join(".state.json.tmp").exists());
    }

    #[test]
    fn second_claim_is_already_exists() {
        let (_dir, store) = store();
        let id = NodeId::new("web1").unwrap();
        let _ = store.claim(&id).unwrap();
        let err = store.claim(&id).unwrap_err();
        assert_eq!(err.kind(), NexusErrorKind::AlreadyExists);
    }

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        let (_dir, store) = store();
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.claim(&NodeId::new("web1").unwrap())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| e.kind() == NexusErrorKind::AlreadyExists)
        );
    }

    #[test]
    fn load_unknown_is_not_found() {
        let (_dir, store) = store();
        let err = store.load(&NodeId::new("ghost").unwrap()).unwrap_err();
        assert_eq!(err.kind(), NexusErrorKind::NotFound);
    }

    #[test]
    fn release_frees_the_id_and_is_idempotent() {
        let (_dir, store) = store();
        let record = state("web1");
        let _ = store.claim(record.id()).unwrap();
        store.save(&record).unwrap();
        store.release(record.id()).unwrap();
        store.release(record.id()).unwrap();
        assert!(store.claim(record.id()).is_ok());
    }

    #[test]
    fn ids_lists_node_directories_only() {
        let (_dir, store) = store();
        for id in ["db", "web1"] {
            let _ = store.claim(&NodeId::new(id).unwrap()).unwrap();
        }
        fs::write(store.root().join("stray-file"), "").unwrap();
        fs::create_dir(store.root().join(".hidden")).unwrap();
        let ids: Vec<String> = store.ids().unwrap().into_iter().map(String::from).collect();
        assert_eq!(ids, vec!["db", "web1"]);
    }
}
