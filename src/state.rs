//! Processed-message state: the set of Message-IDs already handled.
//!
//! Persisted as a pretty-printed JSON array so that state files written by
//! earlier deployments keep working.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StateError;

/// Shared, persistent set of processed Message-IDs.
#[derive(Debug, Clone)]
pub struct ProcessedStore {
    path: PathBuf,
    ids: Arc<Mutex<HashSet<String>>>,
}

impl ProcessedStore {
    /// Create an empty store backed by `path` (nothing is read).
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ids: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Load from `path`. A missing file yields an empty set.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let ids = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let list: Vec<String> =
                    serde_json::from_str(&raw).map_err(|source| StateError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                list.into_iter().collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        debug!(count = ids.len(), path = %path.display(), "Loaded processed state");
        Ok(Self {
            path,
            ids: Arc::new(Mutex::new(ids)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, message_id: &str) -> bool {
        self.ids.lock().await.contains(message_id)
    }

    /// Record a message as processed. Returns `false` if it was already present.
    pub async fn insert(&self, message_id: impl Into<String>) -> bool {
        self.ids.lock().await.insert(message_id.into())
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }

    /// Write the current set to disk.
    pub async fn save(&self) -> Result<(), StateError> {
        let json = {
            let ids = self.ids.lock().await;
            let mut list: Vec<&String> = ids.iter().collect();
            list.sort();
            serde_json::to_string_pretty(&list).map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            })?
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StateError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        }

        tokio::fs::write(&self.path, json)
            .await
            .map_err(|source| StateError::Io {
                path: self.path.clone(),
                source,
            })
    }
}
