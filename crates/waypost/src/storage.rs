// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistent group store capability.
//!
//! The locator reads routing groups at start-up (`find`) and re-reads one
//! group on `refresh`. A `Storage`-kind read failure means the group is
//! gone and is treated as a deletion; a `Backend`-kind failure is a real
//! fault and propagates to the caller.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

/// What went wrong inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The entry is missing or unreadable as data: interpreted by
    /// `refresh` as a deleted group.
    Storage,
    /// The store itself failed; propagated to the caller.
    Backend,
}

/// Group store failure.
#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Storage,
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Backend,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            StoreErrorKind::Storage => write!(f, "storage error: {}", self.message),
            StoreErrorKind::Backend => write!(f, "store backend error: {}", self.message),
        }
    }
}

impl std::error::Error for StoreError {}

/// Read access to the persistent group store.
pub trait GroupStore: Send + Sync {
    /// List entry names in `collection` carrying all of `tags`.
    fn find(&self, collection: &str, tags: &[&str]) -> Result<Vec<String>, StoreError>;

    /// Read one routing group as a `{service -> weight}` map.
    fn read(&self, name: &str) -> Result<BTreeMap<String, u64>, StoreError>;
}

/// A directory-backed store: one JSON file per group under
/// `<root>/groups/`. Tags are not persisted; every group file carries the
/// implicit "group" tag.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn group_path(&self, name: &str) -> PathBuf {
        self.root.join("groups").join(format!("{}.json", name))
    }
}

impl GroupStore for FileStore {
    fn find(&self, collection: &str, _tags: &[&str]) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join(collection);

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::backend(err.to_string())),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StoreError::backend(err.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<BTreeMap<String, u64>, StoreError> {
        let path = self.group_path(name);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::storage(format!(
                    "group '{}' does not exist",
                    name
                )))
            }
            Err(err) => return Err(StoreError::backend(err.to_string())),
        };

        serde_json::from_str(&content)
            .map_err(|err| StoreError::backend(format!("group '{}': {}", name, err)))
    }
}
