//! File-backed document store.
//!
//! Each collection is one JSON array at `<root>/<collection>.json`. Writes go
//! to a temporary file in the same directory and are renamed over the target,
//! so a collection is always either the previous version or the new one.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create document store at {}", root.display()))?;
        Ok(DocumentStore { root })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{collection}.json"))
    }

    /// Replace every document of `collection` with `docs`
    pub fn replace_collection<T: Serialize>(&self, collection: &str, docs: &[T]) -> Result<()> {
        let target = self.collection_path(collection);
        let tmp = tempfile::NamedTempFile::new_in(&self.root)
            .with_context(|| format!("failed to stage collection {collection}"))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, docs)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&target)
            .with_context(|| format!("failed to swap in {}", target.display()))?;
        Ok(())
    }

    /// Read a whole collection; a missing collection is empty
    #[cfg(test)]
    pub fn read_collection<T: serde::de::DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let docs = serde_json::from_slice(&raw)
            .with_context(|| format!("corrupt collection {}", path.display()))?;
        Ok(docs)
    }
}
