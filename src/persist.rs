//! JSON-file persistence for the grant and session stores.
//!
//! The whole map lives in one file and is rewritten on every mutation
//! (write to a sibling temp file, then rename).

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::error::Error;

pub(crate) struct JsonMapFile<K, V> {
    path: PathBuf,
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> JsonMapFile<K, V>
where
    K: Eq + Hash + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Open `path`, loading existing entries. A missing file is an empty map.
    pub(crate) async fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => HashMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::Store(format!("failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(Error::Store(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.entries.lock().await.get(key).cloned()
    }

    /// Apply `f` to a copy of the map and persist it; the copy replaces the
    /// in-memory map only once the file write succeeded.
    pub(crate) async fn update<R>(
        &self,
        f: impl FnOnce(&mut HashMap<K, V>) -> R,
    ) -> Result<R, Error>
    where
        K: Clone,
        V: Clone,
    {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        let out = f(&mut next);
        write_atomically(&self.path, &next).await?;
        *entries = next;
        Ok(out)
    }
}

async fn write_atomically<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Store(format!("failed to create {}: {e}", parent.display())))?;
    }
    let content = serde_json::to_vec_pretty(value).map_err(Error::store)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| Error::Store(format!("failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Store(format!("failed to replace {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/map.json");

        let file: JsonMapFile<String, u32> = JsonMapFile::open(&path).await.unwrap();
        file.update(|m| m.insert("a".into(), 1)).await.unwrap();
        file.update(|m| m.insert("b".into(), 2)).await.unwrap();
        file.update(|m| m.remove("a")).await.unwrap();
        drop(file);

        let reopened: JsonMapFile<String, u32> = JsonMapFile::open(&path).await.unwrap();
        assert_eq!(reopened.get(&"a".to_string()).await, None);
        assert_eq!(reopened.get(&"b".to_string()).await, Some(2));
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        let file: JsonMapFile<String, u32> = JsonMapFile::open(&path).await.unwrap();
        file.update(|m| m.insert("a".into(), 1)).await.unwrap();

        // A directory where the temp file should go makes the write fail
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();
        let result = file.update(|m| m.insert("a".into(), 2)).await;

        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(file.get(&"a".to_string()).await, Some(1));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, "{not json").unwrap();

        let result: Result<JsonMapFile<String, u32>, _> = JsonMapFile::open(&path).await;
        assert!(matches!(result, Err(Error::Store(_))));
    }
}
