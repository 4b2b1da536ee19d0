//! Per-user dedup cache of already-indexed message ids.
//!
//! One JSON file per user (`<id>_message_ids.json`) holding a flat array of
//! ids. Loads are forgiving — a missing or corrupt file is an empty set —
//! but saves are full overwrites and must only happen after the vector-store
//! write for those ids has succeeded.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct ProcessedIdCache {
    dir: PathBuf,
}

impl ProcessedIdCache {
    /// Open the cache directory, creating it if needed. Called once at
    /// startup — no other code path creates directories.
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::Cache(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn load(&self, user_id: i64) -> HashSet<String> {
        let path = self.path(user_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => return HashSet::new(),
        };
        match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable id cache, starting empty");
                HashSet::new()
            }
        }
    }

    /// Full overwrite with the given set. Ids are sorted so the file is
    /// stable across runs.
    pub fn save(&self, user_id: i64, ids: &HashSet<String>) -> Result<(), AppError> {
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();
        let data = serde_json::to_vec(&sorted)
            .map_err(|e| AppError::Cache(format!("serialize id cache: {e}")))?;
        fs::write(self.path(user_id), data).map_err(|e| {
            AppError::Cache(format!("write id cache for user {user_id}: {e}"))
        })
    }

    pub fn path(&self, user_id: i64) -> PathBuf {
        self.dir.join(format!("{user_id}_message_ids.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_cache() -> (TempDir, ProcessedIdCache) {
        let temp = TempDir::new().expect("tempdir");
        let cache = ProcessedIdCache::open(&temp.path().join("email_cache")).expect("open cache");
        (temp, cache)
    }

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_file_loads_empty() {
        let (_temp, cache) = make_cache();
        assert!(cache.load(1).is_empty());
    }

    #[test]
    fn save_load_roundtrip() {
        let (_temp, cache) = make_cache();
        let set = ids(&["m1", "m2", "m3"]);
        cache.save(7, &set).unwrap();
        assert_eq!(cache.load(7), set);
    }

    #[test]
    fn save_overwrites_not_appends() {
        let (_temp, cache) = make_cache();
        cache.save(1, &ids(&["old-a", "old-b"])).unwrap();
        cache.save(1, &ids(&["new"])).unwrap();
        assert_eq!(cache.load(1), ids(&["new"]));
    }

    #[test]
    fn users_are_isolated() {
        let (_temp, cache) = make_cache();
        cache.save(1, &ids(&["m1"])).unwrap();
        cache.save(2, &ids(&["m2"])).unwrap();
        assert_eq!(cache.load(1), ids(&["m1"]));
        assert_eq!(cache.load(2), ids(&["m2"]));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let (_temp, cache) = make_cache();
        fs::write(cache.path(3), b"{not json").unwrap();
        assert!(cache.load(3).is_empty());
    }
}
