use fin_core::TagStore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::StorageError;

/// Loads the tag file. A missing file is an empty store.
pub async fn load(path: &Path) -> Result<TagStore, StorageError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let store = TagStore::decode(&text);
            info!(path = %path.display(), keys = store.len(), "loaded tags");
            Ok(store)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no tag file yet, starting empty");
            Ok(TagStore::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Writes the store to `<path>.tmp` and renames it over `path`, so readers
/// never see a half-written file.
pub async fn save(path: &Path, store: &TagStore) -> Result<(), StorageError> {
    let tmp = tmp_path(path);
    let result = match tokio::fs::write(&tmp, store.encode()).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!(path = %tmp.display(), "could not remove temp file: {cleanup}");
            }
        }
        return Err(e.into());
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fin_core::TagSet;

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = load(&dir.path().join("tags")).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags");

        let mut store = TagStore::new();
        store.insert("bbb", ["rent"].into_iter().collect());
        store.insert("aaa", TagSet::new());
        store.update(&["ccc"], &["food", "coffee"]);
        save(&path, &store).await.unwrap();

        assert!(!tmp_path(&path).exists());
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "aaa\nbbb rent\nccc coffee food\n");
        assert_eq!(load(&path).await.unwrap(), store);
    }

    #[tokio::test]
    async fn save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags");
        std::fs::write(&path, "old stale\nolder stale\n").unwrap();

        let mut store = TagStore::new();
        store.update(&["new"], &["fresh"]);
        save(&path, &store).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new fresh\n");
    }

    #[tokio::test]
    async fn failed_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let path = dir.path().join("tags");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        let mut store = TagStore::new();
        store.update(&["id"], &["food"]);
        assert!(matches!(
            save(&path, &store).await,
            Err(StorageError::Io(_))
        ));
        assert!(!tmp_path(&path).exists());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(tmp_path(Path::new("/x/tags")), PathBuf::from("/x/tags.tmp"));
        assert_eq!(tmp_path(Path::new("tags.txt")), PathBuf::from("tags.txt.tmp"));
    }
}
