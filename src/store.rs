//! On-disk artifact store.
//!
//! Every artifact lives at `<root>/<kind dir>/<file name>`, where the file
//! name is derived from its [`PartitionKey`]. Writes go to a temp file in the
//! same directory and are renamed into place, so a crashed write never leaves
//! a half-written artifact under a parseable name.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PipelineError;
use crate::key::{ArtifactKind, PartitionKey};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// A store rooted at `root`, without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a store rooted at `root`, creating one directory per artifact kind.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let store = Self::new(root);
        for kind in ArtifactKind::ALL {
            let dir = store.dir(kind);
            std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn path(&self, kind: ArtifactKind, key: &PartitionKey) -> PathBuf {
        self.dir(kind).join(kind.file_name(key))
    }

    pub fn exists(&self, kind: ArtifactKind, key: &PartitionKey) -> bool {
        self.path(kind, key).is_file()
    }

    /// Keys of every artifact of `kind`, sorted by key.
    ///
    /// Files whose names do not parse as this kind are ignored.
    pub fn list(&self, kind: ArtifactKind) -> Result<Vec<PartitionKey>, PipelineError> {
        let dir = self.dir(kind);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::io(&dir, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io(&dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(|n| kind.parse_file_name(n)) {
                Some(key) => keys.push(key),
                None => debug!(kind = %kind, file = ?name, "ignoring unrecognized file"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub fn read_text(&self, kind: ArtifactKind, key: &PartitionKey) -> Result<String, PipelineError> {
        let path = self.path(kind, key);
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                PipelineError::MissingInput(format!("{} not found", path.display()))
            }
            _ => PipelineError::io(&path, e),
        })
    }

    /// Atomically write an artifact, replacing any previous version.
    pub fn write(
        &self,
        kind: ArtifactKind,
        key: &PartitionKey,
        contents: impl AsRef<[u8]>,
    ) -> Result<PathBuf, PipelineError> {
        let path = self.path(kind, key);
        write_atomic(&path, contents.as_ref())?;
        Ok(path)
    }

    /// Delete every artifact of `kind`. Returns how many files were removed.
    ///
    /// Only files whose names parse as this kind are touched.
    pub fn clear(&self, kind: ArtifactKind) -> Result<usize, PipelineError> {
        let keys = self.list(kind)?;
        for key in &keys {
            let path = self.path(kind, key);
            std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
        }
        if !keys.is_empty() {
            debug!(kind = %kind, removed = keys.len(), "cleared stale artifacts");
        }
        Ok(keys.len())
    }
}

/// Write `contents` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PipelineError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    std::fs::write(&tmp, contents).map_err(|e| PipelineError::io(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(PipelineError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_kind_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("work")).unwrap();
        for kind in ArtifactKind::ALL {
            assert!(store.dir(kind).is_dir(), "{kind} dir missing");
        }
    }

    #[test]
    fn list_is_sorted_and_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let kind = ArtifactKind::ClusterSummary;
        for key in [
            PartitionKey::for_cluster(10, 1, 0),
            PartitionKey::for_cluster(2, 1, 11),
            PartitionKey::for_cluster(2, 1, 2),
        ] {
            store.write(kind, &key, "x").unwrap();
        }
        std::fs::write(store.dir(kind).join("notes.txt"), "keep me").unwrap();

        assert_eq!(
            store.list(kind).unwrap(),
            vec![
                PartitionKey::for_cluster(2, 1, 2),
                PartitionKey::for_cluster(2, 1, 11),
                PartitionKey::for_cluster(10, 1, 0),
            ]
        );
    }

    #[test]
    fn write_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let key = PartitionKey::for_depth(3);
        store.write(ArtifactKind::EpochComparison, &key, "one").unwrap();
        store.write(ArtifactKind::EpochComparison, &key, "two").unwrap();

        assert_eq!(
            store.read_text(ArtifactKind::EpochComparison, &key).unwrap(),
            "two"
        );
        let names: Vec<_> = std::fs::read_dir(store.dir(ArtifactKind::EpochComparison))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["summary_Depth_3.txt".to_string()]);
    }

    #[test]
    fn clear_only_removes_parseable_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let kind = ArtifactKind::ClusterComparison;
        store.write(kind, &PartitionKey::for_epoch(1, 1), "a").unwrap();
        store.write(kind, &PartitionKey::for_epoch(1, 2), "b").unwrap();
        std::fs::write(store.dir(kind).join("README.md"), "hi").unwrap();

        assert_eq!(store.clear(kind).unwrap(), 2);
        assert!(store.list(kind).unwrap().is_empty());
        assert!(store.dir(kind).join("README.md").exists());
    }

    #[test]
    fn missing_artifact_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let err = store
            .read_text(ArtifactKind::ClusterSummary, &PartitionKey::for_cluster(1, 1, 1))
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }
}
