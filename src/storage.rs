use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::Result;

/// Owns the upload and heatmap folders and their retention policy.
#[derive(Debug, Clone)]
pub struct Storage {
    upload_dir: PathBuf,
    heatmap_dir: PathBuf,
    keep_uploads: bool,
    max_heatmaps: usize,
}

impl Storage {
    pub fn new(config: &StorageConfig) -> Storage {
        Storage {
            upload_dir: config.upload_dir.clone(),
            heatmap_dir: config.heatmap_dir.clone(),
            keep_uploads: config.keep_uploads,
            max_heatmaps: config.max_heatmaps,
        }
    }

    /// Creates both folders if they do not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.upload_dir)?;
        fs::create_dir_all(&self.heatmap_dir)?;
        Ok(())
    }

    pub fn heatmap_dir(&self) -> &Path {
        &self.heatmap_dir
    }

    /// Fresh identifier shared by an upload and the heatmap derived from it.
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn upload_path(&self, id: &str) -> PathBuf {
        self.upload_dir.join(format!("{}.jpg", id))
    }

    pub fn heatmap_path(&self, id: &str) -> PathBuf {
        self.heatmap_dir.join(format!("{}_heatmap.jpg", id))
    }

    pub fn save_upload(&self, id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.upload_path(id);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Removes an upload; a file that is already gone is not an error.
    pub fn discard_upload(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed upload"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove upload"),
        }
    }

    /// Applies the success-path retention policy to an upload.
    pub fn finish_upload(&self, path: &Path) {
        if !self.keep_uploads {
            self.discard_upload(path);
        }
    }

    /// Writes the heatmap JPEG and prunes the folder to `max_heatmaps`.
    /// A failed prune is logged; the new heatmap is still returned.
    pub fn save_heatmap(&self, id: &str, jpeg: &[u8]) -> Result<PathBuf> {
        let path = self.heatmap_path(id);
        fs::write(&path, jpeg)?;
        if self.max_heatmaps > 0 {
            match self.prune_heatmaps(self.max_heatmaps) {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "pruned old heatmaps"),
                Err(e) => warn!(dir = %self.heatmap_dir.display(), error = %e, "could not prune heatmaps"),
            }
        }
        Ok(path)
    }

    /// Deletes the oldest heatmaps so that at most `keep` remain. Returns the
    /// number of files removed.
    pub fn prune_heatmaps(&self, keep: usize) -> Result<usize> {
        let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(&self.heatmap_dir)?
            .flatten()
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("jpg"))
            .filter_map(|e| {
                let modified = e.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, e.path()))
            })
            .collect();
        if entries.len() <= keep {
            return Ok(0);
        }
        // Newest first; ties broken by name so the order is stable.
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        let mut removed = 0;
        for (_, path) in entries.into_iter().skip(keep) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                // Another worker may have pruned it first.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Resolves a heatmap file name from a URL to a path inside the heatmap
    /// folder, rejecting anything that could escape it.
    pub fn resolve_heatmap(&self, file_name: &str) -> Option<PathBuf> {
        let valid = !file_name.is_empty()
            && !file_name.contains('/')
            && !file_name.contains('\\')
            && !file_name.contains("..")
            && file_name.ends_with(".jpg");
        if !valid {
            return None;
        }
        let path = self.heatmap_dir.join(file_name);
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(root: &Path, keep_uploads: bool, max_heatmaps: usize) -> Storage {
        let s = Storage::new(&StorageConfig {
            upload_dir: root.join("uploads"),
            heatmap_dir: root.join("static/heatmaps"),
            keep_uploads,
            max_heatmaps,
        });
        s.ensure_dirs().unwrap();
        s
    }

    #[test]
    fn test_upload_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), false, 0);
        let id = Storage::new_id();
        let path = s.save_upload(&id, b"bytes").unwrap();
        assert!(path.ends_with(format!("{}.jpg", id)));
        assert!(path.exists());
        s.finish_upload(&path);
        assert!(!path.exists());
        // Second removal is silent.
        s.discard_upload(&path);
    }

    #[test]
    fn test_keep_uploads_policy() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), true, 0);
        let path = s.save_upload("abc", b"bytes").unwrap();
        s.finish_upload(&path);
        assert!(path.exists());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), false, 0);
        for i in 0..5 {
            s.save_heatmap(&format!("h{}", i), b"jpeg").unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(s.prune_heatmaps(2).unwrap(), 3);
        assert!(s.heatmap_path("h4").exists());
        assert!(s.heatmap_path("h3").exists());
        assert!(!s.heatmap_path("h0").exists());
    }

    #[test]
    fn test_save_heatmap_applies_cap() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), false, 2);
        for i in 0..4 {
            s.save_heatmap(&format!("h{}", i), b"jpeg").unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        let count = fs::read_dir(s.heatmap_dir()).unwrap().count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_failed_prune_keeps_new_heatmap() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), false, 1);
        // A directory with a .jpg name cannot be removed with remove_file.
        fs::create_dir(s.heatmap_dir().join("stale.jpg")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let path = s.save_heatmap("fresh", b"jpeg").unwrap();
        assert!(path.is_file());
        assert!(s.heatmap_dir().join("stale.jpg").is_dir());
        assert!(s.prune_heatmaps(1).is_err());
    }

    #[test]
    fn test_resolve_heatmap_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path(), false, 0);
        s.save_heatmap("ok", b"jpeg").unwrap();
        assert!(s.resolve_heatmap("ok_heatmap.jpg").is_some());
        assert!(s.resolve_heatmap("missing_heatmap.jpg").is_none());
        assert!(s.resolve_heatmap("../uploads/x.jpg").is_none());
        assert!(s.resolve_heatmap("..%2Fx.jpg").is_none());
        assert!(s.resolve_heatmap("").is_none());
    }
}
