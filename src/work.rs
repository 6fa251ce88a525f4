#![forbid(unsafe_code)]

//! Per-request work identifiers and the files named after them.
//!
//! Every artifact a request produces lives directly in the output directory
//! and its file name starts with the request's UUID. Concurrent requests
//! therefore never share a path and no locking is needed.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: Uuid,
    pub source_url: String,
    /// Output template handed to yt-dlp, without extension.
    pub video_output_path: PathBuf,
    /// Where the metadata-only invocation writes its sidecar.
    pub info_output_path: PathBuf,
    dir: PathBuf,
}

impl WorkItem {
    pub fn allocate(dir: &Path, source_url: &str) -> Self {
        Self::with_id(dir, source_url, Uuid::new_v4())
    }

    pub fn with_id(dir: &Path, source_url: &str, id: Uuid) -> Self {
        let stem = id.to_string();
        Self {
            id,
            source_url: source_url.to_string(),
            video_output_path: dir.join(&stem),
            info_output_path: dir.join(format!("{stem}.info.json")),
            dir: dir.to_path_buf(),
        }
    }

    /// Output template for the metadata invocation; yt-dlp appends `.info.json`.
    pub fn info_template(&self) -> &Path {
        &self.video_output_path
    }

    /// True if `name` belongs to this work item.
    pub fn owns(&self, name: &str) -> bool {
        name.starts_with(&self.id.to_string())
    }

    /// Removes every file in the output directory owned by this work item,
    /// including partial downloads such as `<id>.mp4.part`. Safe to call more
    /// than once. Failures are logged and otherwise ignored.
    pub fn sweep(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(work_id = %self.id, dir = %self.dir.display(), error = %err, "cannot list output directory for cleanup");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !self.owns(&name.to_string_lossy()) {
                continue;
            }
            match remove_if_exists(&entry.path()) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(work_id = %self.id, path = %entry.path().display(), error = %err, "failed to remove artifact");
                }
            }
        }
        debug!(work_id = %self.id, removed, "swept work item artifacts");
        removed
    }
}

impl WorkItem {
    /// Runs [`sweep`](Self::sweep) on the blocking pool and hands the count to
    /// `report`. Without a runtime the sweep runs inline.
    pub fn sweep_detached(self, report: impl FnOnce(&WorkItem, usize) + Send + 'static) {
        let run = move || {
            let removed = self.sweep();
            report(&self, removed);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(run);
            }
            Err(_) => run(),
        }
    }
}

/// Deletes a file, treating "already gone" as success. Returns whether a file
/// was actually removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
