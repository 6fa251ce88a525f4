#![forbid(unsafe_code)]

//! Finds the file yt-dlp actually wrote for an output template.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

/// Extensions tried after the bare template, in priority order.
pub const CANDIDATE_EXTENSIONS: [&str; 3] = ["mp4", "webm", "mkv"];

#[derive(Debug, Error)]
#[error("no non-empty artifact found for {}", base.display())]
pub struct ArtifactNotFound {
    pub base: PathBuf,
    pub searched: Vec<PathBuf>,
}

/// The bare template first, then one path per extension.
pub fn candidates(base: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(CANDIDATE_EXTENSIONS.len() + 1);
    paths.push(base.to_path_buf());
    for ext in CANDIDATE_EXTENSIONS {
        // Appended rather than `with_extension` so a dot inside the template
        // is never mistaken for an extension.
        let mut raw = OsString::from(base.as_os_str());
        raw.push(".");
        raw.push(ext);
        paths.push(PathBuf::from(raw));
    }
    paths
}

/// Returns the first candidate that is a regular file with nonzero size.
/// Zero-byte files count as absent since a crashed download leaves them behind.
pub async fn locate(base: &Path) -> Result<PathBuf, ArtifactNotFound> {
    let searched = candidates(base);
    for candidate in &searched {
        match tokio::fs::metadata(candidate).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                debug!(path = %candidate.display(), size = meta.len(), "located artifact");
                return Ok(candidate.clone());
            }
            Ok(meta) => {
                debug!(path = %candidate.display(), size = meta.len(), "skipping empty candidate");
            }
            Err(_) => {}
        }
    }
    Err(ArtifactNotFound {
        base: base.to_path_buf(),
        searched,
    })
}
