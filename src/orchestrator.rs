#![forbid(unsafe_code)]

//! Top-level download flow for one request.
//!
//! `Started → Downloading → Located → ExtractingComments → Streaming → Closed`,
//! or `Failed(kind)` from any step before streaming. This is the only place a
//! failure gets its final classification. There are no retries here; callers
//! decide whether to try again.

use std::path::{Path, PathBuf};

use mime_guess::MimeGuess;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::comments::{CommentExtractor, SidecarDigest, VideoMetadata};
use crate::config::Settings;
use crate::error::DownloadError;
use crate::invocation::{CookieSource, Invocation};
use crate::locator;
use crate::runner::{ProcessOutcome, ProcessRunner, RunnerError};
use crate::stream::ArtifactStream;
use crate::work::WorkItem;

const AUTH_MARKERS: &[&str] = &[
    "requiring login",
    "use --cookies",
    "login required",
    "log in to",
    "sign in to confirm",
];
const UNAVAILABLE_MARKERS: &[&str] = &[
    "video unavailable",
    "video is unavailable",
    "private video",
    "this video is private",
];
const UNSUPPORTED_MARKERS: &[&str] = &["unsupported url"];
const NOT_FOUND_MARKERS: &[&str] = &["http error 404", "404: not found"];
const BLOCKED_MARKERS: &[&str] = &[
    "ip address is blocked",
    "http error 429",
    "too many requests",
];

/// What a successful download hands back to the caller.
#[derive(Debug)]
pub struct ExtractionResult {
    pub work_id: Uuid,
    /// Deletes the artifacts when it completes, fails, or is dropped.
    pub video_stream: ArtifactStream,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Present only when at least one comment was found.
    pub comments_text: Option<String>,
    pub metadata: Option<VideoMetadata>,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    downloads_dir: PathBuf,
    runner: ProcessRunner,
    invocation: Invocation,
    comments: Option<CommentExtractor>,
    allowed_hosts: Vec<String>,
}

impl Orchestrator {
    pub fn new(downloads_dir: impl Into<PathBuf>, runner: ProcessRunner, invocation: Invocation) -> Self {
        let comments = CommentExtractor::new(runner.clone(), invocation.clone());
        Self {
            downloads_dir: downloads_dir.into(),
            runner,
            invocation,
            comments: Some(comments),
            allowed_hosts: Vec::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let runner = ProcessRunner::new(&settings.ytdlp_binary, settings.process_timeout);
        Self::new(
            &settings.downloads_dir,
            runner,
            Invocation::new(settings.cookies.clone()),
        )
        .with_comments(settings.comments_enabled)
        .with_allowed_hosts(settings.allowed_hosts.clone())
    }

    pub fn with_comments(mut self, enabled: bool) -> Self {
        self.comments = enabled.then(|| CommentExtractor::new(self.runner.clone(), self.invocation.clone()));
        self
    }

    /// Restricts accepted URLs to these domains and their subdomains. Empty
    /// accepts any host.
    pub fn with_allowed_hosts(mut self, hosts: Vec<String>) -> Self {
        self.allowed_hosts = hosts;
        self
    }

    /// Creates the output directory if needed.
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.downloads_dir).await
    }

    pub async fn download_video(&self, url: &str) -> Result<ExtractionResult, DownloadError> {
        let url = url.trim();
        validate_url(url, &self.allowed_hosts)?;

        let work = WorkItem::allocate(&self.downloads_dir, url);
        info!(work_id = %work.id, url = %work.source_url, "download started");

        match self.process(&work).await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(work_id = %work.id, kind = ?err.kind(), error = %err, "download failed");
                let cleanup = work.clone();
                if let Err(join_err) = tokio::task::spawn_blocking(move || cleanup.sweep()).await {
                    warn!(work_id = %work.id, error = %join_err, "artifact cleanup task failed");
                }
                Err(err)
            }
        }
    }

    async fn process(&self, work: &WorkItem) -> Result<ExtractionResult, DownloadError> {
        debug!(work_id = %work.id, state = "downloading");
        let args = self
            .invocation
            .video_args(&work.video_output_path, &work.source_url);
        let outcome = self.runner.run(&args).await.map_err(|err| match err {
            RunnerError::Spawn { source, .. } => DownloadError::Spawn(source),
            RunnerError::TimedOut { after, .. } => DownloadError::TimedOut(after),
            RunnerError::Wait { source, .. } => DownloadError::Io(source),
        })?;
        if !outcome.success() {
            return Err(classify_failure(&outcome, self.invocation.cookies()));
        }

        let located = locator::locate(&work.video_output_path)
            .await
            .map_err(|err| {
                warn!(work_id = %work.id, searched = ?err.searched, "no usable artifact after download");
                DownloadError::EmptyArtifact
            })?;
        debug!(work_id = %work.id, state = "located", path = %located.display());

        let digest = match &self.comments {
            Some(extractor) => {
                debug!(work_id = %work.id, state = "extracting_comments");
                extractor.extract(&work.source_url, work).await
            }
            None => SidecarDigest::default(),
        };

        let stream = ArtifactStream::open(&located).await?;
        let size_bytes = stream.size();
        if size_bytes == 0 {
            return Err(DownloadError::EmptyArtifact);
        }

        let on_complete = work.clone();
        let on_error = work.clone();
        let video_stream = stream
            .on_complete(move || {
                on_complete.sweep_detached(|work, removed| {
                    info!(work_id = %work.id, removed, "stream closed, artifacts removed");
                });
            })
            .on_error(move |failure| {
                on_error.sweep_detached(move |work, removed| {
                    warn!(work_id = %work.id, ?failure, removed, "stream ended early, artifacts removed");
                });
            });

        let ext = artifact_extension(&located);
        info!(
            work_id = %work.id,
            size_bytes,
            comments = digest.comments_text.is_some(),
            state = "streaming",
            "download ready"
        );

        Ok(ExtractionResult {
            work_id: work.id,
            video_stream,
            filename: format!("video_{}.{ext}", work.id),
            content_type: MimeGuess::from_ext(ext)
                .first_or_octet_stream()
                .to_string(),
            size_bytes,
            comments_text: digest.comments_text,
            metadata: digest.metadata,
        })
    }
}

/// Accepts absolute http(s) URLs whose host is in `allowed_hosts` or a
/// subdomain of one. An empty list accepts any host.
pub fn validate_url(raw: &str, allowed_hosts: &[String]) -> Result<Url, DownloadError> {
    let parsed = Url::parse(raw).map_err(|err| DownloadError::InvalidUrl(err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidUrl(format!(
            "unsupported scheme {:?}",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| DownloadError::InvalidUrl("missing host".into()))?
        .to_ascii_lowercase();
    if !allowed_hosts.is_empty()
        && !allowed_hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
    {
        return Err(DownloadError::InvalidUrl(format!(
            "host {host} is not one of {}",
            allowed_hosts.join(", ")
        )));
    }
    Ok(parsed)
}

/// Maps a failed video invocation onto the error taxonomy by matching known
/// yt-dlp messages. Authentication is checked first because login prompts are
/// often phrased as "video unavailable" as well.
pub fn classify_failure(outcome: &ProcessOutcome, cookies: Option<&CookieSource>) -> DownloadError {
    let lowered = outcome.stderr_text.to_lowercase();
    let matches_any = |markers: &[&str]| markers.iter().any(|marker| lowered.contains(marker));

    if matches_any(AUTH_MARKERS) {
        DownloadError::AuthRequired {
            cookie_browser: cookies.map(|source| source.browser.clone()),
        }
    } else if matches_any(UNAVAILABLE_MARKERS) {
        DownloadError::Unavailable
    } else if matches_any(UNSUPPORTED_MARKERS) {
        DownloadError::UnsupportedUrl
    } else if matches_any(NOT_FOUND_MARKERS) || error_line_says_not_found(&lowered) {
        DownloadError::NotFound
    } else if matches_any(BLOCKED_MARKERS) {
        DownloadError::UpstreamBlocked
    } else {
        let stderr = outcome.stderr_text.trim();
        DownloadError::Internal(if stderr.is_empty() {
            format!("retrieval tool exited with code {}", outcome.exit_code)
        } else {
            stderr.to_string()
        })
    }
}

fn error_line_says_not_found(lowered_stderr: &str) -> bool {
    lowered_stderr
        .lines()
        .any(|line| line.trim_start().starts_with("error:") && line.contains("not found"))
}

fn artifact_extension(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("webm") => "webm",
        Some("mkv") => "mkv",
        _ => "mp4",
    }
}
