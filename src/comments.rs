#![forbid(unsafe_code)]

//! Best-effort comment extraction from yt-dlp's `.info.json` sidecar.
//!
//! Platforms regularly serve the video while withholding the comment thread,
//! so nothing in here is allowed to fail the download. Every problem collapses
//! into "no comments" at [`CommentExtractor::extract`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::invocation::Invocation;
use crate::runner::ProcessRunner;
use crate::work::{WorkItem, remove_if_exists};

pub const MAX_COMMENTS: usize = 15;
pub const MAX_COMMENT_CHARS: usize = 200;
pub const MAX_BLOCK_CHARS: usize = 5000;
pub const COMMENT_ELLIPSIS: &str = "...";
pub const BLOCK_TRUNCATED_MARKER: &str = "\n\n[... comments truncated]";

const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 500;
const MAX_HASHTAGS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawComment {
    pub author: String,
    pub text: String,
    pub like_count: Option<u64>,
}

/// Descriptive fields used by downstream text generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub hashtags: Vec<String>,
}

/// Everything salvaged from the sidecar. Both fields may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidecarDigest {
    pub comments_text: Option<String>,
    pub metadata: Option<VideoMetadata>,
}

/// Subset of yt-dlp's info JSON we care about.
#[derive(Debug, Deserialize)]
struct InfoSidecar {
    #[serde(default)]
    comments: Option<Vec<Value>>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    fulltitle: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SidecarComment {
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    like_count: Option<i64>,
}

impl From<SidecarComment> for RawComment {
    fn from(comment: SidecarComment) -> Self {
        Self {
            author: comment
                .author
                .filter(|author| !author.trim().is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            text: comment.text.unwrap_or_default(),
            like_count: comment.like_count.map(|likes| likes.max(0) as u64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommentExtractor {
    runner: ProcessRunner,
    invocation: Invocation,
}

impl CommentExtractor {
    pub fn new(runner: ProcessRunner, invocation: Invocation) -> Self {
        Self { runner, invocation }
    }

    /// Runs the metadata-only invocation for `url` and digests the sidecar.
    /// The sidecar is removed before returning, whatever happened.
    pub async fn extract(&self, url: &str, work: &WorkItem) -> SidecarDigest {
        let digest = self.harvest(url, work).await;
        if let Err(err) = remove_if_exists(&work.info_output_path) {
            warn!(work_id = %work.id, error = %err, "failed to remove metadata sidecar");
        }
        digest
    }

    async fn harvest(&self, url: &str, work: &WorkItem) -> SidecarDigest {
        let args = self.invocation.metadata_args(work.info_template(), url);
        match self.runner.run(&args).await {
            Ok(outcome) if outcome.success() => {}
            Ok(outcome) => {
                // Whatever sidecar a failed run left behind is not trusted.
                warn!(
                    work_id = %work.id,
                    exit_code = outcome.exit_code,
                    stderr = %outcome.stderr_text.trim(),
                    "metadata extraction exited with failure"
                );
                return SidecarDigest::default();
            }
            Err(err) => {
                warn!(work_id = %work.id, error = %err, "metadata extraction could not run");
                return SidecarDigest::default();
            }
        }

        let raw = match tokio::fs::read(&work.info_output_path).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!(work_id = %work.id, error = %err, "no metadata sidecar produced");
                return SidecarDigest::default();
            }
        };

        let digest = digest_sidecar(&raw);
        match &digest.comments_text {
            Some(_) => info!(work_id = %work.id, "extracted comments"),
            None => info!(work_id = %work.id, "no comments available"),
        }
        digest
    }
}

/// Parses sidecar bytes. Malformed input yields an empty digest.
pub fn digest_sidecar(raw: &[u8]) -> SidecarDigest {
    let sidecar: InfoSidecar = match serde_json::from_slice(raw) {
        Ok(sidecar) => sidecar,
        Err(err) => {
            warn!(error = %err, "could not parse metadata sidecar");
            return SidecarDigest::default();
        }
    };

    let metadata = video_metadata(&sidecar);
    let comments = parse_comments(sidecar.comments.unwrap_or_default());
    SidecarDigest {
        comments_text: format_comments(&rank_comments(comments)),
        metadata: Some(metadata),
    }
}

fn parse_comments(values: Vec<Value>) -> Vec<RawComment> {
    let mut comments = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<SidecarComment>(value) {
            Ok(comment) => comments.push(comment.into()),
            Err(err) => warn!(error = %err, "skipping unparseable comment entry"),
        }
    }
    comments
}

/// Most-liked first, ties in source order, at most [`MAX_COMMENTS`].
pub fn rank_comments(mut comments: Vec<RawComment>) -> Vec<RawComment> {
    // `sort_by` is stable, which keeps source order among equal like counts.
    comments.sort_by(|a, b| b.like_count.unwrap_or(0).cmp(&a.like_count.unwrap_or(0)));
    comments.truncate(MAX_COMMENTS);
    comments
}

/// Numbered text block, or `None` when there is nothing to show.
pub fn format_comments(comments: &[RawComment]) -> Option<String> {
    if comments.is_empty() {
        return None;
    }

    let block = comments
        .iter()
        .enumerate()
        .map(|(index, comment)| {
            format!(
                "{}. {}: {}",
                index + 1,
                comment.author,
                truncate_with_marker(&comment.text, MAX_COMMENT_CHARS, COMMENT_ELLIPSIS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    Some(truncate_with_marker(
        &block,
        MAX_BLOCK_CHARS,
        BLOCK_TRUNCATED_MARKER,
    ))
}

/// Keeps the first `max` characters and appends `marker` if anything was cut.
fn truncate_with_marker(text: &str, max: usize, marker: &str) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{}", &text[..cut], marker),
        None => text.to_string(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn video_metadata(sidecar: &InfoSidecar) -> VideoMetadata {
    let title = [&sidecar.title, &sidecar.fulltitle]
        .into_iter()
        .flatten()
        .find(|title| !title.trim().is_empty())
        .map(|title| truncate_chars(title, MAX_TITLE_CHARS))
        .unwrap_or_default();
    let description = sidecar.description.clone().unwrap_or_default();

    let mut hashtags = extract_hashtags(&description);
    if hashtags.is_empty()
        && let Some(tags) = &sidecar.tags
    {
        hashtags = tags
            .iter()
            .filter_map(Value::as_str)
            .filter(|tag| !tag.trim().is_empty())
            .take(MAX_HASHTAGS)
            .map(|tag| format!("#{}", tag.trim()))
            .collect();
    }

    VideoMetadata {
        title,
        description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
        hashtags,
    }
}

/// `#word` tokens in order of appearance, where a word is letters, digits and
/// underscores.
fn extract_hashtags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '#' {
            continue;
        }
        let mut word = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                word.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if !word.is_empty() {
            tags.push(format!("#{word}"));
            if tags.len() == MAX_HASHTAGS {
                break;
            }
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment(author: &str, text: &str, likes: Option<u64>) -> RawComment {
        RawComment {
            author: author.into(),
            text: text.into(),
            like_count: likes,
        }
    }

    #[test]
    fn ranking_is_stable_and_capped() {
        let mut likes = vec![50, 50, 30];
        likes.extend((0..17).map(|n| n as u64));
        let comments: Vec<_> = likes
            .iter()
            .enumerate()
            .map(|(index, likes)| comment(&format!("user{index}"), "hi", Some(*likes)))
            .collect();

        let ranked = rank_comments(comments);
        assert_eq!(ranked.len(), MAX_COMMENTS);
        assert_eq!(ranked[0].author, "user0");
        assert_eq!(ranked[1].author, "user1");
        assert_eq!(ranked[2].author, "user2");
        assert!(
            ranked
                .windows(2)
                .all(|pair| pair[0].like_count >= pair[1].like_count)
        );
    }

    #[test]
    fn missing_like_counts_rank_as_zero() {
        let ranked = rank_comments(vec![
            comment("a", "x", None),
            comment("b", "x", Some(1)),
            comment("c", "x", Some(0)),
        ]);
        let authors: Vec<_> = ranked.iter().map(|c| c.author.as_str()).collect();
        assert_eq!(authors, vec!["b", "a", "c"]);
    }

    #[test]
    fn long_comment_text_is_cut_to_200_chars_plus_marker() {
        let long = "é".repeat(250);
        let text = format_comments(&[comment("ana", &long, Some(1))]).unwrap();
        let body = text.strip_prefix("1. ana: ").unwrap();
        assert!(body.ends_with(COMMENT_ELLIPSIS));
        assert_eq!(
            body.trim_end_matches(COMMENT_ELLIPSIS).chars().count(),
            MAX_COMMENT_CHARS
        );
    }

    #[test]
    fn exact_length_text_is_left_alone() {
        let exact = "a".repeat(MAX_COMMENT_CHARS);
        let text = format_comments(&[comment("ana", &exact, None)]).unwrap();
        assert_eq!(text, format!("1. ana: {exact}"));
    }

    #[test]
    fn block_is_numbered_and_separated() {
        let text =
            format_comments(&[comment("a", "first", Some(2)), comment("b", "second", None)])
                .unwrap();
        assert_eq!(text, "1. a: first\n\n2. b: second");
    }

    #[test]
    fn oversized_block_is_capped_with_marker() {
        let comments: Vec<_> = (0..MAX_COMMENTS)
            .map(|n| comment(&format!("{}{n}", "u".repeat(200)), &"z".repeat(400), None))
            .collect();
        let text = format_comments(&comments).unwrap();
        assert!(text.ends_with(BLOCK_TRUNCATED_MARKER));
        assert_eq!(
            text.chars().count(),
            MAX_BLOCK_CHARS + BLOCK_TRUNCATED_MARKER.chars().count()
        );
    }

    #[test]
    fn empty_comment_list_formats_to_none() {
        assert!(format_comments(&[]).is_none());
    }

    #[test]
    fn digest_reads_comments_and_metadata() {
        let raw = json!({
            "title": "",
            "fulltitle": "Dance clip",
            "description": "fun #dance and #fyp_2024! #",
            "tags": ["ignored"],
            "comments": [
                {"author": "low", "text": "meh", "like_count": 1},
                {"author": "top", "text": "wow", "like_count": 9},
                {"text": "anon", "like_count": null},
                "not-a-comment"
            ]
        });
        let digest = digest_sidecar(&serde_json::to_vec(&raw).unwrap());

        assert_eq!(
            digest.comments_text.as_deref(),
            Some("1. top: wow\n\n2. low: meh\n\n3. Unknown: anon")
        );
        let metadata = digest.metadata.unwrap();
        assert_eq!(metadata.title, "Dance clip");
        assert_eq!(metadata.hashtags, vec!["#dance", "#fyp_2024"]);
    }

    #[test]
    fn digest_falls_back_to_tags_for_hashtags() {
        let raw = json!({"title": "t", "description": "no tags here", "tags": ["a", 3, "b"]});
        let digest = digest_sidecar(&serde_json::to_vec(&raw).unwrap());
        assert!(digest.comments_text.is_none());
        assert_eq!(digest.metadata.unwrap().hashtags, vec!["#a", "#b"]);
    }

    #[test]
    fn malformed_sidecar_is_an_empty_digest() {
        assert_eq!(digest_sidecar(b"{not json"), SidecarDigest::default());
    }

    #[test]
    fn hashtags_are_capped() {
        let text: String = (0..15).map(|n| format!("#t{n} ")).collect();
        assert_eq!(extract_hashtags(&text).len(), MAX_HASHTAGS);
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::testing::install_ytdlp_stub;
        use std::{fs, time::Duration};
        use tempfile::tempdir;

        fn extractor(stub: std::path::PathBuf) -> CommentExtractor {
            CommentExtractor::new(
                ProcessRunner::new(stub, Duration::from_secs(10)),
                Invocation::default(),
            )
        }

        #[tokio::test]
        async fn extract_parses_and_removes_sidecar() {
            let temp = tempdir().unwrap();
            let downloads = temp.path().join("downloads");
            fs::create_dir_all(&downloads).unwrap();
            let stub = install_ytdlp_stub(
                temp.path(),
                r#"cat <<'JSON' > "${output}.info.json"
{"title": "t", "comments": [{"author": "a", "text": "hello", "like_count": 3}]}
JSON
"#,
            );
            let work = WorkItem::allocate(&downloads, "https://www.tiktok.com/@u/video/1");

            let digest = extractor(stub).extract(&work.source_url, &work).await;
            assert_eq!(digest.comments_text.as_deref(), Some("1. a: hello"));
            assert!(!work.info_output_path.exists());
        }

        #[tokio::test]
        async fn failed_run_without_sidecar_is_no_comments() {
            let temp = tempdir().unwrap();
            let stub = install_ytdlp_stub(temp.path(), "echo 'ERROR: comments disabled' >&2\nexit 1\n");
            let work = WorkItem::allocate(temp.path(), "https://www.tiktok.com/@u/video/1");

            let digest = extractor(stub).extract(&work.source_url, &work).await;
            assert_eq!(digest, SidecarDigest::default());
        }

        #[tokio::test]
        async fn failed_run_ignores_and_removes_its_sidecar() {
            let temp = tempdir().unwrap();
            let stub = install_ytdlp_stub(
                temp.path(),
                r#"printf '{"title":"t","comments":[{"author":"a","text":"stale","like_count":3}]}' > "${output}.info.json"
exit 1
"#,
            );
            let work = WorkItem::allocate(temp.path(), "https://www.tiktok.com/@u/video/1");

            let digest = extractor(stub).extract(&work.source_url, &work).await;
            assert_eq!(digest, SidecarDigest::default());
            assert!(!work.info_output_path.exists());
        }

        #[tokio::test]
        async fn missing_binary_is_no_comments() {
            let temp = tempdir().unwrap();
            let work = WorkItem::allocate(temp.path(), "https://www.tiktok.com/@u/video/1");

            let digest = extractor(temp.path().join("absent"))
                .extract(&work.source_url, &work)
                .await;
            assert_eq!(digest, SidecarDigest::default());
        }
    }
}
