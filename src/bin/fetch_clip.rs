#![forbid(unsafe_code)]

//! One-shot download from the command line.
//!
//! Runs the same orchestration as the server and copies the resulting stream to
//! a local file. Comments go to `--comments-out` when given, stdout otherwise.

use anyhow::{Context, Result, anyhow, bail};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use reelfetch::config::{SettingsOverrides, resolve_settings};
use reelfetch::orchestrator::Orchestrator;
use reelfetch::stream::ArtifactStream;

#[derive(Debug, PartialEq)]
struct FetchArgs {
    url: String,
    output: Option<PathBuf>,
    comments_out: Option<PathBuf>,
    downloads_dir: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl FetchArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut url = None;
        let mut output = None;
        let mut comments_out = None;
        let mut downloads_dir = None;
        let mut env_file = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if !arg.starts_with("--") {
                if url.replace(arg).is_some() {
                    bail!("expected exactly one URL");
                }
                continue;
            }
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg.clone(), None),
            };
            let value = inline
                .or_else(|| args.next())
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("{flag} requires a value"))?;
            match flag.as_str() {
                "--output" => output = Some(value),
                "--comments-out" => comments_out = Some(value),
                "--downloads-dir" => downloads_dir = Some(value),
                "--env-file" => env_file = Some(value),
                _ => bail!("unknown argument: {flag}"),
            }
        }

        Ok(Self {
            url: url.ok_or_else(|| {
                anyhow!("usage: fetch_clip <url> [--output <path>] [--comments-out <path>] [--downloads-dir <dir>] [--env-file <path>]")
            })?,
            output,
            comments_out,
            downloads_dir,
            env_file,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = FetchArgs::parse()?;
    let settings = resolve_settings(SettingsOverrides {
        downloads_dir: args.downloads_dir.clone(),
        env_path: args.env_file.clone(),
        ..SettingsOverrides::default()
    })?;

    let orchestrator = Orchestrator::from_settings(&settings);
    orchestrator
        .prepare()
        .await
        .with_context(|| format!("creating {}", settings.downloads_dir.display()))?;

    let result = orchestrator
        .download_video(&args.url)
        .await
        .with_context(|| format!("downloading {}", args.url))?;

    let target = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&result.filename));
    let written = copy_stream(result.video_stream, &target).await?;
    info!(work_id = %result.work_id, path = %target.display(), bytes = written, "saved");

    if let Some(text) = result.comments_text {
        match &args.comments_out {
            Some(path) => fs::write(path, &text)
                .await
                .with_context(|| format!("writing {}", path.display()))?,
            None => println!("{text}"),
        }
    }
    if let Some(metadata) = result.metadata {
        info!(title = %metadata.title, hashtags = ?metadata.hashtags, "metadata");
    }
    Ok(())
}

/// Drains `stream` into `target`, returning the number of bytes written.
async fn copy_stream(mut stream: ArtifactStream, target: &Path) -> Result<u64> {
    let mut file = fs::File::create(target)
        .await
        .with_context(|| format!("creating {}", target.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("reading downloaded artifact")?;
        file.write_all(&chunk)
            .await
            .with_context(|| format!("writing {}", target.display()))?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };
    use tempfile::tempdir;

    fn parse(values: &[&str]) -> Result<FetchArgs> {
        FetchArgs::from_iter(values.iter().map(|value| value.to_string()))
    }

    #[test]
    fn url_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--output", "clip.mp4"]).is_err());
    }

    #[test]
    fn flags_accept_both_forms() {
        let args = parse(&[
            "https://www.tiktok.com/@u/video/1",
            "--output=clip.mp4",
            "--comments-out",
            "comments.txt",
        ])
        .unwrap();
        assert_eq!(args.url, "https://www.tiktok.com/@u/video/1");
        assert_eq!(args.output, Some(PathBuf::from("clip.mp4")));
        assert_eq!(args.comments_out, Some(PathBuf::from("comments.txt")));
        assert!(args.downloads_dir.is_none());
    }

    #[test]
    fn rejects_two_urls_and_unknown_flags() {
        assert!(parse(&["https://a", "https://b"]).is_err());
        assert!(parse(&["https://a", "--quiet=1"]).is_err());
    }

    #[tokio::test]
    async fn copy_stream_writes_all_bytes_and_completes_stream() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.mp4");
        std::fs::write(&source, vec![7u8; 70_000]).unwrap();
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();

        let stream = ArtifactStream::open(&source)
            .await
            .unwrap()
            .on_complete(move || flag.store(true, Ordering::SeqCst));
        let target = dir.path().join("copy.mp4");
        let written = copy_stream(stream, &target).await.unwrap();

        assert_eq!(written, 70_000);
        assert_eq!(std::fs::read(&target).unwrap(), vec![7u8; 70_000]);
        assert!(completed.load(Ordering::SeqCst));
    }
}
