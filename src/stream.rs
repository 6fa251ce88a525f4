#![forbid(unsafe_code)]

//! Byte stream over a downloaded artifact with terminal callbacks.
//!
//! The file has to outlive the request handler because the response body
//! reads it incrementally, so cleanup hangs off the stream's own end events
//! instead of a scope guard around the handler.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Why a stream ended without reaching EOF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    /// Reading the file failed.
    Read(String),
    /// The consumer dropped the stream early, e.g. a client disconnect.
    Abandoned,
}

type CompleteHook = Box<dyn FnOnce() + Send>;
type ErrorHook = Box<dyn FnOnce(StreamFailure) + Send>;

pub struct ArtifactStream {
    inner: Option<ReaderStream<File>>,
    path: PathBuf,
    size: u64,
    on_complete: Option<CompleteHook>,
    on_error: Option<ErrorHook>,
}

impl ArtifactStream {
    /// Opens `path` for sequential reading.
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            inner: Some(ReaderStream::new(file)),
            path: path.to_path_buf(),
            size,
            on_complete: None,
            on_error: None,
        })
    }

    /// Runs once the last byte has been yielded.
    pub fn on_complete(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }

    /// Runs once if reading fails or the stream is dropped before EOF.
    pub fn on_error(mut self, hook: impl FnOnce(StreamFailure) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    // The file handle is closed before either hook runs so the hooks can
    // delete it.
    fn complete(&mut self) {
        self.inner = None;
        self.on_error = None;
        if let Some(hook) = self.on_complete.take() {
            hook();
        }
    }

    fn fail(&mut self, failure: StreamFailure) {
        self.inner = None;
        self.on_complete = None;
        if let Some(hook) = self.on_error.take() {
            hook(failure);
        }
    }
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(err))) => {
                this.fail(StreamFailure::Read(err.to_string()));
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ArtifactStream {
    fn drop(&mut self) {
        if self.on_complete.is_some() || self.on_error.is_some() {
            self.fail(StreamFailure::Abandoned);
        }
    }
}

impl fmt::Debug for ArtifactStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStream")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("finished", &self.inner.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::{fs, sync::Arc};
    use parking_lot::Mutex;
    use tempfile::tempdir;

    type Events = Arc<Mutex<Vec<String>>>;

    fn tracked(stream: ArtifactStream, events: &Events) -> ArtifactStream {
        let on_done = events.clone();
        let on_fail = events.clone();
        stream
            .on_complete(move || on_done.lock().push("complete".into()))
            .on_error(move |failure| on_fail.lock().push(format!("{failure:?}")))
    }

    #[tokio::test]
    async fn full_read_yields_bytes_then_fires_complete_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, vec![1u8; 100_000]).unwrap();
        let events = Events::default();

        let stream = tracked(ArtifactStream::open(&path).await.unwrap(), &events);
        assert_eq!(stream.size(), 100_000);
        let chunks: Vec<_> = stream.collect().await;
        let total: usize = chunks.into_iter().map(|chunk| chunk.unwrap().len()).sum();

        assert_eq!(total, 100_000);
        assert_eq!(*events.lock(), vec!["complete".to_string()]);
    }

    #[tokio::test]
    async fn complete_hook_can_delete_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, b"bytes").unwrap();
        let target = path.clone();

        let stream = ArtifactStream::open(&path)
            .await
            .unwrap()
            .on_complete(move || fs::remove_file(&target).unwrap());
        let _: Vec<_> = stream.collect().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dropping_early_fires_error_hook() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, vec![0u8; 200_000]).unwrap();
        let events = Events::default();

        let mut stream = tracked(ArtifactStream::open(&path).await.unwrap(), &events);
        assert!(stream.next().await.is_some());
        drop(stream);

        assert_eq!(*events.lock(), vec!["Abandoned".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_failure_fires_error_hook_once() {
        let dir = tempdir().unwrap();
        let events = Events::default();

        // Opening a directory succeeds on unix; reading it does not.
        let mut stream = tracked(ArtifactStream::open(dir.path()).await.unwrap(), &events);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        drop(stream);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("Read("));
    }

    #[tokio::test]
    async fn stream_without_hooks_drops_quietly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, b"x").unwrap();
        drop(ArtifactStream::open(&path).await.unwrap());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn opening_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(ArtifactStream::open(&dir.path().join("none")).await.is_err());
    }
}
