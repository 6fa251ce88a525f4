#![forbid(unsafe_code)]

//! Failures the orchestrator reports to its callers.

use std::{io, time::Duration};

use thiserror::Error;

/// Coarse class of a [`DownloadError`]; each maps to one caller-facing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or the upstream has no usable media for it.
    Validation,
    /// Upstream refused or stalled; retrying later may help.
    UpstreamUnavailable,
    /// Upstream wants a logged-in session.
    AuthRequired,
    /// Local fault or an unrecognized failure.
    Internal,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid video URL: {0}")]
    InvalidUrl(String),

    #[error("video unavailable or private")]
    Unavailable,

    #[error("unsupported or invalid video URL")]
    UnsupportedUrl,

    #[error("video not found (404)")]
    NotFound,

    #[error("downloaded artifact invalid: the source returned no usable media")]
    EmptyArtifact,

    #[error(
        "the source requires authentication for this video; {}",
        auth_hint(.cookie_browser.as_deref())
    )]
    AuthRequired { cookie_browser: Option<String> },

    #[error("the source is blocking requests from this server; try again later")]
    UpstreamBlocked,

    #[error("retrieval did not finish within {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("could not start the retrieval tool: {0}")]
    Spawn(#[source] io::Error),

    #[error("download failed: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_)
            | Self::Unavailable
            | Self::UnsupportedUrl
            | Self::NotFound
            | Self::EmptyArtifact => ErrorKind::Validation,
            Self::UpstreamBlocked | Self::TimedOut(_) => ErrorKind::UpstreamUnavailable,
            Self::AuthRequired { .. } => ErrorKind::AuthRequired,
            Self::Spawn(_) | Self::Internal(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

fn auth_hint(cookie_browser: Option<&str>) -> String {
    match cookie_browser {
        Some(browser) => format!(
            "log in to the site in {browser} (YTDLP_COOKIES_BROWSER) on the server, then retry; \
             if it keeps failing, close the browser so its cookie store is readable"
        ),
        None => "set YTDLP_COOKIES_BROWSER to a browser that is logged in to the site, then retry"
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_variants() {
        assert_eq!(DownloadError::Unavailable.kind(), ErrorKind::Validation);
        assert_eq!(DownloadError::EmptyArtifact.kind(), ErrorKind::Validation);
        assert_eq!(
            DownloadError::TimedOut(Duration::from_secs(1)).kind(),
            ErrorKind::UpstreamUnavailable
        );
        assert_eq!(
            DownloadError::AuthRequired {
                cookie_browser: None
            }
            .kind(),
            ErrorKind::AuthRequired
        );
        assert_eq!(
            DownloadError::Internal("x".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn auth_message_always_hints_at_cookies() {
        let configured = DownloadError::AuthRequired {
            cookie_browser: Some("firefox".into()),
        }
        .to_string();
        assert!(configured.contains("firefox"));
        assert!(configured.contains("YTDLP_COOKIES_BROWSER"));

        let missing = DownloadError::AuthRequired {
            cookie_browser: None,
        }
        .to_string();
        assert!(missing.contains("YTDLP_COOKIES_BROWSER"));
    }

    #[test]
    fn unavailable_message_mentions_unavailable() {
        assert!(DownloadError::Unavailable.to_string().contains("unavailable"));
    }
}
