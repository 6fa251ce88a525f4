#![forbid(unsafe_code)]

//! Argument vectors handed to yt-dlp.
//!
//! Both invocations share the cookie source and the desktop user-agent. The
//! upstream platforms flag bare yt-dlp traffic as a bot far more often than a
//! request that looks like a logged-in browser session.

use std::path::Path;

/// Desktop Chrome user-agent sent with every invocation.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Prefers a single-file MP4, falling back to whatever is best.
pub const VIDEO_FORMAT: &str = "best[ext=mp4]/best";

/// Browser (and optional profile) yt-dlp reads cookies from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSource {
    pub browser: String,
    pub profile: Option<String>,
}

impl CookieSource {
    /// Renders yt-dlp's `BROWSER[:PROFILE]` syntax.
    pub fn as_arg(&self) -> String {
        match self.profile.as_deref() {
            Some(profile) => format!("{}:{}", self.browser, profile),
            None => self.browser.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Invocation {
    cookies: Option<CookieSource>,
}

impl Invocation {
    pub fn new(cookies: Option<CookieSource>) -> Self {
        Self { cookies }
    }

    pub fn cookies(&self) -> Option<&CookieSource> {
        self.cookies.as_ref()
    }

    /// Full download into `<template>` (yt-dlp may still add an extension).
    pub fn video_args(&self, output_template: &Path, url: &str) -> Vec<String> {
        let mut args = vec![
            "--output".to_string(),
            escape_template(output_template),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--format".to_string(),
            VIDEO_FORMAT.to_string(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
        ];
        self.push_client_args(&mut args);
        args.push(url.to_string());
        args
    }

    /// Metadata-only run that writes `<template>.info.json` including the
    /// comment thread.
    pub fn metadata_args(&self, output_template: &Path, url: &str) -> Vec<String> {
        let mut args = vec![
            "--output".to_string(),
            escape_template(output_template),
            "--write-info-json".to_string(),
            "--write-comments".to_string(),
            "--skip-download".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
        ];
        self.push_client_args(&mut args);
        args.push(url.to_string());
        args
    }

    fn push_client_args(&self, args: &mut Vec<String>) {
        if let Some(cookies) = &self.cookies {
            args.push("--cookies-from-browser".to_string());
            args.push(cookies.as_arg());
        }
        args.push("--user-agent".to_string());
        args.push(USER_AGENT.to_string());
    }
}

/// yt-dlp treats `%` in `--output` as the start of a field reference.
fn escape_template(path: &Path) -> String {
    path.to_string_lossy().replace('%', "%%")
}
