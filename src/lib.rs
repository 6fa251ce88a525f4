#![forbid(unsafe_code)]

//! Short-form video retrieval service built around `yt-dlp`.
//!
//! [`orchestrator::Orchestrator`] drives one download per request: it runs the
//! retrieval binary, finds the file it produced, collects comments on a
//! best-effort basis and hands back a stream that deletes its own artifacts
//! once it ends. [`api`] exposes that over HTTP.

pub mod api;
pub mod comments;
pub mod config;
pub mod error;
pub mod invocation;
pub mod limiter;
pub mod locator;
pub mod orchestrator;
pub mod runner;
pub mod stream;
pub mod work;

#[cfg(test)]
pub(crate) mod testing;
