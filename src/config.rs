#![forbid(unsafe_code)]

//! Runtime settings shared by the reelfetch binaries.
//!
//! Values are layered: explicit overrides (CLI flags) win over the process
//! environment, which wins over the `.env` file, which wins over defaults.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::invocation::CookieSource;
use crate::limiter::RateLimit;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DOWNLOADS_DIR: &str = "./tmp/downloads";
pub const DEFAULT_YTDLP_BINARY: &str = "yt-dlp";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_ALLOWED_HOSTS: &str = "tiktok.com";
pub const DEFAULT_RATE_LIMIT: &str = "5/minute";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone)]
pub struct Settings {
    pub downloads_dir: PathBuf,
    pub ytdlp_binary: PathBuf,
    pub cookies: Option<CookieSource>,
    pub process_timeout: Duration,
    pub comments_enabled: bool,
    /// Empty means any host is accepted.
    pub allowed_hosts: Vec<String>,
    pub api_keys: Vec<String>,
    pub rate_limit: RateLimit,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub downloads_dir: Option<PathBuf>,
    pub ytdlp_binary: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let downloads_dir = overrides
        .downloads_dir
        .or_else(|| lookup("DOWNLOADS_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOADS_DIR));
    let ytdlp_binary = overrides
        .ytdlp_binary
        .or_else(|| lookup("YTDLP_BINARY").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BINARY));
    let cookies = lookup("YTDLP_COOKIES_BROWSER").map(|browser| CookieSource {
        browser,
        profile: lookup("YTDLP_COOKIES_PROFILE"),
    });
    let timeout_secs = match lookup("YTDLP_TIMEOUT_SECS") {
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| anyhow!("YTDLP_TIMEOUT_SECS must be a positive integer, got {raw:?}"))?,
        None => DEFAULT_TIMEOUT_SECS,
    };
    let comments_enabled = match lookup("COMMENTS_ENABLED") {
        Some(raw) => parse_bool(&raw)
            .ok_or_else(|| anyhow!("COMMENTS_ENABLED must be true or false, got {raw:?}"))?,
        None => true,
    };
    let allowed_hosts = parse_allowed_hosts(
        &lookup("ALLOWED_HOSTS").unwrap_or_else(|| DEFAULT_ALLOWED_HOSTS.to_string()),
    );
    let api_keys = lookup("API_KEYS")
        .map(|raw| split_list(&raw))
        .unwrap_or_default();
    let rate_limit_raw = lookup("RATE_LIMIT").unwrap_or_else(|| DEFAULT_RATE_LIMIT.to_string());
    let rate_limit = rate_limit_raw
        .parse::<RateLimit>()
        .with_context(|| format!("parsing RATE_LIMIT={rate_limit_raw:?}"))?;
    let port = overrides
        .port
        .or_else(|| lookup("PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    Ok(Settings {
        downloads_dir,
        ytdlp_binary,
        cookies,
        process_timeout: Duration::from_secs(timeout_secs),
        comments_enabled,
        allowed_hosts,
        api_keys,
        rate_limit,
        host,
        port,
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_allowed_hosts(raw: &str) -> Vec<String> {
    let hosts = split_list(raw);
    if hosts.iter().any(|host| host == "*") {
        return Vec::new();
    }
    hosts
        .into_iter()
        .map(|host| host.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Blank values count as unset so `KEY=` in a `.env` file falls through to the
/// default.
fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let clean = |value: String| Some(value.trim().to_string()).filter(|value| !value.is_empty());
    env_lookup(key)
        .and_then(clean)
        .or_else(|| file_vars.get(key).cloned().and_then(clean))
}

/// Reads `KEY=value` pairs from a dotenv-style file. A missing file is an
/// empty set; comment lines, lines without `=`, and an `export ` prefix are
/// tolerated.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("reading env file {}", path.display()));
        }
    };
    Ok(content.lines().filter_map(parse_env_line).collect())
}

fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), unquote(value.trim()).to_string()))
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote)?.strip_suffix(quote))
        .unwrap_or(value)
}
