#![forbid(unsafe_code)]

//! HTTP front end: `POST /download` streams a short-form video back to the
//! caller with its comments and metadata in response headers.

use anyhow::{Context, Result, anyhow, bail};
use std::{net::IpAddr, net::SocketAddr, path::PathBuf};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reelfetch::api::{AppState, router};
use reelfetch::config::{SettingsOverrides, resolve_settings};
use reelfetch::orchestrator::Orchestrator;

#[derive(Debug, Default, PartialEq)]
struct ServerArgs {
    downloads_dir: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    env_file: Option<PathBuf>,
}

impl ServerArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
                _ => (arg.clone(), None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| anyhow!("{flag} requires a value"))
            };
            match flag.as_str() {
                "--downloads-dir" => parsed.downloads_dir = Some(PathBuf::from(value()?)),
                "--host" => parsed.host = Some(parse_host_arg(&value()?)?),
                "--port" => parsed.port = Some(parse_port_arg(&value()?)?),
                "--env-file" => parsed.env_file = Some(PathBuf::from(value()?)),
                _ => bail!("unknown argument: {arg}"),
            }
        }
        Ok(parsed)
    }

    fn into_overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            downloads_dir: self.downloads_dir,
            host: self.host,
            port: self.port,
            env_path: self.env_file,
            ..SettingsOverrides::default()
        }
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<String> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/HOST")?;
    Ok(value.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = resolve_settings(ServerArgs::parse()?.into_overrides())?;
    if settings.api_keys.is_empty() {
        bail!("API_KEYS is empty; configure at least one key before starting the server");
    }
    if settings.cookies.is_none() {
        warn!("YTDLP_COOKIES_BROWSER is not set; login-gated videos will fail");
    }

    let orchestrator = Orchestrator::from_settings(&settings);
    orchestrator
        .prepare()
        .await
        .with_context(|| format!("creating {}", settings.downloads_dir.display()))?;

    let host: IpAddr = settings
        .host
        .parse()
        .with_context(|| format!("invalid HOST value {:?}", settings.host))?;
    let addr = SocketAddr::new(host, settings.port);
    let app = router(AppState::new(
        orchestrator,
        settings.api_keys.clone(),
        settings.rate_limit,
    ));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(
        %addr,
        downloads_dir = %settings.downloads_dir.display(),
        rate_limit = %settings.rate_limit,
        comments = settings.comments_enabled,
        "server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}
