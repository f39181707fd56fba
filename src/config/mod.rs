//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::config::{
    DEFAULT_FRESHNESS_WINDOW_MS, DEFAULT_GENERATION, DEFAULT_REVALIDATE_INTERVAL_MS,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "dispensa";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORE_DIR: &str = "cache";

/// Assets installed into every new generation when none are configured.
const DEFAULT_CRITICAL_ASSETS: &[&str] = &[
    "/dist/hero-critical.iife.js",
    "/dist/app.iife.js",
    "https://unpkg.com/gsap@3.12.2/dist/gsap.min.js",
    "https://cdnjs.cloudflare.com/ajax/libs/splide/4.1.4/js/splide.min.js",
];

/// Hosting-platform asset patterns cached on first request.
const DEFAULT_PLATFORM_PATTERNS: &[&str] = &[
    r".*\.webflow\.css$",
    r".*\.webflow\.js$",
    r".*webflow.*\.js$",
    r".*webflow.*\.css$",
];

/// Command-line arguments for the Dispensa binary.
#[derive(Debug, Parser)]
#[command(name = "dispensa", version, about = "Dispensa caching proxy")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "DISPENSA_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching proxy.
    Serve(Box<ServeArgs>),
    /// Install and activate a generation, then exit.
    #[command(name = "install")]
    Install(InstallArgs),
    /// Run one revalidation pass against the current generation, then exit.
    #[command(name = "revalidate")]
    Revalidate(RevalidateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct InstallArgs {
    #[command(flatten)]
    pub overrides: CacheOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RevalidateArgs {
    #[command(flatten)]
    pub overrides: CacheOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the upstream origin base URL.
    #[arg(long = "upstream-origin", value_name = "URL")]
    pub upstream_origin: Option<String>,

    /// Override the generation name to install into and serve from.
    #[arg(long = "cache-generation", value_name = "NAME")]
    pub cache_generation: Option<String>,

    /// Override the on-disk cache store directory.
    #[arg(long = "cache-store-dir", value_name = "PATH")]
    pub cache_store_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the freshness window in milliseconds.
    #[arg(long = "cache-freshness-window-ms", value_name = "MILLIS")]
    pub cache_freshness_window_ms: Option<u64>,

    /// Override the background revalidation interval in milliseconds.
    #[arg(long = "cache-revalidate-interval-ms", value_name = "MILLIS")]
    pub cache_revalidate_interval_ms: Option<u64>,

    /// Hold activation of a freshly installed generation until skip-waiting
    /// is requested.
    #[arg(
        long = "cache-hold-activation",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_hold_activation: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub origin: Url,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub generation: String,
    pub store_dir: PathBuf,
    pub freshness_window_ms: NonZeroU64,
    /// Absolute URLs; relative configured entries are resolved against the
    /// upstream origin at load time.
    pub critical_assets: Vec<String>,
    pub platform_patterns: Vec<String>,
    /// Assets the background pass refreshes. Defaults to the critical set.
    pub revalidation_assets: Vec<String>,
    pub revalidate_interval_ms: NonZeroU64,
    pub hold_activation: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("DISPENSA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Install(args)) => raw.apply_cache_overrides(&args.overrides),
        Some(Command::Revalidate(args)) => raw.apply_cache_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(window) = overrides.cache_freshness_window_ms {
            self.cache.freshness_window_ms = Some(window);
        }
        if let Some(interval) = overrides.cache_revalidate_interval_ms {
            self.cache.revalidate_interval_ms = Some(interval);
        }
        if let Some(hold) = overrides.cache_hold_activation {
            self.cache.hold_activation = Some(hold);
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(origin) = overrides.upstream_origin.as_ref() {
            self.upstream.origin = Some(origin.clone());
        }
        if let Some(generation) = overrides.cache_generation.as_ref() {
            self.cache.generation = Some(generation.clone());
        }
        if let Some(dir) = overrides.cache_store_dir.as_ref() {
            self.cache.store_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            cache,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let upstream = build_upstream_settings(upstream)?;
        let cache = build_cache_settings(cache, &upstream.origin)?;

        Ok(Self {
            server,
            logging,
            upstream,
            cache,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let listen = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.listen", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        listen,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let raw = upstream
        .origin
        .ok_or_else(|| LoadError::invalid("upstream.origin", "origin base URL is required"))?;

    let origin = Url::parse(raw.trim())
        .map_err(|err| LoadError::invalid("upstream.origin", format!("invalid URL: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "upstream.origin",
            "origin must use http or https",
        ));
    }
    if origin.host_str().is_none() {
        return Err(LoadError::invalid(
            "upstream.origin",
            "origin must include a host",
        ));
    }

    Ok(UpstreamSettings { origin })
}

fn build_cache_settings(cache: RawCacheSettings, origin: &Url) -> Result<CacheSettings, LoadError> {
    let generation = cache
        .generation
        .unwrap_or_else(|| DEFAULT_GENERATION.to_string());
    if generation.is_empty()
        || generation == "."
        || generation == ".."
        || generation.contains('/')
        || generation.contains('\\')
    {
        return Err(LoadError::invalid(
            "cache.generation",
            format!("`{generation}` is not a valid generation name"),
        ));
    }

    let store_dir = cache
        .store_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    if store_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.store_dir",
            "path must not be empty",
        ));
    }

    let freshness_window_ms = non_zero_u64(
        cache
            .freshness_window_ms
            .unwrap_or(DEFAULT_FRESHNESS_WINDOW_MS),
        "cache.freshness_window_ms",
    )?;
    let revalidate_interval_ms = non_zero_u64(
        cache
            .revalidate_interval_ms
            .unwrap_or(DEFAULT_REVALIDATE_INTERVAL_MS),
        "cache.revalidate_interval_ms",
    )?;

    let configured_critical = cache.critical_assets.unwrap_or_else(|| {
        DEFAULT_CRITICAL_ASSETS
            .iter()
            .map(|s| s.to_string())
            .collect()
    });
    let critical_assets = resolve_assets(configured_critical, origin, "cache.critical_assets")?;

    let platform_patterns = cache.platform_patterns.unwrap_or_else(|| {
        DEFAULT_PLATFORM_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .collect()
    });

    let revalidation_assets = match cache.revalidation_assets {
        Some(assets) => resolve_assets(assets, origin, "cache.revalidation_assets")?,
        None => critical_assets.clone(),
    };

    Ok(CacheSettings {
        generation,
        store_dir,
        freshness_window_ms,
        critical_assets,
        platform_patterns,
        revalidation_assets,
        revalidate_interval_ms,
        hold_activation: cache.hold_activation.unwrap_or(false),
    })
}

/// Resolve configured asset entries to absolute URLs. Entries starting with
/// `/` are joined onto the upstream origin; everything else must already be
/// an absolute URL.
fn resolve_assets(
    entries: Vec<String>,
    origin: &Url,
    key: &'static str,
) -> Result<Vec<String>, LoadError> {
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.starts_with('/') {
            let url = origin.join(&entry).map_err(|err| {
                LoadError::invalid(key, format!("cannot resolve `{entry}` against origin: {err}"))
            })?;
            resolved.push(url.to_string());
        } else {
            Url::parse(&entry)
                .map_err(|err| LoadError::invalid(key, format!("invalid URL `{entry}`: {err}")))?;
            resolved.push(entry);
        }
    }
    Ok(resolved)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    generation: Option<String>,
    store_dir: Option<PathBuf>,
    freshness_window_ms: Option<u64>,
    critical_assets: Option<Vec<String>>,
    platform_patterns: Option<Vec<String>>,
    revalidation_assets: Option<Vec<String>>,
    revalidate_interval_ms: Option<u64>,
    hold_activation: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
