//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use apalis_cron::Schedule;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::*;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pressroom";
const ENV_PREFIX: &str = "PRESSROOM";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_LAUNCH_TIMEOUT_SECS: u64 = 20;
const DEFAULT_PREVIEW_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FINAL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_CACHE_TENANT_QUOTA_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_CACHE_EVICTION_FRACTION: f64 = 0.25;
const DEFAULT_JOB_PREVIEW_CONCURRENCY: u32 = 4;
const DEFAULT_JOB_FINAL_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_PRODUCTION_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_RENDER_3D_CONCURRENCY: u32 = 1;
const DEFAULT_JOB_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_JOB_BACKOFF_BASE_MS: u64 = 2_000;
const DEFAULT_JOB_MAX_PENDING: u32 = 10_000;
const DEFAULT_JOB_ATTEMPT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_JOB_SWEEP_CRON: &str = "0 */15 * * * *";
const DEFAULT_JOB_COMPLETED_RETENTION_HOURS: u64 = 24;
const DEFAULT_JOB_FAILED_RETENTION_HOURS: u64 = 7 * 24;
const DEFAULT_BLOB_ROOT: &str = "data/blobs";
const DEFAULT_PROJECTS_ROOT: &str = "data/projects";
const DEFAULT_PRODUCTION_PAGE_CONCURRENCY: u32 = 4;
const DEFAULT_PRODUCTION_SLA_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub cache: CacheSettings,
    pub jobs: JobsSettings,
    pub storage: StorageSettings,
    pub projects: ProjectsSettings,
    pub production: ProductionSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
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
pub struct RenderSettings {
    /// `None` lets the browser launcher search the usual install locations.
    pub chrome_executable: Option<PathBuf>,
    pub no_sandbox: bool,
    pub user_data_dir: Option<PathBuf>,
    pub launch_timeout: Duration,
    pub preview_timeout: Duration,
    pub final_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub tenant_quota_bytes: u64,
    pub eviction_fraction: f64,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub preview_concurrency: NonZeroU32,
    pub final_concurrency: NonZeroU32,
    pub production_concurrency: NonZeroU32,
    pub render_3d_concurrency: NonZeroU32,
    pub max_attempts: NonZeroU32,
    pub backoff_base: Duration,
    pub max_pending: NonZeroU32,
    pub attempt_timeout: Duration,
    pub sweep_schedule: Schedule,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub blob_root: PathBuf,
    /// Prefix of the URLs handed out for stored blobs, without trailing slash.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct ProjectsSettings {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProductionSettings {
    pub font_dir: Option<PathBuf>,
    pub page_concurrency: NonZeroU32,
    pub sla: Duration,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Preview(args)) => raw.apply_render_overrides(&args.render),
        Some(Command::Compose(args)) => {
            raw.apply_render_overrides(&args.render);
            if let Some(dir) = args.font_dir.as_ref() {
                raw.production.font_dir = Some(dir.clone());
            }
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    cache: RawCacheSettings,
    jobs: RawJobsSettings,
    storage: RawStorageSettings,
    projects: RawProjectsSettings,
    production: RawProductionSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_render_overrides(&overrides.render);
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
        if let Some(root) = overrides.storage_root.as_ref() {
            self.storage.blob_root = Some(root.clone());
        }
        if let Some(url) = overrides.storage_public_base_url.as_ref() {
            self.storage.public_base_url = Some(url.clone());
        }
        if let Some(root) = overrides.projects_root.as_ref() {
            self.projects.root = Some(root.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(value) = overrides.jobs_preview_concurrency {
            self.jobs.preview_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_final_concurrency {
            self.jobs.final_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_production_concurrency {
            self.jobs.production_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_render_3d_concurrency {
            self.jobs.render_3d_concurrency = Some(value);
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.chrome_executable.as_ref() {
            self.render.chrome_executable = Some(path.clone());
        }
        if let Some(no_sandbox) = overrides.no_sandbox {
            self.render.no_sandbox = Some(no_sandbox);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
            cache,
            jobs,
            storage,
            projects,
            production,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            cache: build_cache_settings(cache)?,
            jobs: build_jobs_settings(jobs)?,
            storage: build_storage_settings(storage)?,
            projects: build_projects_settings(projects)?,
            production: build_production_settings(production)?,
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
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_shutdown = positive_secs(
        server.graceful_shutdown_seconds,
        DEFAULT_GRACEFUL_SHUTDOWN_SECS,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
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

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let chrome_executable = render.chrome_executable.filter(|path| !path.as_os_str().is_empty());
    let user_data_dir = render.user_data_dir.filter(|path| !path.as_os_str().is_empty());

    Ok(RenderSettings {
        chrome_executable,
        no_sandbox: render.no_sandbox.unwrap_or(false),
        user_data_dir,
        launch_timeout: positive_secs(
            render.launch_timeout_seconds,
            DEFAULT_LAUNCH_TIMEOUT_SECS,
            "render.launch_timeout_seconds",
        )?,
        preview_timeout: positive_secs(
            render.preview_timeout_seconds,
            DEFAULT_PREVIEW_TIMEOUT_SECS,
            "render.preview_timeout_seconds",
        )?,
        final_timeout: positive_secs(
            render.final_timeout_seconds,
            DEFAULT_FINAL_TIMEOUT_SECS,
            "render.final_timeout_seconds",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl = positive_secs(cache.ttl_seconds, DEFAULT_CACHE_TTL_SECS, "cache.ttl_seconds")?;

    let quota = cache
        .tenant_quota_bytes
        .unwrap_or(DEFAULT_CACHE_TENANT_QUOTA_BYTES);
    let tenant_quota_bytes = NonZeroU64::new(quota)
        .ok_or_else(|| LoadError::invalid("cache.tenant_quota_bytes", "must be greater than zero"))?
        .get();

    let eviction_fraction = cache
        .eviction_fraction
        .unwrap_or(DEFAULT_CACHE_EVICTION_FRACTION);
    if !(eviction_fraction > 0.0 && eviction_fraction <= 1.0) {
        return Err(LoadError::invalid(
            "cache.eviction_fraction",
            "must be within (0, 1]",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl,
        tenant_quota_bytes,
        eviction_fraction,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let preview = jobs
        .preview_concurrency
        .unwrap_or(DEFAULT_JOB_PREVIEW_CONCURRENCY);
    let final_render = jobs
        .final_concurrency
        .unwrap_or(DEFAULT_JOB_FINAL_CONCURRENCY);
    let production = jobs
        .production_concurrency
        .unwrap_or(DEFAULT_JOB_PRODUCTION_CONCURRENCY);
    let render_3d = jobs
        .render_3d_concurrency
        .unwrap_or(DEFAULT_JOB_RENDER_3D_CONCURRENCY);
    let max_attempts = jobs.max_attempts.unwrap_or(DEFAULT_JOB_MAX_ATTEMPTS);
    let max_pending = jobs.max_pending.unwrap_or(DEFAULT_JOB_MAX_PENDING);

    let backoff_ms = jobs.backoff_base_ms.unwrap_or(DEFAULT_JOB_BACKOFF_BASE_MS);
    let backoff_base = Duration::from_millis(backoff_ms);

    let expression = jobs
        .sweep_cron
        .unwrap_or_else(|| DEFAULT_JOB_SWEEP_CRON.to_string());
    let sweep_schedule = Schedule::from_str(expression.trim()).map_err(|err| {
        LoadError::invalid("jobs.sweep_cron", format!("invalid cron `{expression}`: {err}"))
    })?;

    Ok(JobsSettings {
        preview_concurrency: non_zero_u32(preview.into(), "jobs.preview_concurrency")?,
        final_concurrency: non_zero_u32(final_render.into(), "jobs.final_concurrency")?,
        production_concurrency: non_zero_u32(production.into(), "jobs.production_concurrency")?,
        render_3d_concurrency: non_zero_u32(render_3d.into(), "jobs.render_3d_concurrency")?,
        max_attempts: non_zero_u32(max_attempts.into(), "jobs.max_attempts")?,
        backoff_base,
        max_pending: non_zero_u32(max_pending.into(), "jobs.max_pending")?,
        attempt_timeout: positive_secs(
            jobs.attempt_timeout_seconds,
            DEFAULT_JOB_ATTEMPT_TIMEOUT_SECS,
            "jobs.attempt_timeout_seconds",
        )?,
        sweep_schedule,
        completed_retention: hours(
            jobs.completed_retention_hours,
            DEFAULT_JOB_COMPLETED_RETENTION_HOURS,
        ),
        failed_retention: hours(
            jobs.failed_retention_hours,
            DEFAULT_JOB_FAILED_RETENTION_HOURS,
        ),
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let blob_root = storage
        .blob_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOB_ROOT));
    if blob_root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.blob_root",
            "path must not be empty",
        ));
    }

    let public_base_url = match storage.public_base_url {
        Some(url) => url.trim().trim_end_matches('/').to_string(),
        None => "/blobs".to_string(),
    };
    if public_base_url.is_empty() {
        return Err(LoadError::invalid(
            "storage.public_base_url",
            "must not be empty",
        ));
    }

    Ok(StorageSettings {
        blob_root,
        public_base_url,
    })
}

fn build_projects_settings(projects: RawProjectsSettings) -> Result<ProjectsSettings, LoadError> {
    let root = projects
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROJECTS_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("projects.root", "path must not be empty"));
    }
    Ok(ProjectsSettings { root })
}

fn build_production_settings(
    production: RawProductionSettings,
) -> Result<ProductionSettings, LoadError> {
    let page_concurrency = production
        .page_concurrency
        .unwrap_or(DEFAULT_PRODUCTION_PAGE_CONCURRENCY);

    Ok(ProductionSettings {
        font_dir: production.font_dir.filter(|path| !path.as_os_str().is_empty()),
        page_concurrency: non_zero_u32(page_concurrency.into(), "production.page_concurrency")?,
        sla: positive_secs(
            production.sla_seconds,
            DEFAULT_PRODUCTION_SLA_SECS,
            "production.sla_seconds",
        )?,
    })
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
struct RawRenderSettings {
    chrome_executable: Option<PathBuf>,
    no_sandbox: Option<bool>,
    user_data_dir: Option<PathBuf>,
    launch_timeout_seconds: Option<u64>,
    preview_timeout_seconds: Option<u64>,
    final_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    tenant_quota_bytes: Option<u64>,
    eviction_fraction: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    preview_concurrency: Option<u32>,
    final_concurrency: Option<u32>,
    production_concurrency: Option<u32>,
    render_3d_concurrency: Option<u32>,
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    max_pending: Option<u32>,
    attempt_timeout_seconds: Option<u64>,
    sweep_cron: Option<String>,
    completed_retention_hours: Option<u64>,
    failed_retention_hours: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    blob_root: Option<PathBuf>,
    public_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProjectsSettings {
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProductionSettings {
    font_dir: Option<PathBuf>,
    page_concurrency: Option<u32>,
    sla_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_secs(value: Option<u64>, default: u64, key: &'static str) -> Result<Duration, LoadError> {
    let secs = value.unwrap_or(default);
    if secs == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn hours(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default).saturating_mul(60 * 60))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
