//! Configuration management for the catalog server.
//!
//! A TOML-load / env-override / validate-schema shape covering the
//! catalog's own config surfaces — source-set file paths, tenancy and
//! identity settings for the authorization middleware, the discovery
//! cache, and the job-queue/reconcile-loop knobs its background workers
//! need.

use catalog_core::common::duration_serde;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Top-level server configuration, loaded from a TOML file and then
/// overridden by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub sources: SourcesConfig,
    pub tenancy: TenancyConfig,
    pub authz: AuthzConfig,
    pub audit: AuditConfig,
    pub cache: CacheConfig,
    pub jobs: JobsConfig,
    pub reconcile: ReconcileConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    pub max_body_size: usize,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
}

/// Where the catalog source-set YAML documents live — loaded
/// field-by-field-merged in listed order, later files winning per source id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub paths: Vec<String>,
    /// Which `ConfigStore` backend `create_server` builds.
    pub store_mode: ConfigStoreMode,
    /// Directory watched for a Kubernetes `ConfigMap`-style mounted volume;
    /// required when `store_mode = k8s`.
    pub watch_dir: Option<String>,
}

/// `file`: in-memory store with a local revision ring, no external sync.
/// `k8s`: watches `watch_dir` for out-of-band edits to the mounted
/// `ConfigMap`. `none`: loads the source set once at startup and never
/// polls for changes (the reconcile loop is not started).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStoreMode {
    File,
    K8s,
    None,
}

/// Multi-tenancy and identity settings consumed by the `tenancy` and
/// `identity` middleware stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    pub enabled: bool,
    pub mode: TenancyMode,
    pub default_namespace: String,
    pub header: String,
    pub roles: Vec<RoleConfig>,
}

/// `single` substitutes `default_namespace` unconditionally; `namespace`
/// requires the resolved value to be in a role's namespace allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenancyMode {
    Single,
    Namespace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    pub namespaces: Vec<String>,
    pub actions: Vec<String>,
}

/// Authorization stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthzConfig {
    pub mode: AuthzMode,
    /// Kubernetes `SubjectAccessReview` endpoint, required when `mode = sar`.
    pub sar_endpoint: Option<String>,
    #[serde(with = "duration_serde")]
    pub decision_cache_ttl: Duration,
    pub decision_cache_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthzMode {
    None,
    Sar,
}

/// Audit stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    #[serde(with = "duration_serde")]
    pub retention: Duration,
    /// Whether a denied request gets its own audit row in addition to the
    /// usual allow/outcome logging.
    pub log_denied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for cached `/api/plugins` discovery responses.
    #[serde(with = "duration_serde")]
    pub discovery_ttl: Duration,
    /// TTL for cached `/api/plugins/{name}/capabilities` responses.
    #[serde(with = "duration_serde")]
    pub capabilities_ttl: Duration,
    pub max_size: usize,
}

/// Job-queue knobs backing `jobs::JobQueue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How many `run_job_worker` tasks `create_server` spawns.
    pub concurrency: usize,
    /// How long a worker may hold a claimed job before another worker may
    /// reclaim it.
    #[serde(with = "duration_serde")]
    pub lease_timeout: Duration,
    pub max_attempts: u32,
    #[serde(with = "duration_serde")]
    pub backoff_base: Duration,
    #[serde(with = "duration_serde")]
    pub backoff_max: Duration,
    /// How long an idle worker sleeps between queue polls when nothing is
    /// eligible to claim.
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
    /// How long a terminal (succeeded/failed) job is kept before eviction.
    #[serde(with = "duration_serde")]
    pub retention: Duration,
}

/// Reconcile-loop polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
    #[serde(with = "duration_serde")]
    pub provider_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("CATALOG_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port_str) = env::var("CATALOG_PORT") {
            let port: u16 = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid CATALOG_PORT: {port_str}"))?;
            if port > 0 {
                self.server.port = port;
            }
        }
        if let Ok(timeout) = env::var("CATALOG_TIMEOUT") {
            self.server.timeout = parse_duration(&timeout)?;
        }
        if let Ok(sources) = env::var("CATALOG_SOURCES") {
            self.sources.paths = sources.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(level) = env::var("CATALOG_LOG_LEVEL") {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if valid_levels.contains(&level.as_str()) {
                self.logging.level = level;
            } else {
                return Err(anyhow::anyhow!(
                    "invalid log level: {level}. use: {:?}",
                    valid_levels
                ));
            }
        }
        if let Ok(ns) = env::var("CATALOG_DEFAULT_NAMESPACE") {
            if !ns.is_empty() {
                self.tenancy.default_namespace = ns;
            }
        }

        if let Ok(mode) = env::var("CATALOG_CONFIG_STORE_MODE") {
            self.sources.store_mode = match mode.as_str() {
                "file" => ConfigStoreMode::File,
                "k8s" => ConfigStoreMode::K8s,
                "none" => ConfigStoreMode::None,
                other => return Err(anyhow::anyhow!("invalid CATALOG_CONFIG_STORE_MODE: {other}")),
            };
        }
        if let Ok(mode) = env::var("CATALOG_TENANCY_MODE") {
            self.tenancy.mode = match mode.as_str() {
                "single" => TenancyMode::Single,
                "namespace" => TenancyMode::Namespace,
                other => return Err(anyhow::anyhow!("invalid CATALOG_TENANCY_MODE: {other}")),
            };
        }
        if let Ok(mode) = env::var("CATALOG_AUTHZ_MODE") {
            self.authz.mode = match mode.as_str() {
                "none" => AuthzMode::None,
                "sar" => AuthzMode::Sar,
                other => return Err(anyhow::anyhow!("invalid CATALOG_AUTHZ_MODE: {other}")),
            };
        }

        if let Ok(v) = env::var("CATALOG_AUDIT_ENABLED") {
            self.audit.enabled = parse_bool("CATALOG_AUDIT_ENABLED", &v)?;
        }
        if let Ok(v) = env::var("CATALOG_AUDIT_RETENTION_DAYS") {
            self.audit.retention = parse_days("CATALOG_AUDIT_RETENTION_DAYS", &v)?;
        }
        if let Ok(v) = env::var("CATALOG_AUDIT_LOG_DENIED") {
            self.audit.log_denied = parse_bool("CATALOG_AUDIT_LOG_DENIED", &v)?;
        }

        if let Ok(v) = env::var("CATALOG_JOB_CONCURRENCY") {
            self.jobs.concurrency = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid CATALOG_JOB_CONCURRENCY: {v}"))?;
        }
        if let Ok(v) = env::var("CATALOG_JOB_MAX_RETRIES") {
            self.jobs.max_attempts = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid CATALOG_JOB_MAX_RETRIES: {v}"))?;
        }
        if let Ok(v) = env::var("CATALOG_JOB_POLL_INTERVAL_SECONDS") {
            let secs: u64 = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid CATALOG_JOB_POLL_INTERVAL_SECONDS: {v}"))?;
            self.jobs.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(v) = env::var("CATALOG_JOB_CLAIM_TIMEOUT_MINUTES") {
            let minutes: u64 = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid CATALOG_JOB_CLAIM_TIMEOUT_MINUTES: {v}"))?;
            self.jobs.lease_timeout = Duration::from_secs(minutes * 60);
        }
        if let Ok(v) = env::var("CATALOG_JOB_RETENTION_DAYS") {
            self.jobs.retention = parse_days("CATALOG_JOB_RETENTION_DAYS", &v)?;
        }

        if let Ok(v) = env::var("CATALOG_CACHE_ENABLED") {
            self.cache.enabled = parse_bool("CATALOG_CACHE_ENABLED", &v)?;
        }
        if let Ok(v) = env::var("CATALOG_CACHE_DISCOVERY_TTL") {
            self.cache.discovery_ttl = parse_duration(&v)?;
        }
        if let Ok(v) = env::var("CATALOG_CACHE_CAPABILITIES_TTL") {
            self.cache.capabilities_ttl = parse_duration(&v)?;
        }
        if let Ok(v) = env::var("CATALOG_CACHE_MAX_SIZE") {
            self.cache.max_size = v
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid CATALOG_CACHE_MAX_SIZE: {v}"))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port must be between 1 and 65535"));
        }
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server host cannot be empty"));
        }
        if self.server.max_body_size == 0 {
            return Err(anyhow::anyhow!("max_body_size cannot be 0"));
        }
        if self.server.cors.enabled && self.server.cors.allowed_origins.is_empty() {
            return Err(anyhow::anyhow!(
                "cors enabled but no allowed origins specified"
            ));
        }

        if self.sources.paths.is_empty() {
            return Err(anyhow::anyhow!(
                "at least one catalog source-set file must be configured"
            ));
        }

        if self.tenancy.enabled && self.tenancy.default_namespace.is_empty() {
            return Err(anyhow::anyhow!(
                "tenancy enabled but default_namespace is empty"
            ));
        }

        if self.authz.mode == AuthzMode::Sar && self.authz.sar_endpoint.is_none() {
            return Err(anyhow::anyhow!(
                "authz.mode is sar but no sar_endpoint configured"
            ));
        }
        if self.authz.decision_cache_size == 0 {
            return Err(anyhow::anyhow!("authz.decision_cache_size cannot be 0"));
        }

        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(anyhow::anyhow!("cache enabled but max_size is 0"));
        }

        if self.jobs.max_attempts == 0 {
            return Err(anyhow::anyhow!("jobs.max_attempts cannot be 0"));
        }
        if self.jobs.concurrency == 0 {
            return Err(anyhow::anyhow!("jobs.concurrency cannot be 0"));
        }
        if self.jobs.backoff_max < self.jobs.backoff_base {
            return Err(anyhow::anyhow!(
                "jobs.backoff_max cannot be smaller than jobs.backoff_base"
            ));
        }

        if self.sources.store_mode == ConfigStoreMode::K8s && self.sources.watch_dir.is_none() {
            return Err(anyhow::anyhow!(
                "sources.store_mode is k8s but no watch_dir configured"
            ));
        }

        if self.reconcile.poll_interval.as_secs() == 0 {
            return Err(anyhow::anyhow!("reconcile.poll_interval cannot be 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "invalid log level: {}. must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                timeout: Duration::from_secs(30),
                max_body_size: 4 * 1024 * 1024,
                cors: CorsConfig {
                    enabled: true,
                    allowed_origins: vec!["*".to_string()],
                    allowed_methods: vec!["GET".to_string(), "POST".to_string(), "PATCH".to_string()],
                    allowed_headers: vec!["*".to_string()],
                },
            },
            sources: SourcesConfig {
                paths: vec!["catalog-sources.yaml".to_string()],
                store_mode: ConfigStoreMode::File,
                watch_dir: None,
            },
            tenancy: TenancyConfig {
                enabled: true,
                mode: TenancyMode::Single,
                default_namespace: "default".to_string(),
                header: "x-catalog-namespace".to_string(),
                roles: vec![RoleConfig {
                    name: "viewer".to_string(),
                    namespaces: vec!["*".to_string()],
                    actions: vec!["read".to_string()],
                }],
            },
            authz: AuthzConfig {
                mode: AuthzMode::None,
                sar_endpoint: None,
                decision_cache_ttl: Duration::from_secs(10),
                decision_cache_size: 1000,
            },
            audit: AuditConfig {
                enabled: true,
                retention: Duration::from_secs(90 * 24 * 3600),
                log_denied: true,
            },
            cache: CacheConfig {
                enabled: true,
                discovery_ttl: Duration::from_secs(60),
                capabilities_ttl: Duration::from_secs(30),
                max_size: 1000,
            },
            jobs: JobsConfig {
                concurrency: 3,
                lease_timeout: Duration::from_secs(10 * 60),
                max_attempts: 3,
                backoff_base: Duration::from_secs(2),
                backoff_max: Duration::from_secs(300),
                poll_interval: Duration::from_secs(5),
                retention: Duration::from_secs(7 * 24 * 3600),
            },
            reconcile: ReconcileConfig {
                poll_interval: Duration::from_secs(30),
                provider_timeout: Duration::from_secs(30),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}

pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    duration_serde::parse_duration_string(s).map_err(|e| anyhow::anyhow!(e))
}

fn parse_bool(var: &str, s: &str) -> anyhow::Result<bool> {
    match s {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(anyhow::anyhow!("invalid {var}: {other}")),
    }
}

fn parse_days(var: &str, s: &str) -> anyhow::Result<Duration> {
    let days: u64 = s.parse().map_err(|_| anyhow::anyhow!("invalid {var}: {s}"))?;
    Ok(Duration::from_secs(days * 24 * 3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().expect("default config must validate");
    }

    #[test]
    fn rejects_empty_source_paths() {
        let mut config = Config::default();
        config.sources.paths.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_job_attempts() {
        let mut config = Config::default();
        config.jobs.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
