use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_FILE: &str = "server_proxypool.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Proxy pool service with trading-calendar-aware scheduling", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PROXYPOOL_PORT", help = "Port to listen on.")]
    pub port: Option<u16>,

    #[clap(long, env = "PROXYPOOL_HOST", help = "Address to bind.")]
    pub host: Option<String>,

    #[clap(long, env = "PROXYPOOL_API_PREFIX", help = "Prefix all routes are nested under.")]
    pub api_prefix: Option<String>,

    #[clap(long, env = "PROXYPOOL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PROXYPOOL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "PROXYPOOL_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "PROXYPOOL_MARKETS", help = "Comma separated markets to schedule, e.g. cn,hk,us.")]
    pub markets: Option<String>,

    #[clap(long, env = "PROXYPOOL_SCHEDULER_ENABLED", help = "Run the market scheduler.")]
    pub scheduler_enabled: Option<bool>,

    #[clap(long, env = "PROXYPOOL_SCHEDULER_INTERVAL_SECONDS", help = "Seconds between scheduler ticks.")]
    pub scheduler_interval_seconds: Option<u64>,

    #[clap(long, env = "PROXYPOOL_MONITOR_INTERVAL_SECONDS", help = "Seconds between health checks.")]
    pub monitor_interval_seconds: Option<u64>,

    #[clap(long, env = "PROXYPOOL_CALENDAR_PATH", help = "JSON trading calendar file.")]
    pub calendar_path: Option<PathBuf>,

    #[clap(long, env = "PROXYPOOL_CALENDAR_FAIL_OPEN", help = "Assume a normal trading day when the calendar cannot answer.")]
    pub calendar_fail_open: Option<bool>,

    #[clap(long, env = "PROXYPOOL_DATABASE_URL", help = "PostgreSQL URL for pool configs; in-memory when absent.")]
    pub database_url: Option<String>,

    #[clap(long, env = "PROXYPOOL_DEFAULT_HAILIANG_URL", help = "Vendor URL seeded into newly created pool configs.")]
    pub default_hailiang_url: Option<String>,

    #[clap(long, env = "PROXYPOOL_SWEEP_INTERVAL_SECONDS", help = "Seconds between pool maintenance passes.")]
    pub sweep_interval_seconds: Option<u64>,

    #[clap(long, env = "PROXYPOOL_HEALTH_CHECK_ENABLED", help = "Check pooled proxies against an IP-echo endpoint.")]
    pub health_check_enabled: Option<bool>,

    #[clap(long, env = "PROXYPOOL_HEALTH_CHECK_INTERVAL_SECONDS", help = "Seconds between proxy health checks.")]
    pub health_check_interval_seconds: Option<u64>,

    #[clap(long, env = "PROXYPOOL_HEALTH_CHECK_URL", help = "IP-echo endpoint requested through each proxy.")]
    pub health_check_url: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            host: other.host.or(self.host),
            api_prefix: other.api_prefix.or(self.api_prefix),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            markets: other.markets.or(self.markets),
            scheduler_enabled: other.scheduler_enabled.or(self.scheduler_enabled),
            scheduler_interval_seconds: other.scheduler_interval_seconds.or(self.scheduler_interval_seconds),
            monitor_interval_seconds: other.monitor_interval_seconds.or(self.monitor_interval_seconds),
            calendar_path: other.calendar_path.or(self.calendar_path),
            calendar_fail_open: other.calendar_fail_open.or(self.calendar_fail_open),
            database_url: other.database_url.or(self.database_url),
            default_hailiang_url: other.default_hailiang_url.or(self.default_hailiang_url),
            sweep_interval_seconds: other.sweep_interval_seconds.or(self.sweep_interval_seconds),
            health_check_enabled: other.health_check_enabled.or(self.health_check_enabled),
            health_check_interval_seconds: other.health_check_interval_seconds.or(self.health_check_interval_seconds),
            health_check_url: other.health_check_url.or(self.health_check_url),
        }
    }

    pub fn defaults() -> Config {
        Config {
            port: Some(8080),
            host: Some("0.0.0.0".to_string()),
            api_prefix: Some("/api/v1".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            markets: Some("cn,hk,us".to_string()),
            scheduler_enabled: Some(true),
            scheduler_interval_seconds: Some(60),
            monitor_interval_seconds: Some(60),
            calendar_fail_open: Some(false),
            sweep_interval_seconds: Some(30),
            health_check_enabled: Some(true),
            health_check_interval_seconds: Some(300),
            ..Default::default()
        }
    }

    /// Prefix with a leading slash and no trailing one; empty means no prefix.
    pub fn normalized_prefix(&self) -> String {
        let raw = self.api_prefix.as_deref().unwrap_or("").trim().trim_end_matches('/');
        if raw.is_empty() {
            String::new()
        } else if raw.starts_with('/') {
            raw.to_string()
        } else {
            format!("/{raw}")
        }
    }
}

fn read_file_config(path: &Path) -> Option<Config> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<Config>(&raw) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Config file lookup: explicit path, else `server_proxypool.conf` in the working
/// directory, else the same name under the user config directory.
fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("proxypool").join(DEFAULT_CONFIG_FILE))
        .filter(|p| p.exists())
}

/// Layers defaults, the JSON config file and CLI/env (`cli`), later layers winning.
pub fn resolve_config(cli: Config) -> Config {
    let mut current = Config::defaults();

    match locate_config_file(cli.config_path.as_deref()) {
        Some(path) if path.exists() => {
            if let Some(file_config) = read_file_config(&path) {
                info!("Loaded config file {}", path.display());
                current = current.merge(file_config);
            }
        }
        Some(path) => info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display()),
        None => info!("No config file found. Using defaults and environment/CLI variables."),
    }

    current.merge(cli)
}

/// `.env` first, then the layered config from the real command line.
pub fn load_config() -> Config {
    let _ = dotenvy::dotenv();
    resolve_config(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_sources() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.conf");
        let cli = Config::try_parse_from(["server_proxypool", "--config-path", missing.to_str().unwrap()]).unwrap();
        let cfg = resolve_config(cli);
        assert_eq!(cfg.port, Some(8080));
        assert_eq!(cfg.api_prefix.as_deref(), Some("/api/v1"));
        assert_eq!(cfg.markets.as_deref(), Some("cn,hk,us"));
        assert_eq!(cfg.sweep_interval_seconds, Some(30));
        assert_eq!(cfg.health_check_enabled, Some(true));
        assert_eq!(cfg.health_check_interval_seconds, Some(300));
        assert_eq!(cfg.database_url, None);
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_proxypool.conf");
        fs::write(
            &path,
            r#"{"port": 9000, "markets": "hk", "calendarFailOpen": true, "logLevel": "debug", "healthCheckEnabled": false}"#,
        )
        .unwrap();

        let cli = Config::try_parse_from([
            "server_proxypool",
            "--config-path",
            path.to_str().unwrap(),
            "--port",
            "9100",
        ])
        .unwrap();
        let cfg = resolve_config(cli);
        assert_eq!(cfg.port, Some(9100));
        assert_eq!(cfg.markets.as_deref(), Some("hk"));
        assert_eq!(cfg.calendar_fail_open, Some(true));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cfg.health_check_enabled, Some(false));
    }

    #[test]
    fn broken_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "{ not json").unwrap();
        let cli = Config::try_parse_from(["server_proxypool", "--config-path", path.to_str().unwrap()]).unwrap();
        assert_eq!(resolve_config(cli).port, Some(8080));
    }

    #[test]
    fn prefix_is_normalized() {
        let mut cfg = Config::defaults();
        assert_eq!(cfg.normalized_prefix(), "/api/v1");
        cfg.api_prefix = Some("api/v2/".into());
        assert_eq!(cfg.normalized_prefix(), "/api/v2");
        cfg.api_prefix = Some("/".into());
        assert_eq!(cfg.normalized_prefix(), "");
    }
}
