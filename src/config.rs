use crate::endpoint::{EndpointError, TunnelEndpoint};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const ENV_PREFIX: &str = "SSH_TUNNEL_";

pub const DEFAULT_PROXY_HOST: &str = "localhost:8080";
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_PORT_CHECK_TIMEOUT: Duration = Duration::from_secs(4);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PID_FILE: &str = "ssh-tunnel.pid";
pub const DEFAULT_LOG_FILE: &str = "ssh-tunnel.log";
pub const DEFAULT_LOG_LEVEL: &str = "debug";
pub const DEFAULT_SSH_COMMAND: &str = "ssh";
pub const DEFAULT_SERVER_ALIVE_INTERVAL: u32 = 15;
pub const DEFAULT_CONNECT_TIMEOUT: u32 = 10;
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0:8080";
pub const DEFAULT_REMOTE_PORT: u32 = 2212;
pub const DEFAULT_MISC_OPTIONS: &str = "-N -C";
pub const DEFAULT_PROBE_URL: &str = "https://google.com";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    TomlParse(String),
    #[error("unknown config field `{0}`")]
    UnknownField(String),
    #[error("{0}")]
    IoError(String),
    #[error("remote address is required (set SSH_TUNNEL_REMOTE_ADDRESS)")]
    MissingRemoteAddress,
    #[error("invalid proxy host: {0}")]
    InvalidProxyHost(#[from] EndpointError),
    #[error("invalid remote port: {0}")]
    InvalidRemotePort(u32),
    #[error("check interval must be positive")]
    NonPositiveInterval,
    #[error("`{0}` must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("invalid duration for `{key}`: {value}")]
    InvalidDuration { key: String, value: String },
    #[error("invalid value for `{key}`: {value}")]
    InvalidValue { key: String, value: String },
    #[error("invalid misc options: {0}")]
    InvalidMiscOptions(String),
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Validated settings for one supervised tunnel.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub endpoint: TunnelEndpoint,
    pub check_interval: Duration,
    pub port_check_timeout: Duration,
    pub stop_timeout: Duration,
    pub pid_file: String,
    pub log_file: String,
    pub log_level: String,
    pub ssh_command: String,
    pub tcp_keepalive: bool,
    pub server_alive_interval: u32,
    pub connect_timeout: u32,
    pub strict_host_checking: bool,
    pub bind_host: String,
    pub remote_address: String,
    pub remote_port: u16,
    pub misc_options: Vec<String>,
    pub probe_url: String,
}

impl Config {
    /// Argument vector handed to the SSH client.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.misc_options.len() + 16);
        args.extend(self.misc_options.iter().cloned());

        if self.tcp_keepalive {
            args.extend(["-o".to_string(), "TCPKeepAlive=yes".to_string()]);
        }
        if self.server_alive_interval > 0 {
            args.extend([
                "-o".to_string(),
                format!("ServerAliveInterval={}", self.server_alive_interval),
            ]);
        }
        if self.connect_timeout > 0 {
            args.extend([
                "-o".to_string(),
                format!("ConnectTimeout={}", self.connect_timeout),
            ]);
        }
        if !self.strict_host_checking {
            args.extend(["-o".to_string(), "StrictHostKeyChecking=no".to_string()]);
        }

        args.extend([
            "-D".to_string(),
            self.bind_host.clone(),
            self.remote_address.clone(),
            "-p".to_string(),
            self.remote_port.to_string(),
        ]);
        args
    }
}

// ---------------------------------------------------------------------------
// Raw (unvalidated) layer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    host: Option<String>,
    check_interval: Option<DurationValue>,
    port_check_timeout: Option<DurationValue>,
    stop_timeout: Option<DurationValue>,
    pid_file: Option<String>,
    log_file: Option<String>,
    log_level: Option<String>,
    ssh_command: Option<String>,
    tcp_keepalive: Option<bool>,
    server_alive_interval: Option<u32>,
    connect_timeout: Option<u32>,
    strict_host_checking: Option<bool>,
    bind_host: Option<String>,
    remote_address: Option<String>,
    remote_port: Option<u32>,
    misc_options: Option<String>,
    probe_url: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, toml::Value>,
}

impl RawConfig {
    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("HOST") {
            self.host = Some(v);
        }
        if let Some(v) = var("MAIN_LOOP_SLEEP_SEC") {
            self.check_interval = Some(DurationValue::Text(v));
        }
        if let Some(v) = var("PORT_CHECK_TIMEOUT_SEC") {
            self.port_check_timeout = Some(DurationValue::Text(v));
        }
        if let Some(v) = var("STOP_TIMEOUT_SEC") {
            self.stop_timeout = Some(DurationValue::Text(v));
        }
        if let Some(v) = var("PID_FILE") {
            self.pid_file = Some(v);
        }
        if let Some(v) = var("LOG_FILE") {
            self.log_file = Some(v);
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = Some(v);
        }
        if let Some(v) = var("SSH_COMMAND") {
            self.ssh_command = Some(v);
        }
        if let Some(v) = var("TCP_KEEPALIVE") {
            self.tcp_keepalive = Some(parse_bool("TCP_KEEPALIVE", &v)?);
        }
        if let Some(v) = var("SERVER_ALIVE_INTERVAL") {
            self.server_alive_interval = Some(parse_number("SERVER_ALIVE_INTERVAL", &v)?);
        }
        if let Some(v) = var("CONNECT_TIMEOUT") {
            self.connect_timeout = Some(parse_number("CONNECT_TIMEOUT", &v)?);
        }
        if let Some(v) = var("STRICT_HOST_CHECKING") {
            self.strict_host_checking = Some(parse_bool("STRICT_HOST_CHECKING", &v)?);
        }
        if let Some(v) = var("BIND_HOST") {
            self.bind_host = Some(v);
        }
        if let Some(v) = var("REMOTE_ADDRESS") {
            self.remote_address = Some(v);
        }
        if let Some(v) = var("REMOTE_PORT") {
            self.remote_port = Some(parse_number("REMOTE_PORT", &v)?);
        }
        if let Some(v) = var("MISC_OPTIONS") {
            self.misc_options = Some(v);
        }
        if let Some(v) = var("PROBE_URL") {
            self.probe_url = Some(v);
        }
        Ok(())
    }

    fn resolve(self) -> Result<Config, ConfigError> {
        if let Some(field) = self.extra.keys().min() {
            return Err(ConfigError::UnknownField(field.clone()));
        }

        let endpoint = TunnelEndpoint::parse(self.host.as_deref().unwrap_or(DEFAULT_PROXY_HOST))?;

        let remote_address = match self.remote_address {
            Some(addr) if !addr.trim().is_empty() => addr,
            _ => return Err(ConfigError::MissingRemoteAddress),
        };

        let remote_port = self.remote_port.unwrap_or(DEFAULT_REMOTE_PORT);
        let remote_port = match u16::try_from(remote_port) {
            Ok(port) if port > 0 => port,
            _ => return Err(ConfigError::InvalidRemotePort(remote_port)),
        };

        let check_interval =
            resolve_duration("check_interval", self.check_interval, DEFAULT_CHECK_INTERVAL)?;
        if check_interval.is_zero() {
            return Err(ConfigError::NonPositiveInterval);
        }

        let port_check_timeout = resolve_duration(
            "port_check_timeout",
            self.port_check_timeout,
            DEFAULT_PORT_CHECK_TIMEOUT,
        )?;
        if port_check_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("port_check_timeout"));
        }
        let stop_timeout =
            resolve_duration("stop_timeout", self.stop_timeout, DEFAULT_STOP_TIMEOUT)?;
        if stop_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("stop_timeout"));
        }

        let misc_options = shell_words::split(
            self.misc_options.as_deref().unwrap_or(DEFAULT_MISC_OPTIONS),
        )
        .map_err(|e| ConfigError::InvalidMiscOptions(e.to_string()))?;

        Ok(Config {
            endpoint,
            check_interval,
            port_check_timeout,
            stop_timeout,
            pid_file: self.pid_file.unwrap_or_else(|| DEFAULT_PID_FILE.to_string()),
            log_file: self.log_file.unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
            log_level: self.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            ssh_command: self
                .ssh_command
                .unwrap_or_else(|| DEFAULT_SSH_COMMAND.to_string()),
            tcp_keepalive: self.tcp_keepalive.unwrap_or(true),
            server_alive_interval: self
                .server_alive_interval
                .unwrap_or(DEFAULT_SERVER_ALIVE_INTERVAL),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            strict_host_checking: self.strict_host_checking.unwrap_or(false),
            bind_host: self
                .bind_host
                .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string()),
            remote_address,
            remote_port,
            misc_options,
            probe_url: self
                .probe_url
                .unwrap_or_else(|| DEFAULT_PROBE_URL.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Defaults, then the optional TOML file, then `SSH_TUNNEL_*` variables.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let content = match path {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?,
        ),
        None => None,
    };
    resolve_config(content.as_deref(), |key| std::env::var(key).ok())
}

pub fn resolve_config<F>(file_content: Option<&str>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut raw = match file_content {
        Some(content) => {
            toml::from_str::<RawConfig>(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?
        }
        None => RawConfig::default(),
    };
    raw.apply_env(env)?;
    raw.resolve()
}

/// Accepts bare seconds (`15`) or a suffixed value (`500ms`, `15s`, `2m`, `1h`).
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "" | "s" => Some(Duration::from_secs(n)),
        "ms" => Some(Duration::from_millis(n)),
        "m" => Some(Duration::from_secs(n.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(n.checked_mul(3600)?)),
        _ => None,
    }
}

fn resolve_duration(
    key: &str,
    value: Option<DurationValue>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(DurationValue::Seconds(secs)) => Ok(Duration::from_secs(secs)),
        Some(DurationValue::Text(text)) => {
            parse_duration(&text).ok_or_else(|| ConfigError::InvalidDuration {
                key: key.to_string(),
                value: text,
            })
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" | "yes" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{key}"),
            value: value.to_string(),
        }),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{key}"),
        value: value.to_string(),
    })
}
