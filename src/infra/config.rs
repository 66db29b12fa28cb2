//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! The `[vending]` device names and wait durations are required; loading
//! fails if any is absent or zero.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    Http,
    /// Log commands without touching hardware (bench use)
    Log,
}

/// What to do with a session whose inference data never arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceTimeoutPolicy {
    /// Submit the session to the ledger with an empty delta list
    #[default]
    ProceedEmpty,
    /// Close out the session without a ledger submission
    Abort,
}

impl InferenceTimeoutPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceTimeoutPolicy::ProceedEmpty => "proceed_empty",
            InferenceTimeoutPolicy::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendingConfig {
    pub card_reader_device: Option<String>,
    pub inference_device: Option<String>,
    pub door_open_wait_ms: Option<u64>,
    pub inference_wait_ms: Option<u64>,
    pub door_close_wait_ms: Option<u64>,
    #[serde(default = "default_port_timeout_ms")]
    pub port_timeout_ms: u64,
    #[serde(default)]
    pub inference_timeout_policy: InferenceTimeoutPolicy,
    #[serde(default)]
    pub lockout_on_stuck_door: bool,
}

fn default_port_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub mode: CommandMode,
    #[serde(default)]
    pub lock_url: String,
    #[serde(default)]
    pub unlock_url: String,
    #[serde(default)]
    pub status_url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_http_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Authentication endpoint; card id is appended as a path segment.
    /// When absent the card id doubles as the account id.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_address")]
    pub bind_address: String,
    /// Status API port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: default_http_bind_address(), port: default_http_port() }
    }
}

fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    48099
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// File path for session audit records (JSONL format, empty to disable)
    #[serde(default = "default_audit_file")]
    pub file: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { file: default_audit_file() }
    }
}

fn default_audit_file() -> String {
    "sessions.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "vending".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub vending: VendingConfig,
    pub mqtt: MqttConfig,
    pub command: CommandConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    card_reader_device: String,
    inference_device: String,
    door_open_wait_ms: u64,
    inference_wait_ms: u64,
    door_close_wait_ms: u64,
    port_timeout_ms: u64,
    inference_timeout_policy: InferenceTimeoutPolicy,
    lockout_on_stuck_door: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    command_mode: CommandMode,
    command_lock_url: String,
    command_unlock_url: String,
    command_status_url: String,
    command_timeout_ms: u64,
    ledger_url: String,
    ledger_timeout_ms: u64,
    auth_url: Option<String>,
    http_bind_address: String,
    http_port: u16,
    metrics_interval_secs: u64,
    audit_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: "vending".to_string(),
            card_reader_device: "card-reader".to_string(),
            inference_device: "Inference-device".to_string(),
            door_open_wait_ms: 20_000,
            inference_wait_ms: 40_000,
            door_close_wait_ms: 30_000,
            port_timeout_ms: 5000,
            inference_timeout_policy: InferenceTimeoutPolicy::ProceedEmpty,
            lockout_on_stuck_door: false,
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "edgex/events/device/#".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            command_mode: CommandMode::Log,
            command_lock_url: "http://localhost:48082/api/v3/device/name/controller-board/lock1"
                .to_string(),
            command_unlock_url:
                "http://localhost:48082/api/v3/device/name/controller-board/unlock1".to_string(),
            command_status_url: "http://localhost:48094/status".to_string(),
            command_timeout_ms: 2000,
            ledger_url: "http://localhost:48093/ledger".to_string(),
            ledger_timeout_ms: 2000,
            auth_url: None,
            http_bind_address: "0.0.0.0".to_string(),
            http_port: 48099,
            metrics_interval_secs: 60,
            audit_file: "sessions.jsonl".to_string(),
            config_file: "default".to_string(),
        }
    }
}

/// Require a present, non-empty device name
fn require_device(value: Option<String>, key: &str) -> anyhow::Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => bail!("vending.{key} must not be empty"),
        None => bail!("vending.{key} is required"),
    }
}

/// Require a present, positive duration
fn require_wait(value: Option<u64>, key: &str) -> anyhow::Result<u64> {
    match value {
        Some(0) => bail!("vending.{key} must be positive"),
        Some(ms) => Ok(ms),
        None => bail!("vending.{key} is required"),
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, &path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).context("Failed to parse TOML")?;
        let vending = toml_config.vending;

        let card_reader_device = require_device(vending.card_reader_device, "card_reader_device")?;
        let inference_device = require_device(vending.inference_device, "inference_device")?;
        let door_open_wait_ms = require_wait(vending.door_open_wait_ms, "door_open_wait_ms")?;
        let inference_wait_ms = require_wait(vending.inference_wait_ms, "inference_wait_ms")?;
        let door_close_wait_ms = require_wait(vending.door_close_wait_ms, "door_close_wait_ms")?;
        if vending.port_timeout_ms == 0 {
            bail!("vending.port_timeout_ms must be positive");
        }
        if toml_config.command.mode == CommandMode::Http
            && (toml_config.command.lock_url.is_empty() || toml_config.command.unlock_url.is_empty())
        {
            bail!("command.lock_url and command.unlock_url are required in http mode");
        }

        Ok(Self {
            site_id: toml_config.site.id,
            card_reader_device,
            inference_device,
            door_open_wait_ms,
            inference_wait_ms,
            door_close_wait_ms,
            port_timeout_ms: vending.port_timeout_ms,
            inference_timeout_policy: vending.inference_timeout_policy,
            lockout_on_stuck_door: vending.lockout_on_stuck_door,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            command_mode: toml_config.command.mode,
            command_lock_url: toml_config.command.lock_url,
            command_unlock_url: toml_config.command.unlock_url,
            command_status_url: toml_config.command.status_url,
            command_timeout_ms: toml_config.command.timeout_ms,
            ledger_url: toml_config.ledger.url,
            ledger_timeout_ms: toml_config.ledger.timeout_ms,
            auth_url: toml_config.auth.url.filter(|u| !u.is_empty()),
            http_bind_address: toml_config.http.bind_address,
            http_port: toml_config.http.port,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            audit_file: toml_config.audit.file,
            config_file: source.to_string(),
        })
    }

    /// Load configuration from the path resolved from args/environment
    pub fn load(args: &[String]) -> anyhow::Result<Self> {
        Self::from_file(Self::resolve_config_path(args))
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn card_reader_device(&self) -> &str {
        &self.card_reader_device
    }

    pub fn inference_device(&self) -> &str {
        &self.inference_device
    }

    pub fn door_open_wait(&self) -> Duration {
        Duration::from_millis(self.door_open_wait_ms)
    }

    pub fn inference_wait(&self) -> Duration {
        Duration::from_millis(self.inference_wait_ms)
    }

    pub fn door_close_wait(&self) -> Duration {
        Duration::from_millis(self.door_close_wait_ms)
    }

    pub fn port_timeout(&self) -> Duration {
        Duration::from_millis(self.port_timeout_ms)
    }

    pub fn inference_timeout_policy(&self) -> InferenceTimeoutPolicy {
        self.inference_timeout_policy
    }

    pub fn lockout_on_stuck_door(&self) -> bool {
        self.lockout_on_stuck_door
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn command_mode(&self) -> &CommandMode {
        &self.command_mode
    }

    pub fn command_lock_url(&self) -> &str {
        &self.command_lock_url
    }

    pub fn command_unlock_url(&self) -> &str {
        &self.command_unlock_url
    }

    pub fn command_status_url(&self) -> &str {
        &self.command_status_url
    }

    pub fn command_timeout_ms(&self) -> u64 {
        self.command_timeout_ms
    }

    pub fn ledger_url(&self) -> &str {
        &self.ledger_url
    }

    pub fn ledger_timeout_ms(&self) -> u64 {
        self.ledger_timeout_ms
    }

    pub fn auth_url(&self) -> Option<&str> {
        self.auth_url.as_deref()
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn audit_file(&self) -> &str {
        &self.audit_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to override the three session waits
    pub fn with_waits(mut self, door_open: u64, inference: u64, door_close: u64) -> Self {
        self.door_open_wait_ms = door_open;
        self.inference_wait_ms = inference;
        self.door_close_wait_ms = door_close;
        self
    }

    /// Builder method for tests to set the inference timeout policy
    pub fn with_inference_timeout_policy(mut self, policy: InferenceTimeoutPolicy) -> Self {
        self.inference_timeout_policy = policy;
        self
    }

    /// Builder method for tests to enable maintenance lockout on stuck doors
    pub fn with_lockout_on_stuck_door(mut self, enabled: bool) -> Self {
        self.lockout_on_stuck_door = enabled;
        self
    }

    /// Builder method for tests to set the port call timeout
    pub fn with_port_timeout_ms(mut self, ms: u64) -> Self {
        self.port_timeout_ms = ms;
        self
    }

    /// Builder method for tests to disable or redirect the audit log
    pub fn with_audit_file(mut self, file: &str) -> Self {
        self.audit_file = file.to_string();
        self
    }
}
