//! Configuration module for the device client.
//!
//! This module provides environment-based configuration: platform URL and
//! endpoint paths, device identity, transport selection, sampling and retry
//! cadence, local storage locations and MQTT broker settings.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::payload::{DeviceIdentity, DEFAULT_ROLE};

/// Default platform base URL
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default ingest endpoint path
const DEFAULT_INGEST_PATH: &str = "/ingest";

/// Default device registration endpoint path
const DEFAULT_REGISTER_PATH: &str = "/register";

const DEFAULT_DEVICE_ID: &str = "DEV-001";
const DEFAULT_MARKET_ID: &str = "PASAR-001";

/// Default sampling interval in seconds
const DEFAULT_INTERVAL_SECS: f64 = 2.0;

/// Default queue flush interval in seconds
const DEFAULT_RETRY_INTERVAL_SECS: f64 = 5.0;

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default grace period for in-flight work during shutdown
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Lower bound for both loop intervals
const MIN_INTERVAL_SECS: f64 = 0.1;

/// Upper bound for both loop intervals
const MAX_INTERVAL_SECS: f64 = 3600.0;

const DEFAULT_COMMODITIES: &[&str] = &["cabai", "bawang", "beras"];

const DEFAULT_MQTT_HOST: &str = "localhost";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_TOPIC: &str = "pasar/data";
const DEFAULT_MQTT_KEEP_ALIVE_SECS: u64 = 60;

/// How long `send` waits for the broker connection to come back
const DEFAULT_MQTT_RECONNECT_TIMEOUT_MS: u64 = 1_500;

/// Directory under `$HOME` holding the token and queue files
const STATE_DIR: &str = ".smart_market_client";

/// Which transport delivers payloads. Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// HTTP POST per payload
    Http,
    /// Publish to an MQTT broker over a persistent connection
    Mqtt,
}

impl TransportKind {
    /// Parse a mode string (`http` or `mqtt`, case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Some(TransportKind::Http),
            "mqtt" => Some(TransportKind::Mqtt),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Mqtt => write!(f, "mqtt"),
        }
    }
}

/// Where sensor readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorMode {
    /// Bounded pseudo-random values
    Mock,
    /// Physical sensors (not supported yet)
    Hardware,
}

/// TLS material for the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttTlsConfig {
    /// CA certificate (PEM) used to verify the broker
    pub ca_file: PathBuf,

    /// Optional client certificate and key (PEM) for mutual TLS
    pub client_auth: Option<(PathBuf, PathBuf)>,
}

/// MQTT broker settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub keep_alive: Duration,

    /// Upper bound on the inline reconnect wait inside `send`
    pub reconnect_timeout: Duration,

    pub tls: Option<MqttTlsConfig>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_MQTT_HOST.to_string(),
            port: DEFAULT_MQTT_PORT,
            topic: DEFAULT_MQTT_TOPIC.to_string(),
            keep_alive: Duration::from_secs(DEFAULT_MQTT_KEEP_ALIVE_SECS),
            reconnect_timeout: Duration::from_millis(DEFAULT_MQTT_RECONNECT_TIMEOUT_MS),
            tls: None,
        }
    }
}

/// Configuration for the device client.
///
/// All settings can be configured via environment variables prefixed with
/// `DEVICE_CLIENT_`; see [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the platform (no trailing slash)
    pub api_url: String,

    /// Path of the ingest endpoint, appended to `api_url`
    pub ingest_path: String,

    /// Path of the registration endpoint, appended to `api_url`
    pub register_path: String,

    /// Transport used for delivery
    pub mode: TransportKind,

    pub device_id: String,
    pub market_id: String,

    /// Role sent with registration requests
    pub role: String,

    pub sensor_mode: SensorMode,

    /// Commodities whose prices are sampled
    pub commodities: Vec<String>,

    /// Time between two samples
    pub interval: Duration,

    /// Time between two queue flushes
    pub retry_interval: Duration,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// File holding the persisted bearer token
    pub token_file: PathBuf,

    /// File backing the durable queue
    pub queue_file: PathBuf,

    pub mqtt: MqttConfig,

    /// How long in-flight ticks may run after a shutdown signal
    pub shutdown_grace: Duration,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `DEVICE_CLIENT_API_URL`: platform base URL (default: http://localhost:8000)
    /// - `DEVICE_CLIENT_INGEST_PATH` / `DEVICE_CLIENT_REGISTER_PATH`: endpoint paths
    /// - `DEVICE_CLIENT_MODE`: `http` or `mqtt` (default: http)
    /// - `DEVICE_CLIENT_DEVICE_ID`, `DEVICE_CLIENT_MARKET_ID`, `DEVICE_CLIENT_ROLE`
    /// - `DEVICE_CLIENT_MOCK`: use mock sensors (default: true)
    /// - `DEVICE_CLIENT_COMMODITIES`: comma-separated commodity list
    /// - `DEVICE_CLIENT_INTERVAL_SECS`: sampling interval (default: 2.0)
    /// - `DEVICE_CLIENT_RETRY_INTERVAL_SECS`: flush interval (default: 5.0)
    /// - `DEVICE_CLIENT_REQUEST_TIMEOUT_SECS`: HTTP timeout (default: 10)
    /// - `DEVICE_CLIENT_TOKEN_FILE`, `DEVICE_CLIENT_QUEUE_FILE`: local state
    /// - `DEVICE_CLIENT_MQTT_HOST`, `_PORT`, `_TOPIC`, `_TLS`, `_TLS_CA`,
    ///   `_TLS_CERT`, `_TLS_KEY`: broker settings
    /// - `DEVICE_CLIENT_SHUTDOWN_GRACE_SECS`: shutdown grace period (default: 5)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set but malformed or out of
    /// range, or when the MQTT TLS settings are incomplete.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = match env::var("DEVICE_CLIENT_API_URL") {
            Ok(value) => normalize_server(&value, None).ok_or_else(|| {
                ConfigError::for_var("DEVICE_CLIENT_API_URL", "URL must not be empty")
            })?,
            Err(_) => defaults.api_url,
        };

        let ingest_path = parse_path("DEVICE_CLIENT_INGEST_PATH", DEFAULT_INGEST_PATH);
        let register_path = parse_path("DEVICE_CLIENT_REGISTER_PATH", DEFAULT_REGISTER_PATH);

        let mode = match env::var("DEVICE_CLIENT_MODE") {
            Ok(value) => TransportKind::parse(&value).ok_or_else(|| {
                ConfigError::for_var(
                    "DEVICE_CLIENT_MODE",
                    format!("'{}' is not a valid mode (expected http or mqtt)", value),
                )
            })?,
            Err(_) => defaults.mode,
        };

        let device_id = non_empty_var("DEVICE_CLIENT_DEVICE_ID")?.unwrap_or(defaults.device_id);
        let market_id = non_empty_var("DEVICE_CLIENT_MARKET_ID")?.unwrap_or(defaults.market_id);
        let role = non_empty_var("DEVICE_CLIENT_ROLE")?.unwrap_or(defaults.role);

        let sensor_mode = if parse_bool("DEVICE_CLIENT_MOCK", true)? {
            SensorMode::Mock
        } else {
            SensorMode::Hardware
        };

        let commodities = match env::var("DEVICE_CLIENT_COMMODITIES") {
            Ok(value) => {
                let list: Vec<String> = value
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if list.is_empty() {
                    return Err(ConfigError::for_var(
                        "DEVICE_CLIENT_COMMODITIES",
                        "at least one commodity is required",
                    ));
                }
                list
            }
            Err(_) => defaults.commodities,
        };

        let interval = parse_interval("DEVICE_CLIENT_INTERVAL_SECS", DEFAULT_INTERVAL_SECS)?;
        let retry_interval =
            parse_interval("DEVICE_CLIENT_RETRY_INTERVAL_SECS", DEFAULT_RETRY_INTERVAL_SECS)?;

        // Optional, falls back silently like the other timeouts
        let request_timeout_secs: u64 = env::var("DEVICE_CLIENT_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let shutdown_grace_secs: u64 = env::var("DEVICE_CLIENT_SHUTDOWN_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS);

        let token_file = env::var_os("DEVICE_CLIENT_TOKEN_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.token_file);
        let queue_file = env::var_os("DEVICE_CLIENT_QUEUE_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.queue_file);

        let mqtt = Self::parse_mqtt()?;

        Ok(Self {
            api_url,
            ingest_path,
            register_path,
            mode,
            device_id,
            market_id,
            role,
            sensor_mode,
            commodities,
            interval,
            retry_interval,
            request_timeout: Duration::from_secs(request_timeout_secs),
            token_file,
            queue_file,
            mqtt,
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }

    /// Parse the broker settings, including the optional TLS material.
    fn parse_mqtt() -> Result<MqttConfig, ConfigError> {
        let mut mqtt = MqttConfig::default();

        if let Some(host) = non_empty_var("DEVICE_CLIENT_MQTT_HOST")? {
            mqtt.host = host;
        }

        if let Ok(value) = env::var("DEVICE_CLIENT_MQTT_PORT") {
            mqtt.port = value.parse().map_err(|_| {
                ConfigError::for_var(
                    "DEVICE_CLIENT_MQTT_PORT",
                    format!("'{}' is not a valid port", value),
                )
            })?;
        }

        if let Some(topic) = non_empty_var("DEVICE_CLIENT_MQTT_TOPIC")? {
            mqtt.topic = topic;
        }

        if parse_bool("DEVICE_CLIENT_MQTT_TLS", false)? {
            let ca_file = env::var_os("DEVICE_CLIENT_MQTT_TLS_CA")
                .map(PathBuf::from)
                .ok_or_else(|| {
                    ConfigError::for_var(
                        "DEVICE_CLIENT_MQTT_TLS_CA",
                        "a CA file is required when MQTT TLS is enabled",
                    )
                })?;

            let cert = env::var_os("DEVICE_CLIENT_MQTT_TLS_CERT").map(PathBuf::from);
            let key = env::var_os("DEVICE_CLIENT_MQTT_TLS_KEY").map(PathBuf::from);
            let client_auth = match (cert, key) {
                (Some(cert), Some(key)) => Some((cert, key)),
                (None, None) => None,
                _ => {
                    return Err(ConfigError {
                        message: "DEVICE_CLIENT_MQTT_TLS_CERT and DEVICE_CLIENT_MQTT_TLS_KEY must be set together".to_string(),
                        env_var: None,
                    })
                }
            };

            mqtt.tls = Some(MqttTlsConfig {
                ca_file,
                client_auth,
            });
        }

        Ok(mqtt)
    }

    /// Full URL of the ingest endpoint.
    pub fn ingest_url(&self) -> String {
        format!("{}{}", self.api_url, self.ingest_path)
    }

    /// Full URL of the registration endpoint.
    pub fn register_url(&self) -> String {
        format!("{}{}", self.api_url, self.register_path)
    }

    /// Identity attached to every payload and registration request.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(&self.device_id, &self.market_id).with_role(&self.role)
    }
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        let state_dir = default_state_dir();
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ingest_path: DEFAULT_INGEST_PATH.to_string(),
            register_path: DEFAULT_REGISTER_PATH.to_string(),
            mode: TransportKind::Http,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            market_id: DEFAULT_MARKET_ID.to_string(),
            role: DEFAULT_ROLE.to_string(),
            sensor_mode: SensorMode::Mock,
            commodities: DEFAULT_COMMODITIES.iter().map(|c| c.to_string()).collect(),
            interval: Duration::from_secs_f64(DEFAULT_INTERVAL_SECS),
            retry_interval: Duration::from_secs_f64(DEFAULT_RETRY_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            token_file: state_dir.join("token.json"),
            queue_file: state_dir.join("queue.log"),
            mqtt: MqttConfig::default(),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

/// Normalize a user-supplied server address into a base URL.
///
/// A missing scheme becomes `http://`; when the host carries no port and
/// `port` is given, it is appended. Trailing slashes and any path are
/// dropped. Returns `None` for empty input.
pub fn normalize_server(server: &str, port: Option<u16>) -> Option<String> {
    let server = server.trim();
    if server.is_empty() {
        return None;
    }

    let (scheme, rest) = match server.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() => (scheme, rest),
        _ => ("http", server),
    };

    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return None;
    }

    match port {
        Some(port) if !host.contains(':') => Some(format!("{}://{}:{}", scheme, host, port)),
        _ => Some(format!("{}://{}", scheme, host)),
    }
}

fn default_state_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR)
}

fn parse_path(env_var: &str, default: &str) -> String {
    let raw = env::var(env_var).unwrap_or_else(|_| default.to_string());
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn non_empty_var(env_var: &str) -> Result<Option<String>, ConfigError> {
    match env::var(env_var) {
        Ok(value) if value.trim().is_empty() => {
            Err(ConfigError::for_var(env_var, "value must not be empty"))
        }
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(_) => Ok(None),
    }
}

fn parse_bool(env_var: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(env_var) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::for_var(
                env_var,
                format!("'{}' is not a valid boolean", value),
            )),
        },
        Err(_) => Ok(default),
    }
}

/// Parse an interval in (fractional) seconds with range validation.
fn parse_interval(env_var: &str, default: f64) -> Result<Duration, ConfigError> {
    let secs = match env::var(env_var) {
        Ok(value) => {
            let secs: f64 = value.trim().parse().map_err(|_| {
                ConfigError::for_var(env_var, format!("'{}' is not a valid number", value))
            })?;

            if !secs.is_finite() || secs < MIN_INTERVAL_SECS {
                return Err(ConfigError::for_var(
                    env_var,
                    format!("interval {} is below minimum ({}s)", value, MIN_INTERVAL_SECS),
                ));
            }

            if secs > MAX_INTERVAL_SECS {
                return Err(ConfigError::for_var(
                    env_var,
                    format!("interval {} exceeds maximum ({}s)", value, MAX_INTERVAL_SECS),
                ));
            }

            secs
        }
        Err(_) => default,
    };

    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Environment is process-global; serialize the tests that touch it
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn remove(key: &str) -> Self {
            let original = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(val) => env::set_var(&self.key, val),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.ingest_url(), "http://localhost:8000/ingest");
        assert_eq!(config.register_url(), "http://localhost:8000/register");
        assert_eq!(config.mode, TransportKind::Http);
        assert_eq!(config.sensor_mode, SensorMode::Mock);
        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.commodities, vec!["cabai", "bawang", "beras"]);
        assert_eq!(config.mqtt.topic, "pasar/data");
        assert!(config.mqtt.tls.is_none());
        assert_eq!(
            config.identity(),
            DeviceIdentity::new("DEV-001", "PASAR-001")
        );
    }

    #[test]
    fn test_config_from_env_custom_values() {
        let _lock = lock_env();
        let _g1 = EnvGuard::set("DEVICE_CLIENT_API_URL", "platform.local:9000/");
        let _g2 = EnvGuard::set("DEVICE_CLIENT_MODE", "MQTT");
        let _g3 = EnvGuard::set("DEVICE_CLIENT_INTERVAL_SECS", "0.5");
        let _g4 = EnvGuard::set("DEVICE_CLIENT_COMMODITIES", "beras, gula ,");
        let _g5 = EnvGuard::set("DEVICE_CLIENT_MOCK", "no");
        let _g6 = EnvGuard::set("DEVICE_CLIENT_REGISTER_PATH", "api/auth/device/register/");

        let config = Config::from_env().expect("Should load custom values");
        assert_eq!(config.api_url, "http://platform.local:9000");
        assert_eq!(config.mode, TransportKind::Mqtt);
        assert_eq!(config.interval, Duration::from_millis(500));
        assert_eq!(config.commodities, vec!["beras", "gula"]);
        assert_eq!(config.sensor_mode, SensorMode::Hardware);
        assert_eq!(
            config.register_url(),
            "http://platform.local:9000/api/auth/device/register"
        );
    }

    #[test]
    fn test_invalid_mode() {
        let _lock = lock_env();
        let _guard = EnvGuard::set("DEVICE_CLIENT_MODE", "carrier-pigeon");

        let err = Config::from_env().unwrap_err();
        assert_eq!(err.env_var.as_deref(), Some("DEVICE_CLIENT_MODE"));
        assert!(err.message.contains("not a valid mode"));
    }

    #[test]
    fn test_interval_below_min() {
        let _lock = lock_env();
        let _guard = EnvGuard::set("DEVICE_CLIENT_RETRY_INTERVAL_SECS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("below minimum"));
    }

    #[test]
    fn test_interval_exceeds_max() {
        let _lock = lock_env();
        let _guard = EnvGuard::set("DEVICE_CLIENT_INTERVAL_SECS", "99999");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_interval_not_a_number() {
        let _lock = lock_env();
        let _guard = EnvGuard::set("DEVICE_CLIENT_INTERVAL_SECS", "soon");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("not a valid number"));
    }

    #[test]
    fn test_mqtt_tls_requires_ca() {
        let _lock = lock_env();
        let _g1 = EnvGuard::set("DEVICE_CLIENT_MQTT_TLS", "true");
        let _g2 = EnvGuard::remove("DEVICE_CLIENT_MQTT_TLS_CA");

        let err = Config::from_env().unwrap_err();
        assert_eq!(err.env_var.as_deref(), Some("DEVICE_CLIENT_MQTT_TLS_CA"));
    }

    #[test]
    fn test_mqtt_tls_cert_and_key_pair() {
        let _lock = lock_env();
        let _g1 = EnvGuard::set("DEVICE_CLIENT_MQTT_TLS", "1");
        let _g2 = EnvGuard::set("DEVICE_CLIENT_MQTT_TLS_CA", "/etc/ca.pem");
        let _g3 = EnvGuard::set("DEVICE_CLIENT_MQTT_TLS_CERT", "/etc/client.pem");
        let _g4 = EnvGuard::remove("DEVICE_CLIENT_MQTT_TLS_KEY");

        assert!(Config::from_env().is_err());

        let _g5 = EnvGuard::set("DEVICE_CLIENT_MQTT_TLS_KEY", "/etc/client.key");
        let config = Config::from_env().expect("TLS pair should load");
        let tls = config.mqtt.tls.expect("TLS should be enabled");
        assert_eq!(tls.ca_file, PathBuf::from("/etc/ca.pem"));
        assert_eq!(
            tls.client_auth,
            Some((
                PathBuf::from("/etc/client.pem"),
                PathBuf::from("/etc/client.key")
            ))
        );
    }

    #[test]
    fn test_normalize_server() {
        assert_eq!(normalize_server("", Some(80)), None);
        assert_eq!(
            normalize_server("localhost", Some(8000)).as_deref(),
            Some("http://localhost:8000")
        );
        assert_eq!(
            normalize_server("localhost:9000", Some(8000)).as_deref(),
            Some("http://localhost:9000")
        );
        assert_eq!(
            normalize_server("https://platform.example/api/", None).as_deref(),
            Some("https://platform.example")
        );
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!(TransportKind::parse(" Http "), Some(TransportKind::Http));
        assert_eq!(TransportKind::parse("mqtt"), Some(TransportKind::Mqtt));
        assert_eq!(TransportKind::parse("amqp"), None);
        assert_eq!(TransportKind::Mqtt.to_string(), "mqtt");
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError {
            message: "test error".to_string(),
            env_var: Some("TEST_VAR".to_string()),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );

        let error_no_var = ConfigError {
            message: "general error".to_string(),
            env_var: None,
        };
        assert_eq!(
            format!("{}", error_no_var),
            "Configuration error: general error"
        );
    }
}
