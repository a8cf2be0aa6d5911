use std::env;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse an optional numeric variable, rejecting values that do not parse
pub(crate) fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(format!("{} must be a number, got '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_flag(name: &str) -> bool {
    env::var(name)
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Timing of the connection supervisor
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub retry_base: Duration,
    pub retry_max_wait: Duration,
    pub retry_max_tries: u32,
    pub probe_interval: Duration,
    pub probe_max_tries: u32,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub dry_run: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(1),
            retry_max_wait: Duration::from_secs(60),
            retry_max_tries: 15,
            probe_interval: Duration::from_millis(500),
            probe_max_tries: 10,
            poll_interval: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(100),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub rust_log: String,
    pub supervisor: SupervisorSettings,
}

impl RuntimeConfig {
    /// Environment variables:
    /// - `MQTT_HOST` (required), `MQTT_PORT` (default: 1883)
    /// - `MQTT_USER`, `MQTT_PASS`, `MQTT_CLIENT_ID` (optional)
    /// - `MQTT_KEEP_ALIVE_SECS` (60), `MQTT_CONNECT_TIMEOUT_SECS` (10)
    /// - `RETRY_BASE_MS` (1000), `RETRY_MAX_WAIT_SECS` (60), `RETRY_MAX_TRIES` (15)
    /// - `PROBE_INTERVAL_MS` (500), `PROBE_MAX_TRIES` (10)
    /// - `POLL_INTERVAL_MS` (100), `POLL_TIMEOUT_MS` (100)
    /// - `DRY_RUN` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("MQTT_HOST")
            .map_err(|_| ConfigError::MissingVariable("MQTT_HOST".to_string()))?;
        if host.trim().is_empty() {
            return Err(ConfigError::InvalidValue("MQTT_HOST cannot be empty".to_string()));
        }

        let port = parse_var("MQTT_PORT", 1883u16)?;
        let username = env::var("MQTT_USER").ok();
        let password = env::var("MQTT_PASS").ok();
        let client_id = env::var("MQTT_CLIENT_ID").ok().filter(|s| !s.trim().is_empty());
        let keep_alive = Duration::from_secs(parse_var("MQTT_KEEP_ALIVE_SECS", 60u64)?);
        let connect_timeout = Duration::from_secs(parse_var("MQTT_CONNECT_TIMEOUT_SECS", 10u64)?);
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let supervisor = SupervisorSettings {
            retry_base: Duration::from_millis(parse_var("RETRY_BASE_MS", 1_000u64)?),
            retry_max_wait: Duration::from_secs(parse_var("RETRY_MAX_WAIT_SECS", 60u64)?),
            retry_max_tries: parse_var("RETRY_MAX_TRIES", 15u32)?,
            probe_interval: Duration::from_millis(parse_var("PROBE_INTERVAL_MS", 500u64)?),
            probe_max_tries: parse_var("PROBE_MAX_TRIES", 10u32)?,
            poll_interval: Duration::from_millis(parse_var("POLL_INTERVAL_MS", 100u64)?),
            poll_timeout: Duration::from_millis(parse_var("POLL_TIMEOUT_MS", 100u64)?),
            dry_run: parse_flag("DRY_RUN"),
        };

        if keep_alive < Duration::from_secs(5) {
            return Err(ConfigError::InvalidValue(
                "MQTT_KEEP_ALIVE_SECS must be at least 5".to_string(),
            ));
        }
        if supervisor.probe_max_tries == 0 {
            return Err(ConfigError::InvalidValue(
                "PROBE_MAX_TRIES must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            username,
            password,
            client_id,
            keep_alive,
            connect_timeout,
            rust_log,
            supervisor,
        })
    }

    pub fn endpoint(&self) -> String {
        match &self.username {
            Some(user) => format!("mqtt://{}@{}:{}", user, self.host, self.port),
            None => format!("mqtt://{}:{}", self.host, self.port),
        }
    }
}
