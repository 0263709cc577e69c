use std::{fmt, net::SocketAddr, str::FromStr, time::Duration};

use url::Url;

use super::{server_bind_address, ConfigSource, EnvSource};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://expenses.db?mode=rwc";
pub const DEFAULT_COST_CENTER_API_URL: &str = "http://127.0.0.1:8080/";
pub const DEFAULT_QUEUE_NAME: &str = "contosoexpenses";
pub const DEFAULT_SENDGRID_BASE_URL: &str = "https://api.sendgrid.com/";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Which parts of the system this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    /// Web front end, cost-center API and notifier in one process.
    All,
    /// Expense pages only.
    Web,
    /// Cost-center lookup API only.
    Api,
    /// Queue consumer that emails approvers.
    Notifier,
}

impl ServiceRole {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "all" => Ok(Self::All),
            "web" => Ok(Self::Web),
            "api" => Ok(Self::Api),
            "notifier" | "worker" => Ok(Self::Notifier),
            other => Err(ConfigError::InvalidRole(other.to_string())),
        }
    }

    pub fn serves_web(self) -> bool {
        matches!(self, Self::All | Self::Web)
    }

    pub fn serves_api(self) -> bool {
        matches!(self, Self::All | Self::Api)
    }

    pub fn runs_notifier(self) -> bool {
        matches!(self, Self::All | Self::Notifier)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Web => "web",
            Self::Api => "api",
            Self::Notifier => "notifier",
        }
    }
}

/// Payload encoding used for queue message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEncoding {
    Base64,
    Plain,
}

impl FromStr for QueueEncoding {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "base64" => Ok(Self::Base64),
            "plain" | "none" => Ok(Self::Plain),
            other => Err(ConfigError::InvalidEncoding(other.to_string())),
        }
    }
}

/// Location of the cost-center lookup API.
#[derive(Debug, Clone)]
pub struct CostCenterApiConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

/// Notification queue identity.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub encoding: QueueEncoding,
}

/// Outbound mail API settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_key: String,
    pub base_url: Url,
    pub timeout: Duration,
}

/// Mail transport and queue consumer tuning for the notifier role.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub mail: MailConfig,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub max_dequeue_count: u32,
    pub concurrency: usize,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub role: ServiceRole,
    pub database_url: String,
    pub cost_center_api: CostCenterApiConfig,
    pub queue: QueueConfig,
    /// Present exactly when `role` runs the notifier.
    pub notifier: Option<NotifierConfig>,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&EnvSource)
    }

    /// Constructs the configuration from an arbitrary [`ConfigSource`].
    pub fn from_source(source: &impl ConfigSource) -> Result<Self, ConfigError> {
        let env_value = source
            .get("APP_ENV")
            .unwrap_or_else(|| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let role_value = source.get("APP_ROLE").unwrap_or_else(|| "all".to_string());
        let role = ServiceRole::from_str(&role_value)?;
        let bind_addr = server_bind_address(source).map_err(ConfigError::BindAddress)?;

        let database_url = source
            .get("DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let cost_center_api = CostCenterApiConfig {
            base_url: parse_url(source, "COST_CENTER_API_URL", DEFAULT_COST_CENTER_API_URL)?,
            timeout: Duration::from_secs(parse_number(source, "COST_CENTER_TIMEOUT_SECS", 10)?),
        };

        let queue = QueueConfig {
            name: source
                .get("QUEUE_NAME")
                .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            encoding: source
                .get("QUEUE_MESSAGE_ENCODING")
                .as_deref()
                .map(QueueEncoding::from_str)
                .transpose()?
                .unwrap_or(QueueEncoding::Base64),
        };

        let notifier = if role.runs_notifier() {
            Some(notifier_config(source)?)
        } else {
            None
        };

        Ok(Self {
            bind_addr,
            environment,
            role,
            database_url,
            cost_center_api,
            queue,
            notifier,
        })
    }
}

fn notifier_config(source: &impl ConfigSource) -> Result<NotifierConfig, ConfigError> {
    let mail = MailConfig {
        api_key: source
            .get("SENDGRID_API_KEY")
            .ok_or(ConfigError::Missing("SENDGRID_API_KEY"))?,
        base_url: parse_url(source, "SENDGRID_BASE_URL", DEFAULT_SENDGRID_BASE_URL)?,
        timeout: Duration::from_secs(parse_number(source, "SENDGRID_TIMEOUT_SECS", 10)?),
    };

    Ok(NotifierConfig {
        mail,
        visibility_timeout: Duration::from_secs(parse_number(
            source,
            "NOTIFIER_VISIBILITY_TIMEOUT_SECS",
            30,
        )?),
        poll_interval: Duration::from_millis(parse_number(
            source,
            "NOTIFIER_POLL_INTERVAL_MS",
            1000,
        )?),
        // Zero would park every message on its first delivery.
        max_dequeue_count: parse_number::<u32>(source, "NOTIFIER_MAX_DEQUEUE_COUNT", 5)?.max(1),
        concurrency: parse_number::<usize>(source, "NOTIFIER_CONCURRENCY", 1)?.max(1),
    })
}

fn parse_url(
    source: &impl ConfigSource,
    key: &'static str,
    default: &str,
) -> Result<Url, ConfigError> {
    let raw = source.get(key).unwrap_or_else(|| default.to_string());
    // Relative joins drop the last path segment unless the base ends with '/'.
    let normalized = if raw.ends_with('/') {
        raw
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|err| ConfigError::InvalidUrl { key, source: err })
}

fn parse_number<T: FromStr>(
    source: &impl ConfigSource,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match source.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        None => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    InvalidRole(String),
    InvalidEncoding(String),
    BindAddress(std::net::AddrParseError),
    InvalidUrl {
        key: &'static str,
        source: url::ParseError,
    },
    InvalidNumber {
        key: &'static str,
        value: String,
    },
    Missing(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::InvalidRole(value) => write!(
                f,
                "APP_ROLE must be one of 'all', 'web', 'api', or 'notifier' (got {value})"
            ),
            Self::InvalidEncoding(value) => write!(
                f,
                "QUEUE_MESSAGE_ENCODING must be 'base64' or 'plain' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidUrl { key, source } => write!(f, "invalid {key} value: {source}"),
            Self::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer (got {value})")
            }
            Self::Missing(key) => write!(f, "{key} must be set"),
        }
    }
}

impl std::error::Error for ConfigError {}
