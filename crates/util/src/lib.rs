pub mod config;

use std::{collections::HashMap, env, net::SocketAddr};

pub use config::{
    AppConfig, ConfigError, CostCenterApiConfig, Environment, MailConfig, NotifierConfig,
    QueueConfig, QueueEncoding, ServiceRole,
};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Opaque provider of configuration values and secrets.
///
/// Connection strings and API keys are resolved through this trait so the
/// application does not care whether they come from the process environment,
/// a mounted secret store, or a fixed map in tests.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads values from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.is_empty())
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Loads environment variables from `.env` when available.
///
/// Missing files are ignored so the function is safe in production builds
/// where dotenv files are not deployed.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// Returns the address the HTTP server should bind to.
///
/// The value is resolved from `APP_BIND_ADDR` and falls back to
/// [`DEFAULT_BIND_ADDR`] when the key is not set.
pub fn server_bind_address(
    source: &impl ConfigSource,
) -> Result<SocketAddr, std::net::AddrParseError> {
    let value = source
        .get("APP_BIND_ADDR")
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    static ENV_GUARD: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    #[test]
    fn returns_default_address_when_key_missing() {
        let source: HashMap<String, String> = HashMap::new();
        let addr = server_bind_address(&source).expect("default address is valid");
        assert_eq!(addr.to_string(), DEFAULT_BIND_ADDR);
    }

    #[test]
    fn parses_custom_address_from_env() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        let addr = server_bind_address(&EnvSource).expect("custom address should parse");
        assert_eq!(addr.to_string(), "0.0.0.0:9000");
        env::remove_var("APP_BIND_ADDR");
    }

    #[test]
    fn env_source_treats_empty_values_as_missing() {
        let _lock = ENV_GUARD.lock().expect("env guard poisoned");
        env::set_var("CONTOSO_EMPTY_VALUE", "");
        assert_eq!(EnvSource.get("CONTOSO_EMPTY_VALUE"), None);
        env::remove_var("CONTOSO_EMPTY_VALUE");
    }
}
