//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ZE_IDENTITY_URL` - Identity provider REST base URL
//! - `ZE_API_KEY` - Identity provider API key
//! - `ZE_API_BASE_URL` - Zone Editor API base URL
//!
//! ## Optional
//! - `ZE_LOGIN_PATH` - Path the UI is sent to after sign-out (default: `/login`)
//! - `ZE_AUTH_EMULATOR_HOST` - Local identity emulator, `host[:port]`; overrides
//!   `ZE_IDENTITY_URL` and makes `ZE_API_KEY` optional

use std::fmt;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use zone_editor_core::limits::{AUTH_READY_TIMEOUT, TOKEN_REFRESH_PERIOD};

const DEFAULT_LOGIN_PATH: &str = "/login";
const DEFAULT_AUTH_EMULATOR_PORT: u16 = 9099;
const EMULATOR_API_KEY: &str = "emulator-api-key";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Client configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct ClientConfig {
    /// Identity provider REST base URL (ends with `/`)
    pub identity_url: Url,
    /// Identity provider API key
    pub api_key: SecretString,
    /// Zone Editor API base URL (ends with `/`)
    pub api_base_url: Url,
    /// Where the UI goes after sign-out
    pub login_path: String,
    /// Scheduled token refresh period
    pub refresh_period: Duration,
    /// How long to wait for the first auth state check
    pub ready_timeout: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("identity_url", &self.identity_url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("login_path", &self.login_path)
            .field("refresh_period", &self.refresh_period)
            .field("ready_timeout", &self.ready_timeout)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or a URL
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let (identity_url, api_key) = match get("ZE_AUTH_EMULATOR_HOST") {
            Some(host) => {
                let url = format!(
                    "http://{}/identitytoolkit.googleapis.com/",
                    with_default_port(&host, DEFAULT_AUTH_EMULATOR_PORT)
                );
                (
                    parse_base_url("ZE_AUTH_EMULATOR_HOST", &url)?,
                    get("ZE_API_KEY").unwrap_or_else(|| EMULATOR_API_KEY.to_string()),
                )
            }
            None => (
                parse_base_url("ZE_IDENTITY_URL", &require("ZE_IDENTITY_URL")?)?,
                require("ZE_API_KEY")?,
            ),
        };

        let api_base_url = parse_base_url("ZE_API_BASE_URL", &require("ZE_API_BASE_URL")?)?;

        let login_path = get("ZE_LOGIN_PATH").unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string());
        if !login_path.starts_with('/') {
            return Err(ConfigError::InvalidEnvVar(
                "ZE_LOGIN_PATH".to_string(),
                "must start with '/'".to_string(),
            ));
        }

        Ok(Self {
            identity_url,
            api_key: SecretString::from(api_key),
            api_base_url,
            login_path,
            refresh_period: TOKEN_REFRESH_PERIOD,
            ready_timeout: AUTH_READY_TIMEOUT,
        })
    }
}

/// Parse a base URL, making sure it ends with `/` so relative joins keep
/// its path.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn with_default_port(host: &str, default_port: u16) -> String {
    let host = host.trim();
    let has_port = host
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    if has_port {
        host.to_string()
    } else {
        format!("{host}:{default_port}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[
            ("ZE_IDENTITY_URL", "https://identity.example.test/v1"),
            ("ZE_API_KEY", "k-123"),
            ("ZE_API_BASE_URL", "https://api.example.test"),
        ])
        .unwrap();

        assert_eq!(config.identity_url.as_str(), "https://identity.example.test/v1/");
        assert_eq!(config.api_base_url.as_str(), "https://api.example.test/");
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.refresh_period, TOKEN_REFRESH_PERIOD);
        assert_eq!(config.ready_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_missing_api_key() {
        let err = load(&[
            ("ZE_IDENTITY_URL", "https://identity.example.test"),
            ("ZE_API_BASE_URL", "https://api.example.test"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "ZE_API_KEY"));
    }

    #[test]
    fn test_emulator_host_overrides_identity_url() {
        let config = load(&[
            ("ZE_AUTH_EMULATOR_HOST", "localhost"),
            ("ZE_API_BASE_URL", "http://localhost:5001"),
        ])
        .unwrap();
        assert_eq!(
            config.identity_url.as_str(),
            "http://localhost:9099/identitytoolkit.googleapis.com/"
        );
        assert_eq!(config.api_key.expose_secret(), EMULATOR_API_KEY);
    }

    #[test]
    fn test_invalid_values() {
        let err = load(&[
            ("ZE_IDENTITY_URL", "not a url"),
            ("ZE_API_KEY", "k"),
            ("ZE_API_BASE_URL", "https://api.example.test"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "ZE_IDENTITY_URL"));

        let err = load(&[
            ("ZE_IDENTITY_URL", "https://identity.example.test"),
            ("ZE_API_KEY", "k"),
            ("ZE_API_BASE_URL", "https://api.example.test"),
            ("ZE_LOGIN_PATH", "login"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "ZE_LOGIN_PATH"));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = load(&[
            ("ZE_IDENTITY_URL", "https://identity.example.test"),
            ("ZE_API_KEY", "super-private-key"),
            ("ZE_API_BASE_URL", "https://api.example.test"),
        ])
        .unwrap();
        let output = format!("{config:?}");
        assert!(output.contains("[REDACTED]"));
        assert!(!output.contains("super-private-key"));
    }
}
