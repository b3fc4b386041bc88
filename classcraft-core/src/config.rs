//! Configuration management

use crate::error::{ClassCraftError, ClassCraftResult};
use crate::types::{ApiConfig, ClassCraftConfig, SessionConfig, StorageConfig};

use std::path::{Path, PathBuf};

/// Environment variable that overrides every other API base URL source
pub const API_BASE_URL_ENV: &str = "CLASSCRAFT_API_BASE_URL";
/// API served by a locally running backend
pub const LOCAL_API_BASE_URL: &str = "http://localhost:5000/api";
/// Hosted production API
pub const PRODUCTION_API_BASE_URL: &str = "https://class-craft-backend.onrender.com/api";
/// Route the client is sent to when a session ends
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// Pick the API base URL.
///
/// Order: explicit override, then the local backend when running on a
/// loopback host, then production.
pub fn resolve_api_base_url(override_url: Option<&str>, host: Option<&str>) -> String {
    if let Some(url) = override_url.map(str::trim).filter(|u| !u.is_empty()) {
        return url.to_string();
    }

    match host.map(str::trim) {
        Some("localhost") | Some("127.0.0.1") => LOCAL_API_BASE_URL.to_string(),
        _ => PRODUCTION_API_BASE_URL.to_string(),
    }
}

impl Default for ClassCraftConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: None,
                host: None,
                timeout_seconds: 30,
                user_agent: format!("classcraft/{}", env!("CARGO_PKG_VERSION")),
            },
            storage: StorageConfig { session_file: None },
            session: SessionConfig {
                login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            },
        }
    }
}

impl ApiConfig {
    /// Resolve the base URL, honouring the `CLASSCRAFT_API_BASE_URL` override
    pub fn resolve_base_url(&self) -> String {
        let env_override = std::env::var(API_BASE_URL_ENV).ok();
        let override_url = env_override.as_deref().or(self.base_url.as_deref());
        resolve_api_base_url(override_url, self.host.as_deref())
    }
}

impl StorageConfig {
    /// Where the session file lives when none is configured
    pub fn default_session_file() -> PathBuf {
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("classcraft")
            .join("session.json")
    }

    pub fn session_file_path(&self) -> PathBuf {
        self.session_file
            .clone()
            .unwrap_or_else(Self::default_session_file)
    }
}

impl ClassCraftConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ClassCraftResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ClassCraftError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: ClassCraftConfig =
            toml::from_str(&content).map_err(|e| ClassCraftError::Config {
                message: format!("Failed to parse config: {}", e),
                source: Some(Box::new(e)),
                context: crate::ErrorContext::new("config")
                    .with_operation("parse_toml")
                    .with_suggestion("Check TOML syntax in config file"),
            })?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ClassCraftResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ClassCraftError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| ClassCraftError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ClassCraftResult<()> {
        if self.api.timeout_seconds == 0 {
            return Err(ClassCraftError::Config {
                message: "API timeout_seconds must be greater than 0".to_string(),
                source: None,
                context: crate::ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set api.timeout_seconds to a positive value"),
            });
        }

        if self.api.user_agent.trim().is_empty() {
            return Err(ClassCraftError::Config {
                message: "API user_agent must not be empty".to_string(),
                source: None,
                context: crate::ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set api.user_agent, e.g. \"classcraft/0.1\""),
            });
        }

        if let Some(base_url) = &self.api.base_url {
            url::Url::parse(base_url).map_err(|e| ClassCraftError::Config {
                message: format!("Invalid api.base_url '{}': {}", base_url, e),
                source: Some(Box::new(e)),
                context: crate::ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Use an absolute URL such as https://host/api"),
            })?;
        }

        if !self.session.login_route.starts_with('/') {
            return Err(ClassCraftError::Config {
                message: format!(
                    "session.login_route must start with '/': {}",
                    self.session.login_route
                ),
                source: None,
                context: crate::ErrorContext::new("config").with_operation("validate"),
            });
        }

        Ok(())
    }
}
