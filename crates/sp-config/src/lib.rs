// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-config
//!
//! Environment-variable configuration for the Skillport server. Only the
//! enumerated variables are read; anything else in the environment is
//! ignored. [`ServerConfig::from_lookup`] takes the variable source as a
//! closure so tests never have to mutate the process environment.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was present but failed to parse.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Variable name.
        name: String,
        /// Parse diagnostic.
        reason: String,
    },
}

/// Advisory issues that do not prevent startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Authentication is required but no keys are configured, so every
    /// request will be rejected.
    AuthWithoutKeys,
    /// A backend connection variable is set, but this build serves from the
    /// in-memory substitutes.
    UnusedBackendSetting {
        /// The variable that was set.
        name: String,
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::AuthWithoutKeys => {
                write!(f, "AUTH_REQUIRED is set but API_KEYS is empty")
            }
            ConfigWarning::UnusedBackendSetting { name } => {
                write!(f, "{name} is set but this build uses in-memory stores")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// HTTP bind and routing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind host (`API_HOST`).
    pub host: String,
    /// Bind port (`API_PORT`).
    pub port: u16,
    /// Route prefix (`API_PREFIX`).
    pub prefix: String,
    /// Origins allowed by CORS (`CORS_ALLOWED_ORIGINS`, comma-separated;
    /// `*` allows any). Empty disables the CORS layer entirely.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            prefix: "/api/v1".into(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

/// API-key authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether requests must carry a valid key (`AUTH_REQUIRED`).
    pub required: bool,
    /// Header the key arrives in (`AUTH_HEADER`).
    pub header: Option<String>,
    /// Accepted keys (`API_KEYS`, comma-separated).
    pub api_keys: Vec<String>,
}

/// Scheduler and sandbox limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Worker-pool size (`MAX_CONCURRENT`).
    pub max_concurrent: usize,
    /// Async queue bound (`QUEUE_CAPACITY`); absent means unbounded.
    pub queue_capacity: Option<usize>,
    /// Guest output cap in bytes (`MAX_OUTPUT_BYTES`).
    pub max_output_bytes: u64,
    /// Request cap per minute across the API (`RATE_LIMIT_PER_MINUTE`);
    /// absent disables rate limiting.
    pub rate_limit_per_minute: Option<u32>,
    /// How long terminal execution records stay queryable
    /// (`RETENTION_SECONDS`).
    pub retention_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            queue_capacity: None,
            max_output_bytes: 10 * 1024 * 1024,
            rate_limit_per_minute: None,
            retention_seconds: 3600,
        }
    }
}

/// Interpreter overrides for the sandbox
/// (`SANDBOX_PYTHON`, `SANDBOX_TYPESCRIPT`, `SANDBOX_GO`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Python interpreter program.
    pub python: Option<String>,
    /// TypeScript runtime program.
    pub typescript: Option<String>,
    /// Go toolchain program.
    pub go: Option<String>,
}

/// Connection parameters for out-of-process backends. Recognized so that a
/// deployment can set them uniformly; the in-process build ignores them and
/// serves from memory substitutes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Relational store host (`DB_HOST`).
    pub db_host: Option<String>,
    /// Relational store port (`DB_PORT`).
    pub db_port: Option<u16>,
    /// Relational store database name (`DB_NAME`).
    pub db_name: Option<String>,
    /// Relational store user (`DB_USER`).
    pub db_user: Option<String>,
    /// Relational store password (`DB_PASSWORD`).
    pub db_password: Option<String>,
    /// Object store endpoint (`OBJECT_STORE_ENDPOINT`).
    pub object_store_endpoint: Option<String>,
    /// Object store access key (`OBJECT_STORE_ACCESS_KEY`).
    pub object_store_access_key: Option<String>,
    /// Object store secret key (`OBJECT_STORE_SECRET_KEY`).
    pub object_store_secret_key: Option<String>,
    /// Object store bucket (`OBJECT_STORE_BUCKET`).
    pub object_store_bucket: Option<String>,
    /// Search backend host (`SEARCH_HOST`).
    pub search_host: Option<String>,
    /// Search backend port (`SEARCH_PORT`).
    pub search_port: Option<u16>,
    /// Search backend index name (`SEARCH_INDEX`).
    pub search_index: Option<String>,
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Eq)]
pub struct ServerConfig {
    /// HTTP settings.
    pub api: ApiConfig,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Concurrency and size limits.
    pub limits: LimitsConfig,
    /// Sandbox interpreter overrides.
    pub sandbox: SandboxConfig,
    /// Out-of-process backend settings.
    pub backends: BackendsConfig,
    /// Log filter (`LOG_LEVEL`), e.g. `info` or `skillport=debug`.
    pub log_level: Option<String>,
}

impl ServerConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when a recognized variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when a recognized variable fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("API_HOST") {
            config.api.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            config.api.port = parse("API_PORT", &port)?;
        }
        if let Some(prefix) = lookup("API_PREFIX") {
            config.api.prefix = normalize_prefix(&prefix);
        }
        if let Some(origins) = lookup("CORS_ALLOWED_ORIGINS") {
            config.api.cors_allowed_origins = split_list(&origins);
        }

        if let Some(required) = lookup("AUTH_REQUIRED") {
            config.auth.required = parse_bool("AUTH_REQUIRED", &required)?;
        }
        if let Some(header) = lookup("AUTH_HEADER") {
            config.auth.header = Some(header);
        }
        if let Some(keys) = lookup("API_KEYS") {
            config.auth.api_keys = split_list(&keys);
        }

        if let Some(max) = lookup("MAX_CONCURRENT") {
            config.limits.max_concurrent = parse("MAX_CONCURRENT", &max)?;
            if config.limits.max_concurrent == 0 {
                return Err(ConfigError::Invalid {
                    name: "MAX_CONCURRENT".into(),
                    reason: "must be at least 1".into(),
                });
            }
        }
        if let Some(capacity) = lookup("QUEUE_CAPACITY") {
            config.limits.queue_capacity = Some(parse("QUEUE_CAPACITY", &capacity)?);
        }
        if let Some(bytes) = lookup("MAX_OUTPUT_BYTES") {
            config.limits.max_output_bytes = parse("MAX_OUTPUT_BYTES", &bytes)?;
        }
        if let Some(limit) = lookup("RATE_LIMIT_PER_MINUTE") {
            let limit: u32 = parse("RATE_LIMIT_PER_MINUTE", &limit)?;
            if limit == 0 {
                return Err(ConfigError::Invalid {
                    name: "RATE_LIMIT_PER_MINUTE".into(),
                    reason: "must be at least 1".into(),
                });
            }
            config.limits.rate_limit_per_minute = Some(limit);
        }
        if let Some(retention) = lookup("RETENTION_SECONDS") {
            config.limits.retention_seconds = parse("RETENTION_SECONDS", &retention)?;
            if config.limits.retention_seconds == 0 {
                return Err(ConfigError::Invalid {
                    name: "RETENTION_SECONDS".into(),
                    reason: "must be at least 1".into(),
                });
            }
        }

        config.sandbox.python = lookup("SANDBOX_PYTHON");
        config.sandbox.typescript = lookup("SANDBOX_TYPESCRIPT");
        config.sandbox.go = lookup("SANDBOX_GO");

        config.backends.db_host = lookup("DB_HOST");
        if let Some(port) = lookup("DB_PORT") {
            config.backends.db_port = Some(parse("DB_PORT", &port)?);
        }
        config.backends.db_name = lookup("DB_NAME");
        config.backends.db_user = lookup("DB_USER");
        config.backends.db_password = lookup("DB_PASSWORD");
        config.backends.object_store_endpoint = lookup("OBJECT_STORE_ENDPOINT");
        config.backends.object_store_access_key = lookup("OBJECT_STORE_ACCESS_KEY");
        config.backends.object_store_secret_key = lookup("OBJECT_STORE_SECRET_KEY");
        config.backends.object_store_bucket = lookup("OBJECT_STORE_BUCKET");
        config.backends.search_host = lookup("SEARCH_HOST");
        if let Some(port) = lookup("SEARCH_PORT") {
            config.backends.search_port = Some(parse("SEARCH_PORT", &port)?);
        }
        config.backends.search_index = lookup("SEARCH_INDEX");

        config.log_level = lookup("LOG_LEVEL");

        Ok(config)
    }

    /// The socket address string to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// The auth header name, with its default applied.
    #[must_use]
    pub fn auth_header(&self) -> &str {
        self.auth.header.as_deref().unwrap_or("X-API-Key")
    }

    /// Advisory problems with this configuration.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.auth.required && self.auth.api_keys.is_empty() {
            warnings.push(ConfigWarning::AuthWithoutKeys);
        }
        for (name, set) in [
            ("DB_HOST", self.backends.db_host.is_some()),
            ("OBJECT_STORE_ENDPOINT", self.backends.object_store_endpoint.is_some()),
            ("SEARCH_HOST", self.backends.search_host.is_some()),
        ] {
            if set {
                warnings.push(ConfigWarning::UnusedBackendSetting { name: name.into() });
            }
        }
        warnings
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name: name.into(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            name: name.into(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name| map.get(name).map(|v| (*v).to_string())
    }

    #[test]
    fn defaults_apply_with_empty_environment() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.api.host, "127.0.0.1");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.api.prefix, "/api/v1");
        assert!(config.api.cors_allowed_origins.is_empty());
        assert!(!config.auth.required);
        assert_eq!(config.limits.max_concurrent, 100);
        assert!(config.limits.rate_limit_per_minute.is_none());
        assert_eq!(config.limits.retention_seconds, 3600);
        assert_eq!(config.auth_header(), "X-API-Key");
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn recognized_variables_are_applied() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("API_HOST", "0.0.0.0"),
            ("API_PORT", "9000"),
            ("API_PREFIX", "api/v2/"),
            ("AUTH_REQUIRED", "true"),
            ("AUTH_HEADER", "X-Custom-Key"),
            ("API_KEYS", "alpha, beta,,gamma"),
            ("MAX_CONCURRENT", "8"),
            ("QUEUE_CAPACITY", "32"),
            ("MAX_OUTPUT_BYTES", "1048576"),
            ("RATE_LIMIT_PER_MINUTE", "120"),
            ("RETENTION_SECONDS", "900"),
            ("CORS_ALLOWED_ORIGINS", "https://app.example.com, https://ops.example.com"),
            ("SANDBOX_PYTHON", "/usr/bin/python3.12"),
            ("LOG_LEVEL", "skillport=debug"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.api.prefix, "/api/v2");
        assert_eq!(
            config.api.cors_allowed_origins,
            vec!["https://app.example.com", "https://ops.example.com"]
        );
        assert!(config.auth.required);
        assert_eq!(config.auth_header(), "X-Custom-Key");
        assert_eq!(config.auth.api_keys, vec!["alpha", "beta", "gamma"]);
        assert_eq!(config.limits.queue_capacity, Some(32));
        assert_eq!(config.limits.max_output_bytes, 1_048_576);
        assert_eq!(config.limits.rate_limit_per_minute, Some(120));
        assert_eq!(config.limits.retention_seconds, 900);
        assert_eq!(config.sandbox.python.as_deref(), Some("/usr/bin/python3.12"));
        assert_eq!(config.log_level.as_deref(), Some("skillport=debug"));
    }

    #[test]
    fn unknown_variables_are_ignored() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("TOTALLY_UNRELATED", "whatever"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn invalid_numbers_and_bools_are_rejected() {
        let err = ServerConfig::from_lookup(lookup_from(&[("API_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "API_PORT"));

        let err = ServerConfig::from_lookup(lookup_from(&[("AUTH_REQUIRED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "AUTH_REQUIRED"));

        let err = ServerConfig::from_lookup(lookup_from(&[("MAX_CONCURRENT", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "MAX_CONCURRENT"));

        let err = ServerConfig::from_lookup(lookup_from(&[("RATE_LIMIT_PER_MINUTE", "0")]))
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { ref name, .. } if name == "RATE_LIMIT_PER_MINUTE")
        );

        let err = ServerConfig::from_lookup(lookup_from(&[("RETENTION_SECONDS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "RETENTION_SECONDS"));
    }

    #[test]
    fn auth_without_keys_warns() {
        let config =
            ServerConfig::from_lookup(lookup_from(&[("AUTH_REQUIRED", "true")])).unwrap();
        assert_eq!(config.warnings(), vec![ConfigWarning::AuthWithoutKeys]);
    }

    #[test]
    fn backend_settings_are_recognized_but_flagged_unused() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "5432"),
            ("SEARCH_HOST", "search.internal"),
        ]))
        .unwrap();
        assert_eq!(config.backends.db_port, Some(5432));
        assert_eq!(config.warnings().len(), 2);
    }
}
