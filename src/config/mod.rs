//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values. Everything has
//! a default, so an empty environment yields a working configuration.

use crate::engine::EngineConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub otel_endpoint: Option<String>,
    pub thread_prefix: String,
    pub catch_panics: bool,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            log_level: "info".to_string(),
            otel_endpoint: None,
            thread_prefix: engine.thread_prefix,
            catch_panics: engine.catch_panics,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `LOG_LEVEL`: default filter when `RUST_LOG` is unset (`info`)
    /// - `OTEL_ENDPOINT`: OTLP gRPC endpoint, unset disables export
    /// - `DISPATCH_THREAD_PREFIX`: dispatcher thread name prefix (`dispatch`)
    /// - `DISPATCH_CATCH_PANICS`: `true`/`false`/`1`/`0` (`true`)
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let thread_prefix = match std::env::var("DISPATCH_THREAD_PREFIX") {
            Ok(prefix) if prefix.trim().is_empty() => {
                return Err(Error::Config(
                    "DISPATCH_THREAD_PREFIX must not be empty".to_string(),
                ));
            }
            Ok(prefix) => prefix,
            Err(_) => defaults.thread_prefix,
        };
        let catch_panics = match std::env::var("DISPATCH_CATCH_PANICS") {
            Ok(raw) => parse_flag("DISPATCH_CATCH_PANICS", &raw)?,
            Err(_) => defaults.catch_panics,
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            thread_prefix,
            catch_panics,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            thread_prefix: self.thread_prefix.clone(),
            catch_panics: self.catch_panics,
        }
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{name} must be a boolean, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flag_accepts_common_spellings() {
        for raw in ["1", "true", "TRUE", " yes ", "on"] {
            assert!(parse_flag("X", raw).unwrap(), "{raw}");
        }
        for raw in ["0", "false", "No", "off"] {
            assert!(!parse_flag("X", raw).unwrap(), "{raw}");
        }
    }

    #[test]
    fn parse_flag_rejects_garbage() {
        let err = parse_flag("DISPATCH_CATCH_PANICS", "maybe").unwrap_err();
        assert!(err.to_string().contains("DISPATCH_CATCH_PANICS"));
    }
}
