//! Server configuration.
//!
//! Every section defaults sensibly, so an empty JSON object is a valid configuration.

use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Debug mode: exposes plain component type names in fragments and structured diagnostics in error responses.
	pub debug: bool,
	/// Key for the opaque identity/property encoding.
	///
	/// This only scrambles tokens, it does not protect them.
	pub codec_key: String,
	/// Source of the client bootstrap script inserted at the first boot marker of a page.
	pub client_script: String,
	pub logging: LoggingConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			debug: false,
			codec_key: "live-dom".to_owned(),
			client_script: "/live-dom.js".to_owned(),
			logging: LoggingConfig::default(),
		}
	}
}

impl Config {
	pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
	/// An [`EnvFilter`](tracing_subscriber::EnvFilter) directive. `RUST_LOG` takes precedence when set.
	pub filter: String,
	pub format: LogFormat,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			filter: "info".to_owned(),
			format: LogFormat::default(),
		}
	}
}

/// Supported logging output formats.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
	/// Human-readable single line output.
	#[default]
	Compact,
	/// Structured JSON suitable for ingestion by logging stacks.
	Json,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_object_yields_defaults() {
		let config = Config::from_json("{}").unwrap();
		assert!(!config.debug);
		assert_eq!(config.codec_key, "live-dom");
		assert_eq!(config.logging.format, LogFormat::Compact);
	}

	#[test]
	fn sections_override_individually() {
		let config = Config::from_json(r#"{ "debug": true, "logging": { "format": "json" } }"#).unwrap();
		assert!(config.debug);
		assert_eq!(config.logging.format, LogFormat::Json);
		assert_eq!(config.logging.filter, "info");
	}
}
