use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber according to `config`.
///
/// Returns `false` if another subscriber was already installed, which is not an error.
pub fn init(config: &LoggingConfig) -> bool {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
	let builder = fmt().with_env_filter(filter).with_target(true);
	match config.format {
		LogFormat::Compact => builder.compact().try_init().is_ok(),
		LogFormat::Json => builder.json().try_init().is_ok(),
	}
}

/// Renders a value for logging, or only its shape unless `dangerous-logging` is enabled.
pub(crate) fn redact(value: &serde_json::Value) -> String {
	if cfg!(feature = "dangerous-logging") {
		value.to_string()
	} else {
		match value {
			serde_json::Value::Null => "null".to_owned(),
			serde_json::Value::Bool(_) => "<bool>".to_owned(),
			serde_json::Value::Number(_) => "<number>".to_owned(),
			serde_json::Value::String(s) => format!("<string:{}>", s.len()),
			serde_json::Value::Array(a) => format!("<array:{}>", a.len()),
			serde_json::Value::Object(o) => format!("<object:{}>", o.len()),
		}
	}
}
