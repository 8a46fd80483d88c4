use std::path::PathBuf;
use std::str::FromStr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

impl FromStr for LogFormat {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"text" => Ok(LogFormat::Text),
			"json" => Ok(LogFormat::Json),
			other => anyhow::bail!("unknown log format {other:?}, expected text or json"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct LogConfig {
	/// One of debug, info, warn or error. Anything else is treated as info.
	pub level: String,
	pub format: LogFormat,
	/// Logs are appended to this file when set; otherwise they go to stderr.
	/// Stdout is never used, it carries the credential document.
	pub file: Option<PathBuf>,
}

impl Default for LogConfig {
	fn default() -> Self {
		LogConfig {
			level: "info".to_string(),
			format: LogFormat::Text,
			file: None,
		}
	}
}

fn level_directive(level: &str) -> &'static str {
	match level.to_ascii_lowercase().as_str() {
		"debug" => "debug",
		"info" => "info",
		"warn" | "warning" => "warn",
		"error" => "error",
		_ => "info",
	}
}

fn filter(cfg: &LogConfig) -> anyhow::Result<EnvFilter> {
	match std::env::var(EnvFilter::DEFAULT_ENV) {
		Ok(directives) if !directives.is_empty() => Ok(EnvFilter::try_new(directives)?),
		_ => Ok(EnvFilter::new(level_directive(&cfg.level))),
	}
}

/// Installs the process-wide subscriber. Must be called once, before any
/// discovery or exchange work starts. The returned guard flushes buffered
/// log lines on drop, so keep it alive until the process exits.
pub fn setup_logging(cfg: &LogConfig) -> anyhow::Result<WorkerGuard> {
	let (writer, guard) = match &cfg.file {
		Some(path) => {
			let file = fs_err::OpenOptions::new()
				.create(true)
				.append(true)
				.open(path)?;
			tracing_appender::non_blocking(file)
		},
		None => tracing_appender::non_blocking(std::io::stderr()),
	};
	let registry = tracing_subscriber::registry().with(filter(cfg)?);
	match cfg.format {
		LogFormat::Text => registry
			.with(fmt::layer().with_ansi(false).with_writer(writer))
			.try_init()?,
		LogFormat::Json => registry
			.with(fmt::layer().json().with_writer(writer))
			.try_init()?,
	}
	Ok(guard)
}

pub mod testing {
	use std::sync::Once;

	use tracing_subscriber::EnvFilter;

	static INIT: Once = Once::new();

	pub fn setup_test_logging() {
		INIT.call_once(|| {
			let _ = tracing_subscriber::fmt()
				.with_env_filter(EnvFilter::new("debug"))
				.with_test_writer()
				.try_init();
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_levels_fall_back_to_info() {
		assert_eq!(level_directive("DEBUG"), "debug");
		assert_eq!(level_directive("warning"), "warn");
		assert_eq!(level_directive("verbose"), "info");
		assert_eq!(level_directive(""), "info");
	}

	#[test]
	fn log_format_parsing() {
		assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
		assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
		assert!("yaml".parse::<LogFormat>().is_err());
	}
}
