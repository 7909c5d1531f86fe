use std::fs;

use anyhow::{Context, Result};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "live-directory.log";

/// Install the global subscriber: console output plus, when a directory is
/// configured, a daily-rolling log file.
///
/// `RUST_LOG` takes precedence over the configured level. Keep the returned
/// guard alive for as long as logs should be flushed to the file.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
	let env_filter =
		EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

	let (file_layer, guard) = match &config.directory {
		Some(directory) => {
			fs::create_dir_all(directory)
				.with_context(|| format!("creating log directory {}", directory.display()))?;

			let (non_blocking, guard) =
				tracing_appender::non_blocking(rolling::daily(directory, LOG_FILE_PREFIX));

			(
				Some(
					fmt::layer()
						.with_target(true)
						.with_ansi(false)
						.with_writer(non_blocking),
				),
				Some(guard),
			)
		}
		None => (None, None),
	};

	tracing_subscriber::registry()
		.with(env_filter)
		.with(fmt::layer().with_target(true).with_writer(std::io::stderr))
		.with(file_layer)
		.try_init()?;

	Ok(guard)
}
