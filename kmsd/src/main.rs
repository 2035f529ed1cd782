use std::sync::{Arc, atomic::AtomicBool};

use anyhow::Context;
use kmsd::{Broker, BrokerConfig, display::DrmDisplay};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn run() -> anyhow::Result<()> {
	let config = BrokerConfig::from_env();
	let shutdown = Arc::new(AtomicBool::new(false));
	for signal in [SIGINT, SIGTERM] {
		signal_hook::flag::register(signal, Arc::clone(&shutdown))
			.context("failed to install signal handler")?;
	}

	let drm_display = DrmDisplay::open(config.device())
		.with_context(|| format!("failed to open {}", config.device().display()))?;
	let outputs = kmsd::display::log_outputs(&drm_display, drm_display.path())
		.context("failed to query outputs")?;
	info!(outputs, "display ready");

	let broker =
		Broker::from_config(&config, drm_display).context("failed to bind broker socket")?;
	broker.serve(&shutdown)?;
	Ok(())
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();
	if let Err(err) = run() {
		error!("kmsd failed: {err:#}");
		std::process::exit(1);
	}
}
