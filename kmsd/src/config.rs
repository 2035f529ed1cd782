use std::{
	fmt::Display,
	path::{Path, PathBuf},
	str::FromStr,
};

use kms_protocol::DEFAULT_SOCKET_PATH;

pub const DEFAULT_DEVICE: &str = "/dev/dri/card0";
pub const DEFAULT_MAX_CLIENTS: usize = 5;
pub const DEFAULT_POLL_TIMEOUT_MS: u16 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
	socket_path: PathBuf,
	device: PathBuf,
	max_clients: usize,
	poll_timeout_ms: u16,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			socket_path: DEFAULT_SOCKET_PATH.into(),
			device: DEFAULT_DEVICE.into(),
			max_clients: DEFAULT_MAX_CLIENTS,
			poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
		}
	}
}

/// Parses `key` through `lookup`, keeping `default` when unset, empty or invalid.
fn knob<T>(
	lookup: &impl Fn(&str) -> Option<String>,
	key: &str,
	default: T,
	valid: impl Fn(&T) -> bool,
) -> T
where
	T: FromStr,
	T::Err: Display,
{
	let Some(raw) = lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
		return default;
	};
	match raw.parse::<T>() {
		Ok(value) if valid(&value) => value,
		Ok(_) => {
			tracing::warn!(value = %raw, "{key} out of range, using default");
			default
		}
		Err(e) => {
			tracing::warn!(value = %raw, "invalid {key}: {e}");
			default
		}
	}
}

impl BrokerConfig {
	pub fn from_env() -> Self {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let defaults = Self::default();
		Self {
			socket_path: knob(&lookup, "KMSD_SOCKET_PATH", defaults.socket_path, |_| true),
			device: knob(&lookup, "KMSD_DEVICE", defaults.device, |_| true),
			max_clients: knob(&lookup, "KMSD_MAX_CLIENTS", defaults.max_clients, |n| *n >= 1),
			poll_timeout_ms: knob(
				&lookup,
				"KMSD_POLL_TIMEOUT_MS",
				defaults.poll_timeout_ms,
				|_| true,
			),
		}
	}

	pub fn socket_path(&self) -> &Path {
		&self.socket_path
	}

	pub fn device(&self) -> &Path {
		&self.device
	}

	pub fn max_clients(&self) -> usize {
		self.max_clients
	}

	pub fn poll_timeout_ms(&self) -> u16 {
		self.poll_timeout_ms
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |key| map.get(key).cloned()
	}

	#[test]
	fn defaults_when_unset() {
		let config = BrokerConfig::from_lookup(lookup(&[]));
		assert_eq!(config, BrokerConfig::default());
		assert_eq!(config.socket_path(), Path::new("/tmp/drm_srv"));
		assert_eq!(config.max_clients(), 5);
		assert_eq!(config.poll_timeout_ms(), 10_000);
	}

	#[test]
	fn reads_overrides() {
		let config = BrokerConfig::from_lookup(lookup(&[
			("KMSD_SOCKET_PATH", "/run/kmsd.sock"),
			("KMSD_DEVICE", "/dev/dri/card1"),
			("KMSD_MAX_CLIENTS", " 2 "),
			("KMSD_POLL_TIMEOUT_MS", "250"),
		]));
		assert_eq!(config.socket_path(), Path::new("/run/kmsd.sock"));
		assert_eq!(config.device(), Path::new("/dev/dri/card1"));
		assert_eq!(config.max_clients(), 2);
		assert_eq!(config.poll_timeout_ms(), 250);
	}

	#[test]
	fn invalid_values_fall_back() {
		let config = BrokerConfig::from_lookup(lookup(&[
			("KMSD_MAX_CLIENTS", "0"),
			("KMSD_POLL_TIMEOUT_MS", "100000"),
			("KMSD_SOCKET_PATH", ""),
		]));
		assert_eq!(config, BrokerConfig::default());
	}
}
