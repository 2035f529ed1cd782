//! Privileged display operations the broker performs for its clients.

use std::{fmt, path::Path};

use kms_protocol::Geometry;

mod drm_device;
#[cfg(any(test, feature = "testing"))]
mod memory;

pub use drm_device::{Card, CrtcSnapshot, DrmDisplay};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryDisplay, MemoryOutput, MemoryOverlay};

#[derive(thiserror::Error, Debug)]
pub enum DisplayError {
	#[error("{op} failed: {source}")]
	Io {
		op: &'static str,
		#[source]
		source: std::io::Error,
	},
	#[error("no {kind} with id {id}")]
	UnknownResource { kind: &'static str, id: u32 },
	#[error("connector {source_id} has no mode named {name:?}")]
	ModeNotFound { source_id: u32, name: String },
	#[error("overlay geometry {0} is out of range")]
	InvalidGeometry(Geometry),
}

impl DisplayError {
	pub(crate) fn io(op: &'static str) -> impl FnOnce(std::io::Error) -> Self {
		move |source| Self::Io { op, source }
	}
}

/// Current configuration of one output, as reported by the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
	pub output_id: u32,
	pub framebuffer_id: Option<u32>,
	pub position: (u32, u32),
	pub mode_name: Option<String>,
}

impl fmt::Display for OutputInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"output {} fb {} at ({}, {}) mode [{}]",
			self.output_id,
			self.framebuffer_id.unwrap_or(0),
			self.position.0,
			self.position.1,
			self.mode_name.as_deref().unwrap_or("none")
		)
	}
}

/// Handle on the device that holds mode-setting rights.
///
/// Output ids are CRTC ids, source ids are connector ids and overlay ids are
/// plane ids. Framebuffer ids are registered by clients before they ask the
/// broker to show them.
pub trait DisplayContext {
	type Mode: Clone + fmt::Debug;
	/// Opaque capture of an output's configuration, consumed by
	/// [`DisplayContext::restore_config`].
	type Snapshot: fmt::Debug;

	/// Grants the holder of `token` access to the device.
	fn authenticate(&mut self, token: u32) -> Result<(), DisplayError>;

	fn outputs(&self) -> Result<Vec<OutputInfo>, DisplayError>;

	/// Looks up a mode offered by connector `source_id`.
	/// [`kms_protocol::PREFERRED_MODE`] selects the connector's preferred mode.
	fn resolve_mode(&self, source_id: u32, name: &str) -> Result<Self::Mode, DisplayError>;

	fn current_config(&self, output_id: u32) -> Result<Self::Snapshot, DisplayError>;

	fn apply_config(
		&mut self,
		output_id: u32,
		source_id: u32,
		framebuffer_id: u32,
		mode: &Self::Mode,
	) -> Result<(), DisplayError>;

	/// Puts back a configuration captured by [`DisplayContext::current_config`],
	/// including the sources the output was driving at the time. A snapshot
	/// without a mode disables the output.
	fn restore_config(&mut self, output_id: u32, snapshot: Self::Snapshot) -> Result<(), DisplayError>;

	fn apply_overlay(
		&mut self,
		overlay_id: u32,
		output_id: u32,
		framebuffer_id: u32,
		geometry: Geometry,
	) -> Result<(), DisplayError>;

	fn detach_overlay(&mut self, overlay_id: u32, output_id: u32) -> Result<(), DisplayError>;
}

/// Logs every output of `context` and returns how many there are.
pub fn log_outputs(context: &impl DisplayContext, device: &Path) -> Result<usize, DisplayError> {
	let outputs = context.outputs()?;
	for output in &outputs {
		tracing::info!(device = %device.display(), "{output}");
	}
	Ok(outputs.len())
}
