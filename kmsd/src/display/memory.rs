//! A [`DisplayContext`] that keeps outputs and overlays in memory.
//!
//! Cloned handles share state, so a test can hand one clone to the broker and
//! inspect the display through another.

use std::{
	collections::{HashMap, HashSet},
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use kms_protocol::{Geometry, PREFERRED_MODE};

use super::{DisplayContext, DisplayError, OutputInfo};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryOutput {
	pub framebuffer_id: Option<u32>,
	pub source_id: Option<u32>,
	pub mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOverlay {
	pub output_id: u32,
	pub framebuffer_id: u32,
	pub geometry: Geometry,
}

#[derive(Debug, Default)]
struct State {
	tokens: HashSet<u32>,
	authenticated: Vec<u32>,
	connectors: HashMap<u32, Vec<String>>,
	outputs: HashMap<u32, MemoryOutput>,
	overlays: HashMap<u32, Option<MemoryOverlay>>,
	broken_framebuffers: HashSet<u32>,
	failing_release: bool,
}

impl State {
	/// Sets `output_id` to `config`. Like a real mode-set, a connector can
	/// only feed one output, so it is taken from any other output first.
	fn set_output(&mut self, output_id: u32, config: MemoryOutput) -> Result<(), DisplayError> {
		if !self.outputs.contains_key(&output_id) {
			return Err(DisplayError::UnknownResource {
				kind: "crtc",
				id: output_id,
			});
		}
		if let Some(source_id) = config.source_id {
			for other in self.outputs.values_mut() {
				if other.source_id == Some(source_id) {
					other.source_id = None;
				}
			}
		}
		self.outputs.insert(output_id, config);
		Ok(())
	}
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDisplay {
	state: Arc<Mutex<State>>,
}

impl MemoryDisplay {
	pub fn new() -> Self {
		Self::default()
	}

	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Makes `token` acceptable to [`DisplayContext::authenticate`].
	pub fn with_token(self, token: u32) -> Self {
		self.state().tokens.insert(token);
		self
	}

	/// Adds a connector offering `modes`; the first one is preferred.
	pub fn with_connector(self, source_id: u32, modes: &[&str]) -> Self {
		self.state()
			.connectors
			.insert(source_id, modes.iter().map(|m| m.to_string()).collect());
		self
	}

	pub fn with_output(self, output_id: u32, output: MemoryOutput) -> Self {
		self.state().outputs.insert(output_id, output);
		self
	}

	pub fn with_overlay(self, overlay_id: u32) -> Self {
		self.state().overlays.insert(overlay_id, None);
		self
	}

	/// Makes every operation that scans out `framebuffer_id` fail.
	pub fn with_broken_framebuffer(self, framebuffer_id: u32) -> Self {
		self.state().broken_framebuffers.insert(framebuffer_id);
		self
	}

	/// Makes restoring outputs and detaching overlays fail until reset.
	pub fn set_failing_release(&self, failing: bool) {
		self.state().failing_release = failing;
	}

	pub fn output(&self, output_id: u32) -> Option<MemoryOutput> {
		self.state().outputs.get(&output_id).cloned()
	}

	pub fn overlay(&self, overlay_id: u32) -> Option<MemoryOverlay> {
		self.state().overlays.get(&overlay_id).copied().flatten()
	}

	/// Tokens authenticated so far, in call order.
	pub fn authenticated(&self) -> Vec<u32> {
		self.state().authenticated.clone()
	}
}

fn scanout_error(op: &'static str) -> DisplayError {
	DisplayError::Io {
		op,
		source: std::io::Error::from_raw_os_error(22),
	}
}

fn release_error(op: &'static str) -> DisplayError {
	DisplayError::Io {
		op,
		source: std::io::Error::from_raw_os_error(5),
	}
}

impl DisplayContext for MemoryDisplay {
	type Mode = String;
	type Snapshot = MemoryOutput;

	fn authenticate(&mut self, token: u32) -> Result<(), DisplayError> {
		let mut state = self.state();
		if !state.tokens.contains(&token) {
			return Err(DisplayError::Io {
				op: "authenticate magic",
				source: std::io::Error::from_raw_os_error(13),
			});
		}
		state.authenticated.push(token);
		Ok(())
	}

	fn outputs(&self) -> Result<Vec<OutputInfo>, DisplayError> {
		let state = self.state();
		let mut outputs = state
			.outputs
			.iter()
			.map(|(&output_id, output)| OutputInfo {
				output_id,
				framebuffer_id: output.framebuffer_id,
				position: (0, 0),
				mode_name: output.mode.clone(),
			})
			.collect::<Vec<_>>();
		outputs.sort_by_key(|o| o.output_id);
		Ok(outputs)
	}

	fn resolve_mode(&self, source_id: u32, name: &str) -> Result<String, DisplayError> {
		let state = self.state();
		let modes = state
			.connectors
			.get(&source_id)
			.ok_or(DisplayError::UnknownResource {
				kind: "connector",
				id: source_id,
			})?;
		let found = if name == PREFERRED_MODE {
			modes.first()
		} else {
			modes.iter().find(|mode| *mode == name)
		};
		found.cloned().ok_or_else(|| DisplayError::ModeNotFound {
			source_id,
			name: name.to_owned(),
		})
	}

	fn current_config(&self, output_id: u32) -> Result<MemoryOutput, DisplayError> {
		self.output(output_id).ok_or(DisplayError::UnknownResource {
			kind: "crtc",
			id: output_id,
		})
	}

	fn apply_config(
		&mut self,
		output_id: u32,
		source_id: u32,
		framebuffer_id: u32,
		mode: &String,
	) -> Result<(), DisplayError> {
		let mut state = self.state();
		if state.broken_framebuffers.contains(&framebuffer_id) {
			return Err(scanout_error("set crtc"));
		}
		state.set_output(
			output_id,
			MemoryOutput {
				framebuffer_id: Some(framebuffer_id),
				source_id: Some(source_id),
				mode: Some(mode.clone()),
			},
		)
	}

	fn restore_config(&mut self, output_id: u32, snapshot: MemoryOutput) -> Result<(), DisplayError> {
		let mut state = self.state();
		if state.failing_release {
			return Err(release_error("restore crtc"));
		}
		let config = match snapshot.mode {
			Some(_) => snapshot,
			None => MemoryOutput::default(),
		};
		state.set_output(output_id, config)
	}

	fn apply_overlay(
		&mut self,
		overlay_id: u32,
		output_id: u32,
		framebuffer_id: u32,
		geometry: Geometry,
	) -> Result<(), DisplayError> {
		let mut state = self.state();
		if state.broken_framebuffers.contains(&framebuffer_id) {
			return Err(scanout_error("set plane"));
		}
		let overlay = state
			.overlays
			.get_mut(&overlay_id)
			.ok_or(DisplayError::UnknownResource {
				kind: "plane",
				id: overlay_id,
			})?;
		*overlay = Some(MemoryOverlay {
			output_id,
			framebuffer_id,
			geometry,
		});
		Ok(())
	}

	fn detach_overlay(&mut self, overlay_id: u32, _output_id: u32) -> Result<(), DisplayError> {
		let mut state = self.state();
		if state.failing_release {
			return Err(release_error("detach plane"));
		}
		let overlay = state
			.overlays
			.get_mut(&overlay_id)
			.ok_or(DisplayError::UnknownResource {
				kind: "plane",
				id: overlay_id,
			})?;
		*overlay = None;
		Ok(())
	}
}
