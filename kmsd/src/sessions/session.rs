use chrono::{DateTime, TimeDelta, Utc};
use kms_protocol::Geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Unauthenticated,
	Authenticated,
	ResourceAcquired,
}

/// An output a session is scanning out to, with what was there before.
#[derive(Debug)]
pub struct OutputBinding<S> {
	pub output_id: u32,
	pub source_id: u32,
	pub framebuffer_id: u32,
	pub mode_name: String,
	prior_state: Option<S>,
}

impl<S> OutputBinding<S> {
	pub fn new(
		output_id: u32,
		source_id: u32,
		framebuffer_id: u32,
		mode_name: String,
		prior_state: S,
	) -> Self {
		Self {
			output_id,
			source_id,
			framebuffer_id,
			mode_name,
			prior_state: Some(prior_state),
		}
	}

	pub fn prior_state(&self) -> Option<&S> {
		self.prior_state.as_ref()
	}

	/// Hands out the captured configuration; later calls return `None`.
	pub fn take_prior_state(&mut self) -> Option<S> {
		self.prior_state.take()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayBinding {
	pub overlay_id: u32,
	pub output_id: u32,
	pub framebuffer_id: u32,
	pub geometry: Geometry,
}

/// Broker-side state of one client connection.
#[derive(Debug)]
pub struct Session<S> {
	token: Option<u32>,
	authenticated_at: Option<DateTime<Utc>>,
	output: Option<OutputBinding<S>>,
	overlay: Option<OverlayBinding>,
}

impl<S> Default for Session<S> {
	fn default() -> Self {
		Self {
			token: None,
			authenticated_at: None,
			output: None,
			overlay: None,
		}
	}
}

impl<S> Session<S> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn state(&self) -> SessionState {
		match (self.token, self.has_bindings()) {
			(None, _) => SessionState::Unauthenticated,
			(Some(_), false) => SessionState::Authenticated,
			(Some(_), true) => SessionState::ResourceAcquired,
		}
	}

	pub fn token(&self) -> Option<u32> {
		self.token
	}

	pub fn authenticated_at(&self) -> Option<DateTime<Utc>> {
		self.authenticated_at
	}

	pub fn authenticate(&mut self, token: u32) {
		self.token = Some(token);
		self.authenticated_at = Some(Utc::now());
	}

	pub fn has_bindings(&self) -> bool {
		self.output.is_some() || self.overlay.is_some()
	}

	pub fn output(&self) -> Option<&OutputBinding<S>> {
		self.output.as_ref()
	}

	pub fn overlay(&self) -> Option<&OverlayBinding> {
		self.overlay.as_ref()
	}

	pub fn bind_output(&mut self, binding: OutputBinding<S>) {
		self.output = Some(binding);
	}

	pub fn bind_overlay(&mut self, binding: OverlayBinding) {
		self.overlay = Some(binding);
	}

	pub fn take_output(&mut self) -> Option<OutputBinding<S>> {
		self.output.take()
	}

	pub fn take_overlay(&mut self) -> Option<OverlayBinding> {
		self.overlay.take()
	}

	/// Time since the session authenticated.
	pub fn age(&self) -> Option<TimeDelta> {
		self.authenticated_at.map(|at| Utc::now() - at)
	}
}
