//! Per-request handlers. Every request yields exactly one [`Response`].

use kms_protocol::{Command, ProtocolError, Request, Response};
use tracing::{debug, info, warn};

use crate::{
	display::{DisplayContext, DisplayError},
	error::RelayError,
	ids::ClientId,
	sessions::{
		ClaimRegistry, OutputBinding, OverlayBinding, ResourceKey, ResourceKind, Session,
	},
};

pub struct Relay<D: DisplayContext> {
	display: D,
	claims: ClaimRegistry,
}

fn conflict(key: ResourceKey) -> impl FnOnce(ClientId) -> RelayError {
	move |owner| RelayError::ResourceConflict {
		kind: key.kind,
		id: key.id,
		owner,
	}
}

/// Checks that the session authenticated with the token the request carries.
fn authorize<S>(session: &Session<S>, token: u32) -> Result<(), RelayError> {
	match session.token() {
		None => Err(RelayError::Unauthenticated),
		Some(expected) if expected != token => Err(RelayError::TokenMismatch {
			expected,
			got: token,
		}),
		Some(_) => Ok(()),
	}
}

/// Turns a decode failure into a reply, or `None` when the frame was too
/// broken to address one and the connection should be dropped.
pub fn reject(client_id: ClientId, err: ProtocolError) -> Option<Response> {
	let token = err.token()?;
	warn!(%client_id, token, "rejecting request: {err}");
	Some(Response::error(token, RelayError::BadRequest(err).reason()))
}

impl<D: DisplayContext> Relay<D> {
	pub fn new(display: D) -> Self {
		Self {
			display,
			claims: ClaimRegistry::new(),
		}
	}

	pub fn claims(&self) -> &ClaimRegistry {
		&self.claims
	}

	#[tracing::instrument(level = "debug", skip(self, session, request), fields(%client_id, token = request.token, command = ?request.command.tag()))]
	pub fn handle(
		&mut self,
		client_id: ClientId,
		session: &mut Session<D::Snapshot>,
		request: Request,
	) -> Response {
		let token = request.token;
		match self.dispatch(client_id, session, request) {
			Ok(()) => Response::ok(token),
			Err(e) => {
				warn!(%client_id, token, "request failed: {e}");
				Response::error(token, e.reason())
			}
		}
	}

	fn dispatch(
		&mut self,
		client_id: ClientId,
		session: &mut Session<D::Snapshot>,
		request: Request,
	) -> Result<(), RelayError> {
		let token = request.token;
		match request.command {
			Command::Authenticate => self.authenticate(client_id, session, token),
			Command::AcquireOutput {
				output_id,
				source_id,
				framebuffer_id,
				mode_name,
			} => {
				authorize(session, token)?;
				self.acquire_output(
					client_id,
					session,
					OutputRequest {
						output_id,
						source_id,
						framebuffer_id,
						mode_name,
					},
				)
			}
			Command::AcquireOverlay {
				output_id,
				overlay_id,
				framebuffer_id,
				geometry,
			} => {
				authorize(session, token)?;
				self.acquire_overlay(
					client_id,
					session,
					OverlayBinding {
						overlay_id,
						output_id,
						framebuffer_id,
						geometry,
					},
				)
			}
			Command::ReleaseOutput => {
				authorize(session, token)?;
				self.release_output(client_id, session)
			}
			Command::ReleaseOverlay => {
				authorize(session, token)?;
				self.release_overlay(client_id, session)
			}
		}
	}

	fn authenticate(
		&mut self,
		client_id: ClientId,
		session: &mut Session<D::Snapshot>,
		token: u32,
	) -> Result<(), RelayError> {
		match session.token() {
			// The kernel forgets a magic once it has been authorized.
			Some(current) if current == token => return Ok(()),
			Some(_) if session.output().is_some() => {
				return Err(RelayError::Busy(ResourceKind::Output));
			}
			Some(_) if session.overlay().is_some() => {
				return Err(RelayError::Busy(ResourceKind::Overlay));
			}
			_ => {}
		}
		self.display
			.authenticate(token)
			.map_err(|source| RelayError::AuthorizationRejected { token, source })?;
		session.authenticate(token);
		info!(%client_id, token, "client authenticated");
		Ok(())
	}

	fn acquire_output(
		&mut self,
		client_id: ClientId,
		session: &mut Session<D::Snapshot>,
		request: OutputRequest,
	) -> Result<(), RelayError> {
		let OutputRequest {
			output_id,
			source_id,
			framebuffer_id,
			mode_name,
		} = request;
		if session.output().is_some() {
			return Err(RelayError::Busy(ResourceKind::Output));
		}
		let key = ResourceKey::output(output_id);
		let source_key = ResourceKey::source(source_id);
		self.claims.check(key, client_id).map_err(conflict(key))?;
		// Setting the CRTC would silently take the connector from its owner.
		self.claims
			.check(source_key, client_id)
			.map_err(conflict(source_key))?;

		let mode = self
			.display
			.resolve_mode(source_id, &mode_name)
			.map_err(|e| match e {
				DisplayError::ModeNotFound { source_id, name } => {
					RelayError::UnknownMode { source_id, name }
				}
				other => other.into(),
			})?;
		let prior_state = self.display.current_config(output_id)?;
		debug!(output_id, ?prior_state, "captured output configuration");
		self.display
			.apply_config(output_id, source_id, framebuffer_id, &mode)?;

		self.claims.claim(key, client_id).map_err(conflict(key))?;
		self.claims
			.claim(source_key, client_id)
			.map_err(conflict(source_key))?;
		session.bind_output(OutputBinding::new(
			output_id,
			source_id,
			framebuffer_id,
			mode_name,
			prior_state,
		));
		info!(%client_id, output_id, source_id, framebuffer_id, ?mode, "output acquired");
		Ok(())
	}

	fn acquire_overlay(
		&mut self,
		client_id: ClientId,
		session: &mut Session<D::Snapshot>,
		binding: OverlayBinding,
	) -> Result<(), RelayError> {
		if session.overlay().is_some() {
			return Err(RelayError::Busy(ResourceKind::Overlay));
		}
		let key = ResourceKey::overlay(binding.overlay_id);
		self.claims.check(key, client_id).map_err(conflict(key))?;

		let OverlayBinding {
			overlay_id,
			output_id,
			framebuffer_id,
			geometry,
		} = binding;
		self.display
			.apply_overlay(overlay_id, output_id, framebuffer_id, geometry)?;

		self.claims.claim(key, client_id).map_err(conflict(key))?;
		session.bind_overlay(binding);
		info!(%client_id, overlay_id, output_id, framebuffer_id, %geometry, "overlay acquired");
		Ok(())
	}

	fn release_output(
		&mut self,
		client_id: ClientId,
		session: &mut Session<D::Snapshot>,
	) -> Result<(), RelayError> {
		let Some(mut binding) = session.take_output() else {
			debug!(%client_id, "no output bound, nothing to release");
			return Ok(());
		};
		self.claims
			.release(ResourceKey::output(binding.output_id), client_id);
		self.claims
			.release(ResourceKey::source(binding.source_id), client_id);
		info!(
			%client_id,
			output_id = binding.output_id,
			session_age_ms = session.age().map(|age| age.num_milliseconds()),
			"releasing output"
		);
		if let Some(prior_state) = binding.take_prior_state() {
			self.display
				.restore_config(binding.output_id, prior_state)?;
		}
		Ok(())
	}

	fn release_overlay(
		&mut self,
		client_id: ClientId,
		session: &mut Session<D::Snapshot>,
	) -> Result<(), RelayError> {
		let Some(binding) = session.take_overlay() else {
			debug!(%client_id, "no overlay bound, nothing to release");
			return Ok(());
		};
		self.claims
			.release(ResourceKey::overlay(binding.overlay_id), client_id);
		info!(%client_id, overlay_id = binding.overlay_id, "releasing overlay");
		self.display
			.detach_overlay(binding.overlay_id, binding.output_id)?;
		Ok(())
	}

	/// Releases everything the session holds, on disconnect or shutdown.
	pub fn release_all(&mut self, client_id: ClientId, session: &mut Session<D::Snapshot>) {
		if let Err(e) = self.release_overlay(client_id, session) {
			warn!(%client_id, "failed to detach overlay: {e}");
		}
		if let Err(e) = self.release_output(client_id, session) {
			warn!(%client_id, "failed to restore output: {e}");
		}
		self.claims.release_client(client_id);
	}
}

struct OutputRequest {
	output_id: u32,
	source_id: u32,
	framebuffer_id: u32,
	mode_name: String,
}
