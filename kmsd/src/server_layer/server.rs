use std::{
	collections::HashMap,
	fs::Permissions,
	io,
	os::{
		fd::AsFd,
		unix::{fs::PermissionsExt, net::UnixListener},
	},
	path::{Path, PathBuf},
	sync::atomic::{AtomicBool, Ordering},
};

use kms_protocol::{ProtocolError, Request};
use nix::{
	errno::Errno,
	poll::{PollFd, PollFlags, PollTimeout, poll},
};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::connection::ClientConnection;
use crate::{
	config::{BrokerConfig, DEFAULT_MAX_CLIENTS, DEFAULT_POLL_TIMEOUT_MS},
	display::DisplayContext,
	ids::ClientId,
	relay::{self, Relay},
	sessions::{Session, SessionState},
};

struct ConnectedClient<S> {
	connection: ClientConnection,
	session: Session<S>,
}

/// Sockets poll reported as ready during one loop iteration.
struct Readiness {
	listener: bool,
	clients: Vec<ClientId>,
}

pub struct Broker<D: DisplayContext> {
	listener: UnixListener,
	socket_path: PathBuf,
	relay: Relay<D>,
	connected_clients: HashMap<ClientId, ConnectedClient<D::Snapshot>>,
	max_clients: usize,
	poll_timeout_ms: u16,
}

#[derive(Error, Debug)]
pub enum BindError {
	#[error("io error: {0}")]
	IOError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ServeError {
	#[error("poll failed: {0}")]
	Poll(#[source] Errno),
}

impl<D: DisplayContext> Broker<D> {
	#[tracing::instrument(level = "info", skip(path, display), fields(path = ?path.as_ref().display()))]
	pub fn bind(path: impl AsRef<Path>, display: D) -> Result<Self, BindError> {
		std::fs::remove_file(&path).ok();
		let listener = UnixListener::bind(&path)?;
		listener.set_nonblocking(true)?;
		std::fs::set_permissions(&path, Permissions::from_mode(0o777)).ok();
		Ok(Self {
			listener,
			socket_path: path.as_ref().to_path_buf(),
			relay: Relay::new(display),
			connected_clients: Default::default(),
			max_clients: DEFAULT_MAX_CLIENTS,
			poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
		})
	}

	pub fn from_config(config: &BrokerConfig, display: D) -> Result<Self, BindError> {
		Ok(Self::bind(config.socket_path(), display)?
			.with_max_clients(config.max_clients())
			.with_poll_timeout_ms(config.poll_timeout_ms()))
	}

	pub fn with_max_clients(mut self, max_clients: usize) -> Self {
		self.max_clients = max_clients.max(1);
		self
	}

	pub fn with_poll_timeout_ms(mut self, timeout_ms: u16) -> Self {
		self.poll_timeout_ms = timeout_ms;
		self
	}

	fn authenticated_clients(&self) -> usize {
		self.connected_clients
			.values()
			.filter(|client| client.session.state() != SessionState::Unauthenticated)
			.count()
	}

	/// Runs until `shutdown` is set, then releases every binding and removes
	/// the socket file.
	pub fn serve(mut self, shutdown: &AtomicBool) -> Result<(), ServeError> {
		let result = self.run(shutdown);
		if let Err(e) = &result {
			error!("broker loop failed: {e}");
		}
		self.shutdown();
		result
	}

	fn run(&mut self, shutdown: &AtomicBool) -> Result<(), ServeError> {
		info!(
			path = ?self.socket_path.display(),
			max_clients = self.max_clients,
			poll_timeout_ms = self.poll_timeout_ms,
			"broker listening"
		);
		while !shutdown.load(Ordering::Relaxed) {
			let span = tracing::trace_span!(
				"broker_loop",
				connected_clients = self.connected_clients.len(),
				authenticated_clients = self.authenticated_clients(),
				claims = self.relay.claims().len(),
			);
			let _span = span.enter();
			let Some(ready) = self.wait()? else {
				continue;
			};
			if ready.listener {
				self.handle_accept();
			}
			for client_id in ready.clients {
				self.handle_client_readable(client_id);
			}
		}
		info!("shutdown requested");
		Ok(())
	}

	fn wait(&self) -> Result<Option<Readiness>, ServeError> {
		let (client_ids, client_fds): (Vec<_>, Vec<_>) = self
			.connected_clients
			.iter()
			.map(|(id, client)| (*id, PollFd::new(client.connection.as_fd(), PollFlags::POLLIN)))
			.unzip();
		let mut fds = Vec::with_capacity(client_fds.len() + 1);
		fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
		fds.extend(client_fds);

		match poll(&mut fds, PollTimeout::from(self.poll_timeout_ms)) {
			Ok(0) => {
				debug!(
					connected_clients = self.connected_clients.len(),
					authenticated_clients = self.authenticated_clients(),
					"broker idle"
				);
				return Ok(None);
			}
			Ok(_) => {}
			Err(Errno::EINTR) => return Ok(None),
			Err(e) => return Err(ServeError::Poll(e)),
		}

		let wanted = PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL;
		let is_ready = |fd: &PollFd| fd.revents().is_some_and(|r| r.intersects(wanted));
		let Some((listener_fd, client_fds)) = fds.split_first() else {
			return Ok(None);
		};
		Ok(Some(Readiness {
			listener: is_ready(listener_fd),
			clients: client_ids
				.into_iter()
				.zip(client_fds)
				.filter(|(_, fd)| is_ready(*fd))
				.map(|(id, _)| id)
				.collect(),
		}))
	}

	#[tracing::instrument(level = "info", skip(self), fields(connected_clients = self.connected_clients.len()))]
	fn handle_accept(&mut self) {
		macro_rules! or_continue {
			($expr:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
				match $expr {
					Ok(val) => val,
					Err(e) => {
						tracing::error!($fmt $(, $arg)*, e);
						return;
					}
				}
			};
		}

		let stream = match self.listener.accept() {
			Ok((stream, _addr)) => stream,
			Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
			Err(e) => {
				error!("failed to accept connection: {e}");
				return;
			}
		};
		if self.connected_clients.len() >= self.max_clients {
			warn!(max_clients = self.max_clients, "client table full, dropping connection");
			return;
		}
		let connection = or_continue!(
			ClientConnection::new(stream),
			"failed to accept connection: socket setup failed: {}"
		);
		let client_id = ClientId::rand();
		self.connected_clients.insert(
			client_id,
			ConnectedClient {
				connection,
				session: Session::new(),
			},
		);
		info!(%client_id, "client successfully connected");
	}

	fn handle_client_readable(&mut self, client_id: ClientId) {
		let Some(client) = self.connected_clients.get_mut(&client_id) else {
			return;
		};
		match client.connection.fill() {
			Ok(bytes) => trace!(%client_id, bytes, "read from client"),
			Err(ProtocolError::WouldBlock) => return,
			Err(ProtocolError::UnexpectedEof) => {
				info!(%client_id, "client closed the connection");
				self.disconnect_client(client_id);
				return;
			}
			Err(e) => {
				warn!(%client_id, "failed to read from client: {e}");
				self.disconnect_client(client_id);
				return;
			}
		}

		loop {
			let Some(client) = self.connected_clients.get_mut(&client_id) else {
				return;
			};
			let frame = match client.connection.next_frame() {
				Ok(Some(frame)) => frame,
				Ok(None) => return,
				Err(e) => {
					warn!(%client_id, "dropping client: {e}");
					self.disconnect_client(client_id);
					return;
				}
			};
			trace!(%client_id, %frame, "frame received");
			let response = match Request::decode(&frame) {
				Ok(request) => self.relay.handle(client_id, &mut client.session, request),
				Err(e) => match relay::reject(client_id, e) {
					Some(response) => response,
					None => {
						warn!(%client_id, %frame, "unreadable frame, dropping client");
						self.disconnect_client(client_id);
						return;
					}
				},
			};
			if let Err(e) = client.connection.send(&response) {
				warn!(%client_id, "failed to send response: {e}");
				self.disconnect_client(client_id);
				return;
			}
		}
	}

	#[tracing::instrument(level = "info", skip(self), fields(connected_clients = self.connected_clients.len()))]
	fn disconnect_client(&mut self, client_id: ClientId) {
		let Some(mut client) = self.connected_clients.remove(&client_id) else {
			warn!("tried disconnecting a non-existing client");
			return;
		};
		self.relay.release_all(client_id, &mut client.session);
		info!(%client_id, "client disconnected");
	}

	fn shutdown(&mut self) {
		let client_ids = self.connected_clients.keys().copied().collect::<Vec<_>>();
		for client_id in client_ids {
			self.disconnect_client(client_id);
		}
		if let Err(e) = std::fs::remove_file(&self.socket_path) {
			warn!(path = ?self.socket_path.display(), "failed to remove socket: {e}");
		}
		info!("broker stopped");
	}
}
