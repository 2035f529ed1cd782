//! Blocking client for the kmsd broker.

mod card;
mod error;

pub use card::{Card, SolidFramebuffer};
pub use error::KmsClientError;

use std::{io, os::unix::net::UnixStream, path::Path, time::Duration};

use kms_protocol::{Command, FrameReader, Geometry, ProtocolError, Request, Status};

/// Synchronous handle on a broker connection.
///
/// Every call sends one request and blocks until the response carrying the
/// same token arrives.
#[derive(Debug)]
pub struct BrokerClient {
	stream: UnixStream,
	reader: FrameReader,
	token: Option<u32>,
}

impl BrokerClient {
	pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

	pub fn connect(path: impl AsRef<Path>) -> Result<Self, KmsClientError> {
		let stream = kms_protocol::unix_socket_utils::connect_stream(path)?;
		Ok(Self::from_stream(stream)?)
	}

	pub fn from_stream(stream: UnixStream) -> io::Result<Self> {
		stream.set_read_timeout(Some(Self::RESPONSE_TIMEOUT))?;
		Ok(Self {
			stream,
			reader: FrameReader::new(),
			token: None,
		})
	}

	pub fn token(&self) -> Option<u32> {
		self.token
	}

	pub fn authenticate(&mut self, token: u32) -> Result<(), KmsClientError> {
		self.call(Request::new(token, Command::Authenticate))?;
		self.token = Some(token);
		Ok(())
	}

	pub fn acquire_output(
		&mut self,
		output_id: u32,
		source_id: u32,
		framebuffer_id: u32,
		mode_name: &str,
	) -> Result<(), KmsClientError> {
		let token = self.session_token()?;
		self.call(Request::new(
			token,
			Command::AcquireOutput {
				output_id,
				source_id,
				framebuffer_id,
				mode_name: mode_name.to_owned(),
			},
		))
	}

	pub fn acquire_overlay(
		&mut self,
		output_id: u32,
		overlay_id: u32,
		framebuffer_id: u32,
		geometry: Geometry,
	) -> Result<(), KmsClientError> {
		let token = self.session_token()?;
		self.call(Request::new(
			token,
			Command::AcquireOverlay {
				output_id,
				overlay_id,
				framebuffer_id,
				geometry,
			},
		))
	}

	pub fn release_output(&mut self) -> Result<(), KmsClientError> {
		let token = self.session_token()?;
		self.call(Request::new(token, Command::ReleaseOutput))
	}

	pub fn release_overlay(&mut self) -> Result<(), KmsClientError> {
		let token = self.session_token()?;
		self.call(Request::new(token, Command::ReleaseOverlay))
	}

	fn session_token(&self) -> Result<u32, KmsClientError> {
		self.token.ok_or(KmsClientError::NotAuthenticated)
	}

	fn call(&mut self, request: Request) -> Result<(), KmsClientError> {
		let token = request.token;
		tracing::debug!(token, command = ?request.command.tag(), "sending request");
		request.encode_and_send(&self.stream)?;
		loop {
			let frame = match self.reader.read_framed(&self.stream) {
				Ok(frame) => frame,
				Err(ProtocolError::WouldBlock) => {
					return Err(KmsClientError::Timeout(Self::RESPONSE_TIMEOUT));
				}
				Err(ProtocolError::Io(e)) if e.kind() == io::ErrorKind::TimedOut => {
					return Err(KmsClientError::Timeout(Self::RESPONSE_TIMEOUT));
				}
				Err(e) => return Err(e.into()),
			};
			let response = kms_protocol::Response::decode(&frame)?;
			if response.token != token {
				tracing::warn!(expected = token, got = response.token, "skipping response for another token");
				continue;
			}
			return match response.status {
				Status::Ok => Ok(()),
				Status::Error => Err(KmsClientError::Rejected {
					token,
					reason: response.reason,
				}),
			};
		}
	}
}

#[cfg(test)]
mod tests {
	use std::thread;

	use kms_protocol::{ErrorReason, Response};

	use super::*;

	/// Answers each request frame with whatever `reply` returns for it.
	fn fake_broker(
		stream: UnixStream,
		requests: usize,
		reply: impl Fn(&Request) -> Vec<Response> + Send + 'static,
	) -> thread::JoinHandle<Vec<Request>> {
		thread::spawn(move || {
			let mut reader = FrameReader::new();
			let mut seen = Vec::new();
			for _ in 0..requests {
				let frame = reader.read_framed(&stream).unwrap();
				let request = Request::decode(&frame).unwrap();
				for response in reply(&request) {
					response.encode_and_send(&stream).unwrap();
				}
				seen.push(request);
			}
			seen
		})
	}

	#[test]
	fn requests_carry_the_session_token() {
		let (ours, theirs) = UnixStream::pair().unwrap();
		let broker = fake_broker(theirs, 3, |request| vec![Response::ok(request.token)]);
		let mut client = BrokerClient::from_stream(ours).unwrap();

		assert!(matches!(
			client.release_output(),
			Err(KmsClientError::NotAuthenticated)
		));
		client.authenticate(42).unwrap();
		client.acquire_output(40, 30, 500, "preferred").unwrap();
		client.release_output().unwrap();

		let seen = broker.join().unwrap();
		assert!(seen.iter().all(|request| request.token == 42));
		assert_eq!(seen[2].command, Command::ReleaseOutput);
	}

	#[test]
	fn stale_responses_are_skipped() {
		let (ours, theirs) = UnixStream::pair().unwrap();
		let broker = fake_broker(theirs, 1, |request| {
			vec![Response::ok(request.token + 1), Response::ok(request.token)]
		});
		let mut client = BrokerClient::from_stream(ours).unwrap();
		client.authenticate(7).unwrap();
		assert_eq!(client.token(), Some(7));
		broker.join().unwrap();
	}

	#[test]
	fn error_status_becomes_rejection() {
		let (ours, theirs) = UnixStream::pair().unwrap();
		let broker = fake_broker(theirs, 1, |request| {
			vec![Response::error(request.token, ErrorReason::AuthRejected)]
		});
		let mut client = BrokerClient::from_stream(ours).unwrap();
		let err = client.authenticate(9).unwrap_err();
		assert_eq!(err.reason(), Some(ErrorReason::AuthRejected));
		assert_eq!(err.to_string(), "broker rejected request 9: auth_rejected");
		assert_eq!(client.token(), None);
		broker.join().unwrap();
	}
}
