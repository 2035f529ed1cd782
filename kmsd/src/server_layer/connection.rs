use std::{
	os::{
		fd::{AsFd, BorrowedFd},
		unix::net::UnixStream,
	},
	time::Duration,
};

use kms_protocol::{FrameReader, ProtocolError, Response};

/// Replies are small; a peer that stops reading is dropped after this.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct ClientConnection {
	stream: UnixStream,
	reader: FrameReader,
}

impl ClientConnection {
	pub fn new(stream: UnixStream) -> std::io::Result<Self> {
		// Accepted sockets may inherit O_NONBLOCK from the listener.
		stream.set_nonblocking(false)?;
		stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
		Ok(Self {
			stream,
			reader: FrameReader::new(),
		})
	}

	/// Reads once. Only call after poll reported the socket readable.
	pub fn fill(&mut self) -> Result<usize, ProtocolError> {
		self.reader.fill_from(&self.stream)
	}

	pub fn next_frame(&mut self) -> Result<Option<String>, ProtocolError> {
		self.reader.next_frame()
	}

	pub fn send(&self, response: &Response) -> Result<(), ProtocolError> {
		response.encode_and_send(&self.stream)
	}
}

impl AsFd for ClientConnection {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.stream.as_fd()
	}
}
