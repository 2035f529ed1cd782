use std::io::{ErrorKind, Read, Write};

use crate::ProtocolError;

/// Upper bound for a frame including its `\n` sentinel.
pub const MAX_FRAME_LEN: usize = 1024;

const SENTINEL: u8 = b'\n';

/// Writes `body` followed by the frame sentinel.
pub fn write_frame(mut writer: impl Write, body: &str) -> Result<(), ProtocolError> {
	if body.len() + 1 > MAX_FRAME_LEN {
		return Err(ProtocolError::FrameTooLong { max: MAX_FRAME_LEN });
	}
	if body.as_bytes().contains(&SENTINEL) {
		return Err(ProtocolError::EmbeddedNewline);
	}
	let mut bytes = Vec::with_capacity(body.len() + 1);
	bytes.extend_from_slice(body.as_bytes());
	bytes.push(SENTINEL);
	writer.write_all(&bytes)?;
	writer.flush()?;
	Ok(())
}

/// Extracts the first complete frame from `bytes`.
///
/// Returns the frame body and the number of bytes it occupied, or `None` if
/// no sentinel has arrived yet. NUL padding and a `\r` before the sentinel are
/// not part of the body.
///
/// Peers that write fixed `MAX_FRAME_LEN` blocks of NUL-padded text with no
/// sentinel are also accepted: a full block holding a NUL is one frame.
pub fn parse_from_bytes(bytes: &[u8]) -> Result<Option<(String, usize)>, ProtocolError> {
	// Padding left over from the previous block.
	let skipped = bytes.iter().take_while(|b| **b == 0).count();
	let rest = &bytes[skipped..];
	let window = &rest[..rest.len().min(MAX_FRAME_LEN)];
	let Some(end) = window.iter().position(|b| *b == SENTINEL) else {
		if window.len() < MAX_FRAME_LEN {
			return Ok(None);
		}
		let Some(nul) = window.iter().position(|b| *b == 0) else {
			return Err(ProtocolError::FrameTooLong { max: MAX_FRAME_LEN });
		};
		let body = std::str::from_utf8(&window[..nul])?;
		return Ok(Some((body.to_owned(), skipped + MAX_FRAME_LEN)));
	};
	let body = window[..end]
		.strip_suffix(b"\r")
		.unwrap_or(&window[..end]);
	let body = trim_nul(body);
	let body = std::str::from_utf8(body)?;
	Ok(Some((body.to_owned(), skipped + end + 1)))
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
	let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
	let end = bytes.iter().rposition(|b| *b != 0).map_or(start, |i| i + 1);
	&bytes[start..end]
}

/// Accumulates stream bytes and hands out complete frames.
#[derive(Debug, Default)]
pub struct FrameReader {
	buffer: Vec<u8>,
}

impl FrameReader {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, bytes: &[u8]) {
		self.buffer.extend_from_slice(bytes);
	}

	/// Bytes received that do not yet form a frame.
	pub fn pending(&self) -> usize {
		self.buffer.len()
	}

	pub fn next_frame(&mut self) -> Result<Option<String>, ProtocolError> {
		match parse_from_bytes(&self.buffer)? {
			Some((frame, consumed)) => {
				self.buffer.drain(..consumed);
				Ok(Some(frame))
			}
			None => Ok(None),
		}
	}

	/// Performs a single read into the buffer.
	///
	/// A zero-length read is reported as [`ProtocolError::UnexpectedEof`] and
	/// `EAGAIN` as [`ProtocolError::WouldBlock`].
	pub fn fill_from(&mut self, mut reader: impl Read) -> Result<usize, ProtocolError> {
		let mut buf = [0u8; MAX_FRAME_LEN];
		loop {
			match reader.read(&mut buf) {
				Ok(0) => return Err(ProtocolError::UnexpectedEof),
				Ok(n) => {
					self.push(&buf[..n]);
					return Ok(n);
				}
				Err(e) if e.kind() == ErrorKind::Interrupted => continue,
				Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(ProtocolError::WouldBlock),
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Blocks until a whole frame is available.
	pub fn read_framed(&mut self, mut reader: impl Read) -> Result<String, ProtocolError> {
		loop {
			if let Some(frame) = self.next_frame()? {
				return Ok(frame);
			}
			self.fill_from(&mut reader)?;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frames_split_across_reads() {
		let mut reader = FrameReader::new();
		reader.push(b"42:1:1:7:5");
		assert_eq!(reader.next_frame().unwrap(), None);
		reader.push(b"00:1920x1080\n42:3\n");
		assert_eq!(reader.next_frame().unwrap().as_deref(), Some("42:1:1:7:500:1920x1080"));
		assert_eq!(reader.next_frame().unwrap().as_deref(), Some("42:3"));
		assert_eq!(reader.next_frame().unwrap(), None);
		assert_eq!(reader.pending(), 0);
	}

	#[test]
	fn padding_and_carriage_return_are_stripped() {
		let (frame, consumed) = parse_from_bytes(b"\0\x0042:0\0\0\r\nrest").unwrap().unwrap();
		assert_eq!(frame, "42:0");
		assert_eq!(consumed, 10);
	}

	#[test]
	fn zero_padded_blocks_without_sentinel() {
		// Fixed-size C buffers, one byte longer than a frame.
		let block = |text: &str| {
			let mut block = vec![0u8; MAX_FRAME_LEN + 1];
			block[..text.len()].copy_from_slice(text.as_bytes());
			block
		};
		let mut reader = FrameReader::new();
		reader.push(&block("42:0"));
		reader.push(&block("42:1:40:30:500:preferred"));
		assert_eq!(reader.next_frame().unwrap().as_deref(), Some("42:0"));
		assert_eq!(
			reader.next_frame().unwrap().as_deref(),
			Some("42:1:40:30:500:preferred")
		);
		assert_eq!(reader.next_frame().unwrap(), None);
		assert_eq!(reader.pending(), 1);

		// A partial block waits for the rest.
		let mut reader = FrameReader::new();
		reader.push(&block("42:3")[..100]);
		assert_eq!(reader.next_frame().unwrap(), None);
	}

	#[test]
	fn oversize_frame_is_rejected() {
		let mut reader = FrameReader::new();
		reader.push(&[b'1'; MAX_FRAME_LEN]);
		assert!(matches!(
			reader.next_frame(),
			Err(ProtocolError::FrameTooLong { .. })
		));

		let long = "9".repeat(MAX_FRAME_LEN);
		assert!(matches!(
			write_frame(Vec::new(), &long),
			Err(ProtocolError::FrameTooLong { .. })
		));
	}

	#[test]
	fn write_appends_sentinel() {
		let mut out = Vec::new();
		write_frame(&mut out, "42:0").unwrap();
		assert_eq!(out, b"42:0\n");
		assert!(matches!(
			write_frame(Vec::new(), "1:0\n2:0"),
			Err(ProtocolError::EmbeddedNewline)
		));
	}

	#[test]
	fn read_framed_reports_eof() {
		let mut reader = FrameReader::new();
		let input: &[u8] = b"7:0\n7:1";
		assert_eq!(reader.read_framed(input).unwrap(), "7:0");
		let mut rest: &[u8] = &[];
		assert!(matches!(
			reader.read_framed(&mut rest),
			Err(ProtocolError::UnexpectedEof)
		));
	}
}
