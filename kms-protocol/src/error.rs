use crate::CommandTag;

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("operation would block")]
	WouldBlock,
	#[error("connection closed by peer")]
	UnexpectedEof,
	#[error("frame exceeds {max} bytes")]
	FrameTooLong { max: usize },
	#[error("frame contains a newline")]
	EmbeddedNewline,
	#[error("frame is not valid utf-8: {0}")]
	Utf8(#[from] std::str::Utf8Error),
	#[error("malformed frame header: {0:?}")]
	MalformedHeader(String),
	#[error("unknown command tag {tag} (token {token})")]
	UnknownCommand { token: u32, tag: u32 },
	#[error("{command:?} expects {expected} argument(s), got {found} (token {token})")]
	FieldCount {
		token: u32,
		command: CommandTag,
		expected: usize,
		found: usize,
	},
	#[error("invalid {field} field {value:?} (token {token})")]
	InvalidField {
		token: u32,
		field: &'static str,
		value: String,
	},
	#[error("invalid mode name {name:?} (token {token})")]
	InvalidModeName { token: u32, name: String },
}

impl ProtocolError {
	/// Token of the frame that failed, when its header was readable.
	///
	/// The broker uses this to decide between an ERROR reply and dropping the
	/// connection.
	pub fn token(&self) -> Option<u32> {
		match self {
			Self::UnknownCommand { token, .. }
			| Self::FieldCount { token, .. }
			| Self::InvalidField { token, .. }
			| Self::InvalidModeName { token, .. } => Some(*token),
			_ => None,
		}
	}
}
