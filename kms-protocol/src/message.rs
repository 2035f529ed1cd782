use std::{fmt, io::Write, str::FromStr};

use crate::{MAX_MODE_NAME_LEN, ProtocolError, message_frame, reason};

/// Numeric command tag, the second field of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandTag {
	Authenticate = 0,
	AcquireOutput = 1,
	AcquireOverlay = 2,
	ReleaseOutput = 3,
	ReleaseOverlay = 4,
}

impl CommandTag {
	/// Number of positional fields following the tag.
	pub fn argument_count(self) -> usize {
		match self {
			Self::Authenticate | Self::ReleaseOutput | Self::ReleaseOverlay => 0,
			Self::AcquireOutput => 4,
			Self::AcquireOverlay => 7,
		}
	}
}

impl TryFrom<u32> for CommandTag {
	type Error = u32;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		Ok(match value {
			0 => Self::Authenticate,
			1 => Self::AcquireOutput,
			2 => Self::AcquireOverlay,
			3 => Self::ReleaseOutput,
			4 => Self::ReleaseOverlay,
			other => return Err(other),
		})
	}
}

/// Destination rectangle of an overlay on its output, in output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
	pub x: i32,
	pub y: i32,
	pub width: u32,
	pub height: u32,
}

impl fmt::Display for Geometry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Authenticate,
	AcquireOutput {
		output_id: u32,
		source_id: u32,
		framebuffer_id: u32,
		mode_name: String,
	},
	AcquireOverlay {
		output_id: u32,
		overlay_id: u32,
		framebuffer_id: u32,
		geometry: Geometry,
	},
	ReleaseOutput,
	ReleaseOverlay,
}

impl Command {
	pub fn tag(&self) -> CommandTag {
		match self {
			Self::Authenticate => CommandTag::Authenticate,
			Self::AcquireOutput { .. } => CommandTag::AcquireOutput,
			Self::AcquireOverlay { .. } => CommandTag::AcquireOverlay,
			Self::ReleaseOutput => CommandTag::ReleaseOutput,
			Self::ReleaseOverlay => CommandTag::ReleaseOverlay,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
	pub token: u32,
	pub command: Command,
}

impl Request {
	pub fn new(token: u32, command: Command) -> Self {
		Self { token, command }
	}

	/// Encodes the frame body, without the trailing sentinel.
	pub fn encode(&self) -> Result<String, ProtocolError> {
		let token = self.token;
		let tag = self.command.tag() as u32;
		Ok(match &self.command {
			Command::Authenticate | Command::ReleaseOutput | Command::ReleaseOverlay => {
				format!("{token}:{tag}")
			}
			Command::AcquireOutput {
				output_id,
				source_id,
				framebuffer_id,
				mode_name,
			} => {
				validate_mode_name(token, mode_name)?;
				format!("{token}:{tag}:{output_id}:{source_id}:{framebuffer_id}:{mode_name}")
			}
			Command::AcquireOverlay {
				output_id,
				overlay_id,
				framebuffer_id,
				geometry,
			} => format!(
				"{token}:{tag}:{output_id}:{overlay_id}:{framebuffer_id}:{}:{}:{}:{}",
				geometry.width, geometry.height, geometry.x, geometry.y
			),
		})
	}

	pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
		let mut fields = frame.split(':');
		let (token, raw_tag) = parse_header(frame, &mut fields)?;
		let tag = CommandTag::try_from(raw_tag)
			.map_err(|tag| ProtocolError::UnknownCommand { token, tag })?;
		let args = fields.collect::<Vec<_>>();
		if args.len() != tag.argument_count() {
			return Err(ProtocolError::FieldCount {
				token,
				command: tag,
				expected: tag.argument_count(),
				found: args.len(),
			});
		}
		let command = match tag {
			CommandTag::Authenticate => Command::Authenticate,
			CommandTag::ReleaseOutput => Command::ReleaseOutput,
			CommandTag::ReleaseOverlay => Command::ReleaseOverlay,
			CommandTag::AcquireOutput => {
				let mode_name = args[3];
				validate_mode_name(token, mode_name)?;
				Command::AcquireOutput {
					output_id: parse_field(token, "output_id", args[0])?,
					source_id: parse_field(token, "source_id", args[1])?,
					framebuffer_id: parse_field(token, "framebuffer_id", args[2])?,
					mode_name: mode_name.to_owned(),
				}
			}
			CommandTag::AcquireOverlay => Command::AcquireOverlay {
				output_id: parse_field(token, "output_id", args[0])?,
				overlay_id: parse_field(token, "overlay_id", args[1])?,
				framebuffer_id: parse_field(token, "framebuffer_id", args[2])?,
				geometry: Geometry {
					width: parse_field(token, "width", args[3])?,
					height: parse_field(token, "height", args[4])?,
					x: parse_field(token, "x", args[5])?,
					y: parse_field(token, "y", args[6])?,
				},
			},
		};
		Ok(Self { token, command })
	}

	pub fn encode_and_send(&self, writer: impl Write) -> Result<(), ProtocolError> {
		message_frame::write_frame(writer, &self.encode()?)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
	Ok = 0,
	Error = 1,
}

/// Why a request was answered with ERROR. Appended as a third response
/// field; peers that only read `token:status` ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReason {
	Unauthenticated,
	AuthRejected,
	TokenMismatch,
	Conflict,
	Busy,
	UnknownMode,
	Display,
	UnknownCommand,
	BadRequest,
}

impl ErrorReason {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Unauthenticated => reason::UNAUTHENTICATED,
			Self::AuthRejected => reason::AUTH_REJECTED,
			Self::TokenMismatch => reason::TOKEN_MISMATCH,
			Self::Conflict => reason::CONFLICT,
			Self::Busy => reason::BUSY,
			Self::UnknownMode => reason::UNKNOWN_MODE,
			Self::Display => reason::DISPLAY,
			Self::UnknownCommand => reason::UNKNOWN_COMMAND,
			Self::BadRequest => reason::BAD_REQUEST,
		}
	}
}

impl fmt::Display for ErrorReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ErrorReason {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			reason::UNAUTHENTICATED => Self::Unauthenticated,
			reason::AUTH_REJECTED => Self::AuthRejected,
			reason::TOKEN_MISMATCH => Self::TokenMismatch,
			reason::CONFLICT => Self::Conflict,
			reason::BUSY => Self::Busy,
			reason::UNKNOWN_MODE => Self::UnknownMode,
			reason::DISPLAY => Self::Display,
			reason::UNKNOWN_COMMAND => Self::UnknownCommand,
			reason::BAD_REQUEST => Self::BadRequest,
			_ => return Err(()),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
	pub token: u32,
	pub status: Status,
	pub reason: Option<ErrorReason>,
}

impl Response {
	pub fn ok(token: u32) -> Self {
		Self {
			token,
			status: Status::Ok,
			reason: None,
		}
	}

	pub fn error(token: u32, reason: ErrorReason) -> Self {
		Self {
			token,
			status: Status::Error,
			reason: Some(reason),
		}
	}

	pub fn is_ok(&self) -> bool {
		self.status == Status::Ok
	}

	pub fn encode(&self) -> String {
		match self.reason {
			Some(reason) if self.status == Status::Error => {
				format!("{}:{}:{reason}", self.token, self.status as u32)
			}
			_ => format!("{}:{}", self.token, self.status as u32),
		}
	}

	/// Unknown reason codes are dropped rather than rejected so newer brokers
	/// can add codes without breaking older clients.
	pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
		let mut fields = frame.split(':');
		let (token, raw_status) = parse_header(frame, &mut fields)?;
		let status = match raw_status {
			0 => Status::Ok,
			1 => Status::Error,
			other => {
				return Err(ProtocolError::InvalidField {
					token,
					field: "status",
					value: other.to_string(),
				});
			}
		};
		let reason = match status {
			Status::Error => fields.next().and_then(|raw| raw.parse().ok()),
			Status::Ok => None,
		};
		Ok(Self {
			token,
			status,
			reason,
		})
	}

	pub fn encode_and_send(&self, writer: impl Write) -> Result<(), ProtocolError> {
		message_frame::write_frame(writer, &self.encode())
	}
}

fn parse_header<'a>(
	frame: &str,
	fields: &mut impl Iterator<Item = &'a str>,
) -> Result<(u32, u32), ProtocolError> {
	let mut next_number = || fields.next().and_then(|raw| raw.parse::<u32>().ok());
	match (next_number(), next_number()) {
		(Some(token), Some(second)) => Ok((token, second)),
		_ => Err(ProtocolError::MalformedHeader(frame.to_owned())),
	}
}

fn parse_field<T: FromStr>(token: u32, field: &'static str, raw: &str) -> Result<T, ProtocolError> {
	raw.parse().map_err(|_| ProtocolError::InvalidField {
		token,
		field,
		value: raw.to_owned(),
	})
}

fn validate_mode_name(token: u32, name: &str) -> Result<(), ProtocolError> {
	let valid = !name.is_empty()
		&& name.len() <= MAX_MODE_NAME_LEN
		&& name.bytes().all(|b| b.is_ascii_graphic() && b != b':');
	if valid {
		Ok(())
	} else {
		Err(ProtocolError::InvalidModeName {
			token,
			name: name.to_owned(),
		})
	}
}
