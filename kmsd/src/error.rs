use kms_protocol::{ErrorReason, ProtocolError};

use crate::{display::DisplayError, ids::ClientId, sessions::ResourceKind};

/// Why a relay handler refused or failed a request.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
	#[error("session has not authenticated")]
	Unauthenticated,
	#[error("request token {got} does not match session token {expected}")]
	TokenMismatch { expected: u32, got: u32 },
	#[error("device rejected token {token}: {source}")]
	AuthorizationRejected {
		token: u32,
		#[source]
		source: DisplayError,
	},
	#[error("{kind} {id} is held by {owner}")]
	ResourceConflict {
		kind: ResourceKind,
		id: u32,
		owner: ClientId,
	},
	#[error("session already holds an {0}")]
	Busy(ResourceKind),
	#[error("connector {source_id} has no mode named {name:?}")]
	UnknownMode { source_id: u32, name: String },
	#[error("display error: {0}")]
	Display(#[from] DisplayError),
	#[error("bad request: {0}")]
	BadRequest(ProtocolError),
}

impl RelayError {
	/// The reason sent to the client alongside the ERROR status.
	pub fn reason(&self) -> ErrorReason {
		match self {
			Self::Unauthenticated => ErrorReason::Unauthenticated,
			Self::TokenMismatch { .. } => ErrorReason::TokenMismatch,
			Self::AuthorizationRejected { .. } => ErrorReason::AuthRejected,
			Self::ResourceConflict { .. } => ErrorReason::Conflict,
			Self::Busy(_) => ErrorReason::Busy,
			Self::UnknownMode { .. } => ErrorReason::UnknownMode,
			Self::Display(_) => ErrorReason::Display,
			Self::BadRequest(ProtocolError::UnknownCommand { .. }) => ErrorReason::UnknownCommand,
			Self::BadRequest(_) => ErrorReason::BadRequest,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reasons_on_the_wire() {
		assert_eq!(
			RelayError::Busy(ResourceKind::Overlay).reason().as_str(),
			"busy"
		);
		assert_eq!(
			RelayError::BadRequest(ProtocolError::UnknownCommand { token: 1, tag: 9 }).reason(),
			ErrorReason::UnknownCommand
		);
		assert_eq!(
			RelayError::BadRequest(ProtocolError::InvalidModeName {
				token: 1,
				name: "a:b".into()
			})
			.reason(),
			ErrorReason::BadRequest
		);
		let err = RelayError::from(DisplayError::UnknownResource { kind: "crtc", id: 3 });
		assert_eq!(err.reason(), ErrorReason::Display);
	}
}
