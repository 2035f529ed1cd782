use std::time::Duration;

use kms_protocol::{ErrorReason, ProtocolError};

fn describe(reason: &Option<ErrorReason>) -> &'static str {
	reason.map_or("unspecified", ErrorReason::as_str)
}

#[derive(thiserror::Error, Debug)]
pub enum KmsClientError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("protocol error: {0}")]
	Protocol(#[from] ProtocolError),
	#[error("no response from broker within {0:?}")]
	Timeout(Duration),
	#[error("broker rejected request {token}: {}", describe(.reason))]
	Rejected {
		token: u32,
		reason: Option<ErrorReason>,
	},
	#[error("not authenticated with the broker")]
	NotAuthenticated,
	#[error("{op} failed: {source}")]
	Device {
		op: &'static str,
		#[source]
		source: std::io::Error,
	},
	#[error("no {kind} with id {id}")]
	UnknownResource { kind: &'static str, id: u32 },
	#[error("connector {connector_id} has no mode named {name:?}")]
	ModeNotFound { connector_id: u32, name: String },
}

impl KmsClientError {
	pub(crate) fn device(op: &'static str) -> impl FnOnce(std::io::Error) -> Self {
		move |source| Self::Device { op, source }
	}

	/// The broker's reason, if this is a rejection.
	pub fn reason(&self) -> Option<ErrorReason> {
		match self {
			Self::Rejected { reason, .. } => *reason,
			_ => None,
		}
	}
}
