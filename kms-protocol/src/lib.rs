//! Wire protocol spoken between `kmsd` and its clients.
//!
//! Frames are colon-separated ASCII terminated by a single `\n`. Requests
//! carry the client's DRM magic as a correlation token, a numeric command tag
//! and the positional arguments of that command; responses echo the token and
//! a status.

mod error;
pub mod message;
pub mod message_frame;
pub mod reason;
pub mod unix_socket_utils;

pub use error::ProtocolError;
pub use message::{Command, CommandTag, ErrorReason, Geometry, Request, Response, Status};
pub use message_frame::{FrameReader, MAX_FRAME_LEN};

/// Path the broker listens on unless configured otherwise.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/drm_srv";

/// Mode name that resolves to the connector's preferred mode.
pub const PREFERRED_MODE: &str = "preferred";

/// Longest mode name the kernel can report (`DRM_DISPLAY_MODE_LEN` minus the NUL).
pub const MAX_MODE_NAME_LEN: usize = 31;
