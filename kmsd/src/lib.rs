//! Privileged mode-setting broker.
//!
//! Holds DRM master on a card and performs CRTC and plane configuration on
//! behalf of unprivileged clients that talk to it over a unix socket.

pub mod config;
pub mod display;
pub mod error;
pub mod ids;
pub mod relay;
pub mod server_layer;
pub mod sessions;

pub use config::BrokerConfig;
pub use display::{DisplayContext, DisplayError};
pub use error::RelayError;
pub use ids::ClientId;
pub use server_layer::{BindError, Broker, ServeError};
