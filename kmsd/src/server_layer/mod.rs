pub mod connection;
pub mod server;

pub use server::{BindError, Broker, ServeError};
