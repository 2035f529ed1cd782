mod claims;
mod session;

pub use claims::{ClaimRegistry, ResourceKey, ResourceKind};
pub use session::{OutputBinding, OverlayBinding, Session, SessionState};
