use std::{collections::HashMap, fmt};

use crate::ids::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
	Output,
	/// A connector fed by a claimed output.
	Source,
	Overlay,
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Output => "output",
			Self::Source => "source",
			Self::Overlay => "overlay",
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey {
	pub kind: ResourceKind,
	pub id: u32,
}

impl ResourceKey {
	pub fn output(id: u32) -> Self {
		Self {
			kind: ResourceKind::Output,
			id,
		}
	}

	pub fn source(id: u32) -> Self {
		Self {
			kind: ResourceKind::Source,
			id,
		}
	}

	pub fn overlay(id: u32) -> Self {
		Self {
			kind: ResourceKind::Overlay,
			id,
		}
	}
}

impl fmt::Display for ResourceKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.kind, self.id)
	}
}

/// Which client currently drives each output, source and overlay.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
	owners: HashMap<ResourceKey, ClientId>,
}

impl ClaimRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn owner(&self, key: ResourceKey) -> Option<ClientId> {
		self.owners.get(&key).copied()
	}

	/// Fails with the current owner if `key` belongs to another client.
	pub fn check(&self, key: ResourceKey, client_id: ClientId) -> Result<(), ClientId> {
		match self.owner(key) {
			Some(owner) if owner != client_id => Err(owner),
			_ => Ok(()),
		}
	}

	pub fn claim(&mut self, key: ResourceKey, client_id: ClientId) -> Result<(), ClientId> {
		self.check(key, client_id)?;
		self.owners.insert(key, client_id);
		Ok(())
	}

	/// Drops the claim if `client_id` holds it. Returns whether it did.
	pub fn release(&mut self, key: ResourceKey, client_id: ClientId) -> bool {
		if self.owner(key) == Some(client_id) {
			self.owners.remove(&key);
			true
		} else {
			false
		}
	}

	pub fn release_client(&mut self, client_id: ClientId) {
		self.owners.retain(|_, owner| *owner != client_id);
	}

	pub fn len(&self) -> usize {
		self.owners.len()
	}

	pub fn is_empty(&self) -> bool {
		self.owners.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn second_client_is_refused() {
		let (a, b) = (ClientId::rand(), ClientId::rand());
		let mut claims = ClaimRegistry::new();
		claims.claim(ResourceKey::output(1), a).unwrap();
		assert_eq!(claims.claim(ResourceKey::output(1), b), Err(a));
		assert_eq!(claims.owner(ResourceKey::output(1)), Some(a));
		// Same id, different kind.
		claims.claim(ResourceKey::overlay(1), b).unwrap();
		claims.claim(ResourceKey::source(1), b).unwrap();
		assert_eq!(claims.len(), 3);
		assert_eq!(claims.check(ResourceKey::source(1), a), Err(b));
	}

	#[test]
	fn release_only_by_owner() {
		let (a, b) = (ClientId::rand(), ClientId::rand());
		let mut claims = ClaimRegistry::new();
		claims.claim(ResourceKey::overlay(31), a).unwrap();
		assert!(!claims.release(ResourceKey::overlay(31), b));
		assert!(claims.release(ResourceKey::overlay(31), a));
		assert!(!claims.release(ResourceKey::overlay(31), a));
		claims.claim(ResourceKey::output(1), b).unwrap();
		claims.claim(ResourceKey::output(2), b).unwrap();
		claims.release_client(b);
		assert!(claims.is_empty());
	}
}
