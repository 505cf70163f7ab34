//! Small utility functions shared across the workspace.

use rand::Rng;
use sha2::{Digest, Sha256};

pub const ID_LENGTH: usize = 24;
pub const SAFE: [char; 62] = [
	'0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
	'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B',
	'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
	'V', 'W', 'X', 'Y', 'Z',
];

/// Generate a random URL-safe id of fixed length, for doc ids, session ids, etc.
pub fn random_id() -> String {
	let mut rng = rand::rng();
	let mut result = String::with_capacity(ID_LENGTH);
	for _ in 0..ID_LENGTH {
		result.push(SAFE[rng.random_range(0..SAFE.len())]);
	}
	result
}

/// Hex-encoded SHA-256 digest, used for VFS content hashes and media cache keys.
pub fn sha256_hex(bytes: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(bytes);
	let digest = hasher.finalize();
	digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Strip the leading `/` from a request path. Traversal/dotfile checks live
/// in the router, which needs to distinguish the specific rejection reasons.
pub fn normalize_vfs_path(path: &str) -> String {
	path.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn random_id_is_fixed_length() {
		assert_eq!(random_id().len(), ID_LENGTH);
	}

	#[test]
	fn sha256_hex_is_deterministic() {
		assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
		assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
	}
}

// vim: ts=4
