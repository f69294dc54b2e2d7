use sha3::{Digest, Sha3_256};

use custodian_core::types::Hash;

/// The reference 256-bit digest (§4.1): SHA3-256.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Convenience wrapper returning the workspace's hex-encoded `Hash` type.
pub fn hash(data: &[u8]) -> Hash {
    Hash::from_bytes(&hash_bytes(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
    }

    #[test]
    fn hash_differs_on_single_byte_change() {
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }

    #[test]
    fn hash_wrapper_hex_encodes() {
        let h = hash(b"abc");
        assert_eq!(h.as_hex().len(), 64);
    }
}
