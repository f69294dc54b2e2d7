//! Canonical preimage encoding used for both hashing and signing (§6).
//!
//! `concat(decimal(block_number), previous_hash_or_empty, data_or_empty,
//! decimal(epoch_seconds_utc(timestamp)), signer_public_key_or_empty)` —
//! no separators, no escaping. Implementations MUST NOT change this without
//! breaking every previously admitted block's hash.

use crate::types::{BlockNumber, Timestamp};

/// Build the canonical preimage for a block about to be (or already) hashed
/// and signed.
///
/// `previous_hash` and `signer_public_key` are the raw string forms (the
/// genesis sentinels `"0"`/`"GENESIS"` included verbatim); `data` is the
/// raw UTF-8 payload, empty string when the payload is off-chain or absent.
pub fn canonical_preimage(
    block_number: BlockNumber,
    previous_hash: &str,
    data: &str,
    timestamp: Timestamp,
    signer_public_key: &str,
) -> Vec<u8> {
    let mut buf = String::with_capacity(
        20 + previous_hash.len() + data.len() + 20 + signer_public_key.len(),
    );
    buf.push_str(&block_number.to_string());
    buf.push_str(previous_hash);
    buf.push_str(data);
    buf.push_str(&timestamp.to_string());
    buf.push_str(signer_public_key);
    buf.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_separators_between_fields() {
        let preimage = canonical_preimage(1, "abc", "hello", 1000, "pk");
        assert_eq!(preimage, b"1abchello1000pk".to_vec());
    }

    #[test]
    fn empty_data_and_previous_hash_are_just_omitted() {
        let preimage = canonical_preimage(0, "", "", 0, "");
        assert_eq!(preimage, b"00".to_vec());
    }

    #[test]
    fn genesis_sentinels_are_carried_verbatim() {
        let preimage = canonical_preimage(0, "0", "", 1_735_689_600, "GENESIS");
        assert_eq!(preimage, b"001735689600GENESIS".to_vec());
    }
}
