use custodian_core::model::{Block, BlockDefect};

/// Validate block `b` against its predecessor `p` per §4.4.2. Block 0
/// validates trivially and is never passed here (callers special-case it).
///
/// `was_authorized_at` is an injected predicate so this function stays pure
/// and testable without a live store, mirroring the reference crate's own
/// `validate_vertex`-style injected-closure pattern for "does X exist"
/// checks.
pub fn validate_against_predecessor<F>(b: &Block, p: &Block, was_authorized_at: F) -> Vec<BlockDefect>
where
    F: Fn(&str, i64) -> bool,
{
    let mut defects = Vec::new();

    if b.previous_hash.as_hex() != p.hash.as_hex() {
        defects.push(BlockDefect::PreviousHashMismatch);
    }
    if b.block_number != p.block_number + 1 {
        defects.push(BlockDefect::NonContiguousNumber);
    }
    if !recompute_hash_matches(b) {
        defects.push(BlockDefect::HashMismatch);
    }
    if !verify_signature(b) {
        defects.push(BlockDefect::InvalidSignature);
    }
    if !was_authorized_at(b.signer_public_key.as_str(), b.timestamp) {
        defects.push(BlockDefect::NotAuthorizedAtTimestamp);
    }

    defects
}

pub fn recompute_hash_matches(b: &Block) -> bool {
    let preimage = custodian_core::canonical_preimage(
        b.block_number,
        b.previous_hash.as_hex(),
        b.data.as_deref().unwrap_or(""),
        b.timestamp,
        b.signer_public_key.as_str(),
    );
    let computed = custodian_crypto::hash(&preimage);
    computed.as_hex() == b.hash.as_hex()
}

pub fn verify_signature(b: &Block) -> bool {
    let preimage = custodian_core::canonical_preimage(
        b.block_number,
        b.previous_hash.as_hex(),
        b.data.as_deref().unwrap_or(""),
        b.timestamp,
        b.signer_public_key.as_str(),
    );
    custodian_crypto::verify(&b.signer_public_key, &preimage, &b.signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodian_core::types::{Hash, Signature};
    use custodian_crypto::KeyPair;
    use std::collections::BTreeMap;

    fn make_block(number: i64, previous_hash: &str, data: &str, timestamp: i64, kp: &KeyPair) -> Block {
        let preimage = custodian_core::canonical_preimage(number, previous_hash, data, timestamp, kp.public_key.as_str());
        let hash = custodian_crypto::hash(&preimage);
        let signature = kp.sign(&preimage).unwrap();
        Block {
            block_number: number,
            previous_hash: Hash(previous_hash.to_string()),
            data: Some(data.to_string()),
            timestamp,
            hash,
            signature,
            signer_public_key: kp.public_key.clone(),
            is_encrypted: false,
            category: None,
            keywords: Vec::new(),
            custom_metadata: BTreeMap::new(),
            off_chain_ref: None,
        }
    }

    #[test]
    fn valid_successor_passes() {
        let kp = KeyPair::generate();
        let genesis = make_block(0, "0", "", 1000, &kp);
        let b1 = make_block(1, genesis.hash.as_hex(), "a", 1001, &kp);
        let defects = validate_against_predecessor(&b1, &genesis, |_, _| true);
        assert!(defects.is_empty());
    }

    #[test]
    fn tampered_previous_hash_is_flagged() {
        let kp = KeyPair::generate();
        let genesis = make_block(0, "0", "", 1000, &kp);
        let mut b1 = make_block(1, genesis.hash.as_hex(), "a", 1001, &kp);
        b1.previous_hash = Hash("deadbeef".to_string());
        let defects = validate_against_predecessor(&b1, &genesis, |_, _| true);
        assert!(defects.contains(&BlockDefect::PreviousHashMismatch));
    }

    #[test]
    fn unauthorized_signer_is_flagged() {
        let kp = KeyPair::generate();
        let genesis = make_block(0, "0", "", 1000, &kp);
        let b1 = make_block(1, genesis.hash.as_hex(), "a", 1001, &kp);
        let defects = validate_against_predecessor(&b1, &genesis, |_, _| false);
        assert!(defects.contains(&BlockDefect::NotAuthorizedAtTimestamp));
    }

    #[test]
    fn tampered_signature_is_flagged() {
        let kp = KeyPair::generate();
        let genesis = make_block(0, "0", "", 1000, &kp);
        let mut b1 = make_block(1, genesis.hash.as_hex(), "a", 1001, &kp);
        b1.signature = Signature("bm90IGEgcmVhbCBzaWc=".to_string());
        let defects = validate_against_predecessor(&b1, &genesis, |_, _| true);
        assert!(defects.contains(&BlockDefect::InvalidSignature));
    }
}
