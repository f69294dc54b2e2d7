use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp (seconds, UTC). Second-precision per the wire format.
pub type Timestamp = i64;

/// Sequentially increasing block identifier, starting at 0 (genesis).
pub type BlockNumber = i64;

// ── Hash ─────────────────────────────────────────────────────────────────────

/// A 256-bit cryptographic digest, hex-encoded for storage and display.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub String);

impl Hash {
    pub fn from_bytes(b: &[u8]) -> Self {
        Self(hex::encode(b))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// The sentinel previous-hash value carried by block 0.
    pub fn genesis_sentinel() -> Self {
        Self(crate::constants::GENESIS_PREVIOUS_HASH.to_string())
    }

    pub fn is_genesis_sentinel(&self) -> bool {
        self.0 == crate::constants::GENESIS_PREVIOUS_HASH
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.0.len() > 16 { &self.0[..16] } else { &self.0 };
        write!(f, "Hash({}…)", shown)
    }
}

// ── PublicKey ────────────────────────────────────────────────────────────────

/// Base64 encoding of an X.509 SPKI-wrapped signing public key, or the
/// sentinel `"GENESIS"` carried by block 0.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub String);

impl PublicKey {
    pub fn genesis_sentinel() -> Self {
        Self(crate::constants::GENESIS_SIGNER.to_string())
    }

    pub fn is_genesis_sentinel(&self) -> bool {
        self.0 == crate::constants::GENESIS_SIGNER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.0.len() > 12 { &self.0[..12] } else { &self.0 };
        write!(f, "PublicKey({}…)", shown)
    }
}

// ── Signature ────────────────────────────────────────────────────────────────

/// Base64-encoded signature bytes, or the sentinel `"GENESIS"` for block 0.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub String);

impl Signature {
    pub fn genesis_sentinel() -> Self {
        Self(crate::constants::GENESIS_SIGNATURE.to_string())
    }

    pub fn is_genesis_sentinel(&self) -> bool {
        self.0 == crate::constants::GENESIS_SIGNATURE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}b)", self.0.len())
    }
}

// ── Role ─────────────────────────────────────────────────────────────────────

/// Role carried by an authorization record. The protocol itself only
/// distinguishes `SuperAdmin` (counted by `count_active_super_admins`); the
/// remaining variants are opaque tags interpreted by the RBAC policy that
/// sits outside this crate's scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Writer,
    ReadOnly,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Writer => "writer",
            Role::ReadOnly => "read_only",
        };
        write!(f, "{}", s)
    }
}
