pub mod aead;
pub mod dilithium;
pub mod hash;
pub mod keypair;

pub use aead::{decrypt_gcm, encrypt_gcm, AeadError};
pub use dilithium::{public_key_to_string, sign, string_to_public_key, verify, SignatureError};
pub use hash::{hash, hash_bytes};
pub use keypair::KeyPair;
