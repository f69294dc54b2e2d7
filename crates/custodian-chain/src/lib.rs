pub mod engine;
pub mod export;
pub mod offchain;
pub mod validation;

pub use engine::{ChainEngine, RollbackProgress};
pub use export::{export_to, import_from, ExportDocument};
pub use offchain::OffChainManager;
pub use validation::{recompute_hash_matches, validate_against_predecessor, verify_signature};
