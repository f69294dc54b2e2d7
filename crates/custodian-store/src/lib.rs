pub mod auth_log;
pub mod blocks;
pub mod offchain;
pub mod pool;
pub mod schema;
pub mod sequence;

pub use auth_log::AuthLog;
pub use blocks::BlockStore;
pub use offchain::OffChainStore;
pub use pool::{StorePool, StoreTx};
pub use schema::ensure_schema;
pub use sequence::BlockSequenceStore;
