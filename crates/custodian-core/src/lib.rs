pub mod canonical;
pub mod constants;
pub mod error;
pub mod model;
pub mod types;

pub use canonical::canonical_preimage;
pub use constants::*;
pub use error::LedgerError;
pub use model::*;
pub use types::*;
