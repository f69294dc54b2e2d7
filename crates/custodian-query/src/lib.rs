pub mod query;
pub mod wildcard;

pub use query::{QueryLayer, StreamControl};
pub use wildcard::wildcard_match;
