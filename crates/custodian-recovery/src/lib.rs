//! custodian-recovery
//!
//! Diagnosis and self-healing for a chain that has failed validation: scans
//! for corrupted blocks and, on request, tries re-authorization, bounded
//! rollback, and count-only partial export in order (§4.6). The mutating
//! strategies still go through `custodian_chain::ChainEngine`'s writer lock;
//! this crate never touches the store directly for anything that changes it.

pub mod manager;

pub use manager::RecoveryManager;
