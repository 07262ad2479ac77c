// ABOUTME: Library root for knowledge-sync
// ABOUTME: Keeps a vector-indexed knowledge store in step with an externally edited table

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod source;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::SyncError;
