//! Storage seams of the engine
//!
//! The dispatcher, rate limiter and batch coordinator only see these traits.
//! Postgres implementations live in `repositories`; `MemoryStore` keeps
//! everything in process.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{BatchStore, JobStore, UsageStore};
