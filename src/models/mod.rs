//! Diesel row types and their conversions to the engine's domain types.

mod batch;
mod job;

pub use batch::BatchRow;
pub use job::JobRow;
