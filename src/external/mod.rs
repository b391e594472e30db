//! Outbound HTTP plumbing shared by executors and notification sinks.

pub mod client;

pub use client::{HTTP_CLIENT, user_agent};
