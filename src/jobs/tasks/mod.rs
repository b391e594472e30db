//! Built-in executors.

mod http_call;

pub use http_call::HttpExecutor;
