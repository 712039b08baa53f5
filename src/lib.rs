//! Proxy Probe - Proxy List Tester
//!
//! Parses proxy lists in the common text formats, runs test HTTP requests
//! through each proxy against one or more target URLs, and reports latency,
//! download speed, ping, block status and the observed exit IP.

pub mod proxy;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
