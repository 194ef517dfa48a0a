//! cutover-proxy — the single forwarding target for application traffic.
//!
//! `TrafficRouter` holds exactly one upstream (`RouterTarget`) and proxies
//! every request to whatever target is current when the request arrives.
//! Replacing the target is a single write; requests already in flight keep
//! the target they started with.

pub mod router;

pub use router::{BoxError, ProxyBody, ProxyError, RouterTarget, TrafficRouter};
