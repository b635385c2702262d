//! portico umbrella crate.
//!
//! Re-exports the protocol/core types and the gateway so embedders depend on
//! a single crate.

pub use portico_core as core;
pub use portico_gateway as gateway;
