//! Chain-agnostic JSON-RPC transport and subscription plumbing.
//!
//! This crate knows how to speak JSON-RPC 2.0 over HTTP ([`client`]) and
//! how to run a reconnecting WebSocket subscription into a bounded,
//! deduplicating buffer ([`stream`]). It does not know what an ICON
//! transaction, address or event log looks like; that lives in the `icon`
//! crate, which implements [`stream::SubscriptionHandler`] against this
//! crate's mechanism.

mod error;

pub mod client;
pub mod stream;

pub use error::Error;
