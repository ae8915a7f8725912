//! The generic half of subscription handling: a bounded buffer ([`buffer`])
//! and a reconnecting WebSocket producer state machine ([`state_machine`])
//! that drives it. Neither module knows anything about ticks, event logs or
//! JSON schemas; that knowledge lives behind the [`state_machine::SubscriptionHandler`]
//! trait, implemented by callers.

pub mod buffer;
pub mod state_machine;

pub use buffer::{BufferItem, DedupKey, StreamBuffer};
pub use state_machine::{Backoff, BackoffConfig, ProducerHandle, ProducerState, SubscriptionHandler};
