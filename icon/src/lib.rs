//! A JSON-RPC client for the ICON blockchain.
//!
//! [`Identity`] holds a node URL, network id and optional signing key.
//! [`Client`] issues JSON-RPC calls against it, schema-validating and
//! canonically signing transactions built with [`Request`] along the way.
//! [`Subscription`] drives a reconnecting WebSocket feed of block ticks
//! and contract event logs.

mod error;
mod identity;
mod request;
mod rpc_client;
mod schema;
mod step_limit;
mod subscription;
mod types;
mod wire;

pub use error::{Error, ErrorDomain, ErrorReason, NodeError};
pub use identity::{Identity, IdentityBuilder};
pub use request::{Request, RequestOptions};
pub use rpc_client::Client;
pub use schema::{dump, generate, load, ErrorNode, Field, FieldDefault, FieldType, Primitive, Schema, SchemaErrors, TypedValue};
pub use subscription::{EventFilter, FromHeight, Subscription, SubscriptionDescriptor, StreamSource};
pub use types::{parse_header, EventLog, EventSignature, EventType, StreamItem, Tick, TransactionResult};
pub use wire::{AddressKind, Int, IntegerConstraint};

pub use icon_rpcs::stream::BackoffConfig;
pub use icon_signer::{Keypair, Seed, Signature};
