//! SECP256K1 key pairs and recoverable-signature signing, independent of
//! any particular wire format. Used by the `icon` crate to derive EOA
//! addresses and sign transaction hashes.

mod error;
mod keypair;
mod signature;

pub use error::Error;
pub use keypair::{account_id_from_public_key, hash_sha3_256, recover, Keypair, Seed};
pub use signature::Signature;

// Re-exported so downstream crates don't need a direct `secp256k1` dependency
// just to hold a `PublicKey`.
pub use secp256k1::PublicKey;
