use crate::{keypair, Error};
use base64::Engine;
use secp256k1::PublicKey;

/// A recoverable SECP256K1 signature in the wire layout `R(32) || S(32) ||
/// recovery_id(1)`, as sent base64-encoded in a transaction's `signature`
/// field.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub(crate) [u8; 65]);

impl Signature {
    /// Construct a signature from its raw 65 byte wire layout.
    pub fn from_bytes(bytes: [u8; 65]) -> Self {
        Signature(bytes)
    }

    /// The raw 65 byte wire layout.
    pub fn to_bytes(self) -> [u8; 65] {
        self.0
    }

    /// Decode a signature from its base64 wire form.
    pub fn from_base64(s: &str) -> Result<Self, Error> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(Error::InvalidBase64)?;
        let len = decoded.len();
        let bytes: [u8; 65] = decoded
            .try_into()
            .map_err(|_| Error::InvalidSignatureLength(len))?;
        Ok(Signature(bytes))
    }

    /// Encode this signature as base64, as it appears in the `signature`
    /// transaction parameter.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Recover the public key that produced this signature over `digest`.
    pub fn recover(&self, digest: &[u8; 32]) -> Result<PublicKey, Error> {
        keypair::recover(self, digest)
    }

    /// Verify that this signature was produced over `digest` by `expected`'s
    /// secret key, by recovering the signer and comparing public keys.
    pub fn verify(&self, digest: &[u8; 32], expected: &PublicKey) -> bool {
        match self.recover(digest) {
            Ok(recovered) => recovered == *expected,
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Signature").field(&self.to_base64()).finish()
    }
}

impl AsRef<[u8; 65]> for Signature {
    fn as_ref(&self) -> &[u8; 65] {
        &self.0
    }
}
