/// An error handed back if creating a keypair or signing/verifying fails.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The private key was not exactly 32 bytes (or 64 hex chars) long.
    #[error("private key must be 32 bytes, got {0}")]
    InvalidPrivateKeyLength(usize),
    /// A wire-format signature was not 65 bytes (R || S || recovery id).
    #[error("signature must be 65 bytes, got {0}")]
    InvalidSignatureLength(usize),
    /// The trailing recovery id byte was not in `0..=3`.
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),
    /// The signature's base64 wire form could not be decoded.
    #[error("invalid base64 signature: {0}")]
    InvalidBase64(base64::DecodeError),
    /// The hex encoding of a private key or digest was malformed.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    /// Something went wrong inside the underlying SECP256K1 implementation.
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}
