//! A SECP256K1 keypair implementation producing ICON-style `hx` addresses
//! and R||S||recovery-id wire signatures.

use crate::{Error, Signature};
use secp256k1::ecdsa::RecoveryId;
use secp256k1::{Message, PublicKey, SecretKey};
use sha3::{Digest, Sha3_256};
use zeroize::{Zeroize, ZeroizeOnDrop};

const SEED_LENGTH: usize = 32;

/// Seed bytes used to construct a [`Keypair`].
pub type Seed = [u8; SEED_LENGTH];

/// A SECP256K1 keypair. The secret bytes are zeroized on drop.
#[derive(Clone)]
pub struct Keypair {
    secret: SecretBytes,
    public: PublicKey,
}

/// Wraps the raw secret bytes so they're zeroized on drop, independently
/// of whatever `secp256k1::SecretKey` itself promises.
#[derive(Clone)]
struct SecretBytes([u8; SEED_LENGTH]);

impl Zeroize for SecretBytes {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}
impl ZeroizeOnDrop for SecretBytes {}
impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl Keypair {
    /// Construct a keypair from a 32 byte seed.
    pub fn from_seed(seed: Seed) -> Result<Self, Error> {
        let secret = SecretKey::from_slice(&seed)?;
        let public = PublicKey::from_secret_key(secp256k1::SECP256K1, &secret);
        Ok(Keypair {
            secret: SecretBytes(seed),
            public,
        })
    }

    /// Construct a keypair from a hex-encoded 32 byte private key, with or
    /// without a leading `0x`.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != SEED_LENGTH {
            return Err(Error::InvalidPrivateKeyLength(bytes.len()));
        }
        let mut seed = [0u8; SEED_LENGTH];
        seed.copy_from_slice(&bytes);
        Self::from_seed(seed)
    }

    /// The public key of this keypair.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// The SECP256K1 secret key of this keypair. Callers should avoid
    /// holding on to this any longer than needed to sign.
    pub fn secret_key(&self) -> SecretKey {
        SecretKey::from_slice(&self.secret.0).expect("validated at construction; qed")
    }

    /// The ICON EOA address derived from this keypair's public key:
    /// `"hx" || lowercase_hex(last20(sha3_256(uncompressed_pubkey_without_leading_byte)))`.
    pub fn account_id(&self) -> String {
        account_id_from_public_key(&self.public)
    }

    /// Sign a 32 byte digest, producing a recoverable R||S||recovery-id
    /// signature.
    pub fn sign_prehashed(&self, digest: &[u8; 32]) -> Signature {
        let message = Message::from_digest(*digest);
        let secret = self.secret_key();
        let recoverable = secp256k1::SECP256K1.sign_ecdsa_recoverable(&message, &secret);
        let (recovery_id, compact) = recoverable.serialize_compact();

        // secp256k1's `RecoveryId` is already the bare 0..=3 value our wire
        // format expects. Bindings that instead expose Bitcoin's "V" byte
        // (27 + recid, +4 more if the pubkey is compressed) would need to
        // subtract 31 first to land on the same recovery id.
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&compact);
        bytes[64] = i32::from(recovery_id) as u8;
        Signature(bytes)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("account_id", &self.account_id())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Hash `data` with SHA3-256 (Keccak's NIST-finalized successor; distinct
/// from Ethereum's legacy Keccak-256).
pub fn hash_sha3_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive the `"hx"`-prefixed EOA address string from a public key.
pub fn account_id_from_public_key(public: &PublicKey) -> String {
    let uncompressed = public.serialize_uncompressed();
    let hash = hash_sha3_256(&uncompressed[1..]);
    format!("hx{}", hex::encode(&hash[12..]))
}

/// Recover the public key from a wire-format signature and message digest
/// without verifying against a known key; useful when the signer's key is
/// not otherwise known.
pub fn recover(signature: &Signature, digest: &[u8; 32]) -> Result<PublicKey, Error> {
    let recovery_id = RecoveryId::try_from(signature.0[64] as i32)
        .map_err(|_| Error::InvalidRecoveryId(signature.0[64]))?;
    let recoverable =
        secp256k1::ecdsa::RecoverableSignature::from_compact(&signature.0[..64], recovery_id)?;
    let message = Message::from_digest(*digest);
    Ok(secp256k1::SECP256K1.recover_ecdsa(&message, &recoverable)?)
}
