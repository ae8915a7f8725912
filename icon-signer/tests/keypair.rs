use icon_signer::{hash_sha3_256, Keypair};

#[test]
fn from_hex_accepts_0x_prefix() {
    let without = Keypair::from_hex(
        "8ad9889bcee734a2605a6c4c50dd8acd28f54e62b828b2c8991450abd88d6b3",
    )
    .unwrap();
    let with = Keypair::from_hex(
        "0x8ad9889bcee734a2605a6c4c50dd8acd28f54e62b828b2c8991450abd88d6b3",
    )
    .unwrap();
    assert_eq!(without.account_id(), with.account_id());
}

#[test]
fn rejects_short_keys() {
    let err = Keypair::from_hex("deadbeef").unwrap_err();
    assert!(matches!(
        err,
        icon_signer::Error::InvalidPrivateKeyLength(4)
    ));
}

#[test]
fn account_id_is_hx_prefixed_lowercase_hex() {
    let keypair = Keypair::from_hex(
        "8ad9889bcee734a2605a6c4c50dd8acd28f54e62b828b2c8991450abd88d6b3",
    )
    .unwrap();
    let account_id = keypair.account_id();
    assert!(account_id.starts_with("hx"));
    assert_eq!(account_id.len(), 42);
    assert!(account_id[2..].chars().all(|c| c.is_ascii_hexdigit()
        && (c.is_ascii_digit() || c.is_ascii_lowercase())));
}

#[test]
fn sign_then_verify_round_trips() {
    let keypair = Keypair::from_hex(
        "8ad9889bcee734a2605a6c4c50dd8acd28f54e62b828b2c8991450abd88d6b3",
    )
    .unwrap();
    let digest = hash_sha3_256(b"icx_sendTransaction.value.0x1");
    let signature = keypair.sign_prehashed(&digest);

    assert!(signature.verify(&digest, &keypair.public_key()));
}

#[test]
fn flipping_any_byte_invalidates_the_signature() {
    let keypair = Keypair::from_hex(
        "8ad9889bcee734a2605a6c4c50dd8acd28f54e62b828b2c8991450abd88d6b3",
    )
    .unwrap();
    let digest = hash_sha3_256(b"payload");
    let signature = keypair.sign_prehashed(&digest);

    for i in 0..65 {
        let mut bytes = signature.to_bytes();
        bytes[i] ^= 0x01;
        let flipped = icon_signer::Signature::from_bytes(bytes);
        assert!(
            !flipped.verify(&digest, &keypair.public_key()),
            "byte {i} flip should invalidate signature"
        );
    }
}

#[test]
fn signing_is_deterministic_for_the_same_key_and_message() {
    let keypair = Keypair::from_hex(
        "8ad9889bcee734a2605a6c4c50dd8acd28f54e62b828b2c8991450abd88d6b3",
    )
    .unwrap();
    let digest = hash_sha3_256(b"same message");
    let a = keypair.sign_prehashed(&digest);
    let b = keypair.sign_prehashed(&digest);
    assert_eq!(a.to_bytes(), b.to_bytes());
}

#[test]
fn base64_round_trips() {
    let keypair = Keypair::from_hex(
        "8ad9889bcee734a2605a6c4c50dd8acd28f54e62b828b2c8991450abd88d6b3",
    )
    .unwrap();
    let digest = hash_sha3_256(b"round trip me");
    let signature = keypair.sign_prehashed(&digest);

    let encoded = signature.to_base64();
    let decoded = icon_signer::Signature::from_base64(&encoded).unwrap();
    assert_eq!(signature.to_bytes(), decoded.to_bytes());
}
