use crypto_core::{decrypt_at_rest, encrypt_at_rest, generate_nonce, CryptoError, NONCE_LEN};

#[test]
fn roundtrip() {
    let key = [7u8; 32];
    let nonce = generate_nonce();
    let msg = b"hello from the at-rest codec";

    let ct = encrypt_at_rest(msg, &key, &nonce).expect("encrypt");
    assert_ne!(&ct[..], &msg[..], "ciphertext must differ from plaintext");

    let pt = decrypt_at_rest(&ct, &key, &nonce).expect("decrypt");
    assert_eq!(pt, msg);
}

#[test]
fn tampered_ciphertext_fails() {
    let key = [7u8; 32];
    let nonce = generate_nonce();
    let mut ct = encrypt_at_rest(b"payload", &key, &nonce).expect("encrypt");
    ct[0] ^= 0xff;

    assert!(matches!(
        decrypt_at_rest(&ct, &key, &nonce),
        Err(CryptoError::Decryption)
    ));
}

#[test]
fn wrong_key_fails() {
    let nonce = generate_nonce();
    let ct = encrypt_at_rest(b"payload", &[1u8; 32], &nonce).expect("encrypt");

    assert!(decrypt_at_rest(&ct, &[2u8; 32], &nonce).is_err());
}

#[test]
fn bad_nonce_length_rejected() {
    let key = [0u8; 32];
    let nonce = generate_nonce();
    let ct = encrypt_at_rest(b"payload", &key, &nonce).expect("encrypt");

    assert!(matches!(
        decrypt_at_rest(&ct, &key, &nonce[..NONCE_LEN - 1]),
        Err(CryptoError::InvalidNonce)
    ));
}

#[test]
fn nonce_randomness_length() {
    let n1 = generate_nonce();
    let n2 = generate_nonce();
    assert_eq!(n1.len(), NONCE_LEN);
    assert_ne!(n1, n2, "nonce should be random");
}
