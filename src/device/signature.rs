//! Ed25519 signature handling for device keys.
//!
//! Registration validates the submitted public key; Smart-OTP approval
//! verifies the device's signature over the raw challenge nonce.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Parse and validate a hex-encoded Ed25519 public key submitted at
/// device registration. Returns the raw 32 bytes, or None when the input
/// is not a well-formed key (wrong length, bad hex, invalid point).
pub fn parse_public_key(hex_key: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim()).ok()?;
    let key: [u8; 32] = bytes.try_into().ok()?;
    // Not every 32-byte string is a valid curve point
    VerifyingKey::from_bytes(&key).ok()?;
    Some(key)
}

/// Verify a hex-encoded signature over the raw nonce bytes. Any malformed
/// input (key, hex, length) counts as verification failure, never an error.
pub fn verify_nonce_signature(public_key: &[u8], nonce: &str, signature_hex: &str) -> bool {
    let Ok(pk_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_bytes) else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);

    verifying_key.verify(nonce.as_bytes(), &signature).is_ok()
}

/// Test-only keypair generation and signing.
#[cfg(test)]
pub mod testing {
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    /// Returns (private key bytes, hex public key).
    pub fn generate_keypair() -> ([u8; 32], String) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_hex = hex::encode(signing_key.verifying_key().as_bytes());
        (signing_key.to_bytes(), public_hex)
    }

    /// Sign a nonce the way a device app would, returning the hex signature.
    pub fn sign_nonce(private_key: &[u8; 32], nonce: &str) -> String {
        let signing_key = SigningKey::from_bytes(private_key);
        hex::encode(signing_key.sign(nonce.as_bytes()).to_bytes())
    }
}
