//! RSA keypair generation and loading.
//!
//! rcgen's ring backend signs with RSA keys but cannot generate them, so
//! generation goes through the RustCrypto `rsa` crate and the result is
//! bridged into an [`rcgen::KeyPair`] via PKCS#8 PEM.

use rcgen::KeyPair;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{CaError, Result};

/// A freshly generated keypair plus its PEM renditions, ready to be written
/// to the key files and used for signing.
pub struct GeneratedKey {
    pub key_pair: KeyPair,
    pub private_pem: String,
    pub public_pem: String,
}

/// Generates an RSA keypair with a `bits`-bit modulus.
///
/// # Errors
/// Returns `Crypto` if generation or encoding fails.
pub fn generate_keypair(bits: u32) -> Result<GeneratedKey> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, bits as usize)
        .map_err(|e| CaError::crypto("Failed to generate RSA keypair", e))?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CaError::crypto("Failed to encode RSA private key", e))?
        .to_string();
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CaError::crypto("Failed to encode RSA public key", e))?;

    let key_pair = load_keypair(&private_pem)?;
    Ok(GeneratedKey {
        key_pair,
        private_pem,
        public_pem,
    })
}

/// Loads a PEM-encoded RSA private key for signing.
///
/// # Errors
/// Returns `Crypto` if the PEM is not a usable RSA private key.
pub fn load_keypair(private_pem: &str) -> Result<KeyPair> {
    KeyPair::from_pem_and_sign_algo(private_pem, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| CaError::crypto("Failed to load RSA private key", e))
}
