//! BIP-340 Schnorr signatures over event ids.

use secp256k1::{schnorr, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};

use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::key::HexKey;

/// Check `sig_hex` against `id` for the x-only key `pubkey`.
pub fn verify_schnorr(id: &Digest, pubkey: &HexKey, sig_hex: &str) -> Result<()> {
    let sig_bytes = hex::decode(sig_hex)
        .map_err(|e| Error::InvalidSignature(format!("not hex: {}", e)))?;
    let sig = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;
    let key = XOnlyPublicKey::from_slice(pubkey.as_bytes())
        .map_err(|e| Error::InvalidSignature(format!("{} is not a curve point: {}", pubkey, e)))?;

    Secp256k1::verification_only()
        .verify_schnorr(&sig, &Message::from_digest(*id), &key)
        .map_err(|_| Error::InvalidSignature(format!("signature does not match {}", pubkey)))
}

/// Sign `id` with a 32-byte secret key. Returns the lowercase hex signature.
pub fn sign_schnorr(id: &Digest, secret_key: &[u8; 32]) -> Result<String> {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, &secret(secret_key)?);
    let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(*id), &keypair);
    Ok(hex::encode(sig.serialize()))
}

/// X-only public key for a secret key.
pub fn public_key(secret_key: &[u8; 32]) -> Result<HexKey> {
    let secp = Secp256k1::new();
    let (xonly, _parity) = secret(secret_key)?.x_only_public_key(&secp);
    Ok(HexKey::from_bytes(&xonly.serialize()))
}

fn secret(secret_key: &[u8; 32]) -> Result<SecretKey> {
    SecretKey::from_slice(secret_key)
        .map_err(|e| Error::InvalidArgument(format!("invalid secret key: {}", e)))
}
