//! Nonces and the one-time ECDH-masked CVC (`xcvc`) for authenticated
//! commands.

use rand::{RngCore, rngs::OsRng};
use secp256k1::{PublicKey, SecretKey, ecdh::SharedSecret};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::domain::constants::{CVC_MAX_LENGTH, CVC_MIN_LENGTH, USER_NONCE_SIZE};
use crate::domain::error::{CardError, Result};

/// ECDH session key; also the XOR pad for encrypted arguments and replies.
pub type SessionKey = Zeroizing<[u8; 32]>;

/// Auth arguments attached to the command map.
pub struct AuthArgs {
    pub epubkey: [u8; 33],
    pub xcvc: Vec<u8>,
}

/// Pick a fresh host-side nonce.
pub fn pick_nonce() -> [u8; USER_NONCE_SIZE] {
    let mut nonce = [0u8; USER_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// XOR two equal-length byte strings.
pub fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// Compute the session key and auth arguments for one command.
///
/// An ephemeral keypair is generated per call; the session key is the
/// libsecp-style ECDH result (SHA256 of the compressed shared point). The
/// CVC is masked with `XOR(session_key, SHA256(card_nonce || cmd))`
/// truncated to its length, so it never travels in the clear and cannot be
/// replayed once the card rotates its nonce.
pub fn calc_xcvc(
    cmd: &str,
    card_nonce: &[u8],
    card_pubkey: &PublicKey,
    cvc: &[u8],
) -> Result<(SessionKey, AuthArgs)> {
    if !(CVC_MIN_LENGTH..=CVC_MAX_LENGTH).contains(&cvc.len()) {
        return Err(CardError::BadCvcLength);
    }

    let my_privkey = SecretKey::new(&mut OsRng);
    let my_pubkey = PublicKey::from_secret_key_global(&my_privkey);

    let session_key: SessionKey =
        Zeroizing::new(SharedSecret::new(card_pubkey, &my_privkey).secret_bytes());

    let mut md = Sha256::new();
    md.update(card_nonce);
    md.update(cmd.as_bytes());
    let mask = xor_bytes(session_key.as_ref(), &md.finalize());

    let xcvc = xor_bytes(cvc, &mask[..cvc.len()]);

    Ok((
        session_key,
        AuthArgs {
            epubkey: my_pubkey.serialize(),
            xcvc,
        },
    ))
}

/// Recompute the session key the way the card does, from the host's
/// ephemeral pubkey. Mirrors [`calc_xcvc`]; used by tests and emulators.
pub fn session_key_from_epubkey(epubkey: &PublicKey, card_privkey: &SecretKey) -> SessionKey {
    Zeroizing::new(SharedSecret::new(epubkey, card_privkey).secret_bytes())
}
