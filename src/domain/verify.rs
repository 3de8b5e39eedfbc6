//! Host-side verification of everything the card claims.
//!
//! The card is never trusted: payment addresses are recovered from
//! signatures, slot keys are re-derived from the master public key, and
//! the factory certificate chain is walked back to a known root.

use hmac::{Hmac, Mac};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use secp256k1::{Message, PublicKey, Scalar, Secp256k1};
use sha2::{Digest, Sha256, Sha512};

use crate::domain::address::render_address;
use crate::domain::constants::{ADDR_TRIM, AUTH_MSG_HEADER, CARD_NONCE_SIZE, USER_NONCE_SIZE};
use crate::domain::error::{CardError, Result};
use crate::domain::transport::{CertsResponse, CheckResponse, ReadResponse, StatusResponse};

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn verify_sig(pubkey: &PublicKey, digest: [u8; 32], sig: &[u8]) -> Result<()> {
    let sig = Signature::from_compact(sig)?;
    let msg = Message::from_digest(digest);
    Secp256k1::verification_only()
        .verify_ecdsa(&msg, &sig, pubkey)
        .map_err(|_| CardError::BadSignature("ECDSA verify failed"))
}

/// Recover the signer from a 65-byte recoverable signature (r || s || id).
fn recover_pubkey(digest: [u8; 32], sig: &[u8]) -> Result<PublicKey> {
    if sig.len() != 65 {
        return Err(CardError::BadSignature("recoverable sig must be 65 bytes"));
    }
    let rec_id = RecoveryId::from_i32(sig[64] as i32)?;
    let rec_sig = RecoverableSignature::from_compact(&sig[..64], rec_id)?;
    let msg = Message::from_digest(digest);
    Ok(Secp256k1::new().recover_ecdsa(&msg, &rec_sig)?)
}

/// Reconstruct and verify the payment address from `status` + `read`.
///
/// The card signs `"OPENDIME" || card_nonce || my_nonce || slot` with the
/// slot key, proving it holds it; the full address rendered from the
/// returned pubkey must match the trimmed `addr` the card displayed.
pub fn recover_address(
    status: &StatusResponse,
    read: &ReadResponse,
    my_nonce: &[u8],
) -> Result<(PublicKey, String)> {
    let (active_slot, _) = status.slots.ok_or(CardError::BadResponse("missing slots"))?;
    let card_nonce: &[u8] = &status.card_nonce;
    if card_nonce.len() != CARD_NONCE_SIZE || my_nonce.len() != USER_NONCE_SIZE {
        return Err(CardError::BadResponse("bad nonce length"));
    }

    let mut msg = Vec::with_capacity(8 + CARD_NONCE_SIZE + USER_NONCE_SIZE + 1);
    msg.extend_from_slice(AUTH_MSG_HEADER);
    msg.extend_from_slice(card_nonce);
    msg.extend_from_slice(my_nonce);
    msg.push(active_slot);

    let pubkey = PublicKey::from_slice(&read.pubkey)?;
    verify_sig(&pubkey, sha256(&msg), &read.sig)?;

    let expect = status.addr.as_deref().ok_or(CardError::BadResponse("missing addr"))?;
    let left = &expect[..expect.find('_').ok_or(CardError::BadResponse("addr not trimmed"))?];
    let right = &expect[expect.rfind('_').map(|i| i + 1).unwrap_or(0)..];
    if left.len() != ADDR_TRIM || right.len() != ADDR_TRIM {
        return Err(CardError::BadResponse("addr not trimmed"));
    }

    let addr = render_address(&pubkey, status.testnet)?;
    if !addr.starts_with(left) || !addr.ends_with(right) {
        return Err(CardError::AddressMismatch);
    }

    Ok((pubkey, addr))
}

/// Verify the `derive` signature that binds the chain code to the slot's
/// master public key.
pub fn verify_master_pubkey(
    pubkey: &[u8],
    sig: &[u8],
    chain_code: &[u8],
    my_nonce: &[u8],
    card_nonce: &[u8],
) -> Result<PublicKey> {
    if chain_code.len() != 32 {
        return Err(CardError::BadResponse("bad chain code length"));
    }

    let mut msg = Vec::with_capacity(8 + CARD_NONCE_SIZE + USER_NONCE_SIZE + 32);
    msg.extend_from_slice(AUTH_MSG_HEADER);
    msg.extend_from_slice(card_nonce);
    msg.extend_from_slice(my_nonce);
    msg.extend_from_slice(chain_code);

    let master = PublicKey::from_slice(pubkey)?;
    verify_sig(&master, sha256(&msg), sig)?;
    Ok(master)
}

/// Public BIP-32 child key derivation (CKDpub, non-hardened).
pub fn ckd_pub(parent: &PublicKey, chain_code: &[u8; 32], index: u32) -> Result<PublicKey> {
    let mut mac = Hmac::<Sha512>::new_from_slice(chain_code)
        .map_err(|_| CardError::BadResponse("bad chain code length"))?;
    mac.update(&parent.serialize());
    mac.update(&index.to_be_bytes());
    let i = mac.finalize().into_bytes();

    let tweak = Scalar::from_be_bytes(i[..32].try_into().expect("32 bytes"))
        .map_err(|_| CardError::BadSignature("invalid derivation tweak"))?;
    Ok(parent.add_exp_tweak(&Secp256k1::new(), &tweak)?)
}

/// Address a slot must pay to: `m/0` below the slot's master key.
pub fn derive_slot_address(
    chain_code: &[u8],
    master: &PublicKey,
    testnet: bool,
) -> Result<(String, PublicKey)> {
    let chain_code: [u8; 32] = chain_code
        .try_into()
        .map_err(|_| CardError::BadResponse("bad chain code length"))?;
    let pubkey = ckd_pub(master, &chain_code, 0)?;
    Ok((render_address(&pubkey, testnet)?, pubkey))
}

/// Walk the factory certificate chain.
///
/// The card key signs `"OPENDIME" || card_nonce || my_nonce`; each chain
/// entry is a recoverable signature over SHA256 of the previous pubkey.
/// The recovered end of the chain must be one of `root_keys`.
pub fn verify_certs(
    status: &StatusResponse,
    check: &CheckResponse,
    certs: &CertsResponse,
    my_nonce: &[u8],
    root_keys: &[PublicKey],
) -> Result<PublicKey> {
    if certs.cert_chain.len() < 2 {
        return Err(CardError::BadResponse("certificate chain too short"));
    }
    if check.auth_sig.len() != 64 {
        return Err(CardError::BadResponse("bad auth_sig length"));
    }

    let mut msg = Vec::with_capacity(8 + CARD_NONCE_SIZE + USER_NONCE_SIZE);
    msg.extend_from_slice(AUTH_MSG_HEADER);
    msg.extend_from_slice(&status.card_nonce);
    msg.extend_from_slice(my_nonce);

    let card_pubkey = PublicKey::from_slice(&status.pubkey)?;
    verify_sig(&card_pubkey, sha256(&msg), &check.auth_sig)?;

    let mut pubkey = card_pubkey;
    for sig in &certs.cert_chain {
        pubkey = recover_pubkey(sha256(&pubkey.serialize()), sig)?;
    }

    if root_keys.contains(&pubkey) {
        Ok(pubkey)
    } else {
        Err(CardError::UntrustedCard)
    }
}
