//! Payment address rendering and card identity formatting.

use bech32::hrp;
use data_encoding::BASE32;
use ripemd::Ripemd160;
use secp256k1::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};

use crate::domain::error::{CardError, Result};

/// RIPEMD160(SHA256(data)), the hash under P2WPKH programs.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// Render the P2WPKH (bech32, witness v0) address paying to `pubkey`.
pub fn render_address(pubkey: &PublicKey, testnet: bool) -> Result<String> {
    let hrp = if testnet { hrp::TB } else { hrp::BC };
    let program = hash160(&pubkey.serialize());
    bech32::segwit::encode_v0(hrp, &program).map_err(|e| CardError::Encode(e.to_string()))
}

/// Address paying to the public key of `privkey`. Used for unsealed slots
/// where the card hands back the private key itself.
pub fn address_for_privkey(privkey: &SecretKey, testnet: bool) -> Result<String> {
    render_address(&PublicKey::from_secret_key_global(privkey), testnet)
}

/// Render a private key in wallet import format (compressed).
pub fn render_wif(privkey: &SecretKey, testnet: bool) -> String {
    let mut payload = Vec::with_capacity(34);
    payload.push(if testnet { 0xef } else { 0x80 });
    payload.extend_from_slice(&privkey.secret_bytes());
    payload.push(0x01);
    bs58::encode(payload).with_check().into_string()
}

/// Human-readable card identity derived from the card public key.
///
/// SHA256 of the compressed pubkey, base32-encoded; the first 8 characters
/// are skipped because they are exposed in the NFC URL, then 20 characters
/// are grouped 5 at a time with dashes.
pub fn card_ident(card_pubkey: &[u8]) -> String {
    let md = BASE32.encode(&Sha256::digest(card_pubkey));
    (0..4)
        .map(|i| &md[8 + i * 5..8 + (i + 1) * 5])
        .collect::<Vec<_>>()
        .join("-")
}
