//! Wire format: CBOR command/response maps and the transport seam.
//!
//! A request is a definite map `{"cmd": <name>, ...args}`. The response is
//! a CBOR map followed by a two-byte status word; only `0x9000` is
//! success. Error replies carry `error` (text) and `code` (int).

use ciborium::value::Value;
use serde::Deserialize;
use serde_bytes::ByteBuf;

use crate::domain::error::{CardError, Result};

/// Moves one request to the card and returns `(status_word, body)`.
///
/// Implementations own the link layer (APDU wrapping, applet selection);
/// the protocol logic in [`crate::domain::card`] only sees CBOR bytes.
/// The integration-test emulator implements this too.
pub trait Transport {
    fn transmit(&mut self, request: &[u8]) -> Result<(u16, Vec<u8>)>;
}

/// Encode a command map. `cmd` always goes first.
pub fn encode_request(cmd: &str, args: Vec<(&str, Value)>) -> Result<Vec<u8>> {
    let mut entries = Vec::with_capacity(args.len() + 1);
    entries.push((Value::Text("cmd".into()), Value::Text(cmd.into())));
    for (key, value) in args {
        entries.push((Value::Text(key.into()), value));
    }

    let mut out = Vec::new();
    ciborium::ser::into_writer(&Value::Map(entries), &mut out)
        .map_err(|e| CardError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode a response body; must be a CBOR map.
pub fn decode_response(bytes: &[u8]) -> Result<Value> {
    let value: Value =
        ciborium::de::from_reader(bytes).map_err(|e| CardError::Decode(e.to_string()))?;
    if !value.is_map() {
        return Err(CardError::BadResponse("response is not a map"));
    }
    Ok(value)
}

/// Look up a key in a response map.
pub fn map_get<'a>(resp: &'a Value, key: &str) -> Option<&'a Value> {
    resp.as_map()?
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// Byte-string field accessor.
pub fn map_get_bytes(resp: &Value, key: &str) -> Option<Vec<u8>> {
    map_get(resp, key)?.as_bytes().cloned()
}

fn map_get_int(resp: &Value, key: &str) -> Option<i128> {
    map_get(resp, key)?.as_integer().map(i128::from)
}

/// Extract `(code, error)` if the response reports a failure.
pub fn map_get_error(resp: &Value) -> Option<(u16, String)> {
    let msg = map_get(resp, "error")?.as_text()?.to_string();
    let code = map_get_int(resp, "code").unwrap_or(500) as u16;
    Some((code, msg))
}

/// Deserialize a whole response map into a typed struct.
pub fn decode_as<T: for<'de> Deserialize<'de>>(resp: &Value) -> Result<T> {
    resp.deserialized()
        .map_err(|e| CardError::Decode(e.to_string()))
}

/// Reply to `status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub proto: u8,
    pub ver: String,
    #[serde(default)]
    pub birth: Option<u32>,
    /// `(active, total)`; SATSCARD only.
    #[serde(default)]
    pub slots: Option<(u8, u8)>,
    /// Trimmed address of the active slot (first and last 12 characters).
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub tapsigner: bool,
    /// Current derivation path; TAPSIGNER only.
    #[serde(default)]
    pub path: Option<Vec<u32>>,
    #[serde(default)]
    pub num_backups: Option<u32>,
    pub pubkey: ByteBuf,
    pub card_nonce: ByteBuf,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub auth_delay: u16,
}

/// Reply to `read`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadResponse {
    pub sig: ByteBuf,
    pub pubkey: ByteBuf,
}

/// Reply to `derive` (SATSCARD carries `master_pubkey`, TAPSIGNER `pubkey`).
#[derive(Debug, Clone, Deserialize)]
pub struct DeriveResponse {
    pub sig: ByteBuf,
    pub chain_code: ByteBuf,
    #[serde(default)]
    pub master_pubkey: Option<ByteBuf>,
    #[serde(default)]
    pub pubkey: Option<ByteBuf>,
}

/// Reply to `certs`.
#[derive(Debug, Clone, Deserialize)]
pub struct CertsResponse {
    pub cert_chain: Vec<ByteBuf>,
}

/// Reply to `check`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckResponse {
    pub auth_sig: ByteBuf,
}

/// Reply to `unseal`.
#[derive(Debug, Clone, Deserialize)]
pub struct UnsealResponse {
    pub slot: u8,
    /// XORed with the session key.
    pub privkey: ByteBuf,
    #[serde(default)]
    pub pubkey: Option<ByteBuf>,
    #[serde(default)]
    pub master_pk: Option<ByteBuf>,
    #[serde(default)]
    pub chain_code: Option<ByteBuf>,
}

/// Reply to `dump`. Present fields depend on slot state and whether the
/// request was authenticated.
#[derive(Debug, Clone, Deserialize)]
pub struct DumpResponse {
    pub slot: u8,
    #[serde(default)]
    pub used: Option<bool>,
    #[serde(default)]
    pub sealed: Option<bool>,
    #[serde(default)]
    pub addr: Option<String>,
    /// XORed with the session key when present.
    #[serde(default)]
    pub privkey: Option<ByteBuf>,
    #[serde(default)]
    pub pubkey: Option<ByteBuf>,
    #[serde(default)]
    pub chain_code: Option<ByteBuf>,
    #[serde(default)]
    pub tainted: Option<bool>,
}

/// Reply to `new`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewResponse {
    pub slot: u8,
}

/// Reply to `xpub`.
#[derive(Debug, Clone, Deserialize)]
pub struct XpubResponse {
    /// 78-byte BIP-32 serialized extended public key.
    pub xpub: ByteBuf,
}

/// Reply to `backup`.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupResponse {
    /// AES-CTR encrypted backup blob; key is printed on the card back.
    pub data: ByteBuf,
}

/// Reply to `sign`.
#[derive(Debug, Clone, Deserialize)]
pub struct SignResponse {
    #[serde(default)]
    pub slot: Option<u8>,
    pub sig: ByteBuf,
    pub pubkey: ByteBuf,
}

/// Reply to `wait`.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub auth_delay: u16,
}

/// Reply to `nfc`.
#[derive(Debug, Clone, Deserialize)]
pub struct NfcResponse {
    pub url: String,
}
