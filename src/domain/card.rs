//! Higher-level protocol for both card kinds.
//!
//! [`Card`] owns a [`Transport`], tracks the rolling `card_nonce`, and
//! exposes one method per card operation. Everything signature-shaped in a
//! response is verified host-side before being returned.

use ciborium::value::Value;
use rand::{RngCore, rngs::OsRng};
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::domain::address::{address_for_privkey, card_ident, hash160};
use crate::domain::auth::{SessionKey, calc_xcvc, pick_nonce, xor_bytes};
use crate::domain::constants::{
    CODE_UNLUCKY_NUMBER, CVC_MAX_LENGTH, CVC_MIN_LENGTH, FACTORY_ROOT_PUBKEY, PROTO_VERSION,
    SIGN_MAX_RETRIES, SW_OKAY,
};
use crate::domain::error::{CardError, Result};
use crate::domain::path::{all_hardened, none_hardened, parse_path, path_to_string};
use crate::domain::transport::{
    BackupResponse, CertsResponse, CheckResponse, DeriveResponse, DumpResponse, NewResponse,
    NfcResponse, ReadResponse, SignResponse, StatusResponse, Transport, UnsealResponse,
    WaitResponse, XpubResponse, decode_as, decode_response, encode_request, map_get,
    map_get_bytes, map_get_error,
};
use crate::domain::verify::{
    derive_slot_address, recover_address, verify_certs, verify_master_pubkey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Satscard,
    Tapsigner,
}

/// State of one SATSCARD slot, as reported by `dump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Sealed,
    Unsealed,
    Unused,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStatus::Sealed => write!(f, "sealed"),
            SlotStatus::Unsealed => write!(f, "UNSEALED"),
            SlotStatus::Unused => write!(f, "unused"),
        }
    }
}

/// A payment address that passed host-side verification.
#[derive(Debug, Clone)]
pub struct VerifiedAddress {
    pub address: String,
    /// Only available for the active slot.
    pub pubkey: Option<PublicKey>,
}

/// Protocol wrapper for one connected card.
pub struct Card<T: Transport> {
    transport: T,
    secp: Secp256k1<All>,
    root_keys: Vec<PublicKey>,
    card_nonce: Vec<u8>,
    certs_checked: bool,

    pub pubkey: PublicKey,
    pub ident: String,
    pub applet_version: String,
    pub birth_height: Option<u32>,
    pub is_testnet: bool,
    pub auth_delay: u16,
    pub kind: CardKind,
    pub active_slot: u8,
    pub num_slots: u8,
    pub num_backups: Option<u32>,
}

impl<T: Transport> Card<T> {
    /// Connect to a card and load its status ("first look").
    pub fn new(transport: T) -> Result<Self> {
        let root = PublicKey::from_slice(&FACTORY_ROOT_PUBKEY)?;
        Self::with_root_keys(transport, vec![root])
    }

    /// Like [`Card::new`] but trusting the given certificate roots.
    /// Development and test batches are signed by non-production roots.
    pub fn with_root_keys(mut transport: T, root_keys: Vec<PublicKey>) -> Result<Self> {
        let mut card_nonce = Vec::new();
        let mut auth_delay = 0;
        let resp = Self::raw_send(&mut transport, &mut card_nonce, &mut auth_delay, "status", vec![])?;
        let st: StatusResponse = decode_as(&resp)?;

        if st.proto != PROTO_VERSION {
            return Err(CardError::UnknownProtocol(st.proto));
        }
        let pubkey = PublicKey::from_slice(&st.pubkey)?;
        let (active_slot, num_slots) = st.slots.unwrap_or((0, 1));

        Ok(Self {
            transport,
            secp: Secp256k1::new(),
            root_keys,
            card_nonce,
            certs_checked: false,
            ident: card_ident(&st.pubkey),
            pubkey,
            applet_version: st.ver,
            birth_height: st.birth,
            is_testnet: st.testnet,
            auth_delay: st.auth_delay,
            kind: if st.tapsigner {
                CardKind::Tapsigner
            } else {
                CardKind::Satscard
            },
            active_slot,
            num_slots,
            num_backups: st.num_backups,
        })
    }

    pub fn is_tapsigner(&self) -> bool {
        self.kind == CardKind::Tapsigner
    }

    fn require_tapsigner(&self) -> Result<()> {
        match self.kind {
            CardKind::Tapsigner => Ok(()),
            CardKind::Satscard => Err(CardError::TapsignerOnly),
        }
    }

    fn require_satscard(&self) -> Result<()> {
        match self.kind {
            CardKind::Satscard => Ok(()),
            CardKind::Tapsigner => Err(CardError::SatscardOnly),
        }
    }

    /// One request/response exchange. The rolling `card_nonce` is captured
    /// from every reply that carries one, errors included; responses that
    /// report `auth_delay` update the cached delay likewise.
    fn raw_send(
        transport: &mut T,
        card_nonce: &mut Vec<u8>,
        auth_delay: &mut u16,
        cmd: &str,
        args: Vec<(&str, Value)>,
    ) -> Result<Value> {
        let request = encode_request(cmd, args)?;
        let (sw, body) = transport.transmit(&request)?;
        let resp = decode_response(&body)?;

        if let Some(nonce) = map_get_bytes(&resp, "card_nonce") {
            *card_nonce = nonce;
        }
        if let Some(delay) = map_get(&resp, "auth_delay").and_then(|v| v.as_integer()) {
            *auth_delay = i128::from(delay) as u16;
        }

        if let Some((code, msg)) = map_get_error(&resp) {
            return Err(CardError::Card {
                cmd: cmd.into(),
                code,
                msg,
            });
        }
        if sw != SW_OKAY {
            return Err(CardError::BadStatusWord(sw));
        }

        Ok(resp)
    }

    fn send(&mut self, cmd: &str, args: Vec<(&str, Value)>) -> Result<Value> {
        Self::raw_send(
            &mut self.transport,
            &mut self.card_nonce,
            &mut self.auth_delay,
            cmd,
            args,
        )
    }

    /// Send an authenticated command. When `cvc` is given the CVC is
    /// masked per the protocol; `sign` and `change` additionally XOR their
    /// sensitive argument with the session key.
    fn send_auth(
        &mut self,
        cmd: &str,
        cvc: Option<&str>,
        mut args: Vec<(&str, Value)>,
    ) -> Result<(Option<SessionKey>, Value)> {
        let session_key = match cvc {
            Some(cvc) => {
                let card_nonce = self.card_nonce.clone();
                let (key, auth) = calc_xcvc(cmd, &card_nonce, &self.pubkey, cvc.as_bytes())?;

                let encrypted_arg = match cmd {
                    "sign" => Some("digest"),
                    "change" => Some("data"),
                    _ => None,
                };
                if let Some(name) = encrypted_arg
                    && let Some(entry) = args.iter_mut().find(|(k, _)| *k == name)
                    && let Value::Bytes(bytes) = &mut entry.1
                {
                    *bytes = xor_bytes(bytes, &key[..bytes.len()]);
                }

                args.push(("epubkey", Value::Bytes(auth.epubkey.to_vec())));
                args.push(("xcvc", Value::Bytes(auth.xcvc)));
                Some(key)
            }
            None => None,
        };

        let resp = self.send(cmd, args)?;
        Ok((session_key, resp))
    }

    /// Fetch a fresh status without touching the cached fields.
    fn status(&mut self) -> Result<StatusResponse> {
        let resp = self.send("status", vec![])?;
        decode_as(&resp)
    }

    /// Re-read the card status and refresh the cached fields. Useful after
    /// state-changing commands (`new`, `unseal`).
    pub fn refresh(&mut self) -> Result<StatusResponse> {
        let st = self.status()?;
        if st.proto != PROTO_VERSION {
            return Err(CardError::UnknownProtocol(st.proto));
        }
        if let Some((active, total)) = st.slots {
            self.active_slot = active;
            self.num_slots = total;
        }
        self.is_testnet = st.testnet;
        self.auth_delay = st.auth_delay;
        self.num_backups = st.num_backups;
        Ok(st)
    }

    /// Check the factory certificate chain. Run once per connection by
    /// [`Card::address`]; can be invoked directly.
    pub fn certificate_check(&mut self) -> Result<PublicKey> {
        let st = self.status()?;

        let certs_resp = self.send("certs", vec![])?;
        let certs: CertsResponse = decode_as(&certs_resp)?;

        let nonce = pick_nonce();
        let check_resp = self.send("check", vec![("nonce", Value::Bytes(nonce.to_vec()))])?;
        let check: CheckResponse = decode_as(&check_resp)?;

        let root = verify_certs(&st, &check, &certs, &nonce, &self.root_keys)?;
        self.certs_checked = true;
        Ok(root)
    }

    /// Current payment address for a SATSCARD, fully verified by default.
    ///
    /// Returns `Ok(None)` when the requested slot is the active one and it
    /// has not been set up yet. Non-active slots are read through the
    /// unauthenticated `dump` command and carry no pubkey.
    pub fn address(
        &mut self,
        trust: bool,
        incl_pubkey: bool,
        slot: Option<u8>,
    ) -> Result<Option<VerifiedAddress>> {
        self.require_satscard()?;

        if !self.certs_checked && !trust {
            self.certificate_check()?;
        }

        let st = self.status()?;
        let (cur_slot, _) = st.slots.ok_or(CardError::BadResponse("missing slots"))?;
        let slot = slot.unwrap_or(cur_slot);

        if st.addr.is_none() && cur_slot == slot {
            return Ok(None);
        }

        if slot != cur_slot {
            if incl_pubkey {
                return Err(CardError::Unsupported(
                    "pubkey only available for the active slot",
                ));
            }
            let resp = self.send("dump", vec![("slot", Value::Integer(slot.into()))])?;
            let dump: DumpResponse = decode_as(&resp)?;
            let address = dump.addr.ok_or(CardError::UnusedSlot(slot))?;
            return Ok(Some(VerifiedAddress {
                address,
                pubkey: None,
            }));
        }

        let nonce = pick_nonce();
        let resp = self.send("read", vec![("nonce", Value::Bytes(nonce.to_vec()))])?;
        let read: ReadResponse = decode_as(&resp)?;
        let (pubkey, address) = recover_address(&st, &read, &nonce)?;

        if !trust {
            // Prove the chain code went into the slot key: re-derive m/0
            // from the signed master pubkey and compare.
            let my_nonce = pick_nonce();
            let card_nonce = self.card_nonce.clone();
            let resp = self.send("derive", vec![("nonce", Value::Bytes(my_nonce.to_vec()))])?;
            let derive: DeriveResponse = decode_as(&resp)?;
            let master_pubkey = derive
                .master_pubkey
                .as_ref()
                .ok_or(CardError::BadResponse("missing master_pubkey"))?;
            let master = verify_master_pubkey(
                master_pubkey,
                &derive.sig,
                &derive.chain_code,
                &my_nonce,
                &card_nonce,
            )?;
            let (derived_addr, _) =
                derive_slot_address(&derive.chain_code, &master, self.is_testnet)?;
            if derived_addr != address {
                return Err(CardError::AddressMismatch);
            }
        }

        Ok(Some(VerifiedAddress {
            address,
            pubkey: incl_pubkey.then_some(pubkey),
        }))
    }

    /// TAPSIGNER: current derivation path, `None` before the key is picked.
    pub fn derivation_path(&mut self) -> Result<Option<String>> {
        self.require_tapsigner()?;
        let st = self.status()?;
        Ok(st.path.as_deref().map(path_to_string))
    }

    /// TAPSIGNER: change the derivation path (all components hardened).
    /// Returns `(depth, chain_code, derived_pubkey)`.
    pub fn set_derivation_path(
        &mut self,
        path: &str,
        cvc: &str,
    ) -> Result<(usize, Vec<u8>, Vec<u8>)> {
        self.require_tapsigner()?;
        let components = parse_path(path)?;
        if !all_hardened(&components) {
            return Err(CardError::BadPath(
                "all path components must be hardened".into(),
            ));
        }

        let nonce = pick_nonce();
        let path_arg = Value::Array(
            components
                .iter()
                .map(|c| Value::Integer((*c).into()))
                .collect(),
        );
        let (_, resp) = self.send_auth(
            "derive",
            Some(cvc),
            vec![
                ("path", path_arg),
                ("nonce", Value::Bytes(nonce.to_vec())),
            ],
        )?;
        let derive: DeriveResponse = decode_as(&resp)?;
        let pubkey = derive
            .pubkey
            .ok_or(CardError::BadResponse("missing pubkey"))?;

        Ok((
            components.len(),
            derive.chain_code.into_vec(),
            pubkey.into_vec(),
        ))
    }

    /// TAPSIGNER: raw 78-byte BIP-32 serialized extended public key.
    pub fn xpub(&mut self, cvc: &str, master: bool) -> Result<Vec<u8>> {
        self.require_tapsigner()?;
        let (_, resp) = self.send_auth("xpub", Some(cvc), vec![("master", Value::Bool(master))])?;
        let xpub: XpubResponse = decode_as(&resp)?;
        if xpub.xpub.len() != 78 {
            return Err(CardError::BadResponse("bad xpub length"));
        }
        Ok(xpub.xpub.into_vec())
    }

    /// TAPSIGNER: base58check-encoded xpub.
    pub fn xpub_string(&mut self, cvc: &str, master: bool) -> Result<String> {
        let raw = self.xpub(cvc, master)?;
        Ok(bs58::encode(raw).with_check().into_string())
    }

    /// TAPSIGNER: master key fingerprint (XFP).
    pub fn master_fingerprint(&mut self, cvc: &str) -> Result<[u8; 4]> {
        let xpub = self.xpub(cvc, true)?;
        let mut xfp = [0u8; 4];
        xfp.copy_from_slice(&hash160(&xpub[45..78])[..4]);
        Ok(xfp)
    }

    /// TAPSIGNER: fetch the encrypted backup blob (~100 bytes, AES-CTR
    /// under the key printed on the card back). Kept long term by the
    /// caller; this client does not decrypt it.
    pub fn make_backup(&mut self, cvc: &str) -> Result<Vec<u8>> {
        self.require_tapsigner()?;
        let (_, resp) = self.send_auth("backup", Some(cvc), vec![])?;
        let backup: BackupResponse = decode_as(&resp)?;
        Ok(backup.data.into_vec())
    }

    /// Change the CVC. The new value travels XORed with the session key.
    pub fn change_cvc(&mut self, old_cvc: &str, new_cvc: &str) -> Result<()> {
        if !(CVC_MIN_LENGTH..=CVC_MAX_LENGTH).contains(&new_cvc.len()) {
            return Err(CardError::BadCvcLength);
        }
        let (_, _resp) = self.send_auth(
            "change",
            Some(old_cvc),
            vec![("data", Value::Bytes(new_cvc.as_bytes().to_vec()))],
        )?;
        Ok(())
    }

    /// SATSCARD: unseal the active slot. Returns the slot private key and
    /// the slot number that was unsealed.
    pub fn unseal_slot(&mut self, cvc: &str) -> Result<(Zeroizing<[u8; 32]>, u8)> {
        self.require_satscard()?;
        let target = self.active_slot;

        // Unauthenticated dump first: the slot must be used and sealed.
        let resp = self.send("dump", vec![("slot", Value::Integer(target.into()))])?;
        let dump: DumpResponse = decode_as(&resp)?;
        match dump.sealed {
            Some(false) => return Err(CardError::AlreadyUnsealed(target)),
            Some(true) => {}
            None => return Err(CardError::UnusedSlot(target)),
        }

        let (session_key, resp) = self.send_auth(
            "unseal",
            Some(cvc),
            vec![("slot", Value::Integer(target.into()))],
        )?;
        let unseal: UnsealResponse = decode_as(&resp)?;
        let session_key = session_key.ok_or(CardError::BadResponse("missing session key"))?;

        let privkey = self.decrypt_privkey(&unseal.privkey, &session_key)?;
        self.refresh()?;
        Ok((privkey, target))
    }

    /// SATSCARD: private key of an already-unsealed slot.
    pub fn slot_privkey(&mut self, cvc: &str, slot: u8) -> Result<Zeroizing<[u8; 32]>> {
        self.require_satscard()?;
        let (session_key, resp) = self.send_auth(
            "dump",
            Some(cvc),
            vec![("slot", Value::Integer(slot.into()))],
        )?;
        let dump: DumpResponse = decode_as(&resp)?;

        let Some(privkey) = dump.privkey else {
            return match (dump.used, dump.sealed) {
                (Some(false), _) => Err(CardError::UnusedSlot(slot)),
                (_, Some(true)) => Err(CardError::Unsupported("slot is still sealed")),
                _ => Err(CardError::BadResponse("no private key for slot")),
            };
        };
        let session_key = session_key.ok_or(CardError::BadResponse("missing session key"))?;
        self.decrypt_privkey(&privkey, &session_key)
    }

    /// SATSCARD: address and state of one slot. CVC optional; with it,
    /// unsealed slots render their address from the recovered private key.
    pub fn slot_usage(
        &mut self,
        slot: u8,
        cvc: Option<&str>,
    ) -> Result<(Option<String>, SlotStatus, DumpResponse)> {
        self.require_satscard()?;
        let (session_key, resp) = self.send_auth(
            "dump",
            cvc,
            vec![("slot", Value::Integer(slot.into()))],
        )?;
        let dump: DumpResponse = decode_as(&resp)?;

        let mut addr = dump.addr.clone();
        let status = if dump.sealed == Some(true) {
            if slot == self.active_slot {
                addr = self.address(true, false, None)?.map(|v| v.address);
            }
            SlotStatus::Sealed
        } else if dump.sealed == Some(false) || dump.privkey.is_some() {
            if let (Some(privkey), Some(key)) = (&dump.privkey, &session_key) {
                let privkey = self.decrypt_privkey(privkey, key)?;
                let secret = SecretKey::from_slice(privkey.as_ref())?;
                addr = Some(address_for_privkey(&secret, self.is_testnet)?);
            }
            SlotStatus::Unsealed
        } else if dump.used == Some(false) {
            SlotStatus::Unused
        } else {
            return Err(CardError::BadResponse("unrecognized slot state"));
        };

        Ok((addr, status, dump))
    }

    /// Open the next slot (SATSCARD) or pick the master key (TAPSIGNER).
    /// SATSCARD requires a chain code; one is generated when not supplied.
    /// Returns the newly active slot number.
    pub fn setup_slot(&mut self, cvc: &str, chain_code: Option<[u8; 32]>) -> Result<u8> {
        let mut args: Vec<(&str, Value)> =
            vec![("slot", Value::Integer(self.active_slot.into()))];

        match self.kind {
            CardKind::Satscard => {
                let chain_code = chain_code.unwrap_or_else(random_chain_code);
                args.push(("chain_code", Value::Bytes(chain_code.to_vec())));
            }
            CardKind::Tapsigner => {
                if let Some(chain_code) = chain_code {
                    args.push(("chain_code", Value::Bytes(chain_code.to_vec())));
                }
            }
        }

        let (_, resp) = self.send_auth("new", Some(cvc), args)?;
        let new: NewResponse = decode_as(&resp)?;
        self.refresh()?;
        Ok(new.slot)
    }

    /// Sign a 32-byte digest. Retries the protocol's "unlucky number"
    /// failure with fresh nonces; the returned signature is verified
    /// against the returned pubkey before being surfaced.
    pub fn sign_digest(
        &mut self,
        cvc: &str,
        slot: u8,
        digest: [u8; 32],
        subpath: Option<&str>,
    ) -> Result<([u8; 64], PublicKey)> {
        let mut args: Vec<(&str, Value)> = vec![
            ("slot", Value::Integer(slot.into())),
            ("digest", Value::Bytes(digest.to_vec())),
        ];

        if let Some(subpath) = subpath {
            self.require_tapsigner()?;
            let components = parse_path(subpath)?;
            if components.len() > 2 || !none_hardened(&components) {
                return Err(CardError::BadPath(
                    "subpath must be unhardened and at most 2 deep".into(),
                ));
            }
            args.push((
                "subpath",
                Value::Array(components.iter().map(|c| Value::Integer((*c).into())).collect()),
            ));
        }

        let mut last_err = None;
        for _ in 0..SIGN_MAX_RETRIES {
            match self.send_auth("sign", Some(cvc), args.clone()) {
                Ok((_, resp)) => {
                    let signed: SignResponse = decode_as(&resp)?;
                    let pubkey = PublicKey::from_slice(&signed.pubkey)?;
                    let sig = Signature::from_compact(&signed.sig)?;
                    self.secp
                        .verify_ecdsa(&Message::from_digest(digest), &sig, &pubkey)
                        .map_err(|_| CardError::BadSignature("sign response"))?;
                    let mut out = [0u8; 64];
                    out.copy_from_slice(&signed.sig);
                    return Ok((out, pubkey));
                }
                Err(err @ CardError::Card {
                    code: CODE_UNLUCKY_NUMBER,
                    ..
                }) => {
                    // Card picked a nonce leading to a non-canonical sig;
                    // the error reply rotated card_nonce, so just retry.
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(CardError::BadResponse("sign retries exhausted")))
    }

    /// The dynamic URL a phone tap would open.
    pub fn nfc_url(&mut self) -> Result<String> {
        let resp = self.send("nfc", vec![])?;
        let nfc: NfcResponse = decode_as(&resp)?;
        Ok(nfc.url)
    }

    /// Burn one second of the rate-limit delay. Returns seconds remaining.
    pub fn wait(&mut self, cvc: Option<&str>) -> Result<u16> {
        let (_, resp) = self.send_auth("wait", cvc, vec![])?;
        let wait: WaitResponse = decode_as(&resp)?;
        self.auth_delay = wait.auth_delay;
        Ok(wait.auth_delay)
    }

    fn decrypt_privkey(
        &self,
        encrypted: &[u8],
        session_key: &SessionKey,
    ) -> Result<Zeroizing<[u8; 32]>> {
        if encrypted.len() != 32 {
            return Err(CardError::BadResponse("bad privkey length"));
        }
        let plain = Zeroizing::new(xor_bytes(encrypted, session_key.as_ref()));
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(&plain);
        // reject the point at infinity and out-of-range scalars early
        SecretKey::from_slice(out.as_ref())?;
        Ok(out)
    }
}

/// Chain code for a new slot when the caller does not supply one.
fn random_chain_code() -> [u8; 32] {
    let mut entropy = [0u8; 128];
    OsRng.fill_bytes(&mut entropy);
    Sha256::digest(Sha256::digest(entropy)).into()
}
