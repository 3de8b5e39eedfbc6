//! In-process card emulator implementing the wire protocol.
//!
//! Behaves like a card on the other side of [`Transport`]: tracks its own
//! rolling nonce, unmasks the xcvc, signs with real secp256k1 keys, and
//! carries a factory-style certificate chain rooted in a test key.

use ciborium::value::Value;
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secp256k1::ecdh::SharedSecret;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256, Sha512};

use tapcard::domain::address::render_address;
use tapcard::domain::transport::{Transport, map_get, map_get_bytes};

const HARDENED: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unused,
    Sealed,
    Unsealed,
}

pub struct Slot {
    pub state: SlotState,
    pub master_sk: SecretKey,
    pub chain_code: [u8; 32],
}

pub struct Emulator {
    secp: Secp256k1<All>,
    pub card_sk: SecretKey,
    pub cert_chain: Vec<Vec<u8>>,
    pub root_pubkey: PublicKey,
    pub cvc: Vec<u8>,
    pub testnet: bool,
    pub tapsigner: bool,
    pub auth_delay: u16,
    /// Mangle the trimmed address in status replies.
    pub tamper_addr: bool,
    /// Fail this many `sign` attempts with code 205 first.
    pub unlucky_signs: u8,
    card_nonce: [u8; 16],
    // SATSCARD
    pub slots: Vec<Slot>,
    pub active: usize,
    // TAPSIGNER
    pub master: Option<(SecretKey, [u8; 32])>,
    pub path: Vec<u32>,
    pub num_backups: u32,
}

fn random_nonce() -> [u8; 16] {
    let mut n = [0u8; 16];
    OsRng.fill_bytes(&mut n);
    n
}

fn random_chain_code() -> [u8; 32] {
    let mut c = [0u8; 32];
    OsRng.fill_bytes(&mut c);
    c
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// Full BIP-32 CKDpriv, hardened and unhardened.
pub fn ckd_priv(parent: &SecretKey, chain_code: &[u8; 32], index: u32) -> (SecretKey, [u8; 32]) {
    let mut mac = Hmac::<Sha512>::new_from_slice(chain_code).unwrap();
    if index & HARDENED != 0 {
        mac.update(&[0u8]);
        mac.update(&parent.secret_bytes());
    } else {
        mac.update(&PublicKey::from_secret_key_global(parent).serialize());
    }
    mac.update(&index.to_be_bytes());
    let i = mac.finalize().into_bytes();

    let tweak = secp256k1::Scalar::from_be_bytes(i[..32].try_into().unwrap()).unwrap();
    let child = parent.add_tweak(&tweak).unwrap();
    (child, i[32..].try_into().unwrap())
}

fn get_text(map: &Value, key: &str) -> Option<String> {
    map_get(map, key)?.as_text().map(str::to_string)
}

fn get_u32(map: &Value, key: &str) -> Option<u32> {
    map_get(map, key)?.as_integer().map(|i| i128::from(i) as u32)
}

fn get_bool(map: &Value, key: &str) -> Option<bool> {
    map_get(map, key)?.as_bool()
}

fn get_u32_array(map: &Value, key: &str) -> Option<Vec<u32>> {
    Some(
        map_get(map, key)?
            .as_array()?
            .iter()
            .filter_map(|v| v.as_integer().map(|i| i128::from(i) as u32))
            .collect(),
    )
}

fn entry(key: &str, value: Value) -> (Value, Value) {
    (Value::Text(key.into()), value)
}

impl Emulator {
    fn base(tapsigner: bool, cvc: &str, num_slots: usize) -> Self {
        let secp = Secp256k1::new();
        let card_sk = SecretKey::new(&mut OsRng);
        let card_pk = PublicKey::from_secret_key(&secp, &card_sk);

        // Factory chain: batch key signs the card key, root signs the batch.
        let batch_sk = SecretKey::new(&mut OsRng);
        let root_sk = SecretKey::new(&mut OsRng);
        let batch_pk = PublicKey::from_secret_key(&secp, &batch_sk);
        let sign_rec = |sk: &SecretKey, digest: [u8; 32]| -> Vec<u8> {
            let rec = secp.sign_ecdsa_recoverable(&Message::from_digest(digest), sk);
            let (rec_id, compact) = rec.serialize_compact();
            let mut out = compact.to_vec();
            out.push(rec_id.to_i32() as u8);
            out
        };
        let cert_chain = vec![
            sign_rec(&batch_sk, sha256(&card_pk.serialize())),
            sign_rec(&root_sk, sha256(&batch_pk.serialize())),
        ];
        let root_pubkey = PublicKey::from_secret_key(&secp, &root_sk);

        let slots = (0..num_slots)
            .map(|_| Slot {
                state: SlotState::Unused,
                master_sk: SecretKey::new(&mut OsRng),
                chain_code: random_chain_code(),
            })
            .collect();

        Self {
            secp,
            card_sk,
            cert_chain,
            root_pubkey,
            cvc: cvc.as_bytes().to_vec(),
            testnet: false,
            tapsigner,
            auth_delay: 0,
            tamper_addr: false,
            unlucky_signs: 0,
            card_nonce: random_nonce(),
            slots,
            active: 0,
            master: None,
            path: Vec::new(),
            num_backups: 0,
        }
    }

    /// SATSCARD with the first `sealed` slots already set up.
    pub fn satscard(cvc: &str, sealed: usize) -> Self {
        let mut card = Self::base(false, cvc, 10);
        for i in 0..sealed {
            card.slots[i].state = SlotState::Sealed;
        }
        card
    }

    /// TAPSIGNER with its master key already picked.
    pub fn tapsigner(cvc: &str) -> Self {
        let mut card = Self::base(true, cvc, 1);
        card.master = Some((SecretKey::new(&mut OsRng), random_chain_code()));
        card
    }

    pub fn card_pubkey(&self) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, &self.card_sk)
    }

    /// Private key a slot pays to (`m/0` below the slot master key).
    pub fn slot_privkey(&self, slot: usize) -> SecretKey {
        let s = &self.slots[slot];
        ckd_priv(&s.master_sk, &s.chain_code, 0).0
    }

    pub fn slot_address(&self, slot: usize) -> String {
        let pk = PublicKey::from_secret_key(&self.secp, &self.slot_privkey(slot));
        render_address(&pk, self.testnet).unwrap()
    }

    /// TAPSIGNER key at the current derivation path plus `subpath`.
    pub fn derived_key(&self, subpath: &[u32]) -> (SecretKey, [u8; 32]) {
        let (mut sk, mut cc) = self.master.clone().expect("master key picked");
        for index in self.path.iter().chain(subpath) {
            (sk, cc) = ckd_priv(&sk, &cc, *index);
        }
        (sk, cc)
    }

    fn rotate(&mut self) -> [u8; 16] {
        self.card_nonce = random_nonce();
        self.card_nonce
    }

    fn error_resp(&mut self, code: u16, msg: &str) -> Value {
        let nonce = self.rotate();
        let mut map = vec![
            entry("error", Value::Text(msg.into())),
            entry("code", Value::Integer(code.into())),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ];
        if self.auth_delay > 0 {
            map.push(entry("auth_delay", Value::Integer(self.auth_delay.into())));
        }
        Value::Map(map)
    }

    /// Unmask and check the CVC. `Ok(None)` means the request carried no
    /// auth at all.
    fn check_auth(
        &mut self,
        cmd: &str,
        req: &Value,
    ) -> std::result::Result<Option<[u8; 32]>, Value> {
        let Some(epubkey) = map_get_bytes(req, "epubkey") else {
            return Ok(None);
        };
        if self.auth_delay > 0 {
            return Err(self.error_resp(429, "rate limited"));
        }

        let Ok(epub) = PublicKey::from_slice(&epubkey) else {
            return Err(self.error_resp(400, "bad epubkey"));
        };
        let session: [u8; 32] = SharedSecret::new(&epub, &self.card_sk).secret_bytes();

        let mut md = Sha256::new();
        md.update(self.card_nonce);
        md.update(cmd.as_bytes());
        let mask = xor(&session, &md.finalize());

        let xcvc = map_get_bytes(req, "xcvc").unwrap_or_default();
        let cvc = xor(&xcvc, &mask[..xcvc.len()]);
        if cvc != self.cvc {
            return Err(self.error_resp(401, "bad auth"));
        }
        Ok(Some(session))
    }

    fn require_auth(&mut self, cmd: &str, req: &Value) -> std::result::Result<[u8; 32], Value> {
        match self.check_auth(cmd, req)? {
            Some(session) => Ok(session),
            None => Err(self.error_resp(401, "auth required")),
        }
    }

    fn sign_compact(&self, sk: &SecretKey, digest: [u8; 32]) -> Vec<u8> {
        self.secp
            .sign_ecdsa(&Message::from_digest(digest), sk)
            .serialize_compact()
            .to_vec()
    }

    fn auth_msg(&self, user_nonce: &[u8], tail: &[u8]) -> [u8; 32] {
        let mut msg = Vec::new();
        msg.extend_from_slice(b"OPENDIME");
        msg.extend_from_slice(&self.card_nonce);
        msg.extend_from_slice(user_nonce);
        msg.extend_from_slice(tail);
        sha256(&msg)
    }

    fn trimmed_addr(&self) -> Option<String> {
        if self.slots[self.active].state != SlotState::Sealed {
            return None;
        }
        let mut addr = self.slot_address(self.active);
        if self.tamper_addr {
            // flip the final character to break the suffix match
            let last = addr.pop().unwrap();
            addr.push(if last == 'q' { 'p' } else { 'q' });
        }
        Some(format!(
            "{}___{}",
            &addr[..12],
            &addr[addr.len() - 12..]
        ))
    }

    fn handle_status(&mut self) -> Value {
        let mut map = vec![
            entry("proto", Value::Integer(1.into())),
            entry("ver", Value::Text("1.0.3".into())),
            entry("birth", Value::Integer(700_001.into())),
            entry(
                "pubkey",
                Value::Bytes(self.card_pubkey().serialize().to_vec()),
            ),
            // status reports the current nonce without consuming it
            entry("card_nonce", Value::Bytes(self.card_nonce.to_vec())),
        ];
        if self.testnet {
            map.push(entry("testnet", Value::Bool(true)));
        }
        if self.auth_delay > 0 {
            map.push(entry("auth_delay", Value::Integer(self.auth_delay.into())));
        }
        if self.tapsigner {
            map.push(entry("tapsigner", Value::Bool(true)));
            map.push(entry("num_backups", Value::Integer(self.num_backups.into())));
            if self.master.is_some() {
                map.push(entry(
                    "path",
                    Value::Array(self.path.iter().map(|c| Value::Integer((*c).into())).collect()),
                ));
            }
        } else {
            map.push(entry(
                "slots",
                Value::Array(vec![
                    Value::Integer((self.active as u8).into()),
                    Value::Integer((self.slots.len() as u8).into()),
                ]),
            ));
            if let Some(addr) = self.trimmed_addr() {
                map.push(entry("addr", Value::Text(addr)));
            }
        }
        Value::Map(map)
    }

    fn handle_read(&mut self, req: &Value) -> Value {
        if self.tapsigner {
            return self.error_resp(405, "unknown command");
        }
        if self.slots[self.active].state != SlotState::Sealed {
            return self.error_resp(406, "slot not sealed");
        }
        let user_nonce = map_get_bytes(req, "nonce").unwrap_or_default();
        let digest = self.auth_msg(&user_nonce, &[self.active as u8]);

        let slot_sk = self.slot_privkey(self.active);
        let sig = self.sign_compact(&slot_sk, digest);
        let pubkey = PublicKey::from_secret_key(&self.secp, &slot_sk);
        let nonce = self.rotate();
        Value::Map(vec![
            entry("sig", Value::Bytes(sig)),
            entry("pubkey", Value::Bytes(pubkey.serialize().to_vec())),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ])
    }

    fn handle_derive(&mut self, req: &Value) -> Value {
        let user_nonce = map_get_bytes(req, "nonce").unwrap_or_default();

        if !self.tapsigner {
            let slot = &self.slots[self.active];
            if slot.state == SlotState::Unused {
                return self.error_resp(406, "slot not used");
            }
            let chain_code = slot.chain_code;
            let master_sk = slot.master_sk;
            let digest = self.auth_msg(&user_nonce, &chain_code);
            let sig = self.sign_compact(&master_sk, digest);
            let master_pk = PublicKey::from_secret_key(&self.secp, &master_sk);
            let nonce = self.rotate();
            return Value::Map(vec![
                entry("sig", Value::Bytes(sig)),
                entry("chain_code", Value::Bytes(chain_code.to_vec())),
                entry("master_pubkey", Value::Bytes(master_pk.serialize().to_vec())),
                entry("card_nonce", Value::Bytes(nonce.to_vec())),
            ]);
        }

        // TAPSIGNER: authenticated path change
        if let Err(e) = self.require_auth("derive", req) {
            return e;
        }
        let Some(path) = get_u32_array(req, "path") else {
            return self.error_resp(400, "missing path");
        };
        if path.iter().any(|c| c & HARDENED == 0) {
            return self.error_resp(422, "path must be fully hardened");
        }
        self.path = path;

        let (master_sk, _) = self.master.clone().expect("master key picked");
        let (derived_sk, derived_cc) = self.derived_key(&[]);
        let derived_pk = PublicKey::from_secret_key(&self.secp, &derived_sk);
        let master_pk = PublicKey::from_secret_key(&self.secp, &master_sk);
        let digest = self.auth_msg(&user_nonce, &derived_cc);
        let sig = self.sign_compact(&master_sk, digest);
        let nonce = self.rotate();
        Value::Map(vec![
            entry("sig", Value::Bytes(sig)),
            entry("chain_code", Value::Bytes(derived_cc.to_vec())),
            entry("pubkey", Value::Bytes(derived_pk.serialize().to_vec())),
            entry("master_pubkey", Value::Bytes(master_pk.serialize().to_vec())),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ])
    }

    fn handle_check(&mut self, req: &Value) -> Value {
        let user_nonce = map_get_bytes(req, "nonce").unwrap_or_default();
        let digest = self.auth_msg(&user_nonce, &[]);
        let card_sk = self.card_sk;
        let auth_sig = self.sign_compact(&card_sk, digest);
        let nonce = self.rotate();
        Value::Map(vec![
            entry("auth_sig", Value::Bytes(auth_sig)),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ])
    }

    fn handle_certs(&mut self) -> Value {
        Value::Map(vec![entry(
            "cert_chain",
            Value::Array(
                self.cert_chain
                    .iter()
                    .map(|sig| Value::Bytes(sig.clone()))
                    .collect(),
            ),
        )])
    }

    fn handle_new(&mut self, req: &Value) -> Value {
        if let Err(e) = self.require_auth("new", req) {
            return e;
        }

        if self.tapsigner {
            if self.master.is_some() {
                return self.error_resp(406, "key already picked");
            }
            let chain_code = map_get_bytes(req, "chain_code")
                .and_then(|c| c.try_into().ok())
                .unwrap_or_else(random_chain_code);
            self.master = Some((SecretKey::new(&mut OsRng), chain_code));
            let nonce = self.rotate();
            return Value::Map(vec![
                entry("slot", Value::Integer(0.into())),
                entry("card_nonce", Value::Bytes(nonce.to_vec())),
            ]);
        }

        if self.slots[self.active].state != SlotState::Unused {
            return self.error_resp(406, "slot already used");
        }
        let Some(chain_code) = map_get_bytes(req, "chain_code").and_then(|c| c.try_into().ok())
        else {
            return self.error_resp(400, "missing chain_code");
        };
        self.slots[self.active] = Slot {
            state: SlotState::Sealed,
            master_sk: SecretKey::new(&mut OsRng),
            chain_code,
        };
        let nonce = self.rotate();
        Value::Map(vec![
            entry("slot", Value::Integer((self.active as u8).into())),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ])
    }

    fn handle_unseal(&mut self, req: &Value) -> Value {
        let session = match self.require_auth("unseal", req) {
            Ok(s) => s,
            Err(e) => return e,
        };
        if self.tapsigner {
            return self.error_resp(405, "unknown command");
        }
        let slot_num = get_u32(req, "slot").unwrap_or(self.active as u32) as usize;
        if slot_num != self.active || self.slots[slot_num].state != SlotState::Sealed {
            return self.error_resp(406, "slot not sealed");
        }

        let slot_sk = self.slot_privkey(slot_num);
        let slot = &mut self.slots[slot_num];
        slot.state = SlotState::Unsealed;
        let master_pk = PublicKey::from_secret_key(&self.secp, &slot.master_sk);
        let chain_code = slot.chain_code;

        let resp = Value::Map(vec![
            entry("slot", Value::Integer((slot_num as u8).into())),
            entry(
                "privkey",
                Value::Bytes(xor(&slot_sk.secret_bytes(), &session)),
            ),
            entry(
                "pubkey",
                Value::Bytes(
                    PublicKey::from_secret_key(&self.secp, &slot_sk)
                        .serialize()
                        .to_vec(),
                ),
            ),
            entry("master_pk", Value::Bytes(master_pk.serialize().to_vec())),
            entry("chain_code", Value::Bytes(chain_code.to_vec())),
            entry("card_nonce", Value::Bytes(self.rotate().to_vec())),
        ]);

        if self.active + 1 < self.slots.len() {
            self.active += 1;
        }
        resp
    }

    fn handle_dump(&mut self, req: &Value) -> Value {
        let session = match self.check_auth("dump", req) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let slot_num = get_u32(req, "slot").unwrap_or(0) as usize;
        if slot_num >= self.slots.len() {
            return self.error_resp(400, "bad slot number");
        }

        let state = self.slots[slot_num].state;
        let mut map = vec![entry("slot", Value::Integer((slot_num as u8).into()))];
        match state {
            SlotState::Unused => {
                map.push(entry("used", Value::Bool(false)));
            }
            SlotState::Sealed => {
                map.push(entry("used", Value::Bool(true)));
                map.push(entry("sealed", Value::Bool(true)));
            }
            SlotState::Unsealed => {
                map.push(entry("used", Value::Bool(true)));
                map.push(entry("sealed", Value::Bool(false)));
                map.push(entry("addr", Value::Text(self.slot_address(slot_num))));
                if let Some(session) = session {
                    let slot_sk = self.slot_privkey(slot_num);
                    map.push(entry(
                        "privkey",
                        Value::Bytes(xor(&slot_sk.secret_bytes(), &session)),
                    ));
                    map.push(entry(
                        "pubkey",
                        Value::Bytes(
                            PublicKey::from_secret_key(&self.secp, &slot_sk)
                                .serialize()
                                .to_vec(),
                        ),
                    ));
                    map.push(entry(
                        "chain_code",
                        Value::Bytes(self.slots[slot_num].chain_code.to_vec()),
                    ));
                }
            }
        }
        map.push(entry("card_nonce", Value::Bytes(self.rotate().to_vec())));
        Value::Map(map)
    }

    fn handle_change(&mut self, req: &Value) -> Value {
        let session = match self.require_auth("change", req) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let data = map_get_bytes(req, "data").unwrap_or_default();
        let new_cvc = xor(&data, &session[..data.len()]);
        if !(6..=32).contains(&new_cvc.len()) {
            return self.error_resp(400, "bad CVC length");
        }
        self.cvc = new_cvc;
        let nonce = self.rotate();
        Value::Map(vec![
            entry("success", Value::Bool(true)),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ])
    }

    fn handle_xpub(&mut self, req: &Value) -> Value {
        if let Err(e) = self.require_auth("xpub", req) {
            return e;
        }
        if !self.tapsigner {
            return self.error_resp(405, "unknown command");
        }
        let Some((master_sk, master_cc)) = self.master.clone() else {
            return self.error_resp(406, "no key picked");
        };
        let master = get_bool(req, "master").unwrap_or(false);

        let (depth, child, parent_pk, key_sk, chain_code) = if master || self.path.is_empty() {
            (0u8, 0u32, None, master_sk, master_cc)
        } else {
            // parent of the derived key, for the fingerprint
            let (mut sk, mut cc) = (master_sk, master_cc);
            for index in &self.path[..self.path.len() - 1] {
                (sk, cc) = ckd_priv(&sk, &cc, *index);
            }
            let parent_pk = PublicKey::from_secret_key(&self.secp, &sk);
            let last = *self.path.last().unwrap();
            let (child_sk, child_cc) = ckd_priv(&sk, &cc, last);
            (self.path.len() as u8, last, Some(parent_pk), child_sk, child_cc)
        };

        let mut xpub = Vec::with_capacity(78);
        let version: u32 = if self.testnet { 0x0435_87cf } else { 0x0488_b21e };
        xpub.extend_from_slice(&version.to_be_bytes());
        xpub.push(depth);
        match parent_pk {
            Some(pk) => xpub.extend_from_slice(
                &tapcard::domain::address::hash160(&pk.serialize())[..4],
            ),
            None => xpub.extend_from_slice(&[0u8; 4]),
        }
        xpub.extend_from_slice(&child.to_be_bytes());
        xpub.extend_from_slice(&chain_code);
        xpub.extend_from_slice(
            &PublicKey::from_secret_key(&self.secp, &key_sk).serialize(),
        );

        let nonce = self.rotate();
        Value::Map(vec![
            entry("xpub", Value::Bytes(xpub)),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ])
    }

    fn handle_backup(&mut self, req: &Value) -> Value {
        if let Err(e) = self.require_auth("backup", req) {
            return e;
        }
        if !self.tapsigner {
            return self.error_resp(405, "unknown command");
        }
        self.num_backups += 1;
        let mut data = vec![0u8; 100];
        OsRng.fill_bytes(&mut data);
        let nonce = self.rotate();
        Value::Map(vec![
            entry("data", Value::Bytes(data)),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ])
    }

    fn handle_sign(&mut self, req: &Value) -> Value {
        let session = match self.require_auth("sign", req) {
            Ok(s) => s,
            Err(e) => return e,
        };
        if self.unlucky_signs > 0 {
            self.unlucky_signs -= 1;
            return self.error_resp(205, "unlucky number");
        }

        let masked = map_get_bytes(req, "digest").unwrap_or_default();
        let digest: [u8; 32] = match xor(&masked, &session).try_into() {
            Ok(d) => d,
            Err(_) => return self.error_resp(400, "bad digest length"),
        };

        let slot_num = get_u32(req, "slot").unwrap_or(0) as usize;
        let key_sk = if self.tapsigner {
            let subpath = get_u32_array(req, "subpath").unwrap_or_default();
            self.derived_key(&subpath).0
        } else {
            if slot_num >= self.slots.len() {
                return self.error_resp(400, "bad slot number");
            }
            if self.slots[slot_num].state == SlotState::Unused {
                return self.error_resp(406, "slot not used");
            }
            self.slot_privkey(slot_num)
        };

        let sig = self.sign_compact(&key_sk, digest);
        let pubkey = PublicKey::from_secret_key(&self.secp, &key_sk);
        let nonce = self.rotate();
        Value::Map(vec![
            entry("slot", Value::Integer((slot_num as u8).into())),
            entry("sig", Value::Bytes(sig)),
            entry("pubkey", Value::Bytes(pubkey.serialize().to_vec())),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ])
    }

    fn handle_wait(&mut self, req: &Value) -> Value {
        // auth optional; ignore a bad CVC here, the delay burns regardless
        let _ = map_get(req, "epubkey");
        if self.auth_delay > 0 {
            self.auth_delay -= 1;
        }
        let remaining = self.auth_delay;
        let nonce = self.rotate();
        Value::Map(vec![
            entry("success", Value::Bool(true)),
            entry("auth_delay", Value::Integer(remaining.into())),
            entry("card_nonce", Value::Bytes(nonce.to_vec())),
        ])
    }

    fn handle_nfc(&mut self) -> Value {
        let url = if self.tapsigner {
            "https://tapsigner.com/start#t=1".to_string()
        } else {
            format!("https://getsatscard.com/start#u=S&o={}", self.active)
        };
        Value::Map(vec![entry("url", Value::Text(url))])
    }

    fn handle(&mut self, req: &Value) -> Value {
        let cmd = get_text(req, "cmd").unwrap_or_default();
        match cmd.as_str() {
            "status" => self.handle_status(),
            "read" => self.handle_read(req),
            "derive" => self.handle_derive(req),
            "check" => self.handle_check(req),
            "certs" => self.handle_certs(),
            "new" => self.handle_new(req),
            "unseal" => self.handle_unseal(req),
            "dump" => self.handle_dump(req),
            "change" => self.handle_change(req),
            "xpub" => self.handle_xpub(req),
            "backup" => self.handle_backup(req),
            "sign" => self.handle_sign(req),
            "wait" => self.handle_wait(req),
            "nfc" => self.handle_nfc(),
            _ => self.error_resp(405, "unknown command"),
        }
    }
}

impl Transport for Emulator {
    fn transmit(&mut self, request: &[u8]) -> tapcard::domain::error::Result<(u16, Vec<u8>)> {
        let req: Value = ciborium::de::from_reader(request).expect("well-formed request");
        let resp = self.handle(&req);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&resp, &mut out).expect("response encodes");
        // Errors ride in the map; the status word stays 0x9000 like a
        // card that processed the APDU.
        Ok((0x9000, out))
    }
}
