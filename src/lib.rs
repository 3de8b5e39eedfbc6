//! tapcard - operate TAPSIGNER and SATSCARD NFC smartcards over PC/SC.
//!
//! This library provides:
//! - The CBOR-over-APDU card protocol with rolling-nonce tracking
//! - ECDH-masked CVC authentication for protected commands
//! - Host-side verification of addresses, slot keys, and the factory
//!   certificate chain
//! - An Esplora-style explorer client for balance lookups

pub mod cli;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod infra;
pub mod logging;
pub mod qr;
