use thiserror::Error;

/// Errors from card communication and host-side verification.
#[derive(Error, Debug)]
pub enum CardError {
    /// The card itself reported a failure.
    #[error("card error {code} on {cmd}: {msg}")]
    Card { cmd: String, code: u16, msg: String },

    #[error("unexpected status word 0x{0:04x}")]
    BadStatusWord(u16),

    #[error("reader error: {0}")]
    Reader(#[from] pcsc::Error),

    #[error("no usable card reader found")]
    NoReader,

    #[error("applet select failed, not a Coinkite card")]
    NotATapCard,

    #[error("card protocol version {0} not supported")]
    UnknownProtocol(u8),

    #[error("CBOR encode error: {0}")]
    Encode(String),

    #[error("CBOR decode error: {0}")]
    Decode(String),

    #[error("malformed response: {0}")]
    BadResponse(&'static str),

    #[error("signature check failed: {0}")]
    BadSignature(&'static str),

    #[error("certificate chain does not reach a trusted root key")]
    UntrustedCard,

    #[error("card did not derive the address as expected")]
    AddressMismatch,

    #[error("operation only supported on TAPSIGNER")]
    TapsignerOnly,

    #[error("operation only supported on SATSCARD")]
    SatscardOnly,

    #[error("slot {0} has already been unsealed")]
    AlreadyUnsealed(u8),

    #[error("slot {0} has not been used yet")]
    UnusedSlot(u8),

    #[error("CVC must be 6..=32 characters")]
    BadCvcLength,

    #[error("derivation path: {0}")]
    BadPath(String),

    #[error("{0}")]
    Unsupported(&'static str),

    #[error("crypto error: {0}")]
    Secp(#[from] secp256k1::Error),
}

pub type Result<T> = std::result::Result<T, CardError>;
