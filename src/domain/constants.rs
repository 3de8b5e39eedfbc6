//! Protocol constants shared by the card client and the verification code.

/// ISO-7816 application id selecting the Coinkite applet on both card types.
pub const APP_ID: [u8; 15] = *b"\xf0CoinkiteCARDv1";

/// The only APDU status word treated as success.
pub const SW_OKAY: u16 = 0x9000;

/// Protocol version this client speaks.
pub const PROTO_VERSION: u8 = 1;

/// Size of the nonce the card includes in each response.
pub const CARD_NONCE_SIZE: usize = 16;

/// Size of the nonce the host provides to signature-producing commands.
pub const USER_NONCE_SIZE: usize = 16;

/// CVC length bounds enforced by the cards.
pub const CVC_MIN_LENGTH: usize = 6;
pub const CVC_MAX_LENGTH: usize = 32;

/// Header prepended to every message the card signs.
pub const AUTH_MSG_HEADER: &[u8; 8] = b"OPENDIME";

/// Number of address characters shown on each side of the trimmed
/// `addr` field in the status response.
pub const ADDR_TRIM: usize = 12;

/// How often to re-try a `sign` command that failed with
/// [`CODE_UNLUCKY_NUMBER`] before giving up.
pub const SIGN_MAX_RETRIES: usize = 4;

/// Card error codes (subset the client reacts to).
pub const CODE_UNLUCKY_NUMBER: u16 = 205;
pub const CODE_BAD_AUTH: u16 = 401;
pub const CODE_RATE_LIMITED: u16 = 429;

/// Coinkite factory root certificate public key. The certificate chain of
/// a genuine card must terminate here.
pub const FACTORY_ROOT_PUBKEY: [u8; 33] = [
    0x03, 0x02, 0x8a, 0x0e, 0x89, 0xe7, 0x0d, 0x0e, 0xc0, 0xd9, 0x32, 0x05, 0x3a, 0x89, 0xab,
    0x1d, 0xa7, 0xd9, 0x18, 0x2b, 0xdc, 0x6d, 0x2f, 0x03, 0xe7, 0x06, 0xee, 0x99, 0x51, 0x7d,
    0x05, 0xd9, 0xe1,
];
