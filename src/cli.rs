use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tapcard")]
#[command(version)]
#[command(about = "Operate TAPSIGNER and SATSCARD NFC smartcards over a PC/SC reader")]
pub struct Args {
    /// Pick the reader whose name contains this substring
    #[arg(short, long, global = true)]
    pub reader: Option<String>,

    /// SOCKS proxy for explorer lookups, e.g. socks5h://127.0.0.1:9050
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Data directory path (logs)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List attached card readers
    List,
    /// Show card status and identity
    Status,
    /// Show the verified payment address (SATSCARD)
    Address {
        #[arg(short, long, help = "Slot number (default: active slot)")]
        slot: Option<u8>,
        #[arg(long, help = "Skip certificate and derivation checks")]
        trust: bool,
        #[arg(long, help = "Display the address as a QR code")]
        qr: bool,
    },
    /// Verify the factory certificate chain
    Certs,
    /// Show state and address of every slot (SATSCARD)
    Slots {
        #[arg(short, long, help = "CVC printed on the card back")]
        cvc: Option<String>,
    },
    /// Unseal the active slot and print its private key (SATSCARD)
    Unseal {
        #[arg(short, long, help = "CVC printed on the card back")]
        cvc: String,
    },
    /// Open the next slot, or pick the master key on TAPSIGNER
    Setup {
        #[arg(short, long, help = "CVC printed on the card back")]
        cvc: String,
        #[arg(long, help = "32-byte hex chain code (default: random)")]
        chain_code: Option<String>,
    },
    /// Show everything the card reports about one slot (SATSCARD)
    Dump {
        #[arg(short, long, help = "Slot number")]
        slot: u8,
        #[arg(short, long, help = "CVC, reveals the key of unsealed slots")]
        cvc: Option<String>,
    },
    /// Show the dynamic URL a phone tap would open
    Url {
        #[arg(long, help = "Display the URL as a QR code")]
        qr: bool,
    },
    /// Fetch the balance of the verified address (SATSCARD)
    Balance,
    /// Burn down the authentication delay after failed CVC attempts
    Wait {
        #[arg(short, long, help = "CVC printed on the card back")]
        cvc: Option<String>,
    },
    /// Show the current derivation path (TAPSIGNER)
    Path,
    /// Change the derivation path (TAPSIGNER)
    Derive {
        #[arg(short, long, help = "Derivation path, e.g. m/84h/0h/0h")]
        path: String,
        #[arg(short, long, help = "CVC printed on the card back")]
        cvc: String,
    },
    /// Export the extended public key (TAPSIGNER)
    Xpub {
        #[arg(short, long, help = "Master xpub instead of the derived one")]
        master: bool,
        #[arg(short, long, help = "CVC printed on the card back")]
        cvc: String,
        #[arg(long, help = "Display the xpub as a QR code")]
        qr: bool,
    },
    /// Save the encrypted backup blob to a file (TAPSIGNER)
    Backup {
        #[arg(short, long, help = "CVC printed on the card back")]
        cvc: String,
        #[arg(short, long, help = "Output file (default: backup-<ident>.aes)")]
        out: Option<String>,
    },
    /// Change the CVC
    Change {
        #[arg(short, long, help = "Current CVC")]
        cvc: String,
        #[arg(short, long, help = "New CVC (6..=32 characters)")]
        new_cvc: String,
    },
    /// Sign a 32-byte digest with a card key
    Sign {
        #[arg(short, long, help = "Digest to sign, 64 hex characters")]
        digest: String,
        #[arg(long, help = "Unhardened subpath below the derived key, e.g. 0/3")]
        subpath: Option<String>,
        #[arg(short, long, default_value = "0", help = "Slot number")]
        slot: u8,
        #[arg(short, long, help = "CVC printed on the card back")]
        cvc: String,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
