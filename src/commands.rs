//! One handler per CLI subcommand.

use std::time::Duration;

use color_eyre::eyre::{Result, eyre};
use secp256k1::SecretKey;
use tracing::info;

use crate::cli::{Args, Commands};
use crate::config::Config;
use crate::domain::address::{address_for_privkey, render_wif};
use crate::domain::card::{Card, CardKind, SlotStatus};
use crate::infra::explorer::{ExplorerClient, format_sats};
use crate::infra::pcsc::PcscTransport;
use crate::qr::print_qr;

pub async fn execute(args: &Args) -> Result<()> {
    if let Commands::List = args.command {
        return list_readers();
    }

    let transport = PcscTransport::connect(args.reader.as_deref())?;
    let mut card = Card::new(transport)?;
    info!("connected to {} {}", kind_name(&card), card.ident);

    match &args.command {
        Commands::List => unreachable!("handled above"),
        Commands::Status => status(&mut card),
        Commands::Address { slot, trust, qr } => address(&mut card, *slot, *trust, *qr),
        Commands::Certs => certs(&mut card),
        Commands::Slots { cvc } => slots(&mut card, cvc.as_deref()),
        Commands::Unseal { cvc } => unseal(&mut card, cvc),
        Commands::Setup { cvc, chain_code } => setup(&mut card, cvc, chain_code.as_deref()),
        Commands::Dump { slot, cvc } => dump(&mut card, *slot, cvc.as_deref()),
        Commands::Url { qr } => url(&mut card, *qr),
        Commands::Balance => balance(&mut card, args.proxy.as_deref()).await,
        Commands::Wait { cvc } => wait(&mut card, cvc.as_deref()).await,
        Commands::Path => path(&mut card),
        Commands::Derive { path, cvc } => derive(&mut card, path, cvc),
        Commands::Xpub { master, cvc, qr } => xpub(&mut card, *master, cvc, *qr),
        Commands::Backup { cvc, out } => backup(&mut card, cvc, out.as_deref()),
        Commands::Change { cvc, new_cvc } => change(&mut card, cvc, new_cvc),
        Commands::Sign {
            digest,
            subpath,
            slot,
            cvc,
        } => sign(&mut card, digest, subpath.as_deref(), *slot, cvc),
    }
}

fn kind_name(card: &Card<PcscTransport>) -> &'static str {
    match card.kind {
        CardKind::Satscard => "SATSCARD",
        CardKind::Tapsigner => "TAPSIGNER",
    }
}

fn list_readers() -> Result<()> {
    let readers = PcscTransport::list_readers()?;
    if readers.is_empty() {
        println!("No card readers found.");
    }
    for (i, name) in readers.iter().enumerate() {
        println!("{}: {}", i, name);
    }
    Ok(())
}

fn status(card: &mut Card<PcscTransport>) -> Result<()> {
    println!("Card type: {}", kind_name(card));
    println!("Identity:  {}", card.ident);
    println!("Version:   {}", card.applet_version);
    if let Some(birth) = card.birth_height {
        println!("Birth:     block {}", birth);
    }
    println!(
        "Network:   {}",
        if card.is_testnet { "testnet" } else { "mainnet" }
    );
    if card.kind == CardKind::Satscard {
        println!("Slots:     {} of {} (active)", card.active_slot, card.num_slots);
    }
    if let Some(n) = card.num_backups {
        println!("Backups:   {}", n);
    }
    if card.auth_delay > 0 {
        println!("Auth delay: {}s remaining, run `tapcard wait`", card.auth_delay);
    }
    Ok(())
}

fn address(card: &mut Card<PcscTransport>, slot: Option<u8>, trust: bool, qr: bool) -> Result<()> {
    match card.address(trust, false, slot)? {
        Some(verified) => {
            if qr {
                print_qr(&verified.address, "Deposit address")?;
            } else {
                println!("{}", verified.address);
            }
        }
        None => println!("The active slot is not set up yet; run `tapcard setup`."),
    }
    Ok(())
}

fn certs(card: &mut Card<PcscTransport>) -> Result<()> {
    let root = card.certificate_check()?;
    println!("Genuine card: certificate chain verified.");
    println!("Root key: {}", hex::encode(root.serialize()));
    Ok(())
}

fn slots(card: &mut Card<PcscTransport>, cvc: Option<&str>) -> Result<()> {
    for slot in 0..card.num_slots {
        let (addr, status, _) = card.slot_usage(slot, cvc)?;
        let marker = if slot == card.active_slot { "*" } else { " " };
        println!(
            "{}{:2}  {:8}  {}",
            marker,
            slot,
            status.to_string(),
            addr.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn unseal(card: &mut Card<PcscTransport>, cvc: &str) -> Result<()> {
    let (privkey, slot) = card.unseal_slot(cvc)?;
    let secret = SecretKey::from_slice(privkey.as_ref())?;
    println!("Slot {} is now UNSEALED.", slot);
    println!("Address: {}", address_for_privkey(&secret, card.is_testnet)?);
    println!("WIF:     {}", render_wif(&secret, card.is_testnet));
    println!("Hex:     {}", hex::encode(privkey.as_ref()));
    println!("\nSweep these funds promptly; the key has left the card.");
    Ok(())
}

fn setup(card: &mut Card<PcscTransport>, cvc: &str, chain_code: Option<&str>) -> Result<()> {
    let chain_code = chain_code
        .map(|text| -> Result<[u8; 32]> {
            let bytes = hex::decode(text)?;
            bytes
                .try_into()
                .map_err(|_| eyre!("chain code must be 32 bytes of hex"))
        })
        .transpose()?;

    let slot = card.setup_slot(cvc, chain_code)?;
    match card.kind {
        CardKind::Satscard => {
            println!("Slot {} is ready.", slot);
            if let Some(verified) = card.address(true, false, None)? {
                println!("Deposit address: {}", verified.address);
            }
        }
        CardKind::Tapsigner => {
            println!("Master key picked. Set a derivation path with `tapcard derive`.");
        }
    }
    Ok(())
}

fn dump(card: &mut Card<PcscTransport>, slot: u8, cvc: Option<&str>) -> Result<()> {
    let (addr, status, detail) = card.slot_usage(slot, cvc)?;
    println!("Slot:    {}", slot);
    println!("State:   {}", status);
    if let Some(addr) = addr {
        println!("Address: {}", addr);
    }
    if status == SlotStatus::Unsealed
        && let Some(cvc) = cvc
    {
        let privkey = card.slot_privkey(cvc, slot)?;
        let secret = SecretKey::from_slice(privkey.as_ref())?;
        println!("WIF:     {}", render_wif(&secret, card.is_testnet));
        println!("Hex:     {}", hex::encode(privkey.as_ref()));
    }
    if detail.tainted == Some(true) {
        println!("WARNING: slot is marked tainted; do not rely on this key.");
    }
    Ok(())
}

fn url(card: &mut Card<PcscTransport>, qr: bool) -> Result<()> {
    let url = card.nfc_url()?;
    if qr {
        print_qr(&url, "Tap URL")?;
    } else {
        println!("{}", url);
    }
    Ok(())
}

async fn balance(card: &mut Card<PcscTransport>, proxy: Option<&str>) -> Result<()> {
    let Some(verified) = card.address(false, false, None)? else {
        println!("The active slot is not set up yet; nothing to look up.");
        return Ok(());
    };

    let config = Config::for_card(card.is_testnet, proxy);
    let client = ExplorerClient::new(&config)?;
    let balance = client.address_balance(&verified.address).await?;

    println!("Address:   {}", verified.address);
    println!("Confirmed: {} BTC", format_sats(balance.confirmed));
    if balance.pending != 0 {
        println!("Pending:   {:+} sats", balance.pending);
    }
    println!("Txs:       {}", balance.tx_count);
    Ok(())
}

async fn wait(card: &mut Card<PcscTransport>, cvc: Option<&str>) -> Result<()> {
    if card.auth_delay == 0 {
        println!("No authentication delay active.");
        return Ok(());
    }
    while card.auth_delay > 0 {
        let remaining = card.wait(cvc)?;
        println!("auth delay: {}s remaining", remaining);
        if remaining > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    println!("Done; the card accepts authenticated commands again.");
    Ok(())
}

fn path(card: &mut Card<PcscTransport>) -> Result<()> {
    match card.derivation_path()? {
        Some(path) => println!("{}", path),
        None => println!("No key picked yet; run `tapcard setup` first."),
    }
    Ok(())
}

fn derive(card: &mut Card<PcscTransport>, path: &str, cvc: &str) -> Result<()> {
    let (depth, chain_code, pubkey) = card.set_derivation_path(path, cvc)?;
    println!("Derivation set, {} levels deep.", depth);
    println!("Chain code: {}", hex::encode(chain_code));
    println!("Pubkey:     {}", hex::encode(pubkey));
    Ok(())
}

fn xpub(card: &mut Card<PcscTransport>, master: bool, cvc: &str, qr: bool) -> Result<()> {
    let xpub = card.xpub_string(cvc, master)?;
    let xfp = card.master_fingerprint(cvc)?;
    if qr {
        print_qr(&xpub, "xpub")?;
    } else {
        println!("{}", xpub);
    }
    println!("Master fingerprint: {}", hex::encode(xfp).to_uppercase());
    Ok(())
}

fn backup(card: &mut Card<PcscTransport>, cvc: &str, out: Option<&str>) -> Result<()> {
    let data = card.make_backup(cvc)?;
    let path = out
        .map(str::to_string)
        .unwrap_or_else(|| format!("backup-{}.aes", card.ident.replace('-', "")));
    std::fs::write(&path, &data)?;
    println!("Wrote {} bytes to {}", data.len(), path);
    println!("Decrypt with the AES key printed on the card back.");
    Ok(())
}

fn change(card: &mut Card<PcscTransport>, cvc: &str, new_cvc: &str) -> Result<()> {
    card.change_cvc(cvc, new_cvc)?;
    println!("CVC changed. Write the new one down; it cannot be recovered.");
    Ok(())
}

fn sign(
    card: &mut Card<PcscTransport>,
    digest: &str,
    subpath: Option<&str>,
    slot: u8,
    cvc: &str,
) -> Result<()> {
    let bytes = hex::decode(digest)?;
    let digest: [u8; 32] = bytes
        .try_into()
        .map_err(|_| eyre!("digest must be 32 bytes of hex"))?;

    let (sig, pubkey) = card.sign_digest(cvc, slot, digest, subpath)?;
    println!("Signature: {}", hex::encode(sig));
    println!("Pubkey:    {}", hex::encode(pubkey.serialize()));
    Ok(())
}
