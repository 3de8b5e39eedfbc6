//! Esplora-style block explorer client for balance lookups.

use color_eyre::eyre::{Result, WrapErr};
use serde::Deserialize;

use crate::config::Config;

/// Totals reported by `/address/{addr}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TxoStats {
    pub funded_txo_sum: u64,
    pub spent_txo_sum: u64,
    pub tx_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    pub chain_stats: TxoStats,
    pub mempool_stats: TxoStats,
}

/// Confirmed and pending balance of one address, in satoshis.
#[derive(Debug, Clone, Copy)]
pub struct Balance {
    pub confirmed: u64,
    /// Net unconfirmed delta; negative while a spend is in the mempool.
    pub pending: i64,
    pub tx_count: u64,
}

/// HTTP client against one explorer endpoint. All requests go through the
/// configured SOCKS proxy when one is set (e.g. `socks5h://127.0.0.1:9050`
/// for Tor).
pub struct ExplorerClient {
    http: reqwest::Client,
    base_url: String,
}

impl ExplorerClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = &config.socks_proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy).wrap_err_with(|| format!("bad proxy url: {proxy}"))?,
            );
        }
        Ok(Self {
            http: builder.build()?,
            base_url: config.network.explorer_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn address_balance(&self, address: &str) -> Result<Balance> {
        let url = format!("{}/address/{}", self.base_url, address);
        let info: AddressInfo = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .wrap_err("unexpected explorer response")?;

        let chain = &info.chain_stats;
        let mempool = &info.mempool_stats;
        Ok(Balance {
            confirmed: chain.funded_txo_sum.saturating_sub(chain.spent_txo_sum),
            pending: mempool.funded_txo_sum as i64 - mempool.spent_txo_sum as i64,
            tx_count: chain.tx_count + mempool.tx_count,
        })
    }
}

/// Format satoshis as BTC with 8 decimal places.
pub fn format_sats(sats: u64) -> String {
    format!("{}.{:08}", sats / 100_000_000, sats % 100_000_000)
}
