//! PC/SC link layer: reader discovery, applet selection, APDU exchange.

use pcsc::{Context, MAX_BUFFER_SIZE_EXTENDED, Protocols, Scope, ShareMode};
use tracing::debug;

use crate::domain::constants::{APP_ID, SW_OKAY};
use crate::domain::error::{CardError, Result};
use crate::domain::transport::Transport;

/// A connected PC/SC card with the Coinkite applet selected.
pub struct PcscTransport {
    card: pcsc::Card,
}

impl PcscTransport {
    /// Names of all attached readers.
    pub fn list_readers() -> Result<Vec<String>> {
        let ctx = Context::establish(Scope::User)?;
        let mut buf = [0u8; 2048];
        Ok(ctx
            .list_readers(&mut buf)?
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    /// Connect to the first reader whose name contains `reader` (or the
    /// first reader at all), then select the card applet.
    pub fn connect(reader: Option<&str>) -> Result<Self> {
        let ctx = Context::establish(Scope::User)?;
        let mut buf = [0u8; 2048];

        let mut chosen = None;
        for name in ctx.list_readers(&mut buf)? {
            let text = name.to_string_lossy();
            if reader.is_none_or(|want| text.contains(want)) {
                debug!("using reader: {}", text);
                chosen = Some(name.to_owned());
                break;
            }
        }
        let Some(name) = chosen else {
            return Err(CardError::NoReader);
        };

        let card = ctx.connect(&name, ShareMode::Shared, Protocols::ANY)?;
        let mut transport = Self { card };
        transport.select_applet()?;
        Ok(transport)
    }

    fn select_applet(&mut self) -> Result<()> {
        let mut apdu = vec![0x00, 0xa4, 0x04, 0x00, APP_ID.len() as u8];
        apdu.extend_from_slice(&APP_ID);
        let (sw, _) = self.exchange(&apdu)?;
        if sw != SW_OKAY {
            return Err(CardError::NotATapCard);
        }
        Ok(())
    }

    fn exchange(&mut self, apdu: &[u8]) -> Result<(u16, Vec<u8>)> {
        // certificate chains overflow the short-APDU buffer size
        let mut recv_buf = vec![0u8; MAX_BUFFER_SIZE_EXTENDED];
        let resp = self.card.transmit(apdu, &mut recv_buf)?;
        if resp.len() < 2 {
            return Err(CardError::BadResponse("short APDU response"));
        }
        let (body, sw) = resp.split_at(resp.len() - 2);
        debug!("apdu: sent {} bytes, got {} back", apdu.len(), resp.len());
        Ok((u16::from_be_bytes([sw[0], sw[1]]), body.to_vec()))
    }
}

impl Transport for PcscTransport {
    fn transmit(&mut self, request: &[u8]) -> Result<(u16, Vec<u8>)> {
        // Commands must fit a single short APDU.
        if request.len() > 255 {
            return Err(CardError::Encode("request too large for one APDU".into()));
        }
        let mut apdu = Vec::with_capacity(5 + request.len());
        apdu.extend_from_slice(&[0x00, 0xcb, 0x00, 0x00, request.len() as u8]);
        apdu.extend_from_slice(request);
        self.exchange(&apdu)
    }
}
