//! BIP-32 derivation path handling.
//!
//! Cards exchange paths as arrays of u32 components with the hardened bit
//! set; humans read and write the `m/84h/0h/0h` form.

use crate::domain::error::{CardError, Result};

/// Hardened-derivation bit.
pub const HARDENED: u32 = 0x8000_0000;

/// Render a component path as a string, `m` for the empty path.
pub fn path_to_string(path: &[u32]) -> String {
    let mut out = String::from("m");
    for comp in path {
        out.push('/');
        out.push_str(&(comp & !HARDENED).to_string());
        if comp & HARDENED != 0 {
            out.push('h');
        }
    }
    out
}

/// Parse a path string into components. Accepts an optional leading `m`,
/// and `h`, `H` or `'` as the hardened marker.
pub fn parse_path(text: &str) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    for (i, part) in text.trim().split('/').enumerate() {
        if i == 0 && (part == "m" || part == "M" || part.is_empty()) {
            continue;
        }

        let (digits, hardened) = match part.strip_suffix(['h', 'H', '\'']) {
            Some(d) => (d, true),
            None => (part, false),
        };

        let num: u32 = digits
            .parse()
            .map_err(|_| CardError::BadPath(format!("bad component: {part:?}")))?;
        if num & HARDENED != 0 {
            return Err(CardError::BadPath(format!("component out of range: {part}")));
        }

        out.push(if hardened { num | HARDENED } else { num });
    }
    Ok(out)
}

/// True if every component has the hardened bit set.
pub fn all_hardened(path: &[u32]) -> bool {
    path.iter().all(|c| c & HARDENED != 0)
}

/// True if no component has the hardened bit set.
pub fn none_hardened(path: &[u32]) -> bool {
    path.iter().all(|c| c & HARDENED == 0)
}
