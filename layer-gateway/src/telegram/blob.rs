//! Structural check of layer-client's binary session file.
//!
//! Layout (little-endian):
//! ```text
//! home_dc_id  i32
//! dc_count    u8
//! dc_count × {
//!     dc_id       i32
//!     has_key     u8     (1 → 256-byte auth key follows)
//!     auth_key    [u8; 256]?
//!     first_salt  i64
//!     time_offset i32
//!     addr_len    u8
//!     addr        [u8; addr_len]   (UTF-8 "ip:port")
//! }
//! ```

use std::fmt;

const AUTH_KEY_LEN: usize = 256;

/// Summary of a parsed session file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionLayout {
    pub home_dc_id: i32,
    pub dc_count:   usize,
    /// Whether the home DC carries an auth key. Without one the session
    /// cannot be signed in.
    pub home_keyed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutError {
    Truncated { at: usize },
    BadKeyFlag(u8),
    BadAddress,
    TrailingBytes(usize),
    NoHomeDc(i32),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { at }  => write!(f, "session data truncated at byte {at}"),
            Self::BadKeyFlag(b)     => write!(f, "invalid auth-key flag {b}"),
            Self::BadAddress        => write!(f, "DC address is not valid UTF-8"),
            Self::TrailingBytes(n)  => write!(f, "{n} unexpected trailing byte(s)"),
            Self::NoHomeDc(dc)      => write!(f, "home DC{dc} missing from DC table"),
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], LayoutError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(LayoutError::Truncated { at: self.pos });
        };
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, LayoutError> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, LayoutError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(b))
    }
}

/// Parse `bytes` without keeping any key material.
pub fn parse(bytes: &[u8]) -> Result<SessionLayout, LayoutError> {
    let mut r = Reader { buf: bytes, pos: 0 };

    let home_dc_id = r.i32()?;
    let dc_count   = r.u8()? as usize;
    let mut home   = None;

    for _ in 0..dc_count {
        let dc_id   = r.i32()?;
        let has_key = match r.u8()? {
            0 => false,
            1 => { r.take(AUTH_KEY_LEN)?; true }
            other => return Err(LayoutError::BadKeyFlag(other)),
        };
        r.take(8)?; // first_salt
        r.take(4)?; // time_offset
        let addr_len = r.u8()? as usize;
        std::str::from_utf8(r.take(addr_len)?).map_err(|_| LayoutError::BadAddress)?;

        if dc_id == home_dc_id {
            home = Some(has_key);
        }
    }

    let rest = bytes.len() - r.pos;
    if rest != 0 {
        return Err(LayoutError::TrailingBytes(rest));
    }
    let home_keyed = home.ok_or(LayoutError::NoHomeDc(home_dc_id))?;
    Ok(SessionLayout { home_dc_id, dc_count, home_keyed })
}

#[cfg(test)]
pub(crate) fn sample(home_dc_id: i32, keyed: bool) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&home_dc_id.to_le_bytes());
    b.push(2);
    for (dc, addr) in [(home_dc_id, "149.154.167.51:443"), (home_dc_id + 1, "149.154.175.100:443")] {
        b.extend_from_slice(&dc.to_le_bytes());
        if keyed && dc == home_dc_id {
            b.push(1);
            b.extend_from_slice(&[7u8; AUTH_KEY_LEN]);
        } else {
            b.push(0);
        }
        b.extend_from_slice(&0x1122_3344_5566_7788i64.to_le_bytes());
        b.extend_from_slice(&(-3i32).to_le_bytes());
        b.push(addr.len() as u8);
        b.extend_from_slice(addr.as_bytes());
    }
    b
}
