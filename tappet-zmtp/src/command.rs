//! ZMTP command bodies.
//!
//! ```text
//! command    = name-len (1) name *property
//! property   = name-len (1) name value-len (4, BE) value
//! ```

use crate::codec::{Result, ZmtpError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const READY: &[u8] = b"READY";
pub const ERROR: &[u8] = b"ERROR";
pub const PING: &[u8] = b"PING";
pub const PONG: &[u8] = b"PONG";

pub const PROP_SOCKET_TYPE: &str = "Socket-Type";
pub const PROP_IDENTITY: &str = "Identity";

/// Parsed ZMTP command. Values are zero-copy slices of the frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpCommand {
    pub name: Bytes,
    body: Bytes,
}

impl ZmtpCommand {
    /// Split a command frame body into name and remainder.
    ///
    /// # Errors
    ///
    /// `Protocol` if the name length runs past the body.
    pub fn parse(payload: &Bytes) -> Result<Self> {
        let mut buf = payload.clone();
        if !buf.has_remaining() {
            return Err(ZmtpError::Protocol("empty command"));
        }
        let name_len = usize::from(buf.get_u8());
        if buf.remaining() < name_len {
            return Err(ZmtpError::Protocol("truncated command name"));
        }
        let name = buf.split_to(name_len);
        Ok(Self { name, body: buf })
    }

    #[inline]
    #[must_use]
    pub fn is(&self, name: &[u8]) -> bool {
        self.name.as_ref() == name
    }

    /// Decode the property list of a READY-style command.
    ///
    /// # Errors
    ///
    /// `Protocol` on a truncated property.
    pub fn properties(&self) -> Result<Vec<(Bytes, Bytes)>> {
        let mut buf = self.body.clone();
        let mut props = Vec::new();
        while buf.has_remaining() {
            let name_len = usize::from(buf.get_u8());
            if buf.remaining() < name_len + 4 {
                return Err(ZmtpError::Protocol("truncated property name"));
            }
            let name = buf.split_to(name_len);
            let value_len = buf.get_u32() as usize;
            if buf.remaining() < value_len {
                return Err(ZmtpError::Protocol("truncated property value"));
            }
            props.push((name, buf.split_to(value_len)));
        }
        Ok(props)
    }

    /// Reason text of an ERROR command.
    #[must_use]
    pub fn error_reason(&self) -> String {
        let mut buf = self.body.clone();
        if !buf.has_remaining() {
            return String::new();
        }
        let len = usize::from(buf.get_u8()).min(buf.remaining());
        String::from_utf8_lossy(&buf[..len]).into_owned()
    }
}

fn put_name(dst: &mut BytesMut, name: &[u8]) {
    dst.put_u8(name.len() as u8);
    dst.extend_from_slice(name);
}

/// Encode a property
#[inline]
pub fn put_property(dst: &mut BytesMut, name: &str, value: &[u8]) {
    put_name(dst, name.as_bytes());
    dst.put_u32(value.len() as u32);
    dst.extend_from_slice(value);
}

/// Build a READY command body.
///
/// `Socket-Type` is mandatory, `Identity` only sent when set.
#[must_use]
pub fn build_ready(socket_type: &str, identity: Option<&[u8]>) -> Bytes {
    let mut body = BytesMut::with_capacity(64);
    put_name(&mut body, READY);
    put_property(&mut body, PROP_SOCKET_TYPE, socket_type.as_bytes());
    if let Some(id) = identity {
        put_property(&mut body, PROP_IDENTITY, id);
    }
    body.freeze()
}

/// Build an ERROR command body.
#[must_use]
pub fn build_error(reason: &str) -> Bytes {
    let reason = &reason.as_bytes()[..reason.len().min(255)];
    let mut body = BytesMut::with_capacity(2 + ERROR.len() + reason.len());
    put_name(&mut body, ERROR);
    put_name(&mut body, reason);
    body.freeze()
}

/// Build a PONG answering a PING. The ping context is echoed back.
#[must_use]
pub fn build_pong(ping: &ZmtpCommand) -> Bytes {
    // PING body: ttl (2 bytes) + context
    let context = if ping.body.len() > 2 {
        &ping.body[2..]
    } else {
        &[][..]
    };
    let mut body = BytesMut::with_capacity(1 + PONG.len() + context.len());
    put_name(&mut body, PONG);
    body.extend_from_slice(context);
    body.freeze()
}
