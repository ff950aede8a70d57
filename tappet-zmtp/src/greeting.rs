//! ZMTP 3.0 greeting.

use crate::codec::{Result, ZmtpError};
use bytes::{BufMut, BytesMut};

/// ZMTP Greeting is always exactly 64 bytes
pub const GREETING_SIZE: usize = 64;

const SIGNATURE_HEAD: u8 = 0xFF;
const SIGNATURE_TAIL: u8 = 0x7F;
const VERSION_MAJOR: u8 = 3;
const VERSION_MINOR: u8 = 0;
const MECHANISM_LEN: usize = 20;

/// Security mechanisms named in a greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    Null,
    Plain,
    Curve,
    Unknown(String),
}

impl Mechanism {
    fn parse(raw: &[u8]) -> Result<Self> {
        let name = std::str::from_utf8(raw)
            .map_err(|_| ZmtpError::Handshake("mechanism name is not ASCII".into()))?
            .trim_end_matches('\0');
        Ok(match name {
            "NULL" => Self::Null,
            "PLAIN" => Self::Plain,
            "CURVE" => Self::Curve,
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// Parsed greeting information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpGreeting {
    pub major: u8,
    pub minor: u8,
    pub mechanism: Mechanism,
    pub as_server: bool,
}

impl ZmtpGreeting {
    /// Append our greeting (ZMTP 3.0, NULL mechanism) to `dst`.
    ///
    /// Layout:
    /// ```text
    /// [0]      0xFF
    /// [1..9]   Padding
    /// [9]      0x7F
    /// [10]     Major version
    /// [11]     Minor version
    /// [12..32] Mechanism (ASCII, null-padded)
    /// [32]     As-Server flag
    /// [33..64] Padding
    /// ```
    pub fn encode(as_server: bool, dst: &mut BytesMut) {
        dst.reserve(GREETING_SIZE);
        dst.put_u8(SIGNATURE_HEAD);
        dst.put_bytes(0, 8);
        dst.put_u8(SIGNATURE_TAIL);
        dst.put_u8(VERSION_MAJOR);
        dst.put_u8(VERSION_MINOR);
        dst.put_slice(b"NULL");
        dst.put_bytes(0, MECHANISM_LEN - 4);
        dst.put_u8(u8::from(as_server));
        dst.put_bytes(0, 31);
    }

    /// Parse a 64-byte greeting.
    ///
    /// Version 3.0 and anything newer is accepted: a peer announcing a
    /// higher version must fall back to the 3.0 wire format when talking to
    /// us. Only older majors are refused.
    ///
    /// # Errors
    ///
    /// `Handshake` on a bad signature or a version below 3.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < GREETING_SIZE {
            return Err(ZmtpError::Handshake("short greeting".into()));
        }

        if src[0] != SIGNATURE_HEAD || src[9] != SIGNATURE_TAIL {
            return Err(ZmtpError::Handshake("invalid greeting signature".into()));
        }

        let major = src[10];
        if major < VERSION_MAJOR {
            return Err(ZmtpError::Handshake(format!(
                "unsupported ZMTP version {major}.{}",
                src[11]
            )));
        }

        Ok(Self {
            major,
            minor: src[11],
            mechanism: Mechanism::parse(&src[12..12 + MECHANISM_LEN])?,
            as_server: (src[32] & 0x01) != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse() {
        let mut buf = BytesMut::new();
        ZmtpGreeting::encode(true, &mut buf);
        assert_eq!(buf.len(), GREETING_SIZE);

        let greeting = ZmtpGreeting::parse(&buf).unwrap();
        assert_eq!(greeting.major, 3);
        assert_eq!(greeting.minor, 0);
        assert_eq!(greeting.mechanism, Mechanism::Null);
        assert!(greeting.as_server);
    }

    #[test]
    fn accepts_zmtp_3_1() {
        let mut buf = BytesMut::new();
        ZmtpGreeting::encode(false, &mut buf);
        buf[11] = 1;
        assert_eq!(ZmtpGreeting::parse(&buf).unwrap().minor, 1);
    }

    #[test]
    fn newer_majors_fall_back_to_3_0() {
        let mut buf = BytesMut::new();
        ZmtpGreeting::encode(false, &mut buf);
        buf[10] = 4;
        assert_eq!(ZmtpGreeting::parse(&buf).unwrap().major, 4);
    }

    #[test]
    fn rejects_zmtp_2() {
        let mut buf = BytesMut::new();
        ZmtpGreeting::encode(false, &mut buf);
        buf[10] = 2;
        assert!(matches!(
            ZmtpGreeting::parse(&buf),
            Err(ZmtpError::Handshake(_))
        ));
    }

    #[test]
    fn rejects_bad_signature() {
        let mut buf = BytesMut::new();
        ZmtpGreeting::encode(false, &mut buf);
        buf[9] = 0;
        assert!(ZmtpGreeting::parse(&buf).is_err());
    }

    #[test]
    fn reports_other_mechanisms() {
        let mut buf = BytesMut::new();
        ZmtpGreeting::encode(false, &mut buf);
        buf[12..17].copy_from_slice(b"CURVE");
        assert_eq!(
            ZmtpGreeting::parse(&buf).unwrap().mechanism,
            Mechanism::Curve
        );
    }
}
