//! Session transport framing.
//!
//! Every message on the session stream is a section: a fixed 24-byte header
//! followed by `head_size` bytes of RPC envelope and `body_size` bytes of
//! opaque payload. All header fields are big-endian.
//!
//! ```text
//! offset  size  field
//!   0      4    magic
//!   4      4    version
//!   8      8    head_size
//!  16      8    body_size
//! ```

/// Sentinel marking the start of a section.
pub const MAGIC: u32 = 0xA5C3_55C3;
/// The single supported protocol version.
pub const VERSION: u32 = 0x0001_0000;
/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 24;

pub const MAGIC_BYTES: [u8; 4] = MAGIC.to_be_bytes();

#[derive(Debug)]
pub enum WireError {
    ShortHeader(usize),
    BadMagic(u32),
    UnsupportedVersion(u32),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::ShortHeader(n) => write!(f, "frame header truncated at {n} bytes"),
            WireError::BadMagic(m) => write!(f, "bad frame magic {m:#010x}"),
            WireError::UnsupportedVersion(v) => write!(f, "unsupported frame version {v:#010x}"),
        }
    }
}

impl std::error::Error for WireError {}

/// Decoded fixed-layout section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u32,
    pub head_size: u64,
    pub body_size: u64,
}

impl FrameHeader {
    pub fn new(head_size: u64, body_size: u64) -> Self {
        FrameHeader {
            version: VERSION,
            head_size,
            body_size,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC_BYTES);
        out[4..8].copy_from_slice(&self.version.to_be_bytes());
        out[8..16].copy_from_slice(&self.head_size.to_be_bytes());
        out[16..24].copy_from_slice(&self.body_size.to_be_bytes());
        out
    }

    /// Decode a header from the first [`HEADER_LEN`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::ShortHeader(buf.len()));
        }
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        let version = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        Ok(FrameHeader {
            version,
            head_size: u64::from_be_bytes(buf[8..16].try_into().unwrap()),
            body_size: u64::from_be_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

/// Frame a complete outbound section: header, envelope bytes, body bytes.
pub fn frame_section(head: &[u8], body: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(head.len() as u64, body.len() as u64);
    let mut out = Vec::with_capacity(HEADER_LEN + head.len() + body.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(head);
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader::new(512, 1 << 20);
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], &MAGIC_BYTES);
        let decoded = FrameHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn decode_rejects_wrong_magic() {
        let mut bytes = FrameHeader::new(1, 1).encode();
        bytes[0] ^= 0xff;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(WireError::BadMagic(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut bytes = FrameHeader::new(1, 1).encode();
        bytes[7] = 0x01;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(WireError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn decode_rejects_short_input() {
        let bytes = FrameHeader::new(1, 1).encode();
        assert!(matches!(
            FrameHeader::decode(&bytes[..10]),
            Err(WireError::ShortHeader(10))
        ));
    }

    #[test]
    fn frame_section_concatenates_parts() {
        let framed = frame_section(b"head", b"body-bytes");
        assert_eq!(framed.len(), HEADER_LEN + 4 + 10);
        let header = FrameHeader::decode(&framed).unwrap();
        assert_eq!(header.head_size, 4);
        assert_eq!(header.body_size, 10);
        assert_eq!(&framed[HEADER_LEN..HEADER_LEN + 4], b"head");
    }
}
