//! Wire frame parse/encode. Pure, no I/O.
//!
//! Frame body layout (all multi-byte fields big-endian):
//! `length(1) counter(1) type(1) subtype(1) sender(3) dest(3) payload(0..54) [rssi(1)]`

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Maximum payload length a frame may carry.
pub const MAX_PAYLOAD_LEN: usize = 54;

/// A decoded (or about-to-be-encoded) MAX! radio frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub counter: u8,
    pub message_type: u8,
    pub subtype: u8,
    pub sender_addr: u32,
    pub dest_addr: u32,
    pub payload: Vec<u8>,
    /// Sender prepended a long wake-on-radio preamble.
    pub burst: bool,
    /// Present only on received frames carried by an interface with `has_rssi_byte`.
    pub rssi_device: Option<u8>,
    /// Monotonic receive timestamp in milliseconds, set by the interface layer. `0` on
    /// packets built for transmission that have not yet been queued.
    pub time_received_ms: u64,
}

impl Packet {
    /// `length = 9 + payload.len()`.
    pub fn length_byte(&self) -> u8 {
        (9 + self.payload.len()) as u8
    }

    pub fn new(
        counter: u8,
        message_type: u8,
        subtype: u8,
        sender_addr: u32,
        dest_addr: u32,
        payload: Vec<u8>,
    ) -> Result<Self, CodecError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLong(payload.len()));
        }
        Ok(Packet {
            counter,
            message_type,
            subtype,
            sender_addr: sender_addr & 0x00FF_FFFF,
            dest_addr: dest_addr & 0x00FF_FFFF,
            payload,
            burst: false,
            rssi_device: None,
            time_received_ms: 0,
        })
    }

    pub fn with_burst(mut self, burst: bool) -> Self {
        self.burst = burst;
        self
    }
}

/// Stateless encode/decode of the wire frame, plus the sub-byte bit-addressing
/// helpers used by the device-description/value layer.
pub struct Codec;

impl Codec {
    /// Decode a frame body. `has_rssi_byte` means the transport appended one extra
    /// byte of RSSI after the payload (gateway adapter always sets this).
    pub fn from_bytes(bytes: &[u8], has_rssi_byte: bool) -> Result<Packet, CodecError> {
        if bytes.len() < 9 {
            return Err(CodecError::TooShort(bytes.len()));
        }
        let declared = bytes[0];
        let trailer = if has_rssi_byte { 2 } else { 1 };
        let expected = declared as usize + trailer;
        if expected != bytes.len() {
            return Err(CodecError::LengthMismatch {
                declared,
                expected,
                actual: bytes.len(),
            });
        }
        let counter = bytes[1];
        let message_type = bytes[2];
        let subtype = bytes[3];
        let sender_addr = u24_from_be(&bytes[4..7]);
        let dest_addr = u24_from_be(&bytes[7..10]);
        let payload_end = bytes.len() - if has_rssi_byte { 1 } else { 0 };
        let payload = bytes[10..payload_end].to_vec();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLong(payload.len()));
        }
        let rssi_device = if has_rssi_byte {
            Some(bytes[bytes.len() - 1])
        } else {
            None
        };
        Ok(Packet {
            counter,
            message_type,
            subtype,
            sender_addr,
            dest_addr,
            payload,
            burst: false,
            rssi_device,
            time_received_ms: 0,
        })
    }

    /// Encode a frame body. Never includes the RSSI byte — that is only ever present
    /// on ingress.
    pub fn to_bytes(p: &Packet) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + p.payload.len());
        out.push(p.length_byte());
        out.push(p.counter);
        out.push(p.message_type);
        out.push(p.subtype);
        out.extend_from_slice(&u24_to_be(p.sender_addr));
        out.extend_from_slice(&u24_to_be(p.dest_addr));
        out.extend_from_slice(&p.payload);
        out
    }

    /// Lowercase hex text form. Whitespace-tolerant and a single leading tag
    /// character (e.g. dongle echo prefixes such as `Z`) is ignored on parse.
    pub fn to_hex(p: &Packet) -> String {
        hex::encode(Self::to_bytes(p))
    }

    pub fn from_hex(text: &str, has_rssi_byte: bool) -> Result<Packet, CodecError> {
        let mut cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if cleaned.len() % 2 == 1 {
            // a single leading tag character, e.g. the dongle's `Z` echo prefix
            cleaned.remove(0);
        }
        let bytes =
            hex::decode(&cleaned).map_err(|e| CodecError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes, has_rssi_byte)
    }

    /// Read a sub-byte field from `payload`. `bit_offset` counts from the
    /// least-significant bit; `bit_size` may span into following bytes but must not
    /// run past the end of `payload`.
    pub fn get_position(
        payload: &[u8],
        byte_offset: u8,
        bit_offset: u8,
        bit_size: u16,
    ) -> Result<u64, CodecError> {
        let needed_bits = bit_offset as u64 + bit_size as u64;
        let needed_bytes = ((needed_bits + 7) / 8) as usize;
        if byte_offset as usize + needed_bytes > payload.len() {
            return Err(CodecError::FieldOutOfRange {
                byte_offset,
                bit_offset,
                bit_size,
            });
        }
        let mut acc: u64 = 0;
        for i in 0..needed_bytes {
            acc |= (payload[byte_offset as usize + i] as u64) << (8 * i);
        }
        let mask = if bit_size >= 64 {
            u64::MAX
        } else {
            (1u64 << bit_size) - 1
        };
        Ok((acc >> bit_offset) & mask)
    }

    /// Write a sub-byte field into `payload`, OR-combining with any bits already
    /// present outside the field (used by config-write byte grouping).
    pub fn set_position(
        payload: &mut [u8],
        byte_offset: u8,
        bit_offset: u8,
        bit_size: u16,
        value: u64,
    ) -> Result<(), CodecError> {
        let needed_bits = bit_offset as u64 + bit_size as u64;
        let needed_bytes = ((needed_bits + 7) / 8) as usize;
        if byte_offset as usize + needed_bytes > payload.len() {
            return Err(CodecError::FieldOutOfRange {
                byte_offset,
                bit_offset,
                bit_size,
            });
        }
        let mask = if bit_size >= 64 {
            u64::MAX
        } else {
            (1u64 << bit_size) - 1
        };
        let mut acc: u64 = 0;
        for i in 0..needed_bytes {
            acc |= (payload[byte_offset as usize + i] as u64) << (8 * i);
        }
        acc &= !(mask << bit_offset);
        acc |= (value & mask) << bit_offset;
        for i in 0..needed_bytes {
            payload[byte_offset as usize + i] = (acc >> (8 * i)) as u8;
        }
        Ok(())
    }
}

fn u24_from_be(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32)
}

fn u24_to_be(value: u32) -> [u8; 3] {
    [
        ((value >> 16) & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        (value & 0xFF) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::new(0x0A, 0x01, 0x00, 0x123456, 0xABCDEF, vec![0x00, 0x00]).unwrap()
    }

    #[test]
    fn round_trip_no_rssi() {
        let p = sample();
        let bytes = Codec::to_bytes(&p);
        let decoded = Codec::from_bytes(&bytes, false).unwrap();
        assert_eq!(decoded.counter, p.counter);
        assert_eq!(decoded.message_type, p.message_type);
        assert_eq!(decoded.sender_addr, p.sender_addr);
        assert_eq!(decoded.dest_addr, p.dest_addr);
        assert_eq!(decoded.payload, p.payload);
        assert_eq!(bytes[0], 9 + p.payload.len() as u8);
    }

    #[test]
    fn round_trip_with_rssi() {
        let p = sample();
        let mut bytes = Codec::to_bytes(&p);
        bytes.push(0xAA);
        let decoded = Codec::from_bytes(&bytes, true).unwrap();
        assert_eq!(decoded.rssi_device, Some(0xAA));
        assert_eq!(decoded.payload, p.payload);
    }

    #[test]
    fn length_mismatch_rejected() {
        let mut bytes = Codec::to_bytes(&sample());
        bytes.push(0xFF); // stray trailing byte, has_rssi_byte = false
        assert!(matches!(
            Codec::from_bytes(&bytes, false),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn too_short_rejected() {
        assert!(matches!(
            Codec::from_bytes(&[0, 1, 2], false),
            Err(CodecError::TooShort(3))
        ));
    }

    #[test]
    fn payload_boundary_54_accepted_55_rejected() {
        assert!(Packet::new(0, 0, 0, 0, 0, vec![0u8; 54]).is_ok());
        assert!(matches!(
            Packet::new(0, 0, 0, 0, 0, vec![0u8; 55]),
            Err(CodecError::PayloadTooLong(55))
        ));
    }

    #[test]
    fn hex_round_trip_whitespace_and_tag_tolerant() {
        let p = sample();
        let hex_text = Codec::to_hex(&p);
        let tagged = format!("Z {} \n", hex_text);
        let decoded = Codec::from_hex(&tagged, false).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn sub_byte_get_set_round_trip() {
        let mut payload = vec![0u8; 4];
        Codec::set_position(&mut payload, 1, 4, 4, 0b1011).unwrap();
        assert_eq!(Codec::get_position(&payload, 1, 4, 4).unwrap(), 0b1011);
        assert_eq!(payload[1] & 0x0F, 0);
        Codec::set_position(&mut payload, 1, 0, 4, 0b0101).unwrap();
        assert_eq!(payload[1], 0b1011_0101);
    }

    #[test]
    fn sub_byte_field_straddling_end_rejected() {
        let payload = vec![0u8; 2];
        assert!(matches!(
            Codec::get_position(&payload, 1, 4, 8),
            Err(CodecError::FieldOutOfRange { .. })
        ));
    }
}
