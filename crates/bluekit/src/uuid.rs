//! Bluetooth UUID values
//!
//! A UUID is either a SIG-assigned short form (16 or 32 bits) or a full
//! 128-bit value. Short forms are kept in their native width; comparisons
//! widen through the Bluetooth Base UUID so that `Uuid::from_u16(0x180F)`
//! equals the corresponding 128-bit value.

use rand::RngCore;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// The base UUID used for constructing 128-bit UUIDs from 16-bit and 32-bit
/// values: "00000000-0000-1000-8000-00805F9B34FB" (little-endian bytes).
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the 16/32-bit value is inserted.
const BASE_OFFSET: usize = 12;

/// A Bluetooth UUID of any of the three on-air widths.
///
/// 128-bit values are stored little-endian, matching their wire encoding in
/// ATT PDUs and advertising data.
#[derive(Clone, Copy)]
pub enum Uuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128([u8; 16]),
}

impl Uuid {
    /// Creates a UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        Uuid::Uuid16(uuid16)
    }

    /// Creates a UUID from a 32-bit SIG-assigned value.
    pub const fn from_u32(uuid32: u32) -> Self {
        Uuid::Uuid32(uuid32)
    }

    /// Creates a 128-bit UUID from 16 little-endian bytes.
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid::Uuid128(bytes)
    }

    /// Creates a 128-bit UUID from 16 big-endian bytes (the order used in
    /// the standard hyphenated text form).
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid::Uuid128(bytes)
    }

    /// Tries to create a UUID from a little-endian byte slice.
    ///
    /// Accepts slices of length 2 (16-bit), 4 (32-bit), or 16 (128-bit).
    /// Returns `None` for any other length.
    pub fn from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::Uuid16(u16::from_le_bytes([slice[0], slice[1]]))),
            4 => Some(Uuid::Uuid32(u32::from_le_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::Uuid128(bytes))
            }
            _ => None,
        }
    }

    /// Generates a random (Version 4) UUID.
    pub fn new_v4() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);

        // Version 4, RFC 4122 variant. Stored little-endian, so the version
        // nibble lands in byte 7 and the variant bits in byte 8.
        bytes[7] = (bytes[7] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;

        Uuid::Uuid128(bytes)
    }

    /// Widens this UUID to its full 128-bit little-endian form.
    pub fn to_uuid128(&self) -> [u8; 16] {
        match *self {
            Uuid::Uuid16(v) => {
                let mut bytes = BASE_UUID_BYTES;
                bytes[BASE_OFFSET] = v as u8;
                bytes[BASE_OFFSET + 1] = (v >> 8) as u8;
                bytes
            }
            Uuid::Uuid32(v) => {
                let mut bytes = BASE_UUID_BYTES;
                bytes[BASE_OFFSET] = v as u8;
                bytes[BASE_OFFSET + 1] = (v >> 8) as u8;
                bytes[BASE_OFFSET + 2] = (v >> 16) as u8;
                bytes[BASE_OFFSET + 3] = (v >> 24) as u8;
                bytes
            }
            Uuid::Uuid128(bytes) => bytes,
        }
    }

    /// Serializes the UUID little-endian, preserving its width.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match *self {
            Uuid::Uuid16(v) => v.to_le_bytes().to_vec(),
            Uuid::Uuid32(v) => v.to_le_bytes().to_vec(),
            Uuid::Uuid128(bytes) => bytes.to_vec(),
        }
    }

    /// Number of bytes this UUID occupies on the wire.
    pub const fn len(&self) -> usize {
        match self {
            Uuid::Uuid16(_) => 2,
            Uuid::Uuid32(_) => 4,
            Uuid::Uuid128(_) => 16,
        }
    }

    /// True if the 128-bit form lies on the Bluetooth Base UUID.
    fn is_sig_assigned(bytes: &[u8; 16]) -> bool {
        bytes[0..BASE_OFFSET] == BASE_UUID_BYTES[0..BASE_OFFSET]
    }

    /// The 16-bit value, if this UUID can be narrowed to one.
    pub fn as_u16(&self) -> Option<u16> {
        match *self {
            Uuid::Uuid16(v) => Some(v),
            Uuid::Uuid32(v) => u16::try_from(v).ok(),
            Uuid::Uuid128(bytes) => {
                if Self::is_sig_assigned(&bytes)
                    && bytes[BASE_OFFSET + 2] == 0
                    && bytes[BASE_OFFSET + 3] == 0
                {
                    Some(u16::from_le_bytes([bytes[BASE_OFFSET], bytes[BASE_OFFSET + 1]]))
                } else {
                    None
                }
            }
        }
    }

    /// The 32-bit value, if this UUID can be narrowed to one.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Uuid::Uuid16(v) => Some(u32::from(v)),
            Uuid::Uuid32(v) => Some(v),
            Uuid::Uuid128(bytes) => {
                if Self::is_sig_assigned(&bytes) {
                    Some(u32::from_le_bytes([
                        bytes[BASE_OFFSET],
                        bytes[BASE_OFFSET + 1],
                        bytes[BASE_OFFSET + 2],
                        bytes[BASE_OFFSET + 3],
                    ]))
                } else {
                    None
                }
            }
        }
    }
}

impl PartialEq for Uuid {
    fn eq(&self, other: &Self) -> bool {
        self.to_uuid128() == other.to_uuid128()
    }
}

impl Eq for Uuid {}

impl Hash for Uuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_uuid128().hash(state);
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::Uuid16(uuid16)
    }
}

impl From<u32> for Uuid {
    fn from(uuid32: u32) -> Self {
        Uuid::Uuid32(uuid32)
    }
}

impl From<[u8; 16]> for Uuid {
    /// Assumes bytes are in little-endian order.
    fn from(bytes: [u8; 16]) -> Self {
        Uuid::Uuid128(bytes)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        *self == Uuid::Uuid16(*other)
    }
}

impl PartialEq<Uuid> for u16 {
    fn eq(&self, other: &Uuid) -> bool {
        Uuid::Uuid16(*self) == *other
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Uuid::Uuid16(v) => write!(f, "{:04x}", v),
            Uuid::Uuid32(v) => write!(f, "{:08x}", v),
            Uuid::Uuid128(bytes) => {
                // Standard hyphenated format is big-endian
                let mut b = bytes;
                b.reverse();
                write!(
                    f,
                    "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                    b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
                )
            }
        }
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u16() {
            Some(v) => write!(f, "Uuid(0x{:04X})", v),
            None => match self.as_u32() {
                Some(v) => write!(f, "Uuid(0x{:08X})", v),
                None => write!(f, "Uuid({})", self),
            },
        }
    }
}

/// Error produced when parsing a UUID from text.
#[derive(Debug, PartialEq, Eq)]
pub enum UuidParseError {
    InvalidLength,
    InvalidFormat,
}

impl fmt::Display for UuidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UuidParseError::InvalidLength => write!(f, "invalid UUID length"),
            UuidParseError::InvalidFormat => write!(f, "invalid UUID format"),
        }
    }
}

impl std::error::Error for UuidParseError {}

impl FromStr for Uuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();
        if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(UuidParseError::InvalidFormat);
        }

        match cleaned.len() {
            4 => {
                let val =
                    u16::from_str_radix(&cleaned, 16).map_err(|_| UuidParseError::InvalidFormat)?;
                Ok(Uuid::Uuid16(val))
            }
            8 => {
                let val =
                    u32::from_str_radix(&cleaned, 16).map_err(|_| UuidParseError::InvalidFormat)?;
                Ok(Uuid::Uuid32(val))
            }
            32 => {
                let mut bytes_be = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes_be)
                    .map_err(|_| UuidParseError::InvalidFormat)?;
                Ok(Uuid::from_bytes_be(bytes_be))
            }
            _ => Err(UuidParseError::InvalidLength),
        }
    }
}
