use crate::gap::constants::*;
use std::fmt;

/// LE device address type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressType {
    #[default]
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        match value {
            RANDOM_DEVICE_ADDRESS => AddressType::Random,
            PUBLIC_IDENTITY_ADDRESS => AddressType::PublicIdentity,
            RANDOM_IDENTITY_ADDRESS => AddressType::RandomIdentity,
            _ => AddressType::Public,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => PUBLIC_DEVICE_ADDRESS,
            AddressType::Random => RANDOM_DEVICE_ADDRESS,
            AddressType::PublicIdentity => PUBLIC_IDENTITY_ADDRESS,
            AddressType::RandomIdentity => RANDOM_IDENTITY_ADDRESS,
        }
    }
}

/// A 6-byte Bluetooth device address, stored little-endian as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() >= 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&slice[0..6]);
            Some(Self { bytes })
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for BdAddr {
    /// Colon-separated hex, most-significant byte first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

/// Type of an LE advertising event, from the advertising report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdvertisingEventType {
    /// Connectable undirected advertising
    #[default]
    AdvInd,
    /// Connectable directed advertising
    AdvDirectInd,
    /// Scannable undirected advertising
    AdvScanInd,
    /// Non-connectable undirected advertising
    AdvNonconnInd,
    /// Response to a scan request
    ScanRsp,
    /// Value outside the assigned range
    Unknown(u8),
}

impl From<u8> for AdvertisingEventType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => AdvertisingEventType::AdvInd,
            0x01 => AdvertisingEventType::AdvDirectInd,
            0x02 => AdvertisingEventType::AdvScanInd,
            0x03 => AdvertisingEventType::AdvNonconnInd,
            0x04 => AdvertisingEventType::ScanRsp,
            other => AdvertisingEventType::Unknown(other),
        }
    }
}

impl From<AdvertisingEventType> for u8 {
    fn from(value: AdvertisingEventType) -> Self {
        match value {
            AdvertisingEventType::AdvInd => 0x00,
            AdvertisingEventType::AdvDirectInd => 0x01,
            AdvertisingEventType::AdvScanInd => 0x02,
            AdvertisingEventType::AdvNonconnInd => 0x03,
            AdvertisingEventType::ScanRsp => 0x04,
            AdvertisingEventType::Unknown(other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_displays_msb_first() {
        let addr = BdAddr::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(addr.to_string(), "FF:EE:DD:CC:BB:AA");
    }

    #[test]
    fn event_type_round_trips() {
        for raw in 0u8..=5 {
            let typ = AdvertisingEventType::from(raw);
            assert_eq!(u8::from(typ), raw);
        }
    }
}
