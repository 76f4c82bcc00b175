//! bluekit - A Rust library for Bluetooth Low Energy hosts
//!
//! This library implements the host side of the Attribute Protocol (ATT) and
//! the Generic Attribute Profile (GATT) on top of a pluggable link-layer
//! transport. The server half keeps an attribute database of services,
//! characteristics and descriptors and answers ATT requests from connected
//! peers; the client half decodes raw HCI LE advertising reports into
//! structured records for scanning applications.

pub mod error;
pub mod uuid;
pub mod codec;
pub mod hci;
pub mod gap;
pub mod att;
pub mod gatt;
pub mod transport;

// Re-export common types for convenience
pub use error::Error;
pub use uuid::Uuid;
pub use hci::advertising::{parse_advertising_packet, AdvertisingRecord, ScanError, Scanner};
pub use gap::{AddressType, BdAddr};
pub use att::{AttError, AttErrorCode, AttPermissions, AttServer, Attribute, AttributeDatabase};
pub use gatt::{CharacteristicFlags, CharacteristicProperties, GattServer, ServiceDef};
pub use transport::{AdvertisingParams, Transport, TransportEvents};
