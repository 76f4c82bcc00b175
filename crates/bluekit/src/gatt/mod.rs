//! Generic Attribute Profile (GATT) server
//!
//! Layers the service/characteristic/descriptor structure over the ATT
//! module: declarative service registration, per-connection subscription
//! state, and the notify/indicate emitter.

pub mod types;
pub mod service;
pub mod connection;
pub mod server;
pub mod profiles;

#[cfg(test)]
mod tests;

pub use self::types::{CharacteristicFlags, CharacteristicProperties};
pub use self::service::{
    read_only_service, read_write_service, AccessCallback, AccessOp, CharacteristicDef,
    DescriptorDef, RegisteredCharacteristic, RegisteredService, ServiceDef, ServiceType,
};
pub use self::connection::{ConnectionInfo, ConnectionTable, CCCD_INDICATE, CCCD_NOTIFY};
pub use self::server::GattServer;
pub use self::profiles::{battery_service, device_information_service, DeviceInformation};
