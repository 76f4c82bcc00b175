//! Ready-made definitions for common SIG-adopted services

use super::service::{AccessOp, ServiceDef};
use super::types::CharacteristicFlags;
use crate::att::error::AttErrorCode;
use crate::uuid::Uuid;
use std::sync::Arc;

/// Battery Service
pub const BATTERY_SERVICE: u16 = 0x180F;
/// Battery Level characteristic
pub const BATTERY_LEVEL: u16 = 0x2A19;

/// Device Information Service
pub const DEVICE_INFORMATION_SERVICE: u16 = 0x180A;
/// Manufacturer Name String characteristic
pub const MANUFACTURER_NAME: u16 = 0x2A29;
/// Model Number String characteristic
pub const MODEL_NUMBER: u16 = 0x2A24;
/// Firmware Revision String characteristic
pub const FIRMWARE_REVISION: u16 = 0x2A26;

/// A Battery Service whose level is produced by the given closure.
///
/// The level characteristic reads and notifies; publish level changes with
/// `notify` on the registered value handle.
pub fn battery_service<F>(level: F) -> ServiceDef
where
    F: Fn() -> u8 + Send + Sync + 'static,
{
    ServiceDef::primary(Uuid::from_u16(BATTERY_SERVICE)).add_notify_characteristic(
        Uuid::from_u16(BATTERY_LEVEL),
        Some(Arc::new(move |_conn, op, _offset, data| {
            if op != AccessOp::ReadChr {
                return Err(AttErrorCode::WriteNotPermitted);
            }
            data.push(level().min(100));
            Ok(())
        })),
    )
}

/// Fixed strings served by a Device Information Service
#[derive(Debug, Clone, Default)]
pub struct DeviceInformation {
    pub manufacturer_name: Option<String>,
    pub model_number: Option<String>,
    pub firmware_revision: Option<String>,
}

/// A Device Information Service carrying whichever strings are present.
pub fn device_information_service(info: DeviceInformation) -> ServiceDef {
    let mut service = ServiceDef::primary(Uuid::from_u16(DEVICE_INFORMATION_SERVICE));

    let strings = [
        (MANUFACTURER_NAME, info.manufacturer_name),
        (MODEL_NUMBER, info.model_number),
        (FIRMWARE_REVISION, info.firmware_revision),
    ];

    for (uuid, value) in strings {
        let value = match value {
            Some(value) => value,
            None => continue,
        };
        service = service.add_characteristic(
            Uuid::from_u16(uuid),
            CharacteristicFlags::READ,
            Some(Arc::new(move |_conn, op, offset, data| {
                if op != AccessOp::ReadChr {
                    return Err(AttErrorCode::WriteNotPermitted);
                }
                let bytes = value.as_bytes();
                let offset = offset as usize;
                if offset > 0 && offset >= bytes.len() {
                    return Err(AttErrorCode::InvalidOffset);
                }
                data.extend_from_slice(bytes.get(offset..).unwrap_or(&[]));
                Ok(())
            })),
        );
    }

    service
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::att::database::AttributeDatabase;

    #[test]
    fn battery_service_reads_clamped_level() {
        let db = AttributeDatabase::new();
        let registered = db.register_services(&[battery_service(|| 250)]).unwrap();

        let value_handle = registered[0].characteristics[0].value_handle;
        assert_eq!(registered[0].characteristics[0].cccd_handle, Some(value_handle + 1));
        assert_eq!(db.read_value(1, value_handle, 0).unwrap(), vec![100]);
    }

    #[test]
    fn device_information_skips_absent_strings() {
        let db = AttributeDatabase::new();
        let registered = db
            .register_services(&[device_information_service(DeviceInformation {
                manufacturer_name: Some("bluekit".into()),
                model_number: None,
                firmware_revision: Some("1.0.0".into()),
            })])
            .unwrap();

        let chars = &registered[0].characteristics;
        assert_eq!(chars.len(), 2);
        assert_eq!(chars[0].uuid, Uuid::from_u16(MANUFACTURER_NAME));
        assert_eq!(chars[1].uuid, Uuid::from_u16(FIRMWARE_REVISION));
        assert_eq!(db.read_value(1, chars[0].value_handle, 0).unwrap(), b"bluekit");
        assert_eq!(db.read_value(1, chars[1].value_handle, 3).unwrap(), b".0");
    }
}
