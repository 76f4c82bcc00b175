//! Declarative service definitions
//!
//! A [`ServiceDef`] describes one service as a tree: the service owns its
//! characteristics and each characteristic owns its descriptors. Passing a
//! slice of definitions to `register_services` flattens the tree into
//! attribute rows and reports the allocated handles back as
//! [`RegisteredService`] values.

use super::types::CharacteristicFlags;
use crate::att::error::AttErrorCode;
use crate::att::permissions::AttPermissions;
use crate::uuid::Uuid;
use std::sync::Arc;

/// Which kind of access a callback is being asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    /// Read a characteristic value; fill `data`
    ReadChr,
    /// Write a characteristic value; `data` holds the inbound bytes
    WriteChr,
    /// Read a descriptor value
    ReadDsc,
    /// Write a descriptor value
    WriteDsc,
}

/// Access callback invoked for reads and writes of a registered
/// characteristic or descriptor.
///
/// For reads the callback fills `data`; for writes it receives the inbound
/// bytes in `data`. A returned error code is sent to the peer verbatim.
pub type AccessCallback =
    Arc<dyn Fn(u16, AccessOp, u16, &mut Vec<u8>) -> Result<(), AttErrorCode> + Send + Sync>;

/// Primary or secondary service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    Primary,
    Secondary,
}

/// One descriptor in a service definition
#[derive(Clone)]
pub struct DescriptorDef {
    pub uuid: Uuid,
    pub permissions: AttPermissions,
    pub access: Option<AccessCallback>,
}

impl DescriptorDef {
    pub fn new(uuid: Uuid, permissions: AttPermissions) -> Self {
        Self {
            uuid,
            permissions,
            access: None,
        }
    }

    pub fn with_access(mut self, access: AccessCallback) -> Self {
        self.access = Some(access);
        self
    }
}

/// One characteristic in a service definition
#[derive(Clone)]
pub struct CharacteristicDef {
    pub uuid: Uuid,
    pub flags: CharacteristicFlags,
    pub access: Option<AccessCallback>,
    pub descriptors: Vec<DescriptorDef>,
}

impl CharacteristicDef {
    pub fn new(uuid: Uuid, flags: CharacteristicFlags) -> Self {
        Self {
            uuid,
            flags,
            access: None,
            descriptors: Vec::new(),
        }
    }

    pub fn with_access(mut self, access: AccessCallback) -> Self {
        self.access = Some(access);
        self
    }

    pub fn with_descriptor(mut self, descriptor: DescriptorDef) -> Self {
        self.descriptors.push(descriptor);
        self
    }
}

/// One service in a registration request
#[derive(Clone)]
pub struct ServiceDef {
    pub service_type: ServiceType,
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDef>,
    /// Handles of already-registered services to include
    pub included_services: Vec<u16>,
}

impl ServiceDef {
    pub fn primary(uuid: Uuid) -> Self {
        Self {
            service_type: ServiceType::Primary,
            uuid,
            characteristics: Vec::new(),
            included_services: Vec::new(),
        }
    }

    pub fn secondary(uuid: Uuid) -> Self {
        Self {
            service_type: ServiceType::Secondary,
            uuid,
            characteristics: Vec::new(),
            included_services: Vec::new(),
        }
    }

    /// Adds a characteristic with the given flag word.
    pub fn add_characteristic(
        mut self,
        uuid: Uuid,
        flags: CharacteristicFlags,
        access: Option<AccessCallback>,
    ) -> Self {
        let mut def = CharacteristicDef::new(uuid, flags);
        def.access = access;
        self.characteristics.push(def);
        self
    }

    /// Adds a read-only characteristic.
    pub fn add_read_characteristic(self, uuid: Uuid, access: Option<AccessCallback>) -> Self {
        self.add_characteristic(uuid, CharacteristicFlags::READ, access)
    }

    /// Adds a read/write characteristic.
    pub fn add_read_write_characteristic(self, uuid: Uuid, access: Option<AccessCallback>) -> Self {
        self.add_characteristic(uuid, CharacteristicFlags::READ_WRITE, access)
    }

    /// Adds a readable characteristic that also notifies.
    pub fn add_notify_characteristic(self, uuid: Uuid, access: Option<AccessCallback>) -> Self {
        self.add_characteristic(uuid, CharacteristicFlags::READ_NOTIFY, access)
    }

    /// Adds a readable characteristic that also indicates.
    pub fn add_indicate_characteristic(self, uuid: Uuid, access: Option<AccessCallback>) -> Self {
        self.add_characteristic(uuid, CharacteristicFlags::READ_INDICATE, access)
    }

    /// Includes an already-registered service.
    pub fn include(mut self, service_handle: u16) -> Self {
        self.included_services.push(service_handle);
        self
    }
}

/// Handles allocated for one registered characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCharacteristic {
    pub uuid: Uuid,
    pub declaration_handle: u16,
    pub value_handle: u16,
    /// Present when the characteristic notifies or indicates
    pub cccd_handle: Option<u16>,
    pub descriptor_handles: Vec<u16>,
}

/// Handles allocated for one registered service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredService {
    pub uuid: Uuid,
    pub handle: u16,
    pub include_handles: Vec<u16>,
    pub characteristics: Vec<RegisteredCharacteristic>,
}

/// A primary service with a single read-only characteristic serving a
/// fixed value.
pub fn read_only_service(service_uuid: Uuid, char_uuid: Uuid, value: Vec<u8>) -> ServiceDef {
    ServiceDef::primary(service_uuid).add_read_characteristic(
        char_uuid,
        Some(Arc::new(move |_conn, op, offset, data| {
            if op != AccessOp::ReadChr {
                return Err(AttErrorCode::Unlikely);
            }
            let offset = offset as usize;
            if offset > 0 && offset >= value.len() {
                return Err(AttErrorCode::InvalidOffset);
            }
            data.extend_from_slice(value.get(offset..).unwrap_or(&[]));
            Ok(())
        })),
    )
}

/// A primary service with a single read/write characteristic backed by
/// the given closures.
pub fn read_write_service<R, W>(
    service_uuid: Uuid,
    char_uuid: Uuid,
    read_fn: R,
    write_fn: W,
) -> ServiceDef
where
    R: Fn() -> Vec<u8> + Send + Sync + 'static,
    W: Fn(&[u8]) + Send + Sync + 'static,
{
    ServiceDef::primary(service_uuid).add_read_write_characteristic(
        char_uuid,
        Some(Arc::new(move |_conn, op, offset, data| match op {
            AccessOp::ReadChr => {
                let value = read_fn();
                let offset = offset as usize;
                if offset > 0 && offset >= value.len() {
                    return Err(AttErrorCode::InvalidOffset);
                }
                data.extend_from_slice(value.get(offset..).unwrap_or(&[]));
                Ok(())
            }
            AccessOp::WriteChr => {
                write_fn(data);
                Ok(())
            }
            _ => Err(AttErrorCode::Unlikely),
        })),
    )
}
