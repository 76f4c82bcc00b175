//! Attribute database
//!
//! A handle-keyed store of services, characteristics and descriptors.
//! Handles are allocated from a monotonically increasing counter starting
//! at 1; all rows of one service occupy a single contiguous handle range.
//! Characteristics whose properties include notify or indicate get a
//! Client Characteristic Configuration Descriptor allocated automatically.

use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use super::permissions::AttPermissions;
use crate::codec;
use crate::error::Error;
use crate::gatt::service::{
    AccessOp, RegisteredCharacteristic, RegisteredService, ServiceDef, ServiceType,
};
use crate::gatt::types::{CharacteristicProperties, PROP_INDICATE, PROP_NOTIFY};
use crate::uuid::Uuid;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// What role an attribute row plays in the GATT hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    PrimaryService,
    SecondaryService,
    Include,
    CharacteristicDecl,
    CharacteristicValue,
    Descriptor,
}

/// A single row of the attribute database
#[derive(Debug, Clone)]
pub struct Attribute {
    pub handle: u16,
    pub kind: AttributeKind,
    /// The ATT attribute type (0x2800 for a primary service declaration,
    /// the contained UUID for values and descriptors)
    pub type_uuid: Uuid,
    pub permissions: AttPermissions,
    /// Encoding depends on `kind`; opaque for characteristic values
    pub value: Vec<u8>,
    /// Characteristic properties; meaningful on declaration and value rows
    pub properties: CharacteristicProperties,
    /// On a declaration row, the handle of the value it introduces
    pub value_handle: u16,
    /// On service rows, the last handle of the group; elsewhere the row's own
    pub end_group_handle: u16,
}

impl Attribute {
    fn new(handle: u16, kind: AttributeKind, type_uuid: Uuid, permissions: AttPermissions) -> Self {
        Self {
            handle,
            kind,
            type_uuid,
            permissions,
            value: Vec::new(),
            properties: CharacteristicProperties(0),
            value_handle: 0,
            end_group_handle: handle,
        }
    }
}

/// Read hook: `(conn_handle, offset)` to the bytes from that offset, or an
/// ATT error code propagated verbatim to the peer.
pub type ReadCallback = Arc<dyn Fn(u16, u16) -> Result<Vec<u8>, AttErrorCode> + Send + Sync>;

/// Write hook: `(conn_handle, value)`; an error code is propagated verbatim.
pub type WriteCallback = Arc<dyn Fn(u16, &[u8]) -> Result<(), AttErrorCode> + Send + Sync>;

/// Start/end of one service's handle range, in registration order
#[derive(Debug, Clone, Copy)]
struct ServiceRange {
    start: u16,
    end: u16,
}

/// The attribute database
///
/// Mutable during setup; once connections are accepted, rows are logically
/// frozen and writes go through the ATT write path or hooks.
pub struct AttributeDatabase {
    attributes: RwLock<BTreeMap<u16, Attribute>>,
    read_callbacks: RwLock<BTreeMap<u16, ReadCallback>>,
    write_callbacks: RwLock<BTreeMap<u16, WriteCallback>>,
    services: RwLock<Vec<ServiceRange>>,
    next_handle: RwLock<u16>,
}

impl Default for AttributeDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeDatabase {
    pub fn new() -> Self {
        Self {
            attributes: RwLock::new(BTreeMap::new()),
            read_callbacks: RwLock::new(BTreeMap::new()),
            write_callbacks: RwLock::new(BTreeMap::new()),
            services: RwLock::new(Vec::new()),
            next_handle: RwLock::new(ATT_HANDLE_MIN),
        }
    }

    /// Reserves `count` consecutive handles, returning the first.
    ///
    /// Fails without allocating anything when the space would be exhausted;
    /// 0xFFFF itself is reserved as the "all handles" range bound.
    fn allocate_handles(&self, count: u16) -> Result<u16, Error> {
        let mut next = self.next_handle.write().unwrap();
        let available = ATT_HANDLE_MAX - *next; // handles left below 0xFFFF
        if count > available {
            return Err(Error::HandleSpaceExhausted);
        }
        let first = *next;
        *next += count;
        Ok(first)
    }

    /// Serializes a contained UUID the way ATT values carry it: two bytes
    /// for a SIG-assigned 16-bit value, sixteen otherwise.
    fn contained_uuid_bytes(uuid: &Uuid) -> Vec<u8> {
        match uuid.as_u16() {
            Some(v) => v.to_le_bytes().to_vec(),
            None => uuid.to_uuid128().to_vec(),
        }
    }

    fn add_service(&self, uuid: &Uuid, kind: AttributeKind, type_uuid: u16) -> Result<u16, Error> {
        let handle = self.allocate_handles(1)?;

        let mut attr = Attribute::new(
            handle,
            kind,
            Uuid::from_u16(type_uuid),
            AttPermissions::read_only(),
        );
        attr.value = Self::contained_uuid_bytes(uuid);

        self.attributes.write().unwrap().insert(handle, attr);
        self.services.write().unwrap().push(ServiceRange {
            start: handle,
            end: handle,
        });

        info!("added service {} at handle {}", uuid, handle);
        Ok(handle)
    }

    /// Adds a primary service declaration and opens its group.
    pub fn add_primary_service(&self, uuid: &Uuid) -> Result<u16, Error> {
        self.add_service(uuid, AttributeKind::PrimaryService, PRIMARY_SERVICE_UUID)
    }

    /// Adds a secondary service declaration and opens its group.
    pub fn add_secondary_service(&self, uuid: &Uuid) -> Result<u16, Error> {
        self.add_service(uuid, AttributeKind::SecondaryService, SECONDARY_SERVICE_UUID)
    }

    /// Adds an include declaration referencing an already-registered service.
    pub fn add_include(&self, service_handle: u16, included_handle: u16) -> Result<u16, Error> {
        let included = self
            .get(included_handle)
            .ok_or(Error::UnknownHandle(included_handle))?;

        let handle = self.allocate_handles(1)?;

        let mut attr = Attribute::new(
            handle,
            AttributeKind::Include,
            Uuid::from_u16(INCLUDE_UUID),
            AttPermissions::read_only(),
        );

        // included_start(2) || included_end(2) || uuid16(2) when short
        codec::write_u16_le(&mut attr.value, included_handle);
        codec::write_u16_le(&mut attr.value, included.end_group_handle);
        if included.value.len() == 2 {
            attr.value.extend_from_slice(&included.value);
        }

        self.attributes.write().unwrap().insert(handle, attr);
        self.extend_service(service_handle, handle);

        info!("added include of {} at handle {}", included_handle, handle);
        Ok(handle)
    }

    /// Adds a characteristic declaration plus its value row, and a CCCD when
    /// the properties include notify or indicate. Returns the declaration
    /// handle; the value handle is always one past it.
    pub fn add_characteristic(
        &self,
        service_handle: u16,
        uuid: &Uuid,
        properties: CharacteristicProperties,
        permissions: AttPermissions,
    ) -> Result<u16, Error> {
        let wants_cccd = properties.0 & (PROP_NOTIFY | PROP_INDICATE) != 0;
        let count = if wants_cccd { 3 } else { 2 };
        let decl_handle = self.allocate_handles(count)?;
        let value_handle = decl_handle + 1;

        let mut decl = Attribute::new(
            decl_handle,
            AttributeKind::CharacteristicDecl,
            Uuid::from_u16(CHARACTERISTIC_UUID),
            AttPermissions::read_only(),
        );
        decl.properties = properties;
        decl.value_handle = value_handle;
        decl.value.push(properties.0);
        codec::write_u16_le(&mut decl.value, value_handle);
        decl.value.extend_from_slice(&Self::contained_uuid_bytes(uuid));

        let mut value = Attribute::new(
            value_handle,
            AttributeKind::CharacteristicValue,
            *uuid,
            permissions,
        );
        value.properties = properties;

        {
            let mut attributes = self.attributes.write().unwrap();
            attributes.insert(decl_handle, decl);
            attributes.insert(value_handle, value);
        }
        self.extend_service(service_handle, value_handle);

        if wants_cccd {
            let cccd_handle = value_handle + 1;
            let mut cccd = Attribute::new(
                cccd_handle,
                AttributeKind::Descriptor,
                Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID),
                AttPermissions::read_write(),
            );
            cccd.value = vec![0x00, 0x00];
            self.attributes.write().unwrap().insert(cccd_handle, cccd);
            self.extend_service(service_handle, cccd_handle);
            debug!(
                "auto-added CCCD at handle {} for characteristic {}",
                cccd_handle, value_handle
            );
        }

        info!(
            "added characteristic {} (decl={}, value={})",
            uuid, decl_handle, value_handle
        );
        Ok(decl_handle)
    }

    /// Adds a descriptor under the service owning `char_value_handle`.
    ///
    /// The CCCD (0x2902) is managed by the database and cannot be added
    /// by the application.
    pub fn add_descriptor(
        &self,
        char_value_handle: u16,
        uuid: &Uuid,
        permissions: AttPermissions,
    ) -> Result<u16, Error> {
        if uuid.as_u16() == Some(CLIENT_CHAR_CONFIG_UUID) {
            return Err(Error::InvalidParameter(
                "the CCCD is allocated automatically for notify/indicate characteristics".into(),
            ));
        }

        let handle = self.allocate_handles(1)?;
        let attr = Attribute::new(handle, AttributeKind::Descriptor, *uuid, permissions);
        self.attributes.write().unwrap().insert(handle, attr);

        // Attach to the last service whose range contains the referenced
        // value handle.
        let owner = {
            let mut services = self.services.write().unwrap();
            services
                .iter_mut()
                .rev()
                .find(|s| char_value_handle >= s.start && char_value_handle <= s.end)
                .map(|svc| {
                    svc.end = handle;
                    svc.start
                })
        };
        if let Some(start) = owner {
            if let Some(attr) = self.attributes.write().unwrap().get_mut(&start) {
                attr.end_group_handle = handle;
            }
        }

        info!("added descriptor {} at handle {}", uuid, handle);
        Ok(handle)
    }

    /// Widens a service group to cover `last_handle`.
    fn extend_service(&self, service_handle: u16, last_handle: u16) {
        let mut services = self.services.write().unwrap();
        if let Some(svc) = services.iter_mut().find(|s| s.start == service_handle) {
            svc.end = last_handle;
        }
        drop(services);

        if let Some(attr) = self.attributes.write().unwrap().get_mut(&service_handle) {
            attr.end_group_handle = last_handle;
        }
    }

    /// Registers a declarative service tree.
    ///
    /// Not atomic: rows inserted before a failure remain. Callers must not
    /// keep using a database after a failed registration.
    pub fn register_services(&self, services: &[ServiceDef]) -> Result<Vec<RegisteredService>, Error> {
        let mut registered = Vec::with_capacity(services.len());

        for def in services {
            let service_handle = match def.service_type {
                ServiceType::Primary => self.add_primary_service(&def.uuid)?,
                ServiceType::Secondary => self.add_secondary_service(&def.uuid)?,
            };

            let mut include_handles = Vec::new();
            for &included in &def.included_services {
                include_handles.push(self.add_include(service_handle, included)?);
            }

            let mut characteristics = Vec::with_capacity(def.characteristics.len());
            for char_def in &def.characteristics {
                let flags = char_def.flags;
                let decl_handle = self.add_characteristic(
                    service_handle,
                    &char_def.uuid,
                    flags.to_properties(),
                    flags.to_permissions(),
                )?;
                let value_handle = decl_handle + 1;
                let cccd_handle = if flags.to_properties().0 & (PROP_NOTIFY | PROP_INDICATE) != 0 {
                    Some(value_handle + 1)
                } else {
                    None
                };

                if let Some(access) = char_def.access.clone() {
                    let read_cb = access.clone();
                    self.set_read_callback(
                        value_handle,
                        Arc::new(move |conn, offset| {
                            let mut data = Vec::new();
                            read_cb(conn, AccessOp::ReadChr, offset, &mut data)?;
                            Ok(data)
                        }),
                    )?;
                    self.set_write_callback(
                        value_handle,
                        Arc::new(move |conn, value| {
                            let mut data = value.to_vec();
                            access(conn, AccessOp::WriteChr, 0, &mut data)
                        }),
                    )?;
                }

                let mut descriptor_handles = Vec::with_capacity(char_def.descriptors.len());
                for dsc_def in &char_def.descriptors {
                    let dsc_handle =
                        self.add_descriptor(value_handle, &dsc_def.uuid, dsc_def.permissions)?;
                    descriptor_handles.push(dsc_handle);

                    if let Some(access) = dsc_def.access.clone() {
                        let read_cb = access.clone();
                        self.set_read_callback(
                            dsc_handle,
                            Arc::new(move |conn, offset| {
                                let mut data = Vec::new();
                                read_cb(conn, AccessOp::ReadDsc, offset, &mut data)?;
                                Ok(data)
                            }),
                        )?;
                        self.set_write_callback(
                            dsc_handle,
                            Arc::new(move |conn, value| {
                                let mut data = value.to_vec();
                                access(conn, AccessOp::WriteDsc, 0, &mut data)
                            }),
                        )?;
                    }
                }

                characteristics.push(RegisteredCharacteristic {
                    uuid: char_def.uuid,
                    declaration_handle: decl_handle,
                    value_handle,
                    cccd_handle,
                    descriptor_handles,
                });
            }

            registered.push(RegisteredService {
                uuid: def.uuid,
                handle: service_handle,
                include_handles,
                characteristics,
            });
        }

        info!(
            "registered {} service(s), {} attributes total",
            services.len(),
            self.len()
        );
        Ok(registered)
    }

    /// Returns a copy of the attribute at `handle`.
    pub fn get(&self, handle: u16) -> Option<Attribute> {
        self.attributes.read().unwrap().get(&handle).cloned()
    }

    /// All attributes in `[start, end]`, ascending by handle.
    pub fn range(&self, start: u16, end: u16) -> Vec<Attribute> {
        if start > end {
            return Vec::new();
        }
        self.attributes
            .read()
            .unwrap()
            .range(start..=end)
            .map(|(_, attr)| attr.clone())
            .collect()
    }

    /// Attributes in range whose type UUID matches, ascending by handle.
    pub fn find_by_type(&self, start: u16, end: u16, type_uuid: &Uuid) -> Vec<Attribute> {
        if start > end {
            return Vec::new();
        }
        self.attributes
            .read()
            .unwrap()
            .range(start..=end)
            .filter(|(_, attr)| attr.type_uuid == *type_uuid)
            .map(|(_, attr)| attr.clone())
            .collect()
    }

    /// Attributes in range matching type UUID and exact value bytes.
    pub fn find_by_type_value(
        &self,
        start: u16,
        end: u16,
        type_uuid: &Uuid,
        value: &[u8],
    ) -> Vec<Attribute> {
        if start > end {
            return Vec::new();
        }
        self.attributes
            .read()
            .unwrap()
            .range(start..=end)
            .filter(|(_, attr)| attr.type_uuid == *type_uuid && attr.value == value)
            .map(|(_, attr)| attr.clone())
            .collect()
    }

    /// Reads an attribute value from `offset`, through the read hook when
    /// one is installed. Permission checks are the caller's responsibility.
    pub fn read_value(&self, conn_handle: u16, handle: u16, offset: u16) -> AttResult<Vec<u8>> {
        let callback = self.read_callbacks.read().unwrap().get(&handle).cloned();
        if let Some(cb) = callback {
            return cb(conn_handle, offset).map_err(AttError::from);
        }

        let attributes = self.attributes.read().unwrap();
        let attr = attributes
            .get(&handle)
            .ok_or(AttError::InvalidHandle(handle))?;

        let offset = offset as usize;
        if offset > 0 && offset >= attr.value.len() {
            return Err(AttError::InvalidOffset(handle));
        }
        Ok(attr.value.get(offset..).unwrap_or(&[]).to_vec())
    }

    /// Writes an attribute value, through the write hook when one is
    /// installed. Permission checks are the caller's responsibility.
    pub fn write_value(&self, conn_handle: u16, handle: u16, value: &[u8]) -> AttResult<()> {
        let callback = self.write_callbacks.read().unwrap().get(&handle).cloned();
        if let Some(cb) = callback {
            return cb(conn_handle, value).map_err(AttError::from);
        }

        let mut attributes = self.attributes.write().unwrap();
        let attr = attributes
            .get_mut(&handle)
            .ok_or(AttError::InvalidHandle(handle))?;
        attr.value = value.to_vec();
        Ok(())
    }

    /// Replaces the static value of a characteristic value row.
    pub fn set_characteristic_value(&self, value_handle: u16, value: &[u8]) -> Result<(), Error> {
        let mut attributes = self.attributes.write().unwrap();
        let attr = attributes
            .get_mut(&value_handle)
            .ok_or(Error::UnknownHandle(value_handle))?;

        if attr.kind != AttributeKind::CharacteristicValue {
            warn!("handle {} is not a characteristic value", value_handle);
            return Err(Error::InvalidParameter(format!(
                "handle {} is not a characteristic value",
                value_handle
            )));
        }

        attr.value = value.to_vec();
        Ok(())
    }

    /// Returns the static value of a characteristic value row.
    pub fn get_characteristic_value(&self, value_handle: u16) -> Result<Vec<u8>, Error> {
        let attributes = self.attributes.read().unwrap();
        let attr = attributes
            .get(&value_handle)
            .ok_or(Error::UnknownHandle(value_handle))?;

        if attr.kind != AttributeKind::CharacteristicValue {
            return Err(Error::InvalidParameter(format!(
                "handle {} is not a characteristic value",
                value_handle
            )));
        }

        Ok(attr.value.clone())
    }

    /// Installs a read hook on an existing attribute.
    pub fn set_read_callback(&self, handle: u16, callback: ReadCallback) -> Result<(), Error> {
        if !self.attributes.read().unwrap().contains_key(&handle) {
            return Err(Error::UnknownHandle(handle));
        }
        self.read_callbacks.write().unwrap().insert(handle, callback);
        Ok(())
    }

    /// Installs a write hook on an existing attribute.
    pub fn set_write_callback(&self, handle: u16, callback: WriteCallback) -> Result<(), Error> {
        if !self.attributes.read().unwrap().contains_key(&handle) {
            return Err(Error::UnknownHandle(handle));
        }
        self.write_callbacks.write().unwrap().insert(handle, callback);
        Ok(())
    }

    /// Number of attribute rows.
    pub fn len(&self) -> usize {
        self.attributes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.read().unwrap().is_empty()
    }

    /// The next handle the allocator would hand out.
    pub fn next_handle(&self) -> u16 {
        *self.next_handle.read().unwrap()
    }

    /// A copy of every row in handle order, for transports that register
    /// the flattened table with an integrated stack.
    pub fn all(&self) -> Vec<Attribute> {
        self.attributes.read().unwrap().values().cloned().collect()
    }

    /// Removes every attribute, hook and service group.
    pub fn clear(&self) {
        self.attributes.write().unwrap().clear();
        self.read_callbacks.write().unwrap().clear();
        self.write_callbacks.write().unwrap().clear();
        self.services.write().unwrap().clear();
        *self.next_handle.write().unwrap() = ATT_HANDLE_MIN;
    }
}
