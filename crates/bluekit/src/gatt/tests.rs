//! GATT registration invariants and server-initiated frame tests

use super::server::GattServer;
use super::service::{read_only_service, CharacteristicDef, DescriptorDef, ServiceDef};
use super::types::*;
use crate::att::constants::{CHARACTERISTIC_UUID, CLIENT_CHAR_CONFIG_UUID, PRIMARY_SERVICE_UUID};
use crate::att::database::{AttributeDatabase, AttributeKind};
use crate::att::permissions::{AttPermissions, ATT_PERM_READ, ATT_PERM_READ_ENCRYPT, ATT_PERM_WRITE};
use crate::error::Error;
use crate::gap::types::{AddressType, BdAddr};
use crate::transport::{AdvertisingParams, Transport, TransportEvents};
use crate::uuid::Uuid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Transport that records sends and lets tests inject inbound events.
#[derive(Default)]
struct MockTransport {
    sent: Mutex<Vec<(u16, Vec<u8>)>>,
    handler: RwLock<Option<Arc<dyn TransportEvents>>>,
    advertising: AtomicBool,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn handler(&self) -> Arc<dyn TransportEvents> {
        self.handler.read().unwrap().clone().expect("no handler registered")
    }

    fn connect(&self, conn_handle: u16) {
        self.handler()
            .connected(conn_handle, BdAddr::new([1, 2, 3, 4, 5, 6]), AddressType::Public);
    }

    fn deliver(&self, conn_handle: u16, pdu: &[u8]) {
        self.handler().data_received(conn_handle, pdu);
    }

    fn last_sent(&self) -> Option<(u16, Vec<u8>)> {
        self.sent.lock().unwrap().last().cloned()
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transport for MockTransport {
    fn start_advertising(&self, _params: &AdvertisingParams) -> Result<(), Error> {
        self.advertising.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), Error> {
        self.advertising.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    fn send_pdu(&self, conn_handle: u16, data: &[u8]) -> Result<usize, Error> {
        self.sent.lock().unwrap().push((conn_handle, data.to_vec()));
        Ok(data.len())
    }

    fn disconnect(&self, conn_handle: u16) -> Result<(), Error> {
        self.handler().disconnected(conn_handle);
        Ok(())
    }

    fn set_mtu(&self, _conn_handle: u16, _mtu: u16) -> Result<(), Error> {
        Ok(())
    }

    fn get_mtu(&self, _conn_handle: u16) -> u16 {
        23
    }

    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>) {
        *self.handler.write().unwrap() = Some(handler);
    }
}

fn battery_service_def() -> ServiceDef {
    ServiceDef::primary(Uuid::from_u16(0x180F))
        .add_notify_characteristic(Uuid::from_u16(0x2A19), None)
}

// Database invariants

#[test]
fn registration_allocates_expected_handles() {
    let db = AttributeDatabase::new();
    let registered = db.register_services(&[battery_service_def()]).unwrap();

    assert_eq!(registered.len(), 1);
    let service = &registered[0];
    assert_eq!(service.handle, 1);

    let chr = &service.characteristics[0];
    assert_eq!(chr.declaration_handle, 2);
    assert_eq!(chr.value_handle, 3);
    assert_eq!(chr.cccd_handle, Some(4));
}

#[test]
fn value_handle_is_declaration_plus_one() {
    let db = AttributeDatabase::new();
    db.register_services(&[
        battery_service_def(),
        ServiceDef::primary(Uuid::from_u16(0x180A))
            .add_read_characteristic(Uuid::from_u16(0x2A29), None)
            .add_read_characteristic(Uuid::from_u16(0x2A24), None),
    ])
    .unwrap();

    for attr in db.all() {
        if attr.kind == AttributeKind::CharacteristicDecl {
            let value = db.get(attr.value_handle).unwrap();
            assert_eq!(attr.value_handle, attr.handle + 1);
            assert_eq!(value.kind, AttributeKind::CharacteristicValue);
        }
    }
}

#[test]
fn notifying_characteristic_owns_exactly_one_cccd() {
    let db = AttributeDatabase::new();
    db.register_services(&[battery_service_def()]).unwrap();

    let service = db.get(1).unwrap();
    let cccds: Vec<_> = db
        .range(1, service.end_group_handle)
        .into_iter()
        .filter(|attr| attr.type_uuid == Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID))
        .collect();

    assert_eq!(cccds.len(), 1);
    let cccd = &cccds[0];
    assert_eq!(cccd.handle, 4);
    assert_eq!(cccd.value, vec![0x00, 0x00]);
    assert!(cccd.permissions.can_read());
    assert!(cccd.permissions.can_write());
}

#[test]
fn read_only_characteristic_gets_no_cccd() {
    let db = AttributeDatabase::new();
    db.register_services(&[ServiceDef::primary(Uuid::from_u16(0x180A))
        .add_read_characteristic(Uuid::from_u16(0x2A29), None)])
        .unwrap();

    assert!(db
        .all()
        .iter()
        .all(|attr| attr.type_uuid != Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID)));
}

#[test]
fn service_groups_do_not_interleave() {
    let db = AttributeDatabase::new();
    db.register_services(&[battery_service_def(), battery_service_def()]).unwrap();

    let first = db.get(1).unwrap();
    let second = db.get(first.end_group_handle + 1).unwrap();
    assert_eq!(first.end_group_handle, 4);
    assert_eq!(second.handle, 5);
    assert_eq!(second.kind, AttributeKind::PrimaryService);
    assert_eq!(second.end_group_handle, 8);

    // Every handle inside a group belongs to that service's rows
    for attr in db.range(2, first.end_group_handle) {
        assert_ne!(attr.kind, AttributeKind::PrimaryService);
    }
}

#[test]
fn handles_strictly_increase_across_adds() {
    let db = AttributeDatabase::new();
    let mut last = 0;
    for uuid in [0x1800u16, 0x1801, 0x180F, 0x1815] {
        let handle = db.add_primary_service(&Uuid::from_u16(uuid)).unwrap();
        assert!(handle > last);
        last = handle;
        let decl = db
            .add_characteristic(
                handle,
                &Uuid::from_u16(0x2A00),
                CharacteristicProperties(PROP_READ),
                AttPermissions::read_only(),
            )
            .unwrap();
        assert!(decl > last);
        last = decl + 1;
    }
}

#[test]
fn manual_cccd_registration_is_rejected() {
    let db = AttributeDatabase::new();
    let service = db.add_primary_service(&Uuid::from_u16(0x180F)).unwrap();
    db.add_characteristic(
        service,
        &Uuid::from_u16(0x2A19),
        CharacteristicProperties(PROP_READ | PROP_NOTIFY),
        AttPermissions::read_only(),
    )
    .unwrap();

    assert!(matches!(
        db.add_descriptor(3, &Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID), AttPermissions::read_write()),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn descriptor_extends_owning_service_group() {
    let db = AttributeDatabase::new();
    let service = db.add_primary_service(&Uuid::from_u16(0x180F)).unwrap();
    db.add_characteristic(
        service,
        &Uuid::from_u16(0x2A19),
        CharacteristicProperties(PROP_READ),
        AttPermissions::read_only(),
    )
    .unwrap();

    let dsc = db
        .add_descriptor(3, &Uuid::from_u16(0x2901), AttPermissions::read_only())
        .unwrap();
    assert_eq!(dsc, 4);
    assert_eq!(db.get(service).unwrap().end_group_handle, 4);
}

#[test]
fn include_records_target_range_and_short_uuid() {
    let db = AttributeDatabase::new();
    let target = db.add_primary_service(&Uuid::from_u16(0x180F)).unwrap();
    db.add_characteristic(
        target,
        &Uuid::from_u16(0x2A19),
        CharacteristicProperties(PROP_READ),
        AttPermissions::read_only(),
    )
    .unwrap();

    let service = db.add_primary_service(&Uuid::from_u16(0x1800)).unwrap();
    let include = db.add_include(service, target).unwrap();

    let attr = db.get(include).unwrap();
    assert_eq!(attr.kind, AttributeKind::Include);
    assert_eq!(attr.value, vec![0x01, 0x00, 0x03, 0x00, 0x0F, 0x18]);

    assert!(matches!(
        db.add_include(service, 0x0099),
        Err(Error::UnknownHandle(0x0099))
    ));
}

#[test]
fn registration_yields_gatt_type_uuids() {
    let db = AttributeDatabase::new();
    db.register_services(&[battery_service_def()]).unwrap();

    let attrs = db.all();
    assert_eq!(attrs[0].type_uuid, Uuid::from_u16(PRIMARY_SERVICE_UUID));
    assert_eq!(attrs[1].type_uuid, Uuid::from_u16(CHARACTERISTIC_UUID));
    assert_eq!(attrs[2].type_uuid, Uuid::from_u16(0x2A19));
    assert_eq!(attrs[3].type_uuid, Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID));

    // Declaration value: properties, value handle, characteristic UUID
    assert_eq!(attrs[1].value, vec![PROP_READ | PROP_NOTIFY, 0x03, 0x00, 0x19, 0x2A]);
}

#[test]
fn clear_resets_allocation() {
    let db = AttributeDatabase::new();
    db.register_services(&[battery_service_def()]).unwrap();
    assert_eq!(db.len(), 4);

    db.clear();
    assert!(db.is_empty());
    assert_eq!(db.add_primary_service(&Uuid::from_u16(0x1800)).unwrap(), 1);
}

#[test]
fn handle_space_exhaustion_is_reported() {
    let db = AttributeDatabase::new();
    loop {
        match db.add_primary_service(&Uuid::from_u16(0x1800)) {
            Ok(_) => {}
            Err(Error::HandleSpaceExhausted) => break,
            Err(err) => panic!("unexpected error: {}", err),
        }
    }
    // 0xFFFF stays reserved as the range upper bound
    assert_eq!(db.len(), 0xFFFE);
    assert!(matches!(
        db.add_primary_service(&Uuid::from_u16(0x1800)),
        Err(Error::HandleSpaceExhausted)
    ));
}

// Flag word mapping

#[test]
fn flag_word_splits_into_properties_and_permissions() {
    let flags = CharacteristicFlags(
        CHR_F_READ | CHR_F_WRITE | CHR_F_NOTIFY | CHR_F_READ_ENC | CHR_F_WRITE_AUTHEN,
    );

    let props = flags.to_properties();
    assert_eq!(props.0, PROP_READ | PROP_WRITE | PROP_NOTIFY);

    let perms = flags.to_permissions();
    assert!(perms.can_read());
    assert!(perms.can_write());
    assert!(perms.read_requires_encryption());
    assert!(perms.write_requires_authentication());
    assert!(!perms.read_requires_authorization());
}

#[test]
fn write_no_rsp_flag_grants_write_permission() {
    let flags = CharacteristicFlags(CHR_F_WRITE_NO_RSP);
    assert_eq!(flags.to_properties().0, PROP_WRITE_NO_RSP);
    assert!(flags.to_permissions().can_write());
    assert!(!flags.to_permissions().can_read());
}

#[test]
fn authorization_flags_map_to_permission_bits() {
    let flags = CharacteristicFlags(CHR_F_READ | CHR_F_READ_AUTHOR | CHR_F_WRITE | CHR_F_WRITE_AUTHOR);
    let perms = flags.to_permissions();
    assert!(perms.read_requires_authorization());
    assert!(perms.write_requires_authorization());
}

// Notify / indicate over a mock transport

fn served_battery(transport: &Arc<MockTransport>) -> Arc<GattServer> {
    let server = GattServer::new(transport.clone());
    server.register_services(&[battery_service_def()]).unwrap();
    transport.connect(1);
    server
}

#[test]
fn notify_requires_subscription() {
    let transport = MockTransport::new();
    let server = served_battery(&transport);

    assert!(matches!(
        server.notify(1, 3, &[0x5A]),
        Err(Error::NotSubscribed { conn_handle: 1, handle: 3 })
    ));

    // Peer enables notifications through a CCCD write
    transport.deliver(1, &[0x12, 0x04, 0x00, 0x01, 0x00]);
    assert_eq!(transport.last_sent().unwrap().1, vec![0x13]);

    let sent = server.notify(1, 3, &[0x5A]).unwrap();
    assert_eq!(sent, 4);
    assert_eq!(transport.last_sent().unwrap().1, vec![0x1B, 0x03, 0x00, 0x5A]);
}

#[test]
fn notify_payload_truncates_to_mtu() {
    let transport = MockTransport::new();
    let server = served_battery(&transport);
    transport.deliver(1, &[0x12, 0x04, 0x00, 0x01, 0x00]);

    let long: Vec<u8> = (0..64).collect();
    server.notify(1, 3, &long).unwrap();
    let (_, pdu) = transport.last_sent().unwrap();
    // MTU 23: opcode + handle + 20 value bytes
    assert_eq!(pdu.len(), 23);
    assert_eq!(&pdu[3..], &long[..20]);
}

#[test]
fn only_one_indication_outstanding_per_connection() {
    let transport = MockTransport::new();
    let server = served_battery(&transport);

    transport.deliver(1, &[0x12, 0x04, 0x00, 0x02, 0x00]);
    server.indicate(1, 3, &[0x01]).unwrap();
    assert_eq!(transport.last_sent().unwrap().1, vec![0x1D, 0x03, 0x00, 0x01]);

    assert!(matches!(
        server.indicate(1, 3, &[0x02]),
        Err(Error::IndicationPending(1))
    ));

    // The confirmation releases the slot
    transport.deliver(1, &[0x1E]);
    server.indicate(1, 3, &[0x02]).unwrap();
    assert_eq!(transport.last_sent().unwrap().1, vec![0x1D, 0x03, 0x00, 0x02]);
}

#[test]
fn indicate_requires_indication_bit() {
    let transport = MockTransport::new();
    let server = served_battery(&transport);

    // Notifications only
    transport.deliver(1, &[0x12, 0x04, 0x00, 0x01, 0x00]);
    assert!(matches!(
        server.indicate(1, 3, &[0x01]),
        Err(Error::NotSubscribed { .. })
    ));
}

#[test]
fn disconnect_discards_subscriptions() {
    let transport = MockTransport::new();
    let server = served_battery(&transport);
    transport.deliver(1, &[0x12, 0x04, 0x00, 0x01, 0x00]);

    transport.handler().disconnected(1);
    assert!(matches!(server.notify(1, 3, &[0x00]), Err(Error::NotConnected(1))));

    // Reconnecting starts with a clean subscription map
    transport.connect(1);
    assert!(matches!(server.notify(1, 3, &[0x00]), Err(Error::NotSubscribed { .. })));
}

#[test]
fn mtu_exchange_fires_callback_and_raises_limit() {
    let transport = MockTransport::new();
    let server = served_battery(&transport);

    let seen = Arc::new(Mutex::new(None));
    let seen_cb = seen.clone();
    server.on_mtu_exchanged(move |conn, mtu| {
        *seen_cb.lock().unwrap() = Some((conn, mtu));
    });

    transport.deliver(1, &[0x02, 0xB9, 0x00]); // client offers 185
    assert_eq!(*seen.lock().unwrap(), Some((1, 185)));
    assert_eq!(server.connection(1).unwrap().mtu, 185);
}

#[test]
fn connection_callbacks_fire() {
    let transport = MockTransport::new();
    let server = GattServer::new(transport.clone());

    let events = Arc::new(Mutex::new(Vec::new()));
    let connected_events = events.clone();
    server.on_connected(move |conn, addr| {
        connected_events.lock().unwrap().push(format!("up {} {}", conn, addr));
    });
    let disconnected_events = events.clone();
    server.on_disconnected(move |conn| {
        disconnected_events.lock().unwrap().push(format!("down {}", conn));
    });

    transport.connect(9);
    server.disconnect(9).unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events[0], "up 9 06:05:04:03:02:01");
    assert_eq!(events[1], "down 9");
}

#[test]
fn advertising_round_trip_with_restart() {
    let transport = MockTransport::new();
    let server = GattServer::new(transport.clone());

    assert!(matches!(server.restart_advertising(), Err(Error::InvalidParameter(_))));

    server
        .start_advertising(AdvertisingParams {
            device_name: "bk-test".into(),
            ..AdvertisingParams::default()
        })
        .unwrap();
    assert!(server.is_advertising());

    server.stop_advertising().unwrap();
    assert!(!server.is_advertising());

    server.restart_advertising().unwrap();
    assert!(server.is_advertising());
}

#[test]
fn read_only_service_helper_serves_fixed_value() {
    let transport = MockTransport::new();
    let server = GattServer::new(transport.clone());
    server
        .register_services(&[read_only_service(
            Uuid::from_u16(0x180A),
            Uuid::from_u16(0x2A29),
            b"bluekit".to_vec(),
        )])
        .unwrap();
    transport.connect(1);

    transport.deliver(1, &[0x0A, 0x03, 0x00]);
    let (_, pdu) = transport.last_sent().unwrap();
    assert_eq!(pdu[0], 0x0B);
    assert_eq!(&pdu[1..], b"bluekit");
}

#[test]
fn descriptor_definitions_register_with_access() {
    let chr = CharacteristicDef::new(Uuid::from_u16(0x2A6E), CharacteristicFlags::READ)
        .with_descriptor(DescriptorDef::new(
            Uuid::from_u16(0x2901),
            AttPermissions::new(ATT_PERM_READ),
        ));
    let mut def = ServiceDef::primary(Uuid::from_u16(0x181A));
    def.characteristics.push(chr);

    let db = AttributeDatabase::new();
    let registered = db.register_services(&[def]).unwrap();

    let chr = &registered[0].characteristics[0];
    assert_eq!(chr.descriptor_handles, vec![4]);
    let dsc = db.get(4).unwrap();
    assert_eq!(dsc.kind, AttributeKind::Descriptor);
    assert_eq!(dsc.type_uuid, Uuid::from_u16(0x2901));
}

#[test]
fn encrypted_permissions_survive_registration() {
    let db = AttributeDatabase::new();
    db.register_services(&[ServiceDef::primary(Uuid::from_u16(0x1810)).add_characteristic(
        Uuid::from_u16(0x2A35),
        CharacteristicFlags(CHR_F_READ | CHR_F_READ_ENC | CHR_F_WRITE),
        None,
    )])
    .unwrap();

    let value = db.get(3).unwrap();
    assert_eq!(
        value.permissions.value(),
        ATT_PERM_READ | ATT_PERM_READ_ENCRYPT | ATT_PERM_WRITE
    );
}
