//! ATT server round-trip tests with literal PDU bytes

use super::constants::*;
use super::database::AttributeDatabase;
use super::permissions::AttPermissions;
use super::server::AttServer;
use crate::gap::types::{AddressType, BdAddr};
use crate::gatt::connection::ConnectionTable;
use crate::gatt::types::{CharacteristicProperties, PROP_NOTIFY, PROP_READ, PROP_WRITE};
use crate::uuid::Uuid;
use std::sync::Arc;

const CONN: u16 = 1;

/// Battery service at handle 1: declaration, Battery Level characteristic
/// (decl 2, value 3, CCCD 4), value 100%.
fn battery_server() -> (AttServer, Arc<AttributeDatabase>, Arc<ConnectionTable>) {
    let db = Arc::new(AttributeDatabase::new());
    let connections = Arc::new(ConnectionTable::new());
    connections.insert(CONN, BdAddr::default(), AddressType::Public);

    let service = db.add_primary_service(&Uuid::from_u16(0x180F)).unwrap();
    assert_eq!(service, 1);
    let decl = db
        .add_characteristic(
            service,
            &Uuid::from_u16(0x2A19),
            CharacteristicProperties(PROP_READ | PROP_NOTIFY),
            AttPermissions::read_only(),
        )
        .unwrap();
    assert_eq!(decl, 2);
    db.set_characteristic_value(3, &[0x64]).unwrap();

    let server = AttServer::new(db.clone(), connections.clone());
    (server, db, connections)
}

#[test]
fn mtu_exchange_replies_with_server_mtu() {
    let (server, _db, connections) = battery_server();

    let response = server.handle_pdu(CONN, &[0x02, 0x17, 0x00]).unwrap();
    assert_eq!(response, vec![0x03, 0x05, 0x02]); // server MTU 517

    // min(23, 517) leaves the connection at the default
    assert_eq!(connections.mtu(CONN), Some(23));
}

#[test]
fn mtu_below_minimum_is_clamped() {
    let (server, _db, connections) = battery_server();

    let response = server.handle_pdu(CONN, &[0x02, 0x05, 0x00]).unwrap();
    assert_eq!(response[0], ATT_EXCHANGE_MTU_RSP);
    assert_eq!(connections.mtu(CONN), Some(23));
}

#[test]
fn discover_primary_services() {
    let (server, _db, _connections) = battery_server();

    let response = server
        .handle_pdu(CONN, &[0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28])
        .unwrap();
    assert_eq!(
        response,
        vec![0x11, 0x06, 0x01, 0x00, 0x04, 0x00, 0x0F, 0x18]
    );
}

#[test]
fn discovery_advances_past_mixed_width_groups() {
    let (server, db, _connections) = battery_server();

    // A second service with a 128-bit UUID: handles 5 (decl), 6/7 (char)
    let uuid128 = Uuid::from_bytes_le([0xAB; 16]);
    let svc2 = db.add_primary_service(&uuid128).unwrap();
    assert_eq!(svc2, 5);
    db.add_characteristic(
        svc2,
        &Uuid::from_bytes_le([0xCD; 16]),
        CharacteristicProperties(PROP_READ),
        AttPermissions::read_only(),
    )
    .unwrap();

    // First request: entries are uniform, so only the 16-bit group comes back
    let response = server
        .handle_pdu(CONN, &[0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28])
        .unwrap();
    assert_eq!(response[1], 6);
    assert_eq!(&response[2..8], &[0x01, 0x00, 0x04, 0x00, 0x0F, 0x18]);
    assert_eq!(response.len(), 8);

    // The client advances past the returned group end and gets the next one
    let response = server
        .handle_pdu(CONN, &[0x10, 0x05, 0x00, 0xFF, 0xFF, 0x00, 0x28])
        .unwrap();
    assert_eq!(response[0], 0x11);
    assert_eq!(response[1], 20);
    assert_eq!(&response[2..6], &[0x05, 0x00, 0x07, 0x00]);
    assert_eq!(&response[6..22], &[0xAB; 16]);

    // Advancing past the last group ends discovery
    let response = server
        .handle_pdu(CONN, &[0x10, 0x08, 0x00, 0xFF, 0xFF, 0x00, 0x28])
        .unwrap();
    assert_eq!(response, vec![0x01, 0x10, 0x08, 0x00, 0x0A]);
}

#[test]
fn unsupported_group_type_is_rejected() {
    let (server, _db, _connections) = battery_server();

    // 0x2803 is not a grouping type
    let response = server
        .handle_pdu(CONN, &[0x10, 0x01, 0x00, 0xFF, 0xFF, 0x03, 0x28])
        .unwrap();
    assert_eq!(response, vec![0x01, 0x10, 0x01, 0x00, 0x10]);
}

#[test]
fn read_returns_value() {
    let (server, _db, _connections) = battery_server();

    let response = server.handle_pdu(CONN, &[0x0A, 0x03, 0x00]).unwrap();
    assert_eq!(response, vec![0x0B, 0x64]);
}

#[test]
fn read_unknown_handle_fails() {
    let (server, _db, _connections) = battery_server();

    let response = server.handle_pdu(CONN, &[0x0A, 0x20, 0x00]).unwrap();
    assert_eq!(response, vec![0x01, 0x0A, 0x20, 0x00, 0x01]);
}

#[test]
fn long_value_truncates_to_mtu_and_blob_continues() {
    let (server, db, _connections) = battery_server();

    let long: Vec<u8> = (0..30).collect();
    db.set_characteristic_value(3, &long).unwrap();

    // MTU is 23, so a read returns the first 22 bytes
    let response = server.handle_pdu(CONN, &[0x0A, 0x03, 0x00]).unwrap();
    assert_eq!(response[0], ATT_READ_RSP);
    assert_eq!(&response[1..], &long[..22]);

    // Read Blob picks up from the offset
    let response = server.handle_pdu(CONN, &[0x0C, 0x03, 0x00, 22, 0x00]).unwrap();
    assert_eq!(response[0], ATT_READ_BLOB_RSP);
    assert_eq!(&response[1..], &long[22..]);
}

#[test]
fn read_blob_at_value_length_is_invalid_offset() {
    let (server, _db, _connections) = battery_server();

    // Value is one byte; offset 1 == len
    let response = server.handle_pdu(CONN, &[0x0C, 0x03, 0x00, 0x01, 0x00]).unwrap();
    assert_eq!(response, vec![0x01, 0x0C, 0x03, 0x00, 0x07]);
}

#[test]
fn find_information_lists_all_types() {
    let (server, _db, _connections) = battery_server();

    let response = server.handle_pdu(CONN, &[0x04, 0x01, 0x00, 0xFF, 0xFF]).unwrap();
    assert_eq!(response[0], 0x05);
    assert_eq!(response[1], ATT_FIND_INFO_RSP_FORMAT_16BIT);
    assert_eq!(
        &response[2..],
        &[
            0x01, 0x00, 0x00, 0x28, // primary service
            0x02, 0x00, 0x03, 0x28, // characteristic declaration
            0x03, 0x00, 0x19, 0x2A, // battery level value
            0x04, 0x00, 0x02, 0x29, // CCCD
        ]
    );
}

#[test]
fn find_by_type_value_returns_group_range() {
    let (server, _db, _connections) = battery_server();

    let mut pdu = vec![0x06, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28];
    pdu.extend_from_slice(&[0x0F, 0x18]);
    let response = server.handle_pdu(CONN, &pdu).unwrap();
    assert_eq!(response, vec![0x07, 0x01, 0x00, 0x04, 0x00]);
}

#[test]
fn read_by_type_finds_characteristic_value() {
    let (server, _db, _connections) = battery_server();

    let response = server
        .handle_pdu(CONN, &[0x08, 0x01, 0x00, 0xFF, 0xFF, 0x19, 0x2A])
        .unwrap();
    assert_eq!(response, vec![0x09, 0x03, 0x03, 0x00, 0x64]);
}

#[test]
fn write_request_updates_value() {
    let (server, db, _connections) = battery_server();

    // A writable characteristic at handles 6/7
    let svc2 = db.add_primary_service(&Uuid::from_u16(0x1815)).unwrap();
    db.add_characteristic(
        svc2,
        &Uuid::from_u16(0x2A56),
        CharacteristicProperties(PROP_READ | PROP_WRITE),
        AttPermissions::read_write(),
    )
    .unwrap();
    let value_handle = 7u16;

    let response = server.handle_pdu(CONN, &[0x12, 0x07, 0x00, 0xAA, 0xBB]).unwrap();
    assert_eq!(response, vec![0x13]);
    assert_eq!(db.get_characteristic_value(value_handle).unwrap(), vec![0xAA, 0xBB]);
}

#[test]
fn write_without_permission_is_rejected() {
    let (server, _db, _connections) = battery_server();

    // Battery level is read-only
    let response = server.handle_pdu(CONN, &[0x12, 0x03, 0x00, 0x00]).unwrap();
    assert_eq!(response, vec![0x01, 0x12, 0x03, 0x00, 0x03]);
}

#[test]
fn cccd_write_enables_notifications() {
    let (server, _db, connections) = battery_server();

    let response = server.handle_pdu(CONN, &[0x12, 0x04, 0x00, 0x01, 0x00]).unwrap();
    assert_eq!(response, vec![0x13]);
    assert_eq!(connections.subscription(CONN, 3), 0x0001);

    // 02 00 switches to indications, 00 00 disables
    server.handle_pdu(CONN, &[0x12, 0x04, 0x00, 0x02, 0x00]).unwrap();
    assert_eq!(connections.subscription(CONN, 3), 0x0002);
    server.handle_pdu(CONN, &[0x12, 0x04, 0x00, 0x00, 0x00]).unwrap();
    assert_eq!(connections.subscription(CONN, 3), 0x0000);
}

#[test]
fn cccd_write_must_be_two_bytes() {
    let (server, _db, _connections) = battery_server();

    let response = server.handle_pdu(CONN, &[0x12, 0x04, 0x00, 0x01]).unwrap();
    assert_eq!(response, vec![0x01, 0x12, 0x04, 0x00, 0x0D]);
}

#[test]
fn write_command_is_silent_either_way() {
    let (server, db, _connections) = battery_server();

    let svc2 = db.add_primary_service(&Uuid::from_u16(0x1815)).unwrap();
    db.add_characteristic(
        svc2,
        &Uuid::from_u16(0x2A56),
        CharacteristicProperties(PROP_WRITE),
        AttPermissions::write_only(),
    )
    .unwrap();

    assert!(server.handle_pdu(CONN, &[0x52, 0x07, 0x00, 0x5A]).is_none());
    assert_eq!(db.get_characteristic_value(7).unwrap(), vec![0x5A]);

    // Failing write commands are silent too
    assert!(server.handle_pdu(CONN, &[0x52, 0x03, 0x00, 0x5A]).is_none());
    assert!(server.handle_pdu(CONN, &[0x52, 0x99, 0x00, 0x5A]).is_none());
}

#[test]
fn short_pdus_are_invalid_not_fatal() {
    let (server, _db, _connections) = battery_server();

    for opcode in [0x02u8, 0x04, 0x06, 0x08, 0x0A, 0x0C, 0x10, 0x12] {
        let response = server.handle_pdu(CONN, &[opcode]).unwrap();
        assert_eq!(response[0], ATT_ERROR_RSP);
        assert_eq!(response[1], opcode);
        assert_eq!(response[4], ATT_ERROR_INVALID_PDU, "opcode 0x{:02X}", opcode);
    }

    assert!(server.handle_pdu(CONN, &[]).is_none());
}

#[test]
fn reserved_write_queue_opcodes_are_unsupported() {
    let (server, _db, _connections) = battery_server();

    let response = server
        .handle_pdu(CONN, &[0x16, 0x03, 0x00, 0x00, 0x00, 0xAA])
        .unwrap();
    assert_eq!(response, vec![0x01, 0x16, 0x00, 0x00, 0x06]);

    let response = server.handle_pdu(CONN, &[0x18, 0x01]).unwrap();
    assert_eq!(response, vec![0x01, 0x18, 0x00, 0x00, 0x06]);
}

#[test]
fn unknown_opcode_gets_error_response() {
    let (server, _db, _connections) = battery_server();

    let response = server.handle_pdu(CONN, &[0x77, 0x01, 0x02]).unwrap();
    assert_eq!(response, vec![0x01, 0x77, 0x00, 0x00, 0x06]);
}

#[test]
fn signed_write_and_confirmation_produce_no_response() {
    let (server, _db, _connections) = battery_server();

    assert!(server.handle_pdu(CONN, &[0xD2, 0x03, 0x00, 0x01]).is_none());
    assert!(server.handle_pdu(CONN, &[0x1E]).is_none());
}

#[test]
fn invalid_handle_ranges_are_rejected() {
    let (server, _db, _connections) = battery_server();

    // start of zero
    let response = server.handle_pdu(CONN, &[0x04, 0x00, 0x00, 0xFF, 0xFF]).unwrap();
    assert_eq!(response, vec![0x01, 0x04, 0x00, 0x00, 0x01]);

    // start past end
    let response = server
        .handle_pdu(CONN, &[0x10, 0x05, 0x00, 0x01, 0x00, 0x00, 0x28])
        .unwrap();
    assert_eq!(response, vec![0x01, 0x10, 0x05, 0x00, 0x01]);
}

#[test]
fn read_hook_result_is_propagated() {
    let (server, db, _connections) = battery_server();

    db.set_read_callback(
        3,
        Arc::new(|_conn, offset| {
            if offset > 0 {
                return Err(crate::att::AttErrorCode::InvalidOffset);
            }
            Ok(vec![0x2A])
        }),
    )
    .unwrap();

    let response = server.handle_pdu(CONN, &[0x0A, 0x03, 0x00]).unwrap();
    assert_eq!(response, vec![0x0B, 0x2A]);
}

#[test]
fn write_hook_error_code_is_verbatim() {
    let (server, db, _connections) = battery_server();

    let svc2 = db.add_primary_service(&Uuid::from_u16(0x1815)).unwrap();
    db.add_characteristic(
        svc2,
        &Uuid::from_u16(0x2A56),
        CharacteristicProperties(PROP_WRITE),
        AttPermissions::write_only(),
    )
    .unwrap();
    db.set_write_callback(
        7,
        Arc::new(|_conn, _value| Err(crate::att::AttErrorCode::ApplicationError(0x80))),
    )
    .unwrap();

    let response = server.handle_pdu(CONN, &[0x12, 0x07, 0x00, 0x01]).unwrap();
    assert_eq!(response, vec![0x01, 0x12, 0x07, 0x00, 0x80]);
}
