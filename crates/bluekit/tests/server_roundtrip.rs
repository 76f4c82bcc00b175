//! End-to-end GATT server scenario over a mock transport
//!
//! Drives the public API the way a link backend would: connect, exchange
//! MTU, discover services, read a value, subscribe, receive a notification,
//! then disconnect.

use bluekit::error::Error;
use bluekit::gatt::{AccessOp, GattServer, ServiceDef};
use bluekit::transport::{AdvertisingParams, Transport, TransportEvents};
use bluekit::{AddressType, BdAddr, Uuid};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Default)]
struct LoopbackTransport {
    sent: Mutex<Vec<(u16, Vec<u8>)>>,
    handler: RwLock<Option<Arc<dyn TransportEvents>>>,
    advertising: AtomicBool,
}

impl LoopbackTransport {
    fn handler(&self) -> Arc<dyn TransportEvents> {
        self.handler.read().unwrap().clone().expect("handler not registered")
    }

    /// Sends a request and returns the server's next outbound PDU.
    fn request(&self, conn: u16, pdu: &[u8]) -> Vec<u8> {
        let before = self.sent.lock().unwrap().len();
        self.handler().data_received(conn, pdu);
        let sent = self.sent.lock().unwrap();
        assert!(sent.len() > before, "no response to {:02X?}", pdu);
        sent.last().unwrap().1.clone()
    }
}

impl Transport for LoopbackTransport {
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

#[test]
fn full_server_session() {
    let transport = Arc::new(LoopbackTransport::default());
    let server = GattServer::new(transport.clone());

    // Battery service with a level that reads through a hook
    let level = Arc::new(Mutex::new(100u8));
    let hook_level = level.clone();
    let services = vec![ServiceDef::primary(Uuid::from_u16(0x180F))
        .add_notify_characteristic(
            Uuid::from_u16(0x2A19),
            Some(Arc::new(move |_conn, op, _offset, data| {
                if op == AccessOp::ReadChr {
                    data.push(*hook_level.lock().unwrap());
                }
                Ok(())
            })),
        )];

    let registered = server.register_services(&services).unwrap();
    let battery = &registered[0];
    let value_handle = battery.characteristics[0].value_handle;
    let cccd_handle = battery.characteristics[0].cccd_handle.unwrap();
    assert_eq!((battery.handle, value_handle, cccd_handle), (1, 3, 4));

    server
        .start_advertising(AdvertisingParams {
            device_name: "bk-battery".into(),
            service_uuids: vec![Uuid::from_u16(0x180F)],
            ..AdvertisingParams::default()
        })
        .unwrap();
    assert!(server.is_advertising());

    // Peer connects
    transport
        .handler()
        .connected(1, BdAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]), AddressType::Public);
    assert_eq!(server.connection(1).unwrap().mtu, 23);

    // MTU exchange: client offers 185, server advertises 517
    let rsp = transport.request(1, &[0x02, 0xB9, 0x00]);
    assert_eq!(rsp, vec![0x03, 0x05, 0x02]);
    assert_eq!(server.connection(1).unwrap().mtu, 185);

    // Service discovery finds the battery service
    let rsp = transport.request(1, &[0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28]);
    assert_eq!(rsp, vec![0x11, 0x06, 0x01, 0x00, 0x04, 0x00, 0x0F, 0x18]);

    // Read goes through the hook
    let rsp = transport.request(1, &[0x0A, 0x03, 0x00]);
    assert_eq!(rsp, vec![0x0B, 100]);
    *level.lock().unwrap() = 42;
    let rsp = transport.request(1, &[0x0A, 0x03, 0x00]);
    assert_eq!(rsp, vec![0x0B, 42]);

    // Notify is gated on the CCCD
    assert!(matches!(
        server.notify(1, value_handle, &[0x2A]),
        Err(Error::NotSubscribed { .. })
    ));
    let rsp = transport.request(1, &[0x12, 0x04, 0x00, 0x01, 0x00]);
    assert_eq!(rsp, vec![0x13]);

    server.notify(1, value_handle, &[0x2A]).unwrap();
    assert_eq!(
        transport.sent.lock().unwrap().last().unwrap().1,
        vec![0x1B, 0x03, 0x00, 0x2A]
    );

    // Disconnect tears down per-connection state
    server.disconnect(1).unwrap();
    assert!(server.connection(1).is_none());
    assert!(matches!(
        server.notify(1, value_handle, &[0x00]),
        Err(Error::NotConnected(1))
    ));
}

#[test]
fn connections_keep_independent_state() {
    let transport = Arc::new(LoopbackTransport::default());
    let server = GattServer::new(transport.clone());
    server
        .register_services(&[ServiceDef::primary(Uuid::from_u16(0x180F))
            .add_notify_characteristic(Uuid::from_u16(0x2A19), None)])
        .unwrap();
    server.set_characteristic_value(3, &[50]).unwrap();

    let handler = transport.handler();
    handler.connected(1, BdAddr::new([1; 6]), AddressType::Public);
    handler.connected(2, BdAddr::new([2; 6]), AddressType::Random);

    // Only the first peer raises its MTU and subscribes
    transport.request(1, &[0x02, 0x40, 0x00]);
    transport.request(1, &[0x12, 0x04, 0x00, 0x01, 0x00]);

    assert_eq!(server.connection(1).unwrap().mtu, 64);
    assert_eq!(server.connection(2).unwrap().mtu, 23);

    server.notify(1, 3, &[50]).unwrap();
    assert!(matches!(
        server.notify(2, 3, &[50]),
        Err(Error::NotSubscribed { conn_handle: 2, .. })
    ));

    // Dropping one connection leaves the other subscribed
    server.disconnect(1).unwrap();
    assert!(server.connection(2).is_some());
    transport.request(2, &[0x12, 0x04, 0x00, 0x01, 0x00]);
    server.notify(2, 3, &[50]).unwrap();
}

#[test]
fn indication_flow_confirms_before_next() {
    let transport = Arc::new(LoopbackTransport::default());
    let server = GattServer::new(transport.clone());
    server
        .register_services(&[ServiceDef::primary(Uuid::from_u16(0x1805))
            .add_indicate_characteristic(Uuid::from_u16(0x2A2B), None)])
        .unwrap();
    server.set_characteristic_value(3, &[0; 10]).unwrap();

    transport.handler().connected(1, BdAddr::new([7; 6]), AddressType::Public);
    transport.request(1, &[0x12, 0x04, 0x00, 0x02, 0x00]);

    server.indicate(1, 3, &[0x01]).unwrap();
    assert!(matches!(
        server.indicate(1, 3, &[0x02]),
        Err(Error::IndicationPending(1))
    ));

    // The peer's confirmation lets the next one through
    transport.handler().data_received(1, &[0x1E]);
    server.indicate(1, 3, &[0x02]).unwrap();

    let sent = transport.sent.lock().unwrap();
    let indications: Vec<_> = sent.iter().filter(|(_, pdu)| pdu[0] == 0x1D).collect();
    assert_eq!(indications.len(), 2);
}
