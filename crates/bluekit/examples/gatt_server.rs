//! Example demonstrating a simple GATT server
//!
//! Serves a Battery Service over the raw-socket transport and pushes a
//! decreasing battery level to subscribed clients once per second.
//! Requires a Bluetooth adapter and CAP_NET_ADMIN (run as root).

use bluekit::gatt::{GattServer, ServiceDef};
use bluekit::transport::socket::RawSocketTransport;
use bluekit::transport::AdvertisingParams;
use bluekit::Uuid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(RawSocketTransport::new(0)?);
    let server = GattServer::new(transport);
    println!("Opened raw socket transport on hci0");

    let battery = ServiceDef::primary(Uuid::from_u16(0x180F))
        .add_notify_characteristic(Uuid::from_u16(0x2A19), None);
    let registered = server.register_services(&[battery])?;
    let level_handle = registered[0].characteristics[0].value_handle;
    server.set_characteristic_value(level_handle, &[100])?;
    println!("Registered Battery Service, level handle {}", level_handle);

    let clients = Arc::new(Mutex::new(HashSet::new()));

    let connected_clients = clients.clone();
    server.on_connected(move |conn, addr| {
        println!("Client connected: {} ({})", conn, addr);
        connected_clients.lock().unwrap().insert(conn);
    });

    let disconnected_clients = clients.clone();
    server.on_disconnected(move |conn| {
        println!("Client disconnected: {}", conn);
        disconnected_clients.lock().unwrap().remove(&conn);
    });

    server.on_mtu_exchanged(|conn, mtu| {
        println!("MTU on connection {} is now {}", conn, mtu);
    });

    server.start_advertising(AdvertisingParams {
        device_name: "bluekit-battery".into(),
        service_uuids: vec![Uuid::from_u16(0x180F)],
        ..AdvertisingParams::default()
    })?;
    println!("Advertising as bluekit-battery");

    let mut level = 100u8;
    loop {
        std::thread::sleep(Duration::from_secs(1));
        level = if level == 0 { 100 } else { level - 1 };
        server.set_characteristic_value(level_handle, &[level])?;

        for &conn in clients.lock().unwrap().iter() {
            // Peers that never enabled notifications are skipped
            match server.notify(conn, level_handle, &[level]) {
                Ok(_) => println!("Notified {} of level {}%", conn, level),
                Err(bluekit::Error::NotSubscribed { .. }) => {}
                Err(err) => eprintln!("notify failed on {}: {}", conn, err),
            }
        }
    }
}
