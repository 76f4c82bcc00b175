//! Example: LE scanning
//!
//! Scans for nearby LE devices over the raw HCI socket and prints each
//! decoded advertising record. Requires a Bluetooth adapter and sufficient
//! privileges; pass `--parse <hex>` to decode a canned packet instead.

use bluekit::hci::{FilterDuplicates, Scanner};
use bluekit::parse_advertising_packet;
use bluekit::transport::hci_scan::HciScanSource;
use bluekit::AdvertisingRecord;
use std::time::{Duration, Instant};

fn print_record(record: &AdvertisingRecord) {
    println!("{} ({:?}) rssi={}", record.address, record.event_type, record.rssi);
    if let Some(flags) = record.flags {
        println!("  flags: 0x{:02X}", flags.raw);
    }
    if let Some(name) = &record.local_name {
        println!(
            "  name: {} ({})",
            name.name,
            if name.complete { "complete" } else { "shortened" }
        );
    }
    for uuid in &record.service_uuids {
        println!("  service: {}", uuid);
    }
    for (uuid, data) in &record.service_data {
        println!("  service data {}: {}", uuid, hex::encode(data));
    }
    for data in &record.manufacturer_data {
        println!("  manufacturer data: {}", hex::encode(data));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("--parse") {
        for arg in &args[1..] {
            let packet = hex::decode(arg)?;
            for record in parse_advertising_packet(&packet)? {
                print_record(&record);
            }
        }
        return Ok(());
    }

    let source = HciScanSource::new(0)?;
    let mut scanner = Scanner::new(source, FilterDuplicates::Software);
    scanner.start(false)?;
    println!("Scanning for 10 seconds...");

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        for record in scanner.advertisements(Some(Duration::from_millis(500)))? {
            print_record(&record);
        }
    }

    scanner.stop()?;
    Ok(())
}
