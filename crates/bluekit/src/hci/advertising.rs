//! LE advertising-report parsing and scanning
//!
//! Decodes raw HCI LE Advertising Report events into structured records.
//! Structural problems with the packet itself (wrong packet type, wrong
//! event code, length mismatch) fail the whole parse; corruption inside a
//! single report is logged and drops only that report.

use log::{debug, error, info};
use std::collections::HashSet;
use std::time::Duration;

use crate::codec::AdStructures;
use crate::error::Error;
use crate::gap::constants::*;
use crate::gap::types::{AddressType, AdvertisingEventType, BdAddr};
use crate::hci::constants::*;
use crate::uuid::Uuid;

/// Errors from the advertising packet parser and scanner
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Unknown HCI packet type: 0x{0:02X}")]
    UnknownHciPacket(u8),

    #[error("Malformed HCI packet: {0}")]
    MalformedPacket(&'static str),

    #[error("Scanner is not running")]
    NotRunning,
}

/// Decoded Flags AD structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdvFlags {
    pub le_limited_discoverable: bool,
    pub le_general_discoverable: bool,
    pub br_edr_unsupported: bool,
    pub simultaneous_le_bredr_controller: bool,
    pub simultaneous_le_bredr_host: bool,
    /// The raw flag byte as received
    pub raw: u8,
}

impl AdvFlags {
    fn from_byte(raw: u8) -> Self {
        Self {
            le_limited_discoverable: raw & FLAG_LE_LIMITED_DISCOVERABLE != 0,
            le_general_discoverable: raw & FLAG_LE_GENERAL_DISCOVERABLE != 0,
            br_edr_unsupported: raw & FLAG_BR_EDR_NOT_SUPPORTED != 0,
            simultaneous_le_bredr_controller: raw & FLAG_SIMULTANEOUS_LE_BREDR_CONTROLLER != 0,
            simultaneous_le_bredr_host: raw & FLAG_SIMULTANEOUS_LE_BREDR_HOST != 0,
            raw,
        }
    }
}

/// Shortened-or-complete local device name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalName {
    pub name: String,
    pub complete: bool,
}

/// One decoded advertising report.
///
/// Owns all of its bytes; nothing borrows from the input packet.
#[derive(Debug, Clone, Default)]
pub struct AdvertisingRecord {
    pub address: BdAddr,
    pub address_type: AddressType,
    pub event_type: AdvertisingEventType,
    /// Signed dBm; [`RSSI_UNAVAILABLE`] (127) means not available
    pub rssi: i8,
    pub flags: Option<AdvFlags>,
    pub local_name: Option<LocalName>,
    pub service_uuids: Vec<Uuid>,
    pub uuid16_complete: bool,
    pub uuid32_complete: bool,
    pub uuid128_complete: bool,
    pub manufacturer_data: Vec<Vec<u8>>,
    /// Service-data blocks, split into the service UUID and its payload
    pub service_data: Vec<(Uuid, Vec<u8>)>,
    /// TLVs the parser does not classify, type byte preserved in front
    pub unparsed: Vec<Vec<u8>>,
    /// Original advertising-data bytes of this report
    pub raw_data: Vec<u8>,
}

/// Parses a raw HCI packet into an iterator of advertising records.
///
/// The packet must be an HCI Event (0x04) carrying an LE Meta Event (0x3E)
/// with the LE Advertising Report subevent (0x02), and the parameter-length
/// byte must match the actual payload length. Anything else fails here;
/// per-report corruption is handled by the returned iterator.
pub fn parse_advertising_packet(packet: &[u8]) -> Result<Reports, ScanError> {
    if packet.is_empty() {
        return Err(ScanError::MalformedPacket("empty packet"));
    }
    if packet[0] != HCI_EVENT_PKT {
        return Err(ScanError::UnknownHciPacket(packet[0]));
    }
    if packet.len() < 3 {
        return Err(ScanError::MalformedPacket("truncated event header"));
    }
    if packet[1] != EVT_LE_META_EVENT {
        return Err(ScanError::MalformedPacket("not an LE meta event"));
    }

    let plen = packet[2] as usize;
    let params = &packet[3..];
    if params.len() != plen {
        return Err(ScanError::MalformedPacket("parameter length mismatch"));
    }
    if params.len() < 2 {
        return Err(ScanError::MalformedPacket("truncated meta event"));
    }
    if params[0] != EVT_LE_ADVERTISING_REPORT {
        return Err(ScanError::MalformedPacket("not an advertising report"));
    }

    let num_reports = params[1];
    debug!("advertising packet with {} report(s)", num_reports);

    Ok(Reports {
        data: params[2..].to_vec(),
        offset: 0,
        remaining: num_reports,
    })
}

/// Finite, non-restartable sequence of advertising records from one packet.
#[derive(Debug)]
pub struct Reports {
    data: Vec<u8>,
    offset: usize,
    remaining: u8,
}

impl Iterator for Reports {
    type Item = AdvertisingRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            self.remaining -= 1;

            // event_type(1) address_type(1) address(6) data_len(1)
            let header = match self.data.get(self.offset..self.offset + 9) {
                Some(h) => h,
                None => {
                    error!("advertising report truncated mid-header, dropping remainder");
                    self.remaining = 0;
                    return None;
                }
            };

            let event_type = AdvertisingEventType::from(header[0]);
            let address_type = AddressType::from(header[1]);
            let address = BdAddr::from_slice(&header[2..8]).unwrap();
            let data_len = header[8] as usize;

            let data_start = self.offset + 9;
            let rssi_index = data_start + data_len;
            if rssi_index >= self.data.len() {
                error!("advertising report from {} truncated, dropping remainder", address);
                self.remaining = 0;
                return None;
            }

            let ad_data = &self.data[data_start..rssi_index];
            let rssi = self.data[rssi_index] as i8;
            self.offset = rssi_index + 1;

            match decode_report(address, address_type, event_type, rssi, ad_data) {
                Some(record) => return Some(record),
                None => {
                    // Only this report is corrupt; the outer framing was
                    // consistent, so continue with the next one.
                    error!("corrupted advertising data from {}", address);
                    continue;
                }
            }
        }
        None
    }
}

fn decode_report(
    address: BdAddr,
    address_type: AddressType,
    event_type: AdvertisingEventType,
    rssi: i8,
    data: &[u8],
) -> Option<AdvertisingRecord> {
    let mut record = AdvertisingRecord {
        address,
        address_type,
        event_type,
        rssi,
        raw_data: data.to_vec(),
        ..AdvertisingRecord::default()
    };

    for item in AdStructures::new(data) {
        let ad = item.ok()?;
        match ad.ad_type {
            AD_TYPE_FLAGS => {
                if let Some(&byte) = ad.data.first() {
                    record.flags = Some(AdvFlags::from_byte(byte));
                }
            }
            AD_TYPE_INCOMPLETE_16BIT_UUIDS | AD_TYPE_COMPLETE_16BIT_UUIDS => {
                if ad.data.len() % 2 != 0 {
                    return None;
                }
                record.uuid16_complete = ad.ad_type == AD_TYPE_COMPLETE_16BIT_UUIDS;
                for chunk in ad.data.chunks_exact(2) {
                    record
                        .service_uuids
                        .push(Uuid::from_u16(u16::from_le_bytes([chunk[0], chunk[1]])));
                }
            }
            AD_TYPE_INCOMPLETE_32BIT_UUIDS | AD_TYPE_COMPLETE_32BIT_UUIDS => {
                if ad.data.len() % 4 != 0 {
                    return None;
                }
                record.uuid32_complete = ad.ad_type == AD_TYPE_COMPLETE_32BIT_UUIDS;
                for chunk in ad.data.chunks_exact(4) {
                    record.service_uuids.push(Uuid::from_u32(u32::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3],
                    ])));
                }
            }
            AD_TYPE_INCOMPLETE_128BIT_UUIDS | AD_TYPE_COMPLETE_128BIT_UUIDS => {
                if ad.data.len() % 16 != 0 {
                    return None;
                }
                record.uuid128_complete = ad.ad_type == AD_TYPE_COMPLETE_128BIT_UUIDS;
                for chunk in ad.data.chunks_exact(16) {
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(chunk);
                    record.service_uuids.push(Uuid::from_bytes_le(bytes));
                }
            }
            AD_TYPE_SHORTENED_LOCAL_NAME | AD_TYPE_COMPLETE_LOCAL_NAME => {
                record.local_name = Some(LocalName {
                    name: String::from_utf8_lossy(ad.data).into_owned(),
                    complete: ad.ad_type == AD_TYPE_COMPLETE_LOCAL_NAME,
                });
            }
            AD_TYPE_SERVICE_DATA_16BIT | AD_TYPE_SERVICE_DATA_32BIT
            | AD_TYPE_SERVICE_DATA_128BIT => {
                let uuid_len = match ad.ad_type {
                    AD_TYPE_SERVICE_DATA_16BIT => 2,
                    AD_TYPE_SERVICE_DATA_32BIT => 4,
                    _ => 16,
                };
                if ad.data.len() < uuid_len {
                    return None;
                }
                let uuid = Uuid::from_slice_le(&ad.data[..uuid_len])?;
                record.service_data.push((uuid, ad.data[uuid_len..].to_vec()));
            }
            AD_TYPE_MANUFACTURER_DATA => {
                record.manufacturer_data.push(ad.data.to_vec());
            }
            other => {
                let mut chunk = Vec::with_capacity(1 + ad.data.len());
                chunk.push(other);
                chunk.extend_from_slice(ad.data);
                record.unparsed.push(chunk);
            }
        }
    }

    Some(record)
}

/// Scan parameters passed to a [`PacketSource`].
#[derive(Debug, Clone, Copy)]
pub struct ScanParams {
    /// Active scanning sends scan requests; passive only listens
    pub active: bool,
    pub interval_ms: u16,
    pub window_ms: u16,
    /// Ask the controller to filter duplicates in hardware
    pub filter_duplicates: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            active: true,
            interval_ms: 16,
            window_ms: 16,
            filter_duplicates: false,
        }
    }
}

/// Source of raw HCI event packets for the [`Scanner`].
///
/// Implemented by link backends; tests drive the scanner with canned bytes.
pub trait PacketSource {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), Error>;
    fn stop_scan(&mut self) -> Result<(), Error>;

    /// Reads one raw HCI packet. `Ok(None)` means the timeout expired.
    fn read_packet(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, Error>;
}

/// Duplicate handling for the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDuplicates {
    /// Report every advertising event
    Off,
    /// Filter duplicates in software, keyed on (address, event type)
    Software,
}

/// Transport-agnostic BLE scanner.
///
/// Works over any [`PacketSource`]; decodes each packet with
/// [`parse_advertising_packet`] and optionally filters duplicates.
pub struct Scanner<S: PacketSource> {
    source: S,
    running: bool,
    software_filtering: bool,
    seen: HashSet<(BdAddr, u8)>,
}

impl<S: PacketSource> Scanner<S> {
    pub fn new(source: S, filter: FilterDuplicates) -> Self {
        Self {
            source,
            running: false,
            software_filtering: filter == FilterDuplicates::Software,
            seen: HashSet::new(),
        }
    }

    /// Starts scanning. Passive scans only listen; active scans also send
    /// scan requests for scan-response data.
    pub fn start(&mut self, passive: bool) -> Result<(), Error> {
        if self.running {
            return Ok(());
        }

        let params = ScanParams {
            active: !passive,
            // Hardware filtering when software filtering is off
            filter_duplicates: !self.software_filtering,
            ..ScanParams::default()
        };
        self.source.start_scan(&params)?;
        self.seen.clear();
        self.running = true;
        info!("BLE scanner started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), Error> {
        if !self.running {
            return Ok(());
        }
        self.source.stop_scan()?;
        self.running = false;
        info!("BLE scanner stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Reads one packet from the source and returns its decoded records.
    ///
    /// An expired timeout returns an empty vector. Unparseable packets
    /// propagate as [`ScanError`].
    pub fn advertisements(&mut self, timeout: Option<Duration>) -> Result<Vec<AdvertisingRecord>, Error> {
        if !self.running {
            return Err(ScanError::NotRunning.into());
        }

        let packet = match self.source.read_packet(timeout)? {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };

        let mut records = Vec::new();
        for record in parse_advertising_packet(&packet)? {
            if self.software_filtering {
                let key = (record.address, u8::from(record.event_type));
                if !self.seen.insert(key) {
                    continue;
                }
            }
            records.push(record);
        }
        Ok(records)
    }
}
