//! HCI packet source for LE scanning on Linux
//!
//! Opens a raw HCI socket, programs the controller's scan parameters, and
//! hands complete event packets to the [`Scanner`](crate::Scanner). Only
//! LE advertising reports are surfaced; other events are skipped.

use crate::error::Error;
use crate::hci::advertising::{PacketSource, ScanParams};
use crate::hci::constants::*;
use crate::hci::event::HciEvent;
use log::{debug, info, warn};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const HCI_CHANNEL_RAW: u16 = 0;

// HCI filter socket option: let events through
const SOL_HCI: i32 = 0;
const HCI_FILTER: i32 = 2;

const RX_BUF_LEN: usize = 512;

#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

/// Raw HCI socket delivering LE advertising report packets
pub struct HciScanSource {
    fd: RawFd,
}

impl HciScanSource {
    /// Opens the HCI device and installs an event filter for LE meta
    /// events.
    pub fn new(dev_id: u16) -> Result<Self, Error> {
        let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_RAW, BTPROTO_HCI) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let filter = HciFilter {
            type_mask: 1 << HCI_EVENT_PKT,
            event_mask: [0, 1 << (EVT_LE_META_EVENT - 32)],
            opcode: 0,
        };
        let rc = unsafe {
            libc::setsockopt(
                fd,
                SOL_HCI,
                HCI_FILTER,
                (&filter as *const HciFilter).cast(),
                std::mem::size_of::<HciFilter>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let rc = unsafe {
            libc::bind(
                fd,
                (&addr as *const SockaddrHci).cast(),
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        info!("HCI scan source open on hci{}", dev_id);
        Ok(Self { fd })
    }

    fn send_command(&self, ogf: u8, ocf: u16, params: &[u8]) -> Result<(), Error> {
        let opcode = ((ogf as u16) << 10) | (ocf & 0x3FF);
        let mut packet = Vec::with_capacity(4 + params.len());
        packet.push(HCI_COMMAND_PKT);
        packet.extend_from_slice(&opcode.to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(params);

        let n = unsafe { libc::write(self.fd, packet.as_ptr().cast(), packet.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    /// Reads one raw packet, honoring the timeout.
    fn read_raw(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, Error> {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.map_or(-1, |t| t.as_millis().min(i32::MAX as u128) as i32);

        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if rc == 0 {
            return Ok(None);
        }

        let mut buf = [0u8; RX_BUF_LEN];
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Some(buf[..n as usize].to_vec()))
    }

    /// True when the packet is an LE advertising report event.
    fn is_advertising_report(packet: &[u8]) -> bool {
        if packet.first() != Some(&HCI_EVENT_PKT) {
            return false;
        }
        match HciEvent::parse(&packet[1..]) {
            Some(event) => event.le_subevent() == Some(EVT_LE_ADVERTISING_REPORT),
            None => {
                warn!("dropping malformed HCI event from controller");
                false
            }
        }
    }
}

impl PacketSource for HciScanSource {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), Error> {
        // Intervals are carried in 0.625 ms units
        let interval = ((params.interval_ms as u32) * 8 / 5) as u16;
        let window = ((params.window_ms as u32) * 8 / 5) as u16;

        let mut cmd = Vec::with_capacity(7);
        cmd.push(params.active as u8);
        cmd.extend_from_slice(&interval.to_le_bytes());
        cmd.extend_from_slice(&window.to_le_bytes());
        cmd.push(0x00); // own address type: public
        cmd.push(0x00); // accept all advertisers
        self.send_command(OGF_LE, OCF_LE_SET_SCAN_PARAMETERS, &cmd)?;

        self.send_command(
            OGF_LE,
            OCF_LE_SET_SCAN_ENABLE,
            &[0x01, params.filter_duplicates as u8],
        )?;
        debug!(
            "scan enabled: active={} interval={}ms window={}ms",
            params.active, params.interval_ms, params.window_ms
        );
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), Error> {
        self.send_command(OGF_LE, OCF_LE_SET_SCAN_ENABLE, &[0x00, 0x00])
    }

    fn read_packet(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            let packet = match self.read_raw(remaining)? {
                Some(packet) => packet,
                None => return Ok(None),
            };

            if Self::is_advertising_report(&packet) {
                return Ok(Some(packet));
            }
            // The filter lets other LE meta events through; skip them
        }
    }
}

impl Drop for HciScanSource {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
