//! Raw-socket transport backend for Linux
//!
//! Speaks ATT over an L2CAP seqpacket socket bound to the ATT fixed channel
//! and programs advertising through a raw HCI socket. Every ATT PDU on the
//! wire reaches the protocol layer, so the full server state machine runs
//! on top of this backend.
//!
//! The reader thread is owned by the transport and woken through a
//! self-pipe; no process-global state is involved.

use crate::att::constants::ATT_DEFAULT_MTU;
use crate::error::Error;
use crate::gap::advertising::{build_adv_data, build_scan_response_data};
use crate::gap::constants::ADV_DATA_MAX_LEN;
use crate::gap::types::{AddressType, BdAddr};
use crate::hci::constants::*;
use crate::transport::{AdvertisingParams, Transport, TransportEvents};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

// Bluetooth socket constants
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_L2CAP: i32 = 0;
const BTPROTO_HCI: i32 = 1;
const HCI_CHANNEL_RAW: u16 = 0;

// ATT runs on the L2CAP fixed channel 4
const ATT_CID: u16 = 0x0004;
const BDADDR_LE_PUBLIC: u8 = 0x01;

// Largest ATT PDU plus headroom
const RX_BUF_LEN: usize = 1024;

#[repr(C)]
struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

struct Connection {
    fd: RawFd,
    peer: BdAddr,
    address_type: AddressType,
    mtu: u16,
}

struct Shared {
    connections: HashMap<u16, Connection>,
    next_conn_handle: u16,
}

type HandlerSlot = Arc<RwLock<Option<Arc<dyn TransportEvents>>>>;

/// Raw-link transport over Linux Bluetooth sockets
pub struct RawSocketTransport {
    listen_fd: RawFd,
    hci_fd: RawFd,
    wake_pipe: [RawFd; 2],
    shared: Arc<Mutex<Shared>>,
    handler: HandlerSlot,
    advertising: AtomicBool,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// State the reader thread owns; holds no reference back to the transport,
/// so dropping the transport can join the thread.
struct Reader {
    listen_fd: RawFd,
    wake_fd: RawFd,
    shared: Arc<Mutex<Shared>>,
    handler: HandlerSlot,
    running: Arc<AtomicBool>,
}

impl RawSocketTransport {
    /// Opens the listening ATT channel and the HCI control socket on the
    /// given adapter, and starts the reader thread.
    pub fn new(dev_id: u16) -> Result<Self, Error> {
        let listen_fd = open_l2cap_listener()?;
        let hci_fd = match open_hci_socket(dev_id) {
            Ok(fd) => fd,
            Err(err) => {
                unsafe { libc::close(listen_fd) };
                return Err(err);
            }
        };

        let mut pipe_fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(pipe_fds.as_mut_ptr()) } < 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(listen_fd);
                libc::close(hci_fd);
            }
            return Err(err.into());
        }

        let shared = Arc::new(Mutex::new(Shared {
            connections: HashMap::new(),
            next_conn_handle: 1,
        }));
        let handler: HandlerSlot = Arc::new(RwLock::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let reader = Reader {
            listen_fd,
            wake_fd: pipe_fds[0],
            shared: shared.clone(),
            handler: handler.clone(),
            running: running.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("bluekit-rx".into())
            .spawn(move || reader.run())
            .map_err(Error::Io)?;

        info!("raw socket transport ready on hci{}", dev_id);
        Ok(Self {
            listen_fd,
            hci_fd,
            wake_pipe: pipe_fds,
            shared,
            handler,
            advertising: AtomicBool::new(false),
            running,
            reader: Mutex::new(Some(handle)),
        })
    }

    fn wake_reader(&self) {
        let b = [1u8];
        unsafe { libc::write(self.wake_pipe[1], b.as_ptr().cast(), 1) };
    }

    fn send_hci_command(&self, ogf: u8, ocf: u16, params: &[u8]) -> Result<(), Error> {
        let opcode = ((ogf as u16) << 10) | (ocf & 0x3FF);
        let mut packet = Vec::with_capacity(4 + params.len());
        packet.push(HCI_COMMAND_PKT);
        packet.extend_from_slice(&opcode.to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(params);

        let n = unsafe { libc::write(self.hci_fd, packet.as_ptr().cast(), packet.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn set_advertising_enable(&self, enable: bool) -> Result<(), Error> {
        self.send_hci_command(OGF_LE, OCF_LE_SET_ADVERTISING_ENABLE, &[enable as u8])
    }
}

impl Reader {
    fn run(&self) {
        let mut buf = [0u8; RX_BUF_LEN];

        while self.running.load(Ordering::SeqCst) {
            let mut fds: Vec<libc::pollfd> = vec![
                libc::pollfd {
                    fd: self.wake_fd,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.listen_fd,
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];

            let conn_fds: Vec<(u16, RawFd)> = {
                let shared = self.shared.lock().unwrap();
                shared
                    .connections
                    .iter()
                    .map(|(&handle, conn)| (handle, conn.fd))
                    .collect()
            };
            for &(_, fd) in &conn_fds {
                fds.push(libc::pollfd {
                    fd,
                    events: libc::POLLIN,
                    revents: 0,
                });
            }

            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, 500) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                error!("poll failed: {}", err);
                break;
            }
            if rc == 0 {
                continue;
            }

            if fds[0].revents & libc::POLLIN != 0 {
                // Wake-up byte; re-check running and rebuild the fd set
                let mut b = [0u8; 8];
                unsafe { libc::read(self.wake_fd, b.as_mut_ptr().cast(), b.len()) };
                continue;
            }

            if fds[1].revents & libc::POLLIN != 0 {
                self.accept_connection();
            }

            for (i, &(conn_handle, fd)) in conn_fds.iter().enumerate() {
                if fds[2 + i].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
                    self.read_connection(conn_handle, fd, &mut buf);
                }
            }
        }
    }

    fn handler(&self) -> Option<Arc<dyn TransportEvents>> {
        self.handler.read().unwrap().clone()
    }

    fn accept_connection(&self) {
        let mut addr: SockaddrL2 = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<SockaddrL2>() as libc::socklen_t;

        let fd = unsafe {
            libc::accept(
                self.listen_fd,
                (&mut addr as *mut SockaddrL2).cast(),
                &mut len,
            )
        };
        if fd < 0 {
            warn!("accept failed: {}", std::io::Error::last_os_error());
            return;
        }

        let peer = BdAddr::new(addr.l2_bdaddr);
        // Socket bdaddr types are offset by one from the HCI encoding
        let address_type = AddressType::from(addr.l2_bdaddr_type.saturating_sub(1));

        let conn_handle = {
            let mut shared = self.shared.lock().unwrap();
            let handle = shared.next_conn_handle;
            shared.next_conn_handle = shared.next_conn_handle.wrapping_add(1).max(1);
            shared.connections.insert(
                handle,
                Connection {
                    fd,
                    peer,
                    address_type,
                    mtu: ATT_DEFAULT_MTU,
                },
            );
            handle
        };

        info!("accepted connection {} from {}", conn_handle, peer);
        if let Some(handler) = self.handler() {
            handler.connected(conn_handle, peer, address_type);
        }
    }

    fn read_connection(&self, conn_handle: u16, fd: RawFd, buf: &mut [u8]) {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };

        if n > 0 {
            // Seqpacket sockets deliver one complete ATT PDU per read
            debug!("conn {}: {} byte PDU", conn_handle, n);
            if let Some(handler) = self.handler() {
                handler.data_received(conn_handle, &buf[..n as usize]);
            }
            return;
        }

        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return;
            }
            warn!("read on conn {} failed: {}", conn_handle, err);
        }

        // Zero read or hard error: the link is gone
        drop_connection(&self.shared, &self.handler, conn_handle);
    }
}

/// Removes a connection, closes its socket, and notifies the handler.
fn drop_connection(shared: &Mutex<Shared>, handler: &HandlerSlot, conn_handle: u16) {
    let removed = shared.lock().unwrap().connections.remove(&conn_handle);
    if let Some(conn) = removed {
        unsafe { libc::close(conn.fd) };
        info!("connection {} closed", conn_handle);
        if let Some(handler) = handler.read().unwrap().clone() {
            handler.disconnected(conn_handle);
        }
    }
}

/// Milliseconds to 0.625 ms advertising-interval units.
fn interval_units(ms: u16) -> u16 {
    ((ms as u32) * 8 / 5) as u16
}

/// AD payload padded to the fixed 31-byte HCI parameter block.
fn padded_adv_param(data: &[u8]) -> Vec<u8> {
    let mut params = Vec::with_capacity(1 + ADV_DATA_MAX_LEN);
    params.push(data.len() as u8);
    params.extend_from_slice(data);
    params.resize(1 + ADV_DATA_MAX_LEN, 0);
    params
}

fn open_l2cap_listener() -> Result<RawFd, Error> {
    let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_SEQPACKET, BTPROTO_L2CAP) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let addr = SockaddrL2 {
        l2_family: AF_BLUETOOTH as libc::sa_family_t,
        l2_psm: 0,
        l2_bdaddr: [0; 6], // BDADDR_ANY
        l2_cid: ATT_CID.to_le(),
        l2_bdaddr_type: BDADDR_LE_PUBLIC,
    };

    let rc = unsafe {
        libc::bind(
            fd,
            (&addr as *const SockaddrL2).cast(),
            std::mem::size_of::<SockaddrL2>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err.into());
    }

    if unsafe { libc::listen(fd, 4) } < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err.into());
    }

    Ok(fd)
}

fn open_hci_socket(dev_id: u16) -> Result<RawFd, Error> {
    let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_RAW, BTPROTO_HCI) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
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

    Ok(fd)
}

impl Transport for RawSocketTransport {
    fn start_advertising(&self, params: &AdvertisingParams) -> Result<(), Error> {
        // Parameters: min/max interval, ADV_IND, public own address,
        // all channels, no filtering
        let mut adv_params = Vec::with_capacity(15);
        adv_params.extend_from_slice(&interval_units(params.min_interval_ms).to_le_bytes());
        adv_params.extend_from_slice(&interval_units(params.max_interval_ms).to_le_bytes());
        adv_params.push(0x00); // ADV_IND
        adv_params.push(0x00); // own address type: public
        adv_params.push(0x00); // peer address type
        adv_params.extend_from_slice(&[0; 6]); // peer address
        adv_params.push(0x07); // channels 37, 38, 39
        adv_params.push(0x00); // filter policy
        self.send_hci_command(OGF_LE, OCF_LE_SET_ADVERTISING_PARAMETERS, &adv_params)?;

        let adv_data = build_adv_data(params)?;
        self.send_hci_command(
            OGF_LE,
            OCF_LE_SET_ADVERTISING_DATA,
            &padded_adv_param(&adv_data),
        )?;

        let scan_rsp = build_scan_response_data(params)?;
        self.send_hci_command(
            OGF_LE,
            OCF_LE_SET_SCAN_RESPONSE_DATA,
            &padded_adv_param(&scan_rsp),
        )?;

        self.set_advertising_enable(true)?;
        self.advertising.store(true, Ordering::SeqCst);
        info!("advertising started as {:?}", params.device_name);
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), Error> {
        self.set_advertising_enable(false)?;
        self.advertising.store(false, Ordering::SeqCst);
        info!("advertising stopped");
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    fn send_pdu(&self, conn_handle: u16, data: &[u8]) -> Result<usize, Error> {
        let fd = {
            let shared = self.shared.lock().unwrap();
            shared
                .connections
                .get(&conn_handle)
                .map(|conn| conn.fd)
                .ok_or(Error::NotConnected(conn_handle))?
        };

        let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(n as usize)
    }

    fn disconnect(&self, conn_handle: u16) -> Result<(), Error> {
        if !self
            .shared
            .lock()
            .unwrap()
            .connections
            .contains_key(&conn_handle)
        {
            return Err(Error::NotConnected(conn_handle));
        }
        drop_connection(&self.shared, &self.handler, conn_handle);
        self.wake_reader();
        Ok(())
    }

    fn set_mtu(&self, conn_handle: u16, mtu: u16) -> Result<(), Error> {
        let mut shared = self.shared.lock().unwrap();
        let conn = shared
            .connections
            .get_mut(&conn_handle)
            .ok_or(Error::NotConnected(conn_handle))?;
        conn.mtu = mtu;
        Ok(())
    }

    fn get_mtu(&self, conn_handle: u16) -> u16 {
        self.shared
            .lock()
            .unwrap()
            .connections
            .get(&conn_handle)
            .map(|conn| conn.mtu)
            .unwrap_or(ATT_DEFAULT_MTU)
    }

    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>) {
        *self.handler.write().unwrap() = Some(handler);
    }
}

impl Drop for RawSocketTransport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake_reader();
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }

        let mut shared = self.shared.lock().unwrap();
        for (_, conn) in shared.connections.drain() {
            unsafe { libc::close(conn.fd) };
        }
        unsafe {
            libc::close(self.listen_fd);
            libc::close(self.hci_fd);
            libc::close(self.wake_pipe[0]);
            libc::close(self.wake_pipe[1]);
        }
    }
}
