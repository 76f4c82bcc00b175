//! GATT server
//!
//! Owns the transport, the attribute database, and the ATT state machine.
//! Inbound transport events drive the state machine; the application uses
//! this type to register services, advertise, and push notifications and
//! indications to subscribed peers.

use super::connection::{ConnectionInfo, ConnectionTable, CCCD_INDICATE, CCCD_NOTIFY};
use super::service::{RegisteredService, ServiceDef};
use crate::att::constants::{
    ATT_EXCHANGE_MTU_REQ, ATT_EXCHANGE_MTU_RSP, ATT_HANDLE_VALUE_IND, ATT_HANDLE_VALUE_NTF,
    ATT_MAX_MTU,
};
use crate::att::database::{AttributeDatabase, ReadCallback, WriteCallback};
use crate::att::server::AttServer;
use crate::error::Error;
use crate::gap::types::{AddressType, BdAddr};
use crate::transport::{AdvertisingParams, Transport, TransportEvents};
use log::{info, warn};
use std::sync::{Arc, Mutex, RwLock};

type ConnectedCallback = Box<dyn Fn(u16, BdAddr) + Send + Sync>;
type DisconnectedCallback = Box<dyn Fn(u16) + Send + Sync>;
type MtuCallback = Box<dyn Fn(u16, u16) + Send + Sync>;

/// BLE GATT server over a pluggable transport
pub struct GattServer {
    transport: Arc<dyn Transport>,
    db: Arc<AttributeDatabase>,
    att: AttServer,
    connections: Arc<ConnectionTable>,
    registered: Mutex<Vec<RegisteredService>>,
    last_adv_params: Mutex<Option<AdvertisingParams>>,
    on_connected: RwLock<Option<ConnectedCallback>>,
    on_disconnected: RwLock<Option<DisconnectedCallback>>,
    on_mtu_exchanged: RwLock<Option<MtuCallback>>,
}

impl GattServer {
    /// Creates a server over `transport` and registers for its events.
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_server_mtu(transport, ATT_MAX_MTU)
    }

    /// Like [`new`](Self::new) with a custom advertised server MTU.
    pub fn with_server_mtu(transport: Arc<dyn Transport>, server_mtu: u16) -> Arc<Self> {
        let db = Arc::new(AttributeDatabase::new());
        let connections = Arc::new(ConnectionTable::new());
        let att = AttServer::new(db.clone(), connections.clone()).with_server_mtu(server_mtu);

        let server = Arc::new(Self {
            transport: transport.clone(),
            db,
            att,
            connections,
            registered: Mutex::new(Vec::new()),
            last_adv_params: Mutex::new(None),
            on_connected: RwLock::new(None),
            on_disconnected: RwLock::new(None),
            on_mtu_exchanged: RwLock::new(None),
        });

        transport.set_event_handler(server.clone());
        info!("GATT server created");
        server
    }

    /// The attribute database backing this server.
    pub fn database(&self) -> &Arc<AttributeDatabase> {
        &self.db
    }

    /// Registers a declarative service tree and exports the flattened
    /// attribute table to the transport.
    pub fn register_services(
        &self,
        services: &[ServiceDef],
    ) -> Result<Vec<RegisteredService>, Error> {
        let registered = self.db.register_services(services)?;
        self.transport.register_attributes(&self.db.all())?;
        self.registered.lock().unwrap().extend(registered.clone());
        Ok(registered)
    }

    /// All services registered so far, with their allocated handles.
    pub fn services(&self) -> Vec<RegisteredService> {
        self.registered.lock().unwrap().clone()
    }

    /// Starts advertising, remembering the parameters for
    /// [`restart_advertising`](Self::restart_advertising).
    pub fn start_advertising(&self, params: AdvertisingParams) -> Result<(), Error> {
        self.transport.start_advertising(&params)?;
        *self.last_adv_params.lock().unwrap() = Some(params);
        Ok(())
    }

    pub fn stop_advertising(&self) -> Result<(), Error> {
        self.transport.stop_advertising()
    }

    /// Re-issues the most recent advertising parameters.
    pub fn restart_advertising(&self) -> Result<(), Error> {
        let params = self
            .last_adv_params
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| {
                Error::InvalidParameter("no previous advertising parameters".into())
            })?;
        self.transport.start_advertising(&params)
    }

    pub fn is_advertising(&self) -> bool {
        self.transport.is_advertising()
    }

    /// Sends a notification for a characteristic value handle.
    ///
    /// Fails with [`Error::NotSubscribed`] unless the peer enabled
    /// notifications on the characteristic's CCCD. The payload is truncated
    /// to MTU − 3 bytes.
    pub fn notify(&self, conn_handle: u16, value_handle: u16, data: &[u8]) -> Result<usize, Error> {
        self.connections.with_state(conn_handle, |state| {
            if state.subscription(value_handle) & CCCD_NOTIFY == 0 {
                return Err(Error::NotSubscribed {
                    conn_handle,
                    handle: value_handle,
                });
            }

            let max_payload = state.mtu as usize - 3;
            let mut pdu = Vec::with_capacity(3 + data.len().min(max_payload));
            pdu.push(ATT_HANDLE_VALUE_NTF);
            pdu.extend_from_slice(&value_handle.to_le_bytes());
            pdu.extend_from_slice(&data[..data.len().min(max_payload)]);

            self.transport.send_pdu(conn_handle, &pdu)
        })?
    }

    /// Sends an indication for a characteristic value handle.
    ///
    /// Indications are serialized per connection: while one awaits its
    /// confirmation, another attempt fails with
    /// [`Error::IndicationPending`]. The pending state clears on a Handle
    /// Value Confirm or on disconnect.
    pub fn indicate(&self, conn_handle: u16, value_handle: u16, data: &[u8]) -> Result<usize, Error> {
        self.connections.with_state(conn_handle, |state| {
            if state.subscription(value_handle) & CCCD_INDICATE == 0 {
                return Err(Error::NotSubscribed {
                    conn_handle,
                    handle: value_handle,
                });
            }
            if state.indication_pending {
                return Err(Error::IndicationPending(conn_handle));
            }

            let max_payload = state.mtu as usize - 3;
            let mut pdu = Vec::with_capacity(3 + data.len().min(max_payload));
            pdu.push(ATT_HANDLE_VALUE_IND);
            pdu.extend_from_slice(&value_handle.to_le_bytes());
            pdu.extend_from_slice(&data[..data.len().min(max_payload)]);

            let sent = self.transport.send_pdu(conn_handle, &pdu)?;
            state.indication_pending = true;
            Ok(sent)
        })?
    }

    pub fn disconnect(&self, conn_handle: u16) -> Result<(), Error> {
        self.transport.disconnect(conn_handle)
    }

    /// Snapshot of one connection's state.
    pub fn connection(&self, conn_handle: u16) -> Option<ConnectionInfo> {
        self.connections.info(conn_handle)
    }

    pub fn set_characteristic_value(&self, value_handle: u16, value: &[u8]) -> Result<(), Error> {
        self.db.set_characteristic_value(value_handle, value)
    }

    pub fn get_characteristic_value(&self, value_handle: u16) -> Result<Vec<u8>, Error> {
        self.db.get_characteristic_value(value_handle)
    }

    pub fn set_read_callback(&self, handle: u16, callback: ReadCallback) -> Result<(), Error> {
        self.db.set_read_callback(handle, callback)
    }

    pub fn set_write_callback(&self, handle: u16, callback: WriteCallback) -> Result<(), Error> {
        self.db.set_write_callback(handle, callback)
    }

    /// Sets the callback fired when a peer connects.
    pub fn on_connected(&self, callback: impl Fn(u16, BdAddr) + Send + Sync + 'static) {
        *self.on_connected.write().unwrap() = Some(Box::new(callback));
    }

    /// Sets the callback fired when a peer disconnects.
    pub fn on_disconnected(&self, callback: impl Fn(u16) + Send + Sync + 'static) {
        *self.on_disconnected.write().unwrap() = Some(Box::new(callback));
    }

    /// Sets the callback fired after an MTU exchange settles.
    pub fn on_mtu_exchanged(&self, callback: impl Fn(u16, u16) + Send + Sync + 'static) {
        *self.on_mtu_exchanged.write().unwrap() = Some(Box::new(callback));
    }

    /// Sends a response PDU, serialized with other sends on the connection.
    fn send_response(&self, conn_handle: u16, pdu: &[u8]) {
        let result = self
            .connections
            .with_state(conn_handle, |_| self.transport.send_pdu(conn_handle, pdu));
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!("failed to send response on conn {}: {}", conn_handle, err),
            Err(_) => {
                // Disconnected while the response was being built; the
                // in-flight response is discarded.
                info!("dropping response for vanished connection {}", conn_handle);
            }
        }
    }
}

impl TransportEvents for GattServer {
    fn connected(&self, conn_handle: u16, peer: BdAddr, address_type: AddressType) {
        self.connections.insert(conn_handle, peer, address_type);
        let _ = self
            .connections
            .set_security(conn_handle, self.transport.link_security(conn_handle));

        info!("client connected: handle={} addr={}", conn_handle, peer);

        if let Some(cb) = self.on_connected.read().unwrap().as_ref() {
            cb(conn_handle, peer);
        }
    }

    fn disconnected(&self, conn_handle: u16) {
        self.connections.remove(conn_handle);
        info!("client disconnected: handle={}", conn_handle);

        if let Some(cb) = self.on_disconnected.read().unwrap().as_ref() {
            cb(conn_handle);
        }
    }

    fn data_received(&self, conn_handle: u16, data: &[u8]) {
        let response = self.att.handle_pdu(conn_handle, data);

        if let Some(rsp) = response {
            let mtu_exchanged = data.first() == Some(&ATT_EXCHANGE_MTU_REQ)
                && rsp.first() == Some(&ATT_EXCHANGE_MTU_RSP);

            self.send_response(conn_handle, &rsp);

            if mtu_exchanged {
                if let Some(mtu) = self.connections.mtu(conn_handle) {
                    let _ = self.transport.set_mtu(conn_handle, mtu);
                    if let Some(cb) = self.on_mtu_exchanged.read().unwrap().as_ref() {
                        cb(conn_handle, mtu);
                    }
                }
            }
        }
    }

    fn mtu_changed(&self, conn_handle: u16, mtu: u16) {
        match self.connections.raise_mtu(conn_handle, mtu) {
            Ok(mtu) => {
                if let Some(cb) = self.on_mtu_exchanged.read().unwrap().as_ref() {
                    cb(conn_handle, mtu);
                }
            }
            Err(_) => warn!("MTU change for unknown connection {}", conn_handle),
        }
    }
}
