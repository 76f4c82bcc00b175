//! Link-layer transport abstraction
//!
//! The protocol layer sits above a [`Transport`]: something that can send a
//! PDU on a connection, manage advertising, and deliver inbound events to a
//! registered [`TransportEvents`] handler.
//!
//! Two families of backends exist. A raw-link backend (such as
//! [`socket::RawSocketTransport`]) delivers every ATT PDU on the wire and
//! the full server state machine runs here. An integrated-stack backend
//! answers requests inside the stack itself; it receives the flattened
//! attribute table once through [`Transport::register_attributes`] and only
//! surfaces server-initiated frames and stack-level events.

#[cfg(unix)]
pub mod socket;
#[cfg(unix)]
pub mod hci_scan;

use crate::att::database::Attribute;
use crate::att::permissions::LinkSecurity;
use crate::error::Error;
use crate::gap::types::{AddressType, BdAddr};
use crate::uuid::Uuid;
use std::sync::Arc;

/// Parameters for starting to advertise
#[derive(Debug, Clone)]
pub struct AdvertisingParams {
    pub device_name: String,
    /// Advertised service UUIDs, any mixture of widths
    pub service_uuids: Vec<Uuid>,
    /// GAP appearance value; zero omits the field
    pub appearance: u16,
    /// Minimum advertising interval in milliseconds
    pub min_interval_ms: u16,
    /// Maximum advertising interval in milliseconds
    pub max_interval_ms: u16,
    /// Raw advertising payload override (at most 31 bytes)
    pub advertising_data: Option<Vec<u8>>,
    /// Raw scan-response payload override (at most 31 bytes)
    pub scan_response_data: Option<Vec<u8>>,
}

impl Default for AdvertisingParams {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            service_uuids: Vec::new(),
            appearance: 0,
            min_interval_ms: 100,
            max_interval_ms: 200,
            advertising_data: None,
            scan_response_data: None,
        }
    }
}

/// Inbound events a transport delivers to the protocol layer.
///
/// For any single connection the transport must not interleave
/// [`data_received`](Self::data_received) deliveries: the handler runs to
/// completion before the next PDU for that connection is dispatched.
pub trait TransportEvents: Send + Sync {
    /// A peer connected.
    fn connected(&self, conn_handle: u16, peer: BdAddr, address_type: AddressType);

    /// A connection went away; all of its state is discarded.
    fn disconnected(&self, conn_handle: u16);

    /// One complete ATT PDU arrived. Never a fragment.
    fn data_received(&self, conn_handle: u16, data: &[u8]);

    /// The stack changed the connection's MTU (integrated-stack backends).
    fn mtu_changed(&self, conn_handle: u16, mtu: u16);
}

/// Capability boundary between the protocol layer and a link backend.
pub trait Transport: Send + Sync {
    /// Starts advertising with the given parameters.
    fn start_advertising(&self, params: &AdvertisingParams) -> Result<(), Error>;

    /// Stops advertising.
    fn stop_advertising(&self) -> Result<(), Error>;

    fn is_advertising(&self) -> bool;

    /// Sends one complete ATT PDU, returning the number of bytes sent.
    ///
    /// Not assumed re-entrant per connection; the caller serializes sends
    /// on one connection.
    fn send_pdu(&self, conn_handle: u16, data: &[u8]) -> Result<usize, Error>;

    /// Tears down a connection.
    fn disconnect(&self, conn_handle: u16) -> Result<(), Error>;

    /// Propagates a negotiated MTU down to the link layer.
    fn set_mtu(&self, conn_handle: u16, mtu: u16) -> Result<(), Error>;

    /// The link layer's view of the connection MTU.
    fn get_mtu(&self, conn_handle: u16) -> u16;

    /// Security state of the link, consulted for permission gates.
    fn link_security(&self, _conn_handle: u16) -> LinkSecurity {
        LinkSecurity::default()
    }

    /// Hands the flattened attribute table to an integrated stack.
    ///
    /// Raw-link backends ignore this; backends that own the GATT table
    /// serialize every row into their native registration call.
    fn register_attributes(&self, _attributes: &[Attribute]) -> Result<(), Error> {
        Ok(())
    }

    /// Registers the handler receiving inbound events.
    fn set_event_handler(&self, handler: Arc<dyn TransportEvents>);
}
