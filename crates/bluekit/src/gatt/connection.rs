//! Per-connection server state
//!
//! The connection table tracks each live connection's negotiated MTU, link
//! security, and CCCD subscription bits. One mutex guards the whole table;
//! every operation is a short lookup or small map mutation, and callers that
//! must serialize sends per connection run them under the same lock via
//! [`ConnectionTable::with_state`].

use crate::att::constants::ATT_DEFAULT_MTU;
use crate::att::permissions::LinkSecurity;
use crate::error::Error;
use crate::gap::types::{AddressType, BdAddr};
use std::collections::HashMap;
use std::sync::Mutex;

/// Subscription bit: notifications enabled
pub const CCCD_NOTIFY: u16 = 0x0001;
/// Subscription bit: indications enabled
pub const CCCD_INDICATE: u16 = 0x0002;

/// State kept for one connection
#[derive(Debug)]
pub struct ConnectionState {
    pub conn_handle: u16,
    pub peer_address: BdAddr,
    pub peer_address_type: AddressType,
    /// Negotiated MTU; starts at the ATT default of 23, never lowered
    pub mtu: u16,
    pub security: LinkSecurity,
    /// Characteristic value handle to CCCD subscription bits
    pub subscriptions: HashMap<u16, u16>,
    /// Set while an indication awaits its confirmation
    pub indication_pending: bool,
}

impl ConnectionState {
    fn new(conn_handle: u16, peer_address: BdAddr, peer_address_type: AddressType) -> Self {
        Self {
            conn_handle,
            peer_address,
            peer_address_type,
            mtu: ATT_DEFAULT_MTU,
            security: LinkSecurity::default(),
            subscriptions: HashMap::new(),
            indication_pending: false,
        }
    }

    pub fn subscription(&self, value_handle: u16) -> u16 {
        self.subscriptions.get(&value_handle).copied().unwrap_or(0)
    }
}

/// Read-only snapshot of one connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub conn_handle: u16,
    pub peer_address: BdAddr,
    pub peer_address_type: AddressType,
    pub mtu: u16,
    pub subscriptions: HashMap<u16, u16>,
}

/// Table of live connections
#[derive(Default)]
pub struct ConnectionTable {
    connections: Mutex<HashMap<u16, ConnectionState>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates state for a newly accepted connection.
    pub fn insert(&self, conn_handle: u16, peer: BdAddr, address_type: AddressType) {
        let mut connections = self.connections.lock().unwrap();
        connections.insert(
            conn_handle,
            ConnectionState::new(conn_handle, peer, address_type),
        );
    }

    /// Removes a connection and all of its subscription state.
    pub fn remove(&self, conn_handle: u16) -> Option<ConnectionState> {
        self.connections.lock().unwrap().remove(&conn_handle)
    }

    pub fn contains(&self, conn_handle: u16) -> bool {
        self.connections.lock().unwrap().contains_key(&conn_handle)
    }

    /// Runs `f` on the connection's state while holding the table lock.
    ///
    /// Outbound sends that must not interleave on one connection are issued
    /// from inside `f`.
    pub fn with_state<T>(
        &self,
        conn_handle: u16,
        f: impl FnOnce(&mut ConnectionState) -> T,
    ) -> Result<T, Error> {
        let mut connections = self.connections.lock().unwrap();
        let state = connections
            .get_mut(&conn_handle)
            .ok_or(Error::NotConnected(conn_handle))?;
        Ok(f(state))
    }

    pub fn mtu(&self, conn_handle: u16) -> Option<u16> {
        let connections = self.connections.lock().unwrap();
        connections.get(&conn_handle).map(|state| state.mtu)
    }

    /// Raises the connection's MTU. Values below the ATT default are clamped
    /// to 23, and the MTU is never lowered.
    pub fn raise_mtu(&self, conn_handle: u16, mtu: u16) -> Result<u16, Error> {
        self.with_state(conn_handle, |state| {
            let mtu = mtu.max(ATT_DEFAULT_MTU);
            if mtu > state.mtu {
                state.mtu = mtu;
            }
            state.mtu
        })
    }

    pub fn security(&self, conn_handle: u16) -> LinkSecurity {
        let connections = self.connections.lock().unwrap();
        connections
            .get(&conn_handle)
            .map(|state| state.security)
            .unwrap_or_default()
    }

    pub fn set_security(&self, conn_handle: u16, security: LinkSecurity) -> Result<(), Error> {
        self.with_state(conn_handle, |state| state.security = security)
    }

    /// Subscription bits for a characteristic value handle, zero when the
    /// peer never wrote the CCCD.
    pub fn subscription(&self, conn_handle: u16, value_handle: u16) -> u16 {
        let connections = self.connections.lock().unwrap();
        connections
            .get(&conn_handle)
            .map(|state| state.subscription(value_handle))
            .unwrap_or(0)
    }

    pub fn set_subscription(
        &self,
        conn_handle: u16,
        value_handle: u16,
        bits: u16,
    ) -> Result<(), Error> {
        self.with_state(conn_handle, |state| {
            state.subscriptions.insert(value_handle, bits);
        })
    }

    /// Marks the indication confirmed after a Handle Value Confirm.
    pub fn confirm_indication(&self, conn_handle: u16) {
        let mut connections = self.connections.lock().unwrap();
        if let Some(state) = connections.get_mut(&conn_handle) {
            state.indication_pending = false;
        }
    }

    pub fn info(&self, conn_handle: u16) -> Option<ConnectionInfo> {
        let connections = self.connections.lock().unwrap();
        connections.get(&conn_handle).map(|state| ConnectionInfo {
            conn_handle: state.conn_handle,
            peer_address: state.peer_address,
            peer_address_type: state.peer_address_type,
            mtu: state.mtu,
            subscriptions: state.subscriptions.clone(),
        })
    }

    pub fn handles(&self) -> Vec<u16> {
        self.connections.lock().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_starts_at_default_and_never_lowers() {
        let table = ConnectionTable::new();
        table.insert(1, BdAddr::default(), AddressType::Public);

        assert_eq!(table.mtu(1), Some(23));
        assert_eq!(table.raise_mtu(1, 185).unwrap(), 185);
        assert_eq!(table.raise_mtu(1, 50).unwrap(), 185);
        // Below-minimum requests clamp to the default
        assert_eq!(table.raise_mtu(1, 5).unwrap(), 185);
    }

    #[test]
    fn subscriptions_die_with_the_connection() {
        let table = ConnectionTable::new();
        table.insert(7, BdAddr::default(), AddressType::Random);
        table.set_subscription(7, 3, CCCD_NOTIFY).unwrap();
        assert_eq!(table.subscription(7, 3), CCCD_NOTIFY);

        table.remove(7);
        assert_eq!(table.subscription(7, 3), 0);
        assert!(matches!(
            table.set_subscription(7, 3, 0),
            Err(Error::NotConnected(7))
        ));
    }
}
