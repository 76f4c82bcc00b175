//! HCI event decoding
//!
//! Generic event framing plus the handful of events the scanning path and
//! the raw-socket backend care about. Anything else stays raw for callers
//! to inspect.

use crate::hci::constants::*;

/// One HCI event, split into code and parameter bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciEvent {
    pub event_code: u8,
    pub parameters: Vec<u8>,
}

impl HciEvent {
    /// Parses an event from the bytes following the HCI packet-type byte.
    ///
    /// Returns `None` when the header is incomplete or the parameter length
    /// disagrees with the buffer.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }

        let event_code = data[0];
        let param_len = data[1] as usize;
        if data.len() < param_len + 2 {
            return None;
        }

        Some(HciEvent {
            event_code,
            parameters: data[2..param_len + 2].to_vec(),
        })
    }

    /// The LE meta subevent code, when this is an LE meta event.
    pub fn le_subevent(&self) -> Option<u8> {
        if self.event_code == EVT_LE_META_EVENT {
            self.parameters.first().copied()
        } else {
            None
        }
    }
}

/// LE Connection Complete subevent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeConnectionComplete {
    pub status: u8,
    pub connection_handle: u16,
    pub role: u8,
    pub peer_address_type: u8,
    pub peer_address: [u8; 6],
    pub conn_interval: u16,
    pub conn_latency: u16,
    pub supervision_timeout: u16,
}

impl LeConnectionComplete {
    pub fn parse(event: &HciEvent) -> Option<Self> {
        if event.le_subevent() != Some(EVT_LE_CONN_COMPLETE) {
            return None;
        }

        let p = &event.parameters;
        if p.len() < 19 {
            return None;
        }

        let mut peer_address = [0u8; 6];
        peer_address.copy_from_slice(&p[6..12]);

        Some(Self {
            status: p[1],
            connection_handle: u16::from_le_bytes([p[2], p[3]]),
            role: p[4],
            peer_address_type: p[5],
            peer_address,
            conn_interval: u16::from_le_bytes([p[12], p[13]]),
            conn_latency: u16::from_le_bytes([p[14], p[15]]),
            supervision_timeout: u16::from_le_bytes([p[16], p[17]]),
        })
    }
}

/// Disconnection Complete event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectionComplete {
    pub status: u8,
    pub connection_handle: u16,
    pub reason: u8,
}

impl DisconnectionComplete {
    pub fn parse(event: &HciEvent) -> Option<Self> {
        if event.event_code != EVT_DISCONN_COMPLETE || event.parameters.len() < 4 {
            return None;
        }

        let p = &event.parameters;
        Some(Self {
            status: p[0],
            connection_handle: u16::from_le_bytes([p[1], p[2]]),
            reason: p[3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_frame() {
        let event = HciEvent::parse(&[EVT_CMD_COMPLETE, 3, 1, 0x0A, 0x20]).unwrap();
        assert_eq!(event.event_code, EVT_CMD_COMPLETE);
        assert_eq!(event.parameters, vec![1, 0x0A, 0x20]);
        assert_eq!(event.le_subevent(), None);
    }

    #[test]
    fn rejects_bad_parameter_length() {
        assert!(HciEvent::parse(&[EVT_CMD_COMPLETE]).is_none());
        assert!(HciEvent::parse(&[EVT_CMD_COMPLETE, 5, 1, 2]).is_none());
    }

    #[test]
    fn parses_le_connection_complete() {
        let mut params = vec![EVT_LE_CONN_COMPLETE, 0x00];
        params.extend_from_slice(&0x0040u16.to_le_bytes());
        params.push(0x01); // peripheral role
        params.push(0x00); // public peer address
        params.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        params.extend_from_slice(&0x0010u16.to_le_bytes());
        params.extend_from_slice(&0x0000u16.to_le_bytes());
        params.extend_from_slice(&0x00C8u16.to_le_bytes());
        params.push(0x00); // clock accuracy

        let event = HciEvent {
            event_code: EVT_LE_META_EVENT,
            parameters: params,
        };

        let conn = LeConnectionComplete::parse(&event).unwrap();
        assert_eq!(conn.status, 0x00);
        assert_eq!(conn.connection_handle, 0x0040);
        assert_eq!(conn.peer_address, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(conn.conn_interval, 0x0010);
        assert_eq!(conn.supervision_timeout, 0x00C8);

        // Wrong subevent
        let other = HciEvent {
            event_code: EVT_LE_META_EVENT,
            parameters: vec![EVT_LE_ADVERTISING_REPORT, 0, 0],
        };
        assert!(LeConnectionComplete::parse(&other).is_none());
    }

    #[test]
    fn parses_disconnection_complete() {
        let event = HciEvent {
            event_code: EVT_DISCONN_COMPLETE,
            parameters: vec![0x00, 0x40, 0x00, 0x13],
        };

        let disc = DisconnectionComplete::parse(&event).unwrap();
        assert_eq!(disc.status, 0x00);
        assert_eq!(disc.connection_handle, 0x0040);
        assert_eq!(disc.reason, 0x13);

        let short = HciEvent {
            event_code: EVT_DISCONN_COMPLETE,
            parameters: vec![0x00],
        };
        assert!(DisconnectionComplete::parse(&short).is_none());
    }
}
