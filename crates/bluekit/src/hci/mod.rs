//! HCI event decoding
//!
//! Only the controller-to-host path needed for LE scanning lives here: the
//! constants of the HCI framing and the LE advertising-report parser.

pub mod constants;
pub mod event;
pub mod advertising;

pub use self::constants::*;
pub use self::event::{DisconnectionComplete, HciEvent, LeConnectionComplete};
pub use self::advertising::{
    parse_advertising_packet, AdvFlags, AdvertisingRecord, FilterDuplicates, LocalName,
    PacketSource, Reports, ScanError, ScanParams, Scanner,
};
