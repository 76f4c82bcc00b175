//! Generic Access Profile types
//!
//! Device addresses, address types, and the assembly of advertising-data
//! payloads from high-level advertising parameters.

pub mod constants;
pub mod types;
pub mod advertising;

pub use self::constants::*;
pub use self::types::{AddressType, AdvertisingEventType, BdAddr};
pub use self::advertising::{build_adv_data, build_scan_response_data};
