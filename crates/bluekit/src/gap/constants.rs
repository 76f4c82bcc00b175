//! GAP protocol constants

// LE address types
pub const PUBLIC_DEVICE_ADDRESS: u8 = 0x00;
pub const RANDOM_DEVICE_ADDRESS: u8 = 0x01;
pub const PUBLIC_IDENTITY_ADDRESS: u8 = 0x02;
pub const RANDOM_IDENTITY_ADDRESS: u8 = 0x03;

// Advertising data (AD) types
pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_INCOMPLETE_16BIT_UUIDS: u8 = 0x02;
pub const AD_TYPE_COMPLETE_16BIT_UUIDS: u8 = 0x03;
pub const AD_TYPE_INCOMPLETE_32BIT_UUIDS: u8 = 0x04;
pub const AD_TYPE_COMPLETE_32BIT_UUIDS: u8 = 0x05;
pub const AD_TYPE_INCOMPLETE_128BIT_UUIDS: u8 = 0x06;
pub const AD_TYPE_COMPLETE_128BIT_UUIDS: u8 = 0x07;
pub const AD_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const AD_TYPE_TX_POWER_LEVEL: u8 = 0x0A;
pub const AD_TYPE_SERVICE_DATA_16BIT: u8 = 0x16;
pub const AD_TYPE_APPEARANCE: u8 = 0x19;
pub const AD_TYPE_SERVICE_DATA_32BIT: u8 = 0x20;
pub const AD_TYPE_SERVICE_DATA_128BIT: u8 = 0x21;
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

// Flags AD bits
pub const FLAG_LE_LIMITED_DISCOVERABLE: u8 = 1 << 0;
pub const FLAG_LE_GENERAL_DISCOVERABLE: u8 = 1 << 1;
pub const FLAG_BR_EDR_NOT_SUPPORTED: u8 = 1 << 2;
pub const FLAG_SIMULTANEOUS_LE_BREDR_CONTROLLER: u8 = 1 << 3;
pub const FLAG_SIMULTANEOUS_LE_BREDR_HOST: u8 = 1 << 4;

// Maximum advertising / scan-response payload size
pub const ADV_DATA_MAX_LEN: usize = 31;
