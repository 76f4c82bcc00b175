//! Advertising payload assembly
//!
//! Translates [`AdvertisingParams`] into the raw length-tagged AD structures
//! carried in an advertising PDU or scan response. Both payloads are capped
//! at 31 bytes; the local name is shortened to fit, and UUID lists that do
//! not fit completely are emitted with the "incomplete" AD type.

use crate::error::Error;
use crate::gap::constants::*;
use crate::transport::AdvertisingParams;
use crate::uuid::Uuid;

/// Builds the advertising-data payload for the given parameters.
///
/// If `params.advertising_data` is set, those bytes are used verbatim
/// (after a length check) and the structured fields are ignored.
pub fn build_adv_data(params: &AdvertisingParams) -> Result<Vec<u8>, Error> {
    if let Some(ref raw) = params.advertising_data {
        if raw.len() > ADV_DATA_MAX_LEN {
            return Err(Error::AdvertisingDataTooLong(raw.len()));
        }
        return Ok(raw.clone());
    }

    let mut out = Vec::with_capacity(ADV_DATA_MAX_LEN);

    // Flags: LE general discoverable, BR/EDR unsupported
    out.extend_from_slice(&[
        0x02,
        AD_TYPE_FLAGS,
        FLAG_LE_GENERAL_DISCOVERABLE | FLAG_BR_EDR_NOT_SUPPORTED,
    ]);

    if params.appearance != 0 {
        out.push(0x03);
        out.push(AD_TYPE_APPEARANCE);
        out.extend_from_slice(&params.appearance.to_le_bytes());
    }

    append_uuid_lists(&mut out, &params.service_uuids);
    append_local_name(&mut out, &params.device_name);

    Ok(out)
}

/// Builds the scan-response payload for the given parameters.
///
/// Carries the complete local name when the advertising payload had to
/// shorten it. A raw override is used verbatim after a length check.
pub fn build_scan_response_data(params: &AdvertisingParams) -> Result<Vec<u8>, Error> {
    if let Some(ref raw) = params.scan_response_data {
        if raw.len() > ADV_DATA_MAX_LEN {
            return Err(Error::AdvertisingDataTooLong(raw.len()));
        }
        return Ok(raw.clone());
    }

    let mut out = Vec::with_capacity(ADV_DATA_MAX_LEN);
    append_local_name(&mut out, &params.device_name);
    Ok(out)
}

fn append_uuid_lists(out: &mut Vec<u8>, uuids: &[Uuid]) {
    let u16s: Vec<&Uuid> = uuids.iter().filter(|u| u.len() == 2).collect();
    let u32s: Vec<&Uuid> = uuids.iter().filter(|u| u.len() == 4).collect();
    let u128s: Vec<&Uuid> = uuids.iter().filter(|u| u.len() == 16).collect();

    append_uuid_list(out, &u16s, 2, AD_TYPE_COMPLETE_16BIT_UUIDS, AD_TYPE_INCOMPLETE_16BIT_UUIDS);
    append_uuid_list(out, &u32s, 4, AD_TYPE_COMPLETE_32BIT_UUIDS, AD_TYPE_INCOMPLETE_32BIT_UUIDS);
    append_uuid_list(
        out,
        &u128s,
        16,
        AD_TYPE_COMPLETE_128BIT_UUIDS,
        AD_TYPE_INCOMPLETE_128BIT_UUIDS,
    );
}

fn append_uuid_list(
    out: &mut Vec<u8>,
    uuids: &[&Uuid],
    width: usize,
    complete_type: u8,
    incomplete_type: u8,
) {
    if uuids.is_empty() {
        return;
    }

    // Two header bytes plus at least one UUID must fit
    let room = ADV_DATA_MAX_LEN.saturating_sub(out.len());
    if room < 2 + width {
        return;
    }

    let fitting = ((room - 2) / width).min(uuids.len());
    let ad_type = if fitting == uuids.len() {
        complete_type
    } else {
        incomplete_type
    };

    out.push((1 + fitting * width) as u8);
    out.push(ad_type);
    for uuid in &uuids[..fitting] {
        out.extend_from_slice(&uuid.to_le_bytes());
    }
}

fn append_local_name(out: &mut Vec<u8>, name: &str) {
    if name.is_empty() {
        return;
    }

    let room = ADV_DATA_MAX_LEN.saturating_sub(out.len());
    if room < 3 {
        return;
    }

    let max_name = room - 2;
    if name.len() <= max_name {
        out.push((1 + name.len()) as u8);
        out.push(AD_TYPE_COMPLETE_LOCAL_NAME);
        out.extend_from_slice(name.as_bytes());
    } else {
        // Shorten on a UTF-8 boundary
        let mut cut = max_name;
        while cut > 0 && !name.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            return;
        }
        out.push((1 + cut) as u8);
        out.push(AD_TYPE_SHORTENED_LOCAL_NAME);
        out.extend_from_slice(&name.as_bytes()[..cut]);
    }
}
