//! ATT server request dispatch
//!
//! [`AttServer::handle_pdu`] parses one inbound PDU, consults the attribute
//! database, and returns the outbound response bytes. Every failure that can
//! be expressed as an ATT error code becomes an Error Response for the
//! originating opcode; one bad request never drops the connection. Commands
//! and confirmations produce no response.
//!
//! The dispatcher runs to completion on the thread delivering the PDU. The
//! transport guarantees that inbound PDUs for one connection are not
//! interleaved, which gives requests their in-order semantics.

use super::constants::*;
use super::database::{Attribute, AttributeDatabase};
use super::error::AttErrorCode;
use super::pdu::*;
use crate::gatt::connection::{ConnectionTable, CCCD_INDICATE, CCCD_NOTIFY};
use crate::uuid::Uuid;
use log::{debug, info, warn};
use std::sync::Arc;

/// Server-side ATT state machine
pub struct AttServer {
    db: Arc<AttributeDatabase>,
    connections: Arc<ConnectionTable>,
    /// The MTU this server advertises in an MTU exchange
    server_mtu: u16,
}

impl AttServer {
    pub fn new(db: Arc<AttributeDatabase>, connections: Arc<ConnectionTable>) -> Self {
        Self {
            db,
            connections,
            server_mtu: ATT_MAX_MTU,
        }
    }

    /// Overrides the advertised server MTU (clamped to the legal range).
    pub fn with_server_mtu(mut self, mtu: u16) -> Self {
        self.server_mtu = mtu.clamp(ATT_DEFAULT_MTU, ATT_MAX_MTU);
        self
    }

    pub fn database(&self) -> &Arc<AttributeDatabase> {
        &self.db
    }

    /// Handles one inbound ATT PDU and returns the response to send, if any.
    pub fn handle_pdu(&self, conn_handle: u16, pdu: &[u8]) -> Option<Vec<u8>> {
        let opcode = match pdu.first() {
            Some(&op) => op,
            None => {
                warn!("empty ATT PDU on connection {}", conn_handle);
                return None;
            }
        };

        debug!(
            "ATT PDU: conn={} opcode=0x{:02X} len={}",
            conn_handle,
            opcode,
            pdu.len()
        );

        match opcode {
            ATT_EXCHANGE_MTU_REQ => Some(self.handle_exchange_mtu(conn_handle, pdu)),
            ATT_FIND_INFO_REQ => Some(self.handle_find_information(conn_handle, pdu)),
            ATT_FIND_BY_TYPE_VALUE_REQ => Some(self.handle_find_by_type_value(conn_handle, pdu)),
            ATT_READ_BY_TYPE_REQ => Some(self.handle_read_by_type(conn_handle, pdu)),
            ATT_READ_REQ => Some(self.handle_read(conn_handle, pdu)),
            ATT_READ_BLOB_REQ => Some(self.handle_read_blob(conn_handle, pdu)),
            ATT_READ_BY_GROUP_TYPE_REQ => Some(self.handle_read_by_group_type(conn_handle, pdu)),
            ATT_WRITE_REQ => Some(self.handle_write(conn_handle, pdu)),
            ATT_WRITE_CMD => {
                self.handle_write_command(conn_handle, pdu);
                None
            }
            ATT_PREPARE_WRITE_REQ => Some(error_response(
                ATT_PREPARE_WRITE_REQ,
                0x0000,
                AttErrorCode::RequestNotSupported,
            )),
            ATT_EXECUTE_WRITE_REQ => Some(error_response(
                ATT_EXECUTE_WRITE_REQ,
                0x0000,
                AttErrorCode::RequestNotSupported,
            )),
            ATT_SIGNED_WRITE_CMD => {
                warn!("signed write command not supported, ignoring");
                None
            }
            ATT_HANDLE_VALUE_CONF => {
                debug!("indication confirmed on connection {}", conn_handle);
                self.connections.confirm_indication(conn_handle);
                None
            }
            _ => {
                warn!(
                    "unsupported ATT opcode 0x{:02X}, pdu: {}",
                    opcode,
                    hex::encode(&pdu[..pdu.len().min(32)])
                );
                Some(error_response(opcode, 0x0000, AttErrorCode::RequestNotSupported))
            }
        }
    }

    /// The negotiated MTU of a connection, defaulting when unknown.
    fn mtu(&self, conn_handle: u16) -> usize {
        self.connections
            .mtu(conn_handle)
            .unwrap_or(ATT_DEFAULT_MTU) as usize
    }

    // MTU Exchange (0x02)

    fn handle_exchange_mtu(&self, conn_handle: u16, pdu: &[u8]) -> Vec<u8> {
        let request = match ExchangeMtuRequest::parse(pdu) {
            Ok(req) => req,
            Err(_) => {
                return error_response(ATT_EXCHANGE_MTU_REQ, 0x0000, AttErrorCode::InvalidPdu)
            }
        };

        // Negotiate to the smaller of the two; requests below 23 clamp up
        let negotiated = request
            .client_mtu
            .max(ATT_DEFAULT_MTU)
            .min(self.server_mtu);
        let _ = self.connections.raise_mtu(conn_handle, negotiated);

        info!(
            "MTU exchange on conn {}: client={} negotiated={}",
            conn_handle, request.client_mtu, negotiated
        );

        ExchangeMtuResponse {
            server_mtu: self.server_mtu,
        }
        .serialize()
    }

    // Find Information (0x04)

    fn handle_find_information(&self, conn_handle: u16, pdu: &[u8]) -> Vec<u8> {
        let request = match FindInformationRequest::parse(pdu) {
            Ok(req) => req,
            Err(_) => return error_response(ATT_FIND_INFO_REQ, 0x0000, AttErrorCode::InvalidPdu),
        };

        if request.start_handle == 0 || request.start_handle > request.end_handle {
            return error_response(
                ATT_FIND_INFO_REQ,
                request.start_handle,
                AttErrorCode::InvalidHandle,
            );
        }

        let attrs = self.db.range(request.start_handle, request.end_handle);
        if attrs.is_empty() {
            return error_response(
                ATT_FIND_INFO_REQ,
                request.start_handle,
                AttErrorCode::AttributeNotFound,
            );
        }

        // One format per response; stop at the first width change
        let first_is_short = attrs[0].type_uuid.as_u16().is_some();
        let (format, pair_len) = if first_is_short {
            (ATT_FIND_INFO_RSP_FORMAT_16BIT, 4usize)
        } else {
            (ATT_FIND_INFO_RSP_FORMAT_128BIT, 18usize)
        };

        let mtu = self.mtu(conn_handle);
        let mut pairs = Vec::new();
        let mut used = 2; // opcode + format
        for attr in &attrs {
            if used + pair_len > mtu {
                break;
            }
            match (attr.type_uuid.as_u16(), first_is_short) {
                (Some(uuid16), true) => pairs.push(HandleUuidPair::Uuid16(attr.handle, uuid16)),
                (None, false) => {
                    pairs.push(HandleUuidPair::Uuid128(attr.handle, attr.type_uuid.to_uuid128()))
                }
                _ => break,
            }
            used += pair_len;
        }

        FindInformationResponse { format, pairs }.serialize()
    }

    // Find By Type Value (0x06)

    fn handle_find_by_type_value(&self, conn_handle: u16, pdu: &[u8]) -> Vec<u8> {
        let request = match FindByTypeValueRequest::parse(pdu) {
            Ok(req) => req,
            Err(_) => {
                return error_response(ATT_FIND_BY_TYPE_VALUE_REQ, 0x0000, AttErrorCode::InvalidPdu)
            }
        };

        if request.start_handle == 0 || request.start_handle > request.end_handle {
            return error_response(
                ATT_FIND_BY_TYPE_VALUE_REQ,
                request.start_handle,
                AttErrorCode::InvalidHandle,
            );
        }

        let attrs = self.db.find_by_type_value(
            request.start_handle,
            request.end_handle,
            &Uuid::from_u16(request.attribute_type),
            &request.attribute_value,
        );

        if attrs.is_empty() {
            return error_response(
                ATT_FIND_BY_TYPE_VALUE_REQ,
                request.start_handle,
                AttErrorCode::AttributeNotFound,
            );
        }

        let mtu = self.mtu(conn_handle);
        let mut handles = Vec::new();
        let mut used = 1;
        for attr in &attrs {
            if used + 4 > mtu {
                break;
            }
            handles.push(HandleRange {
                found_handle: attr.handle,
                group_end_handle: attr.end_group_handle,
            });
            used += 4;
        }

        FindByTypeValueResponse { handles }.serialize()
    }

    // Read By Type (0x08)

    fn handle_read_by_type(&self, conn_handle: u16, pdu: &[u8]) -> Vec<u8> {
        let request = match ReadByTypeRequest::parse(pdu) {
            Ok(req) => req,
            Err(_) => {
                return error_response(ATT_READ_BY_TYPE_REQ, 0x0000, AttErrorCode::InvalidPdu)
            }
        };

        if request.start_handle == 0 || request.start_handle > request.end_handle {
            return error_response(
                ATT_READ_BY_TYPE_REQ,
                request.start_handle,
                AttErrorCode::InvalidHandle,
            );
        }

        let security = self.connections.security(conn_handle);
        let attrs: Vec<Attribute> = self
            .db
            .find_by_type(request.start_handle, request.end_handle, &request.attribute_type)
            .into_iter()
            .filter(|attr| attr.permissions.check_read(security).is_ok())
            .collect();

        if attrs.is_empty() {
            return error_response(
                ATT_READ_BY_TYPE_REQ,
                request.start_handle,
                AttErrorCode::AttributeNotFound,
            );
        }

        let mtu = self.mtu(conn_handle);

        // All pairs share the first match's value length, capped so that at
        // least one pair fits in the response
        let first_value = match self.db.read_value(conn_handle, attrs[0].handle, 0) {
            Ok(value) => value,
            Err(err) => {
                return error_response(ATT_READ_BY_TYPE_REQ, attrs[0].handle, err.to_error_code())
            }
        };
        // The length field is one byte, so a pair can never exceed 255
        let value_len = first_value.len().min(mtu - 4).min(253);
        let pair_len = 2 + value_len;

        let mut data = Vec::new();
        let mut used = 2; // opcode + length byte
        for attr in &attrs {
            if used + pair_len > mtu {
                break;
            }
            let value = match self.db.read_value(conn_handle, attr.handle, 0) {
                Ok(value) => value,
                Err(_) => continue,
            };
            // Pairs must be uniform; a shorter value ends the response
            if value.len() < value_len {
                break;
            }
            data.push(HandleValue {
                handle: attr.handle,
                value: value[..value_len].to_vec(),
            });
            used += pair_len;
        }

        if data.is_empty() {
            return error_response(
                ATT_READ_BY_TYPE_REQ,
                request.start_handle,
                AttErrorCode::AttributeNotFound,
            );
        }

        ReadByTypeResponse {
            length: pair_len as u8,
            data,
        }
        .serialize()
    }

    // Read (0x0A)

    fn handle_read(&self, conn_handle: u16, pdu: &[u8]) -> Vec<u8> {
        let request = match ReadRequest::parse(pdu) {
            Ok(req) => req,
            Err(_) => return error_response(ATT_READ_REQ, 0x0000, AttErrorCode::InvalidPdu),
        };

        match self.read_checked(conn_handle, request.handle, 0) {
            Ok(mut value) => {
                value.truncate(self.mtu(conn_handle) - 1);
                ReadResponse { value }.serialize()
            }
            Err(code) => error_response(ATT_READ_REQ, request.handle, code),
        }
    }

    // Read Blob (0x0C)

    fn handle_read_blob(&self, conn_handle: u16, pdu: &[u8]) -> Vec<u8> {
        let request = match ReadBlobRequest::parse(pdu) {
            Ok(req) => req,
            Err(_) => return error_response(ATT_READ_BLOB_REQ, 0x0000, AttErrorCode::InvalidPdu),
        };

        match self.read_checked(conn_handle, request.handle, request.offset) {
            Ok(mut value) => {
                value.truncate(self.mtu(conn_handle) - 1);
                ReadBlobResponse { value }.serialize()
            }
            Err(code) => error_response(ATT_READ_BLOB_REQ, request.handle, code),
        }
    }

    /// Permission-checked read used by Read and Read Blob.
    fn read_checked(
        &self,
        conn_handle: u16,
        handle: u16,
        offset: u16,
    ) -> Result<Vec<u8>, AttErrorCode> {
        let attr = self
            .db
            .get(handle)
            .ok_or(AttErrorCode::InvalidHandle)?;

        attr.permissions
            .check_read(self.connections.security(conn_handle))?;

        self.db
            .read_value(conn_handle, handle, offset)
            .map_err(|err| err.to_error_code())
    }

    // Read By Group Type (0x10)

    fn handle_read_by_group_type(&self, conn_handle: u16, pdu: &[u8]) -> Vec<u8> {
        let request = match ReadByGroupTypeRequest::parse(pdu) {
            Ok(req) => req,
            Err(_) => {
                return error_response(ATT_READ_BY_GROUP_TYPE_REQ, 0x0000, AttErrorCode::InvalidPdu)
            }
        };

        if request.start_handle == 0 || request.start_handle > request.end_handle {
            return error_response(
                ATT_READ_BY_GROUP_TYPE_REQ,
                request.start_handle,
                AttErrorCode::InvalidHandle,
            );
        }

        // Only the primary service declaration is a grouping type
        if request.group_type != Uuid::from_u16(PRIMARY_SERVICE_UUID) {
            return error_response(
                ATT_READ_BY_GROUP_TYPE_REQ,
                request.start_handle,
                AttErrorCode::UnsupportedGroupType,
            );
        }

        let attrs = self
            .db
            .find_by_type(request.start_handle, request.end_handle, &request.group_type);

        if attrs.is_empty() {
            return error_response(
                ATT_READ_BY_GROUP_TYPE_REQ,
                request.start_handle,
                AttErrorCode::AttributeNotFound,
            );
        }

        // Entries are uniform; the first service's UUID width fixes the size
        let uuid_size = attrs[0].value.len();
        let pair_len = 4 + uuid_size;
        let mtu = self.mtu(conn_handle);

        let mut data = Vec::new();
        let mut used = 2; // opcode + length byte
        for attr in &attrs {
            if used + pair_len > mtu || attr.value.len() != uuid_size {
                break;
            }
            data.push(GroupData {
                handle: attr.handle,
                end_group_handle: attr.end_group_handle,
                value: attr.value.clone(),
            });
            used += pair_len;
        }

        ReadByGroupTypeResponse {
            length: pair_len as u8,
            data,
        }
        .serialize()
    }

    // Write Request (0x12)

    fn handle_write(&self, conn_handle: u16, pdu: &[u8]) -> Vec<u8> {
        let request = match WriteRequest::parse(pdu) {
            Ok(req) => req,
            Err(_) => return error_response(ATT_WRITE_REQ, 0x0000, AttErrorCode::InvalidPdu),
        };

        let attr = match self.db.get(request.handle) {
            Some(attr) => attr,
            None => {
                return error_response(ATT_WRITE_REQ, request.handle, AttErrorCode::InvalidHandle)
            }
        };

        if let Err(code) = attr
            .permissions
            .check_write(self.connections.security(conn_handle))
        {
            return error_response(ATT_WRITE_REQ, request.handle, code);
        }

        // A write landing on a CCCD updates this connection's subscription
        // for the characteristic value one handle below
        if attr.type_uuid == Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID) {
            if request.value.len() != 2 {
                return error_response(
                    ATT_WRITE_REQ,
                    request.handle,
                    AttErrorCode::InvalidAttributeValueLength,
                );
            }
            let bits = u16::from_le_bytes([request.value[0], request.value[1]]);
            let value_handle = request.handle - 1;
            let _ = self
                .connections
                .set_subscription(conn_handle, value_handle, bits);

            if bits & CCCD_NOTIFY != 0 {
                info!(
                    "notifications enabled for characteristic {} on conn {}",
                    value_handle, conn_handle
                );
            }
            if bits & CCCD_INDICATE != 0 {
                info!(
                    "indications enabled for characteristic {} on conn {}",
                    value_handle, conn_handle
                );
            }
            if bits == 0 {
                info!(
                    "notifications/indications disabled for characteristic {} on conn {}",
                    value_handle, conn_handle
                );
            }
        }

        match self.db.write_value(conn_handle, request.handle, &request.value) {
            Ok(()) => WriteResponse.serialize(),
            Err(err) => error_response(ATT_WRITE_REQ, request.handle, err.to_error_code()),
        }
    }

    // Write Command (0x52), fire and forget

    fn handle_write_command(&self, conn_handle: u16, pdu: &[u8]) {
        let command = match WriteCommand::parse(pdu) {
            Ok(cmd) => cmd,
            Err(_) => return,
        };

        let attr = match self.db.get(command.handle) {
            Some(attr) => attr,
            None => return,
        };

        if attr
            .permissions
            .check_write(self.connections.security(conn_handle))
            .is_err()
        {
            return;
        }

        if let Err(err) = self.db.write_value(conn_handle, command.handle, &command.value) {
            debug!("write command on handle {} failed: {}", command.handle, err);
        }
    }
}

/// Builds the 5-byte Error Response PDU.
fn error_response(request_opcode: u8, handle: u16, error_code: AttErrorCode) -> Vec<u8> {
    debug!(
        "ATT error: opcode=0x{:02X} handle=0x{:04X} code={:?}",
        request_opcode, handle, error_code
    );
    ErrorResponse {
        request_opcode,
        handle,
        error_code,
    }
    .serialize()
}
