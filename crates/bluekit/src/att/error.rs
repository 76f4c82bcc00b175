//! Error handling for the ATT protocol

use super::constants::*;
use thiserror::Error;

/// ATT error codes as they appear on the wire in an Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    Unlikely,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    /// Application-defined code (0x80..=0x9F)
    ApplicationError(u8),
    /// Any other code
    Unknown(u8),
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => AttErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => AttErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => AttErrorCode::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => AttErrorCode::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => AttErrorCode::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => AttErrorCode::AttributeNotLong,
            ATT_ERROR_INSUFFICIENT_KEY_SIZE => AttErrorCode::InsufficientEncryptionKeySize,
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => AttErrorCode::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => AttErrorCode::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => AttErrorCode::InsufficientResources,
            c if (ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END)
                .contains(&c) =>
            {
                AttErrorCode::ApplicationError(c)
            }
            other => AttErrorCode::Unknown(other),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> Self {
        match code {
            AttErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            AttErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            AttErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            AttErrorCode::InvalidPdu => ATT_ERROR_INVALID_PDU,
            AttErrorCode::InsufficientAuthentication => ATT_ERROR_INSUFFICIENT_AUTHENTICATION,
            AttErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            AttErrorCode::InvalidOffset => ATT_ERROR_INVALID_OFFSET,
            AttErrorCode::InsufficientAuthorization => ATT_ERROR_INSUFFICIENT_AUTHORIZATION,
            AttErrorCode::PrepareQueueFull => ATT_ERROR_PREPARE_QUEUE_FULL,
            AttErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            AttErrorCode::AttributeNotLong => ATT_ERROR_ATTRIBUTE_NOT_LONG,
            AttErrorCode::InsufficientEncryptionKeySize => ATT_ERROR_INSUFFICIENT_KEY_SIZE,
            AttErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            AttErrorCode::Unlikely => ATT_ERROR_UNLIKELY,
            AttErrorCode::InsufficientEncryption => ATT_ERROR_INSUFFICIENT_ENCRYPTION,
            AttErrorCode::UnsupportedGroupType => ATT_ERROR_UNSUPPORTED_GROUP_TYPE,
            AttErrorCode::InsufficientResources => ATT_ERROR_INSUFFICIENT_RESOURCES,
            AttErrorCode::ApplicationError(code) => code,
            AttErrorCode::Unknown(code) => code,
        }
    }
}

/// ATT protocol error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttError {
    #[error("Invalid handle: {0}")]
    InvalidHandle(u16),

    #[error("Read not permitted")]
    ReadNotPermitted,

    #[error("Write not permitted")]
    WriteNotPermitted,

    #[error("Invalid PDU")]
    InvalidPdu,

    #[error("Insufficient authentication")]
    InsufficientAuthentication,

    #[error("Request not supported")]
    RequestNotSupported,

    #[error("Invalid offset: {0}")]
    InvalidOffset(u16),

    #[error("Insufficient authorization")]
    InsufficientAuthorization,

    #[error("Prepare queue full")]
    PrepareQueueFull,

    #[error("Attribute not found")]
    AttributeNotFound,

    #[error("Attribute not long")]
    AttributeNotLong,

    #[error("Insufficient encryption key size")]
    InsufficientEncryptionKeySize,

    #[error("Invalid attribute value length")]
    InvalidAttributeValueLength,

    #[error("Unlikely error")]
    Unlikely,

    #[error("Insufficient encryption")]
    InsufficientEncryption,

    #[error("Unsupported group type")]
    UnsupportedGroupType,

    #[error("Insufficient resources")]
    InsufficientResources,

    #[error("Application error: 0x{0:02X}")]
    ApplicationError(u8),
}

impl AttError {
    /// The wire error code for this error.
    pub fn to_error_code(&self) -> AttErrorCode {
        match self {
            AttError::InvalidHandle(_) => AttErrorCode::InvalidHandle,
            AttError::ReadNotPermitted => AttErrorCode::ReadNotPermitted,
            AttError::WriteNotPermitted => AttErrorCode::WriteNotPermitted,
            AttError::InvalidPdu => AttErrorCode::InvalidPdu,
            AttError::InsufficientAuthentication => AttErrorCode::InsufficientAuthentication,
            AttError::RequestNotSupported => AttErrorCode::RequestNotSupported,
            AttError::InvalidOffset(_) => AttErrorCode::InvalidOffset,
            AttError::InsufficientAuthorization => AttErrorCode::InsufficientAuthorization,
            AttError::PrepareQueueFull => AttErrorCode::PrepareQueueFull,
            AttError::AttributeNotFound => AttErrorCode::AttributeNotFound,
            AttError::AttributeNotLong => AttErrorCode::AttributeNotLong,
            AttError::InsufficientEncryptionKeySize => AttErrorCode::InsufficientEncryptionKeySize,
            AttError::InvalidAttributeValueLength => AttErrorCode::InvalidAttributeValueLength,
            AttError::Unlikely => AttErrorCode::Unlikely,
            AttError::InsufficientEncryption => AttErrorCode::InsufficientEncryption,
            AttError::UnsupportedGroupType => AttErrorCode::UnsupportedGroupType,
            AttError::InsufficientResources => AttErrorCode::InsufficientResources,
            AttError::ApplicationError(code) => AttErrorCode::ApplicationError(*code),
        }
    }

    /// The handle associated with this error, if any.
    pub fn handle(&self) -> Option<u16> {
        match self {
            AttError::InvalidHandle(handle) => Some(*handle),
            AttError::InvalidOffset(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl From<AttErrorCode> for AttError {
    fn from(code: AttErrorCode) -> Self {
        match code {
            AttErrorCode::InvalidHandle => AttError::InvalidHandle(0),
            AttErrorCode::ReadNotPermitted => AttError::ReadNotPermitted,
            AttErrorCode::WriteNotPermitted => AttError::WriteNotPermitted,
            AttErrorCode::InvalidPdu => AttError::InvalidPdu,
            AttErrorCode::InsufficientAuthentication => AttError::InsufficientAuthentication,
            AttErrorCode::RequestNotSupported => AttError::RequestNotSupported,
            AttErrorCode::InvalidOffset => AttError::InvalidOffset(0),
            AttErrorCode::InsufficientAuthorization => AttError::InsufficientAuthorization,
            AttErrorCode::PrepareQueueFull => AttError::PrepareQueueFull,
            AttErrorCode::AttributeNotFound => AttError::AttributeNotFound,
            AttErrorCode::AttributeNotLong => AttError::AttributeNotLong,
            AttErrorCode::InsufficientEncryptionKeySize => AttError::InsufficientEncryptionKeySize,
            AttErrorCode::InvalidAttributeValueLength => AttError::InvalidAttributeValueLength,
            AttErrorCode::Unlikely => AttError::Unlikely,
            AttErrorCode::InsufficientEncryption => AttError::InsufficientEncryption,
            AttErrorCode::UnsupportedGroupType => AttError::UnsupportedGroupType,
            AttErrorCode::InsufficientResources => AttError::InsufficientResources,
            AttErrorCode::ApplicationError(code) | AttErrorCode::Unknown(code) => {
                AttError::ApplicationError(code)
            }
        }
    }
}

/// ATT result type
pub type AttResult<T> = Result<T, AttError>;
