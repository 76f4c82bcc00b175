//! Attribute permissions and link security
//!
//! Permissions are a per-attribute bitset; whether an operation is allowed
//! depends on the bitset and on the security state of the link the request
//! arrived on, which the transport reports as a [`LinkSecurity`].

use super::error::AttErrorCode;

// Permission bits
pub const ATT_PERM_NONE: u8 = 0x00;
pub const ATT_PERM_READ: u8 = 0x01;
pub const ATT_PERM_WRITE: u8 = 0x02;
pub const ATT_PERM_READ_ENCRYPT: u8 = 0x04;
pub const ATT_PERM_WRITE_ENCRYPT: u8 = 0x08;
pub const ATT_PERM_READ_AUTHEN: u8 = 0x10;
pub const ATT_PERM_WRITE_AUTHEN: u8 = 0x20;
pub const ATT_PERM_READ_AUTHOR: u8 = 0x40;
pub const ATT_PERM_WRITE_AUTHOR: u8 = 0x80;

/// Security state of a link, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkSecurity {
    pub level: SecurityLevel,
    /// Application-level authorization granted for this peer
    pub authorized: bool,
}

/// Encryption/authentication level of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SecurityLevel {
    /// No security (unencrypted)
    #[default]
    None,
    /// Encryption without authentication
    EncryptionOnly,
    /// Encryption with authentication
    EncryptionWithAuthentication,
    /// Secure Connections with encryption and authentication
    SecureConnections,
}

/// ATT attribute permission flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttPermissions(u8);

impl AttPermissions {
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn none() -> Self {
        Self(ATT_PERM_NONE)
    }

    pub const fn read_only() -> Self {
        Self(ATT_PERM_READ)
    }

    pub const fn write_only() -> Self {
        Self(ATT_PERM_WRITE)
    }

    pub const fn read_write() -> Self {
        Self(ATT_PERM_READ | ATT_PERM_WRITE)
    }

    pub const fn value(&self) -> u8 {
        self.0
    }

    pub const fn can_read(&self) -> bool {
        self.0 & ATT_PERM_READ != 0
    }

    pub const fn can_write(&self) -> bool {
        self.0 & ATT_PERM_WRITE != 0
    }

    pub const fn read_requires_encryption(&self) -> bool {
        self.0 & ATT_PERM_READ_ENCRYPT != 0
    }

    pub const fn write_requires_encryption(&self) -> bool {
        self.0 & ATT_PERM_WRITE_ENCRYPT != 0
    }

    pub const fn read_requires_authentication(&self) -> bool {
        self.0 & ATT_PERM_READ_AUTHEN != 0
    }

    pub const fn write_requires_authentication(&self) -> bool {
        self.0 & ATT_PERM_WRITE_AUTHEN != 0
    }

    pub const fn read_requires_authorization(&self) -> bool {
        self.0 & ATT_PERM_READ_AUTHOR != 0
    }

    pub const fn write_requires_authorization(&self) -> bool {
        self.0 & ATT_PERM_WRITE_AUTHOR != 0
    }

    /// Checks a read against the link's security state.
    pub fn check_read(&self, link: LinkSecurity) -> Result<(), AttErrorCode> {
        if !self.can_read() {
            return Err(AttErrorCode::ReadNotPermitted);
        }
        if self.read_requires_authentication()
            && link.level < SecurityLevel::EncryptionWithAuthentication
        {
            return Err(AttErrorCode::InsufficientAuthentication);
        }
        if self.read_requires_encryption() && link.level < SecurityLevel::EncryptionOnly {
            return Err(AttErrorCode::InsufficientEncryption);
        }
        if self.read_requires_authorization() && !link.authorized {
            return Err(AttErrorCode::InsufficientAuthorization);
        }
        Ok(())
    }

    /// Checks a write against the link's security state.
    pub fn check_write(&self, link: LinkSecurity) -> Result<(), AttErrorCode> {
        if !self.can_write() {
            return Err(AttErrorCode::WriteNotPermitted);
        }
        if self.write_requires_authentication()
            && link.level < SecurityLevel::EncryptionWithAuthentication
        {
            return Err(AttErrorCode::InsufficientAuthentication);
        }
        if self.write_requires_encryption() && link.level < SecurityLevel::EncryptionOnly {
            return Err(AttErrorCode::InsufficientEncryption);
        }
        if self.write_requires_authorization() && !link.authorized {
            return Err(AttErrorCode::InsufficientAuthorization);
        }
        Ok(())
    }
}

impl std::ops::BitOr for AttPermissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
