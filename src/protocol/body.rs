use super::Error as ProtocolError;
use super::{ProtocolStatus, RequestFlags, Role};
use crate::ext::NetRead;


/// The body of a [`RecordType::BeginRequest`](super::RecordType) FastCGI
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequest {
    /// The raw role identifier sent by the FastCGI client.
    pub role_id: u16,
    /// The control flags for this request.
    pub flags: RequestFlags,
}

impl BeginRequest {
    /// The number of bytes in the wire format of a [`BeginRequest`] body.
    pub const LEN: usize = 8;

    /// Creates a [`BeginRequest`] body for a known [`Role`].
    #[inline]
    #[must_use]
    pub fn new(role: Role, flags: RequestFlags) -> Self {
        Self { role_id: role.into(), flags }
    }

    /// Parses a BeginRequest record's content.
    ///
    /// The content is nominally 8 bytes long, but only the role (2 bytes) and
    /// the flags (1 byte) carry meaning. Shorter content is tolerated: a
    /// missing role reads as role 0, which no [`Role`] uses, and missing flags
    /// read as "close the connection afterwards".
    #[must_use]
    pub fn from_content(mut data: &[u8]) -> Self {
        let role_id = data.take_u16().unwrap_or(0);
        let flags = data.take_u8().map_or_else(RequestFlags::empty, RequestFlags::from_raw);
        Self { role_id, flags }
    }

    /// Returns the validated [`Role`] of this request.
    ///
    /// # Errors
    /// Returns [`ProtocolError::UnknownRole`] if the role identifier is not
    /// defined by FastCGI.
    #[inline]
    pub fn role(&self) -> Result<Role, ProtocolError> {
        Role::try_from(self.role_id)
    }

    /// Tests whether the connection should stay open after this request.
    #[inline]
    #[must_use]
    pub fn keep_conn(&self) -> bool {
        self.flags.keep_conn()
    }

    /// Encodes the [`BeginRequest`] record body into its binary wire format.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0; Self::LEN];
        buf[..2].copy_from_slice(&self.role_id.to_be_bytes());
        buf[2] = self.flags.into();
        buf
    }
}


/// The body of a [`RecordType::EndRequest`](super::RecordType) FastCGI
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    /// The application's response status code, as would be set via exit(3)
    /// in regular CGI.
    pub app_status: i32,
    /// The protocol status code for this response.
    pub protocol_status: ProtocolStatus,
}

impl EndRequest {
    /// The number of bytes in the wire format of an [`EndRequest`] body.
    pub const LEN: usize = 8;

    /// Parses the input bytes into a FastCGI [`EndRequest`] record body.
    ///
    /// # Errors
    /// Returns an error if the protocol status is invalid.
    pub fn from_bytes(data: [u8; Self::LEN]) -> Result<Self, ProtocolError> {
        Ok(Self {
            app_status: i32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            protocol_status: ProtocolStatus::try_from(data[4])?,
        })
    }

    /// Encodes the [`EndRequest`] record body into its binary wire format.
    ///
    /// The final three bytes are reserved and always zero.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0; Self::LEN];
        buf[..4].copy_from_slice(&self.app_status.to_be_bytes());
        buf[4] = self.protocol_status.into();
        buf
    }
}
