/// Types representing the bodies of fixed-size FastCGI records.
pub mod body;
mod fields;
/// An encoder and decoder for FastCGI name-value pairs.
pub mod nv;
/// Decoding of incoming and building of outgoing FastCGI records.
pub mod record;
/// An encoder and decoder for FastCGI's variable-length integers.
pub mod varint;
mod vars;

pub use fields::*;
pub use record::{Decoder, EndRequestBuilder, Record, RecordBuilder};
pub use vars::*;


/// The fixed FastCGI request ID for management records.
pub const FCGI_NULL_REQUEST_ID: u16 = 0;

/// The maximum number of content bytes a single record can carry.
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;

/// The maximum number of padding bytes a single record can carry.
pub const MAX_PADDING_LEN: usize = u8::MAX as usize;


/// Error types that may occur while processing FastCGI protocol elements.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The FastCGI version field specifies an unknown version identifier.
    #[error("unknown FastCGI protocol version {0}")]
    UnknownVersion(u8),
    /// The FastCGI record type field specifies an unknown record type.
    #[error("unknown FastCGI record type {0}")]
    UnknownRecordType(u8),
    /// The FastCGI request role field specifies an unknown role identifier.
    #[error("unknown FastCGI role {0}")]
    UnknownRole(u16),
    /// The FastCGI response protocol status specifies an unknown status.
    #[error("unknown FastCGI protocol status {0}")]
    UnknownStatus(u8),
    /// The FastCGI variable name did not match any well-known value.
    #[error("unknown FastCGI protocol variable name")]
    UnknownVariable,

    /// The input value is too large to be encoded as a FastCGI VarInt.
    #[error("input is too large to be encoded as a FastCGI VarInt")]
    InvalidVarInt,
    /// A record field was assigned more bytes than its length prefix can
    /// describe. Larger payloads must be split into multiple records.
    #[error("{field} of {len} bytes exceeds the maximum of {max} bytes")]
    ValueTooLarge {
        /// The record field that was being set.
        field: &'static str,
        /// The rejected length.
        len: usize,
        /// The maximum length of the field.
        max: usize,
    },
}


/// A FastCGI record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHeader {
    /// The FastCGI version of this record.
    pub version: Version,
    /// The type of this record, defining its payload.
    pub rtype: RecordType,
    /// The ID of the request this record belongs to.
    pub request_id: u16,
    /// The length of this record's payload.
    pub content_length: u16,
    /// The amount of padding following this record.
    pub padding_length: u8,
}

impl RecordHeader {
    /// Creates a new [`RecordHeader`] with [`Version::V1`] and all
    /// lengths set to 0.
    #[inline]
    #[must_use]
    pub fn new(rtype: RecordType, request_id: u16) -> Self {
        Self { version: Version::V1, rtype, request_id, content_length: 0, padding_length: 0 }
    }

    /// Sets `content_length` and automatically calculates an
    /// appropriate `padding_length`.
    ///
    /// Up to 7 bytes of padding are used such that
    /// `content_length + padding_length` is a multiple of 8.
    #[inline]
    pub fn set_lengths(&mut self, content_length: u16) {
        self.content_length = content_length;
        self.padding_length = aligned_padding(content_length.into());
    }

    /// Tests whether this [`RecordHeader`] represents a management record.
    #[inline]
    #[must_use]
    pub fn is_management(self) -> bool {
        self.rtype.is_management() && self.request_id == FCGI_NULL_REQUEST_ID
    }

    /// The number of bytes in the wire format of a [`RecordHeader`].
    pub const LEN: usize = 8;

    /// Parses the input bytes into a FastCGI [`RecordHeader`].
    ///
    /// The reserved byte is ignored.
    ///
    /// # Errors
    /// Returns an error if the version or record type are invalid.
    #[inline]
    pub fn from_bytes(data: [u8; Self::LEN]) -> Result<Self, Error> {
        RawHeader::from_bytes(data).try_into()
    }

    /// Encodes the [`RecordHeader`] into its binary wire format.
    #[inline]
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        RawHeader {
            version: self.version.into(),
            rtype: self.rtype.into(),
            request_id: self.request_id,
            content_length: self.content_length,
            padding_length: self.padding_length,
            reserved: 0,
        }.to_bytes()
    }
}


impl TryFrom<RawHeader> for RecordHeader {
    type Error = Error;

    /// Validates the version before the record type.
    fn try_from(raw: RawHeader) -> Result<Self, Self::Error> {
        Ok(Self {
            version: Version::try_from(raw.version)?,
            rtype: RecordType::try_from(raw.rtype)?,
            request_id: raw.request_id,
            content_length: raw.content_length,
            padding_length: raw.padding_length,
        })
    }
}


/// An unvalidated record header, as found on the wire.
///
/// Unlike [`RecordHeader`], any version and type byte can be represented.
/// This is needed to skip records we cannot interpret while staying in sync
/// with the record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RawHeader {
    pub(crate) version: u8,
    pub(crate) rtype: u8,
    pub(crate) request_id: u16,
    pub(crate) content_length: u16,
    pub(crate) padding_length: u8,
    pub(crate) reserved: u8,
}

impl RawHeader {
    #[must_use]
    pub(crate) fn from_bytes(data: [u8; RecordHeader::LEN]) -> Self {
        Self {
            version: data[0],
            rtype: data[1],
            request_id: u16::from_be_bytes([data[2], data[3]]),
            content_length: u16::from_be_bytes([data[4], data[5]]),
            padding_length: data[6],
            reserved: data[7],
        }
    }

    #[must_use]
    pub(crate) fn to_bytes(self) -> [u8; RecordHeader::LEN] {
        let mut buf = [0; RecordHeader::LEN];
        buf[0] = self.version;
        buf[1] = self.rtype;
        buf[2..4].copy_from_slice(&self.request_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.content_length.to_be_bytes());
        buf[6] = self.padding_length;
        buf[7] = self.reserved;
        buf
    }

    /// The number of bytes following this header on the wire.
    #[inline]
    #[must_use]
    pub(crate) fn body_len(self) -> usize {
        usize::from(self.content_length) + usize::from(self.padding_length)
    }
}


/// Returns the number of padding bytes that 8-byte align a record body of
/// `content_length` bytes.
#[inline]
#[must_use]
pub fn aligned_padding(content_length: usize) -> u8 {
    // Always < 8, the cast cannot truncate
    ((8 - content_length % 8) % 8) as u8
}
