use std::fmt;

use super::Error as ProtocolError;
use crate::ext::{NetRead, NetWrite};


/// A [`u32`] which can be variably encoded in either 1 or 4 bytes.
///
/// Values below 128 take a single byte. Larger values take 4 bytes in network
/// byte order with the high bit of the first byte set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VarInt(u32);

impl VarInt {
    /// The bit indicating whether the 4-byte encoding is used.
    const LONG_BIT: u8 = 1 << 7;
    /// The maximum value a [`VarInt`] can encode.
    pub const MAX: Self = VarInt((1 << 31) - 1);

    /// Decodes a [`VarInt`] from the front of `data`.
    ///
    /// Returns [`None`] and leaves `data` untouched if the encoding is
    /// incomplete.
    pub fn take(data: &mut &[u8]) -> Option<Self> {
        let first = *data.first()?;
        if first & Self::LONG_BIT == 0 {
            *data = &data[1..];
            return Some(first.into());
        }

        let raw = data.take_u32()?;
        Some(Self(raw & !(u32::from(Self::LONG_BIT) << 24)))
    }

    /// Appends the encoded [`VarInt`] to `out`, returning the number of bytes
    /// written.
    pub fn put(self, out: &mut impl NetWrite) -> usize {
        if self < Self::LONG_BIT.into() {
            #[allow(clippy::cast_possible_truncation)]
            out.put_u8(self.0 as u8);
            1
        } else {
            out.put_u32(self.0 | (u32::from(Self::LONG_BIT) << 24));
            4
        }
    }

    /// Converts the [`VarInt`] into a [`usize`], saturating at [`usize::MAX`].
    ///
    /// On lower-end platforms, [`usize`] may be smaller than [`u32`]. Saturating
    /// in these cases is useful for indexing, which is bounded by [`usize::MAX`]
    /// because of addressing limitations anyway.
    #[inline]
    #[must_use]
    pub fn to_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl From<VarInt> for u32 {
    #[inline]
    fn from(v: VarInt) -> Self {
        v.0
    }
}

impl From<u8> for VarInt {
    #[inline]
    fn from(v: u8) -> Self {
        Self(v.into())
    }
}

impl From<u16> for VarInt {
    #[inline]
    fn from(v: u16) -> Self {
        Self(v.into())
    }
}

impl TryFrom<u32> for VarInt {
    type Error = ProtocolError;

    /// Converts a [`u32`] into a [`VarInt`], unless the [`u32`] is too large.
    ///
    /// # Errors
    /// Returns an error if the [`u32`] is too large to be variably-encoded.
    #[inline]
    fn try_from(v: u32) -> Result<Self, Self::Error> {
        if v > Self::MAX.into() {
            Err(ProtocolError::InvalidVarInt)
        } else {
            Ok(VarInt(v))
        }
    }
}

impl TryFrom<usize> for VarInt {
    type Error = ProtocolError;

    /// Converts a [`usize`] into a [`VarInt`], unless the [`usize`] is too large.
    ///
    /// # Errors
    /// Returns an error if the [`usize`] is too large to be variably-encoded.
    #[inline]
    fn try_from(v: usize) -> Result<Self, Self::Error> {
        u32::try_from(v)
            .map_err(|_| ProtocolError::InvalidVarInt)
            .and_then(VarInt::try_from)
    }
}

impl fmt::Display for VarInt {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
