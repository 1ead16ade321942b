use super::varint::VarInt;
use super::Error as ProtocolError;
use crate::ext::{NetRead, NetWrite};


/// An iterator decoding complete name-value pairs from a record's content.
///
/// Iteration stops at the first pair whose length prefixes or payload are
/// incomplete. Whatever follows is left in [`NVIter::into_inner`].
#[derive(Debug, Clone)]
pub struct NVIter<'a> {
    data: &'a [u8],
}

impl<'a> NVIter<'a> {
    /// Creates a new [`NVIter`] over the referenced input bytes.
    #[inline]
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Extracts the remaining, undecoded input bytes from the iterator.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> &'a [u8] {
        self.data
    }
}

impl<'a> Iterator for NVIter<'a> {
    /// The name-value pair returned by the iterator.
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let mut cur = self.data;
        let name_len = VarInt::take(&mut cur)?.to_usize();
        let val_len = VarInt::take(&mut cur)?.to_usize();
        let name = cur.take_bytes(name_len)?;
        let value = cur.take_bytes(val_len)?;

        self.data = cur;
        Some((name, value))
    }
}

impl std::iter::FusedIterator for NVIter<'_> {}


/// Appends an encoded name-value pair to `out`, returning the number of bytes
/// written.
///
/// # Errors
/// Returns [`ProtocolError::InvalidVarInt`] if the name or value is too long
/// to be length-prefixed. Nothing is written in that case.
pub fn put((name, value): (&[u8], &[u8]), out: &mut impl NetWrite) -> Result<usize, ProtocolError> {
    let name_len = VarInt::try_from(name.len())?;
    let val_len = VarInt::try_from(value.len())?;

    let written = name_len.put(out) + val_len.put(out);
    out.put_slice(name);
    out.put_slice(value);
    Ok(written + name.len() + value.len())
}
