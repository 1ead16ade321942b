use smallvec::SmallVec;


/// An extension trait for reading network byte order integers from the front
/// of a byte slice.
///
/// Every method returns [`None`] without consuming anything if the slice is
/// too short. FastCGI treats such short reads as "more data needed", never as
/// corruption, so callers simply stop parsing.
pub(crate) trait NetRead<'a>: Sized {
    /// Removes the first `n` bytes from the slice and returns them.
    fn take_bytes(&mut self, n: usize) -> Option<&'a [u8]>;

    /// Removes a fixed-size array from the front of the slice.
    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let raw = self.take_bytes(N)?;
        raw.try_into().ok()
    }

    #[inline]
    fn take_u8(&mut self) -> Option<u8> {
        self.take_array::<1>().map(|[b]| b)
    }

    #[inline]
    fn take_u16(&mut self) -> Option<u16> {
        self.take_array().map(u16::from_be_bytes)
    }

    #[inline]
    fn take_u32(&mut self) -> Option<u32> {
        self.take_array().map(u32::from_be_bytes)
    }
}

impl<'a> NetRead<'a> for &'a [u8] {
    #[inline]
    fn take_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.len() < n {
            return None;
        }
        let (head, tail) = self.split_at(n);
        *self = tail;
        Some(head)
    }
}


/// A trait for appending network byte order integers to [`Vec<u8>`]-like
/// buffers.
///
/// The encoders in [`protocol`](crate::protocol) write into any
/// implementation of this trait.
pub trait NetWrite {
    /// Copies and appends all bytes from `other` in-order.
    fn put_slice(&mut self, other: &[u8]);

    #[inline]
    fn put_u8(&mut self, v: u8) {
        self.put_slice(&[v]);
    }

    #[inline]
    fn put_u16(&mut self, v: u16) {
        self.put_slice(&v.to_be_bytes());
    }

    #[inline]
    fn put_u32(&mut self, v: u32) {
        self.put_slice(&v.to_be_bytes());
    }
}

impl NetWrite for Vec<u8> {
    #[inline]
    fn put_slice(&mut self, other: &[u8]) {
        self.extend_from_slice(other);
    }
}

impl<const N: usize> NetWrite for SmallVec<[u8; N]> {
    #[inline]
    fn put_slice(&mut self, other: &[u8]) {
        self.extend_from_slice(other);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_network_order() {
        let mut data: &[u8] = &[0x01, 0x46, 0xaf, 0x11, 0xda, 0xef, 0x31, 0x7f];
        assert_eq!(data.take_u8(), Some(0x01));
        assert_eq!(data.take_u16(), Some(0x46af));
        assert_eq!(data.take_u32(), Some(0x11da_ef31));
        assert_eq!(data, &[0x7f]);
    }

    #[test]
    fn short_read_consumes_nothing() {
        let mut data: &[u8] = &[0xab, 0xcd, 0xef];
        assert_eq!(data.take_u32(), None);
        assert_eq!(data.take_bytes(4), None);
        assert_eq!(data.len(), 3);
        assert_eq!(data.take_bytes(3), Some(&[0xab, 0xcd, 0xef][..]));
        assert_eq!(data.take_u8(), None);
    }

    #[test]
    fn write_network_order() {
        let mut v = Vec::new();
        v.put_u8(1);
        v.put_u16(0x0a0b);
        v.put_u32(0xdead_beef);
        assert_eq!(v, [0x01, 0x0a, 0x0b, 0xde, 0xad, 0xbe, 0xef]);

        let mut sv = SmallVec::<[u8; 8]>::new();
        sv.put_u16(0x1234);
        sv.put_slice(b"xy");
        assert_eq!(&*sv, b"\x12\x34xy");
    }

    #[test]
    fn roundtrip() {
        for _ in 0..50 {
            let (a, b) = (fastrand::u16(..), fastrand::u32(..));
            let mut v = Vec::new();
            v.put_u16(a);
            v.put_u32(b);
            let mut r = &v[..];
            assert_eq!(r.take_u16(), Some(a));
            assert_eq!(r.take_u32(), Some(b));
            assert!(r.is_empty());
        }
    }
}
