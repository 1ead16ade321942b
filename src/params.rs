use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::protocol::nv::NVIter;


const SMALLVEC_BASE_SIZE: usize = std::mem::size_of::<SmallVec<[u8; 0]>>();
// Maximum number of inline bytes before SmallVec exceeds SMALLVEC_BASE_SIZE.
// This derives from SmallVec's layout, which uses 1 usize as discriminant.
const INLINE_BYTES: usize = SMALLVEC_BASE_SIZE - std::mem::size_of::<usize>();
pub(crate) type SmallBytes = SmallVec<[u8; INLINE_BYTES]>;


/// A string wrapper for FastCGI parameter names.
///
/// CGI/1.1 variable names are case-insensitive (RFC 3875, Section 4.1), so
/// this wrapper compares, orders and hashes its string without regard to
/// ASCII case. The string itself is not modified.
#[derive(Debug, ref_cast::RefCastCustom)]
#[repr(transparent)]
pub struct ParamName(str);

impl ParamName {
    /// Wraps a string reference in a [`ParamName`].
    #[ref_cast::ref_cast_custom]
    // Unsafe code is generated and checked by ref-cast
    #[allow(unsafe_code, clippy::let_underscore_untyped)]
    #[must_use]
    pub const fn new(s: &str) -> &Self;

    /// Returns the name as it was received.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    fn norm_iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.as_bytes().iter().map(u8::to_ascii_uppercase)
    }
}

impl<'a, T: AsRef<str> + ?Sized> From<&'a T> for &'a ParamName {
    #[inline]
    fn from(v: &'a T) -> Self {
        ParamName::new(v.as_ref())
    }
}

impl fmt::Display for ParamName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl PartialEq for ParamName {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}
impl Eq for ParamName {}

impl PartialOrd for ParamName {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParamName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.norm_iter().cmp(other.norm_iter())
    }
}

impl Hash for ParamName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.norm_iter() {
            state.write_u8(byte);
        }
        // Ensure prefix-freeness
        state.write_u8(0xff);
    }
}


/// An owned variant of [`ParamName`] for use in data structures.
///
/// Most parameter names fit into [`CompactString`]'s inline buffer and
/// need no allocation.
#[derive(Clone)]
#[repr(transparent)]
pub struct OwnedParamName(CompactString);

impl OwnedParamName {
    /// Lossily decodes a raw name received on the wire.
    ///
    /// Invalid UTF-8 sequences are replaced and surrounding whitespace is
    /// trimmed.
    #[must_use]
    pub fn from_wire(raw: &[u8]) -> Self {
        let conv = CompactString::from_utf8_lossy(raw);
        if tracing::event_enabled!(tracing::Level::DEBUG) && raw != conv.as_bytes() {
            tracing::debug!(
                original = %raw.escape_ascii(), converted = %conv.escape_default(),
                "lossy parameter name conversion",
            );
        }

        let trimmed = conv.trim();
        if trimmed.len() == conv.len() {
            Self(conv)
        } else {
            Self(trimmed.into())
        }
    }

    #[inline]
    fn as_name(&self) -> &ParamName {
        self.borrow()
    }
}

impl From<&str> for OwnedParamName {
    #[inline]
    fn from(v: &str) -> Self {
        Self(v.into())
    }
}

impl AsRef<str> for OwnedParamName {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<ParamName> for OwnedParamName {
    #[inline]
    fn borrow(&self) -> &ParamName {
        ParamName::new(&self.0)
    }
}

impl ToOwned for ParamName {
    type Owned = OwnedParamName;

    #[inline]
    fn to_owned(&self) -> Self::Owned {
        self.as_str().into()
    }
}

impl fmt::Debug for OwnedParamName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OwnedParamName({:?})", self.as_ref())
    }
}

impl fmt::Display for OwnedParamName {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self.as_ref(), f)
    }
}

impl PartialEq for OwnedParamName {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.as_name() == other.as_name()
    }
}
impl Eq for OwnedParamName {}

impl PartialOrd for OwnedParamName {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OwnedParamName {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_name().cmp(other.as_name())
    }
}

impl Hash for OwnedParamName {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_name().hash(state);
    }
}


/// The parameters (CGI/1.1 environment) of a FastCGI request.
///
/// Names are case-insensitive. Inserting a name that is already present
/// replaces its value, so the most recently received value always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    params: BTreeMap<OwnedParamName, SmallBytes>,
}

impl ParamMap {
    /// Creates an empty [`ParamMap`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the name-value pairs of a single Params record's content.
    ///
    /// Decoding stops at the first pair whose length prefixes or payload are
    /// incomplete. That remainder is ignored.
    #[must_use]
    pub fn decode(content: &[u8]) -> Self {
        let mut map = Self::new();
        let mut nvit = NVIter::new(content);
        map.params.extend((&mut nvit).map(
            |(n, v)| (OwnedParamName::from_wire(n), SmallBytes::from_slice(v)),
        ));

        if let bytes @ 1.. = nvit.into_inner().len() {
            tracing::debug!(bytes, "Params record ends with incomplete name-value pair");
        }
        map
    }

    /// Inserts a single parameter, returning the value it replaced.
    pub fn insert(&mut self, name: &str, value: &[u8]) -> Option<Vec<u8>> {
        self.params.insert(name.trim().into(), SmallBytes::from_slice(value))
            .map(SmallBytes::into_vec)
    }

    /// Inserts all parameters of `newer`, replacing the values of any names
    /// already present.
    pub fn merge(&mut self, newer: ParamMap) {
        self.params.extend(newer.params);
    }

    /// Returns the number of parameters.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Tests whether there are no parameters.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Tests whether a parameter with the given name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(ParamName::new(name))
    }

    /// Retrieves the raw value stored for the name, if there is one.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.params.get(ParamName::new(name)).map(AsRef::as_ref)
    }

    /// Attempts to retrieve the string value stored for the name.
    ///
    /// Returns [`None`] if there is no corresponding value *or if the value
    /// is not valid UTF-8*. Use `ParamMap::get` for the raw bytes.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.params.get(ParamName::new(name)).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Returns an iterator over all parameters, ordered case-insensitively
    /// by name.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&ParamName, &[u8])> + Clone + '_ {
        self.params.iter().map(|(k, v)| (k.as_name(), v.as_ref()))
    }

    /// Converts all parameters into strings, replacing invalid UTF-8 in
    /// values.
    #[must_use]
    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(k, v)| (k.as_str().to_owned(), String::from_utf8_lossy(v).into_owned()))
            .collect()
    }
}

impl<'a> FromIterator<(&'a str, &'a [u8])> for ParamMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a [u8])>>(iter: I) -> Self {
        let mut map = Self::new();
        for (n, v) in iter {
            map.insert(n, v);
        }
        map
    }
}
