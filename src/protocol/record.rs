use super::body::{BeginRequest, EndRequest};
use super::{aligned_padding, ProtocolStatus, ProtocolVariables, RawHeader, RecordHeader, RecordType};
use super::{Error as ProtocolError, MAX_CONTENT_LEN, MAX_PADDING_LEN};
use crate::ext::NetWrite;
use crate::params::ParamMap;


/// A decoded FastCGI record relevant to a Responder application.
///
/// Records the application would only ever send (such as `Stdout`) are
/// dropped by the [`Decoder`] and have no representation here.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Starts a new request.
    BeginRequest { request_id: u16, body: BeginRequest },
    /// One record of the request's name-value parameter stream.
    Params { request_id: u16, params: ParamMap },
    /// One record of the request body. Empty `data` terminates the body.
    Stdin { request_id: u16, data: Vec<u8> },
    /// The web server aborted the request.
    AbortRequest { request_id: u16 },
    /// A management query for protocol variables.
    GetValues { request_id: u16, vars: ProtocolVariables },
    /// A record with a type byte this implementation does not know.
    Unknown { rtype: u8, request_id: u16, content: Vec<u8> },
}

impl Record {
    /// Returns the request ID carried in the record's header.
    #[must_use]
    pub fn request_id(&self) -> u16 {
        match *self {
            Self::BeginRequest { request_id, .. }
            | Self::Params { request_id, .. }
            | Self::Stdin { request_id, .. }
            | Self::AbortRequest { request_id }
            | Self::GetValues { request_id, .. }
            | Self::Unknown { request_id, .. } => request_id,
        }
    }

    /// Interprets a fully framed record, returning [`None`] for records that
    /// are skipped.
    fn from_parts(raw: RawHeader, content: Vec<u8>) -> Option<Self> {
        let request_id = raw.request_id;
        let head = match RecordHeader::try_from(raw) {
            Ok(head) => head,
            Err(ProtocolError::UnknownRecordType(rtype)) => {
                return Some(Self::Unknown { rtype, request_id, content });
            },
            Err(e) => {
                let error: &(dyn std::error::Error + 'static) = &e;
                tracing::warn!(version = raw.version, request_id, error, "record skipped");
                return None;
            },
        };
        let rtype = head.rtype;
        crate::macros::trace!(?rtype, request_id, len = content.len(), "record decoded");

        Some(match rtype {
            RecordType::BeginRequest => {
                Self::BeginRequest { request_id, body: BeginRequest::from_content(&content) }
            },
            RecordType::Params => Self::Params { request_id, params: ParamMap::decode(&content) },
            RecordType::Stdin => Self::Stdin { request_id, data: content },
            RecordType::AbortRequest => Self::AbortRequest { request_id },
            RecordType::GetValues if head.is_management() => {
                Self::GetValues { request_id, vars: ProtocolVariables::from_query(&content) }
            },
            _ => {
                tracing::debug!(?rtype, request_id, "unexpected record type dropped");
                return None;
            },
        })
    }
}


#[derive(Debug, Clone, Default)]
struct HeaderState {
    buf: [u8; RecordHeader::LEN],
    filled: usize,
}

#[derive(Debug, Clone)]
struct BodyState {
    head: RawHeader,
    buf: Vec<u8>,
}

#[derive(Debug, Clone)]
enum State {
    Header(HeaderState),
    Body(BodyState),
}

impl Default for State {
    fn default() -> Self {
        Self::Header(HeaderState::default())
    }
}

enum Step {
    Yield(Record),
    Continue,
    Starved,
}

/// Moves up to `want` bytes from the front of `data` into `buf`.
fn fill(buf: &mut Vec<u8>, data: &mut &[u8], want: usize) {
    let n = want.min(data.len());
    let (head, tail) = data.split_at(n);
    buf.extend_from_slice(head);
    *data = tail;
}

impl State {
    fn drive(self, data: &mut &[u8]) -> (Step, Self) {
        match self {
            Self::Header(mut s) => {
                let n = (RecordHeader::LEN - s.filled).min(data.len());
                let (head, tail) = data.split_at(n);
                s.buf[s.filled..(s.filled + n)].copy_from_slice(head);
                *data = tail;
                s.filled += n;
                if s.filled < RecordHeader::LEN {
                    return (Step::Starved, Self::Header(s));
                }

                let head = RawHeader::from_bytes(s.buf);
                let buf = Vec::with_capacity(head.body_len());
                (Step::Continue, Self::Body(BodyState { head, buf }))
            },
            Self::Body(mut s) => {
                let want = s.head.body_len() - s.buf.len();
                fill(&mut s.buf, data, want);
                if s.buf.len() < s.head.body_len() {
                    return (Step::Starved, Self::Body(s));
                }

                // Padding is discarded
                s.buf.truncate(s.head.content_length.into());
                let step = match Record::from_parts(s.head, s.buf) {
                    Some(r) => Step::Yield(r),
                    None => Step::Continue,
                };
                (step, Self::default())
            },
        }
    }
}


/// An incremental FastCGI record decoder.
///
/// Bytes may be fed in arbitrarily sized chunks. A record split across
/// chunks is kept until its remainder arrives, so splitting the input at any
/// byte boundary yields exactly the same records as feeding it whole.
/// Incomplete input is never an error.
#[derive(Debug, Clone, Default)]
#[must_use = "Decoder must be fed input"]
pub struct Decoder {
    state: State,
}

impl Decoder {
    /// Creates a new [`Decoder`] expecting the start of a record.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes bytes from the front of `data` until a record is complete.
    ///
    /// Returns [`None`] once `data` is exhausted without completing another
    /// record. The partial record is retained and later calls resume where
    /// this one stopped.
    pub fn decode(&mut self, data: &mut &[u8]) -> Option<Record> {
        loop {
            let step = replace_with::replace_with_and_return(
                &mut self.state, State::default,
                |s| s.drive(data),
            );
            match step {
                Step::Yield(r) => return Some(r),
                Step::Continue => (),
                Step::Starved => return None,
            }
        }
    }

    /// Returns an iterator over all records completed by `data`.
    #[inline]
    pub fn records<'d>(&mut self, data: &'d [u8]) -> Records<'_, 'd> {
        Records { decoder: self, data }
    }

    /// Tests whether the decoder holds a partially received record.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        match &self.state {
            State::Header(s) => s.filled > 0,
            State::Body(_) => true,
        }
    }
}


/// An iterator over the records completed by a chunk of input.
///
/// Created by [`Decoder::records`].
#[derive(Debug)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Records<'a, 'd> {
    decoder: &'a mut Decoder,
    data: &'d [u8],
}

impl Iterator for Records<'_, '_> {
    type Item = Record;

    #[inline]
    fn next(&mut self) -> Option<Record> {
        self.decoder.decode(&mut self.data)
    }
}


/// A builder for a single outgoing FastCGI record.
///
/// The wire format is the 8-byte header, the content and the padding in that
/// order. Content and padding are checked against the limits of their length
/// fields when they are set.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RecordBuilder {
    version: u8,
    rtype: u8,
    request_id: u16,
    content: Vec<u8>,
    padding: Vec<u8>,
    reserved: u8,
}

impl RecordBuilder {
    /// Creates a new record builder of version 1 without content or padding.
    #[inline]
    pub fn new(rtype: RecordType, request_id: u16) -> Self {
        Self::with_raw_type(rtype.into(), request_id)
    }

    /// Creates a new record builder for an arbitrary type byte.
    #[inline]
    pub fn with_raw_type(rtype: u8, request_id: u16) -> Self {
        Self {
            version: 1, rtype, request_id,
            content: Vec::new(), padding: Vec::new(), reserved: 0,
        }
    }

    /// Overrides the version byte.
    #[inline]
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Overrides the reserved header byte.
    #[inline]
    pub fn reserved(mut self, reserved: u8) -> Self {
        self.reserved = reserved;
        self
    }

    /// Sets the record's content.
    ///
    /// # Errors
    /// Returns [`ProtocolError::ValueTooLarge`] if the content exceeds
    /// [`MAX_CONTENT_LEN`] bytes.
    pub fn content(mut self, content: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let content = content.into();
        if content.len() > MAX_CONTENT_LEN {
            return Err(ProtocolError::ValueTooLarge {
                field: "content", len: content.len(), max: MAX_CONTENT_LEN,
            });
        }
        self.content = content;
        Ok(self)
    }

    /// Sets the record's padding bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::ValueTooLarge`] if the padding exceeds
    /// [`MAX_PADDING_LEN`] bytes.
    pub fn padding(mut self, padding: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
        let padding = padding.into();
        if padding.len() > MAX_PADDING_LEN {
            return Err(ProtocolError::ValueTooLarge {
                field: "padding", len: padding.len(), max: MAX_PADDING_LEN,
            });
        }
        self.padding = padding;
        Ok(self)
    }

    /// Replaces the padding with zero bytes that 8-byte align the record body.
    #[inline]
    pub fn aligned(mut self) -> Self {
        self.padding = vec![0; aligned_padding(self.content.len()).into()];
        self
    }

    /// Returns the number of bytes [`RecordBuilder::build`] produces.
    #[inline]
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RecordHeader::LEN + self.content.len() + self.padding.len()
    }

    /// Appends the encoded record to `out`.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn put(&self, out: &mut impl NetWrite) {
        // Both lengths are bounded by the setters
        let head = RawHeader {
            version: self.version,
            rtype: self.rtype,
            request_id: self.request_id,
            content_length: self.content.len() as u16,
            padding_length: self.padding.len() as u8,
            reserved: self.reserved,
        };
        out.put_slice(&head.to_bytes());
        out.put_slice(&self.content);
        out.put_slice(&self.padding);
    }

    /// Encodes the record into its binary wire format.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.put(&mut out);
        out
    }
}


/// A builder for EndRequest records.
///
/// The content is always derived from the application and protocol status
/// and cannot be set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct EndRequestBuilder {
    request_id: u16,
    body: EndRequest,
}

impl EndRequestBuilder {
    /// Creates a builder for a successfully completed request.
    #[inline]
    pub fn new(request_id: u16) -> Self {
        Self {
            request_id,
            body: EndRequest { app_status: 0, protocol_status: ProtocolStatus::RequestComplete },
        }
    }

    /// Sets the application's exit status.
    #[inline]
    pub fn app_status(mut self, app_status: i32) -> Self {
        self.body.app_status = app_status;
        self
    }

    /// Sets the protocol-level status.
    #[inline]
    pub fn protocol_status(mut self, protocol_status: ProtocolStatus) -> Self {
        self.body.protocol_status = protocol_status;
        self
    }

    /// Returns the record body as currently configured.
    #[inline]
    #[must_use]
    pub fn body(&self) -> EndRequest {
        self.body
    }

    /// Converts into a generic [`RecordBuilder`] carrying the encoded body.
    pub fn into_record(self) -> RecordBuilder {
        // 8 content bytes are already aligned and never exceed the limit
        RecordBuilder {
            content: self.body.to_bytes().to_vec(),
            ..RecordBuilder::new(RecordType::EndRequest, self.request_id)
        }
    }

    /// Encodes the record into its binary wire format.
    #[inline]
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.into_record().build()
    }
}
