use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::num::NonZeroU16;

use futures_util::io::{AsyncWrite, AsyncWriteExt, Cursor};

use crate::config::Config;
use crate::params::ParamMap;
use crate::protocol::{EndRequestBuilder, ProtocolStatus, RecordHeader, RecordType, Role};
use crate::server::tasks::ShutdownSignal;


/// The final status of a FastCGI request, sent in its EndRequest record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// The request was processed. The value is the application status, as
    /// would be passed to exit(3) in regular CGI.
    Complete(i32),
    /// The request was rejected because the connection is busy with another
    /// request.
    CantMpxConn,
    /// The request was rejected because the application is overloaded.
    Overloaded,
    /// The request was rejected because its role is not supported.
    UnknownRole,
}

impl ExitStatus {
    /// A successfully completed request.
    pub const SUCCESS: Self = Self::Complete(0);
    /// A request that failed in the application.
    pub const FAILURE: Self = Self::Complete(1);

    /// Returns the EndRequest record that reports this status.
    pub(crate) fn to_record(self, request_id: u16) -> EndRequestBuilder {
        let builder = EndRequestBuilder::new(request_id);
        match self {
            Self::Complete(app_status) => builder.app_status(app_status),
            Self::CantMpxConn => builder.protocol_status(ProtocolStatus::CantMpxConn),
            Self::Overloaded => builder.protocol_status(ProtocolStatus::Overloaded),
            Self::UnknownRole => builder.protocol_status(ProtocolStatus::UnknownRole),
        }
    }
}

impl Default for ExitStatus {
    #[inline]
    fn default() -> Self {
        Self::SUCCESS
    }
}


/// The lifecycle phase of an [`InFlight`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// BeginRequest was received, nothing else yet.
    AwaitingParams,
    /// Params or Stdin records are arriving.
    AccumulatingBody,
    /// The body is complete. No further input is accepted.
    Ended,
}

/// A request that is being assembled from incoming records.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub(crate) request_id: NonZeroU16,
    pub(crate) role: Role,
    pub(crate) keep_conn: bool,
    pub(crate) params: ParamMap,
    pub(crate) body: Vec<u8>,
    phase: Phase,
    max_body_len: Option<usize>,
}

impl InFlight {
    pub(crate) fn new(request_id: NonZeroU16, role: Role, keep_conn: bool, config: &Config) -> Self {
        Self {
            request_id, role, keep_conn,
            params: ParamMap::new(),
            body: Vec::new(),
            phase: Phase::AwaitingParams,
            max_body_len: config.max_body_len,
        }
    }

    #[inline]
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Merges a Params record into the request. Later values win.
    pub(crate) fn push_params(&mut self, params: ParamMap) {
        if self.phase == Phase::Ended {
            tracing::debug!(request_id = self.request_id, "Params after end of body ignored");
            return;
        }
        self.phase = Phase::AccumulatingBody;
        self.params.merge(params);
    }

    /// Appends a Stdin record to the body.
    ///
    /// Returns `true` if `data` is empty, which marks the end of the body.
    /// Bytes beyond the body limit are dropped.
    pub(crate) fn push_stdin(&mut self, data: &[u8]) -> bool {
        if self.phase == Phase::Ended {
            tracing::debug!(request_id = self.request_id, "Stdin after end of body ignored");
            return false;
        }
        if data.is_empty() {
            self.phase = Phase::Ended;
            return true;
        }

        self.phase = Phase::AccumulatingBody;
        let room = match self.max_body_len {
            Some(max) => max.saturating_sub(self.body.len()),
            None => data.len(),
        };
        if room < data.len() {
            tracing::debug!(
                request_id = self.request_id, dropped = data.len() - room,
                "request body exceeds limit, truncating",
            );
        }
        self.body.extend_from_slice(&data[..room.min(data.len())]);
        false
    }
}


const PADDING: [u8; 8] = [0; 8];

/// The handler's view of a single request.
///
/// The request's parameters and body are fully received. Output written
/// via [`Context::write`] is sent immediately as Stdout records.
pub struct Context<'w> {
    request: InFlight,
    writer: &'w mut (dyn AsyncWrite + Send + Unpin),
    /// The record being sent. Bytes before `pos` are already written.
    buf: Vec<u8>,
    pos: usize,
    chunk_len: usize,
    terminate_streams: bool,
    status: ExitStatus,
    ended: bool,
    wrote_stderr: bool,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    shutdown: ShutdownSignal,
}

impl<'w> Context<'w> {
    pub(crate) fn new(
        request: InFlight,
        writer: &'w mut (dyn AsyncWrite + Send + Unpin),
        config: &Config,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            request, writer,
            buf: Vec::new(),
            pos: 0,
            chunk_len: config.chunk_len(),
            terminate_streams: config.terminate_streams,
            status: ExitStatus::SUCCESS,
            ended: false,
            wrote_stderr: false,
            remote_addr: None,
            local_addr: None,
            shutdown,
        }
    }

    pub(crate) fn with_addrs(mut self, remote: Option<SocketAddr>, local: Option<SocketAddr>) -> Self {
        self.remote_addr = remote;
        self.local_addr = local;
        self
    }

    /// Returns the request's ID on its connection.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> u16 {
        self.request.request_id.get()
    }

    /// Returns the role of the application in this request. This is always
    /// [`Role::Responder`] for requests that reach a handler.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.request.role
    }

    /// Tests whether the web server keeps the connection open after this
    /// request.
    #[inline]
    #[must_use]
    pub fn keep_conn(&self) -> bool {
        self.request.keep_conn
    }

    /// Returns the address of the web server, if known.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns the local address the connection was accepted on, if known.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the request's parameters.
    #[inline]
    #[must_use]
    pub fn params(&self) -> &ParamMap {
        &self.request.params
    }

    /// Returns the complete request body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.request.body
    }

    /// Returns the request body as an asynchronous reader.
    #[inline]
    #[must_use]
    pub fn body_reader(&self) -> Cursor<&[u8]> {
        Cursor::new(self.request.body.as_slice())
    }

    /// Sets the status reported when the request ends without an explicit
    /// status.
    #[inline]
    pub fn set_status(&mut self, status: ExitStatus) {
        self.status = status;
    }

    /// Tests whether the EndRequest record was already sent.
    #[inline]
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Returns a future that resolves once the server begins shutting down.
    ///
    /// Long-running handlers can race their work against it to finish early.
    pub fn shutdown(&self) -> impl Future<Output = ()> + Send + 'static {
        let signal = self.shutdown.clone();
        async move { signal.wait().await }
    }

    /// Writes `data` to the response's Stdout stream.
    ///
    /// Large writes are split into multiple records. Writing nothing is a
    /// no-op, as an empty record would terminate the stream. If the future
    /// is dropped early, the record in progress is completed by the next
    /// write or [`Context::end`].
    ///
    /// # Errors
    /// Returns an error if the request has already ended or the connection
    /// fails.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_stream(RecordType::Stdout, data).await
    }

    /// Writes `data` to the response's Stderr stream.
    ///
    /// # Errors
    /// Returns an error if the request has already ended or the connection
    /// fails.
    pub async fn write_stderr(&mut self, data: &[u8]) -> io::Result<()> {
        self.wrote_stderr |= !data.is_empty();
        self.write_stream(RecordType::Stderr, data).await
    }

    async fn write_stream(&mut self, rtype: RecordType, data: &[u8]) -> io::Result<()> {
        debug_assert!(rtype.is_output_stream());
        if self.ended {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "request already ended"));
        }
        self.send_pending().await?;
        for chunk in data.chunks(self.chunk_len) {
            self.put_record(rtype, chunk);
            self.send_pending().await?;
        }
        Ok(())
    }

    /// Writes the unsent remainder of `buf`.
    ///
    /// Progress is recorded after every partial write, so a cancelled call
    /// leaves the rest of the record for the next one. Records are never
    /// interleaved with a half-written predecessor.
    async fn send_pending(&mut self) -> io::Result<()> {
        while self.pos < self.buf.len() {
            let n = self.writer.write(&self.buf[self.pos..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.pos += n;
        }
        Ok(())
    }

    fn put_record(&mut self, rtype: RecordType, content: &[u8]) {
        // chunk_len never exceeds u16::MAX
        let len = u16::try_from(content.len()).unwrap_or(u16::MAX);
        let mut head = RecordHeader::new(rtype, self.request_id());
        head.set_lengths(len);

        self.buf.clear();
        self.pos = 0;
        self.buf.extend_from_slice(&head.to_bytes());
        self.buf.extend_from_slice(&content[..len.into()]);
        self.buf.extend_from_slice(&PADDING[..head.padding_length.into()]);
        crate::macros::trace!(request_id = head.request_id, ?rtype, len, "record sent");
    }

    /// Ends the request with the status set via [`Context::set_status`].
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    #[inline]
    pub async fn end(&mut self) -> io::Result<()> {
        self.end_with(self.status).await
    }

    /// Ends the request with `status`, sending the EndRequest record.
    ///
    /// Only the first call chooses the status. Later calls just finish
    /// sending output that an earlier, cancelled call left incomplete.
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn end_with(&mut self, status: ExitStatus) -> io::Result<()> {
        self.send_pending().await?;
        if self.ended {
            return self.writer.flush().await;
        }
        self.ended = true;
        self.status = status;

        self.buf.clear();
        self.pos = 0;
        if self.terminate_streams {
            let request_id = self.request_id();
            self.buf.extend_from_slice(&RecordHeader::new(RecordType::Stdout, request_id).to_bytes());
            if self.wrote_stderr {
                self.buf.extend_from_slice(&RecordHeader::new(RecordType::Stderr, request_id).to_bytes());
            }
        }
        status.to_record(self.request_id()).into_record().put(&mut self.buf);
        self.send_pending().await?;
        self.writer.flush().await?;

        tracing::debug!(request_id = self.request_id(), ?status, "request ended");
        Ok(())
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request.request_id)
            .field("role", &self.request.role)
            .field("params", &self.request.params.len())
            .field("body", &self.request.body.len())
            .field("status", &self.status)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use futures_util::io::AsyncReadExt;
    use crate::protocol::{aligned_padding, RawHeader};
    use super::*;

    fn in_flight(config: &Config) -> InFlight {
        InFlight::new(NonZeroU16::new(1).unwrap(), Role::Responder, false, config)
    }

    /// Splits the output into (type, request id, content) triples.
    fn records(mut out: &[u8]) -> Vec<(u8, u16, Vec<u8>)> {
        let mut records = Vec::new();
        while !out.is_empty() {
            let head = RawHeader::from_bytes(out[..8].try_into().unwrap());
            let content = out[8..(8 + usize::from(head.content_length))].to_vec();
            assert_eq!(usize::from(head.padding_length), usize::from(aligned_padding(content.len())));
            records.push((head.rtype, head.request_id, content));
            out = &out[(8 + head.body_len())..];
        }
        records
    }

    #[test]
    fn exit_status_record() {
        let body = ExitStatus::Complete(-3).to_record(1).body();
        assert_eq!((body.app_status, body.protocol_status), (-3, ProtocolStatus::RequestComplete));
        let body = ExitStatus::UnknownRole.to_record(1).body();
        assert_eq!((body.app_status, body.protocol_status), (0, ProtocolStatus::UnknownRole));
        assert_eq!(ExitStatus::default(), ExitStatus::SUCCESS);
    }

    #[test]
    fn phases() {
        let config = Config::default();
        let mut req = in_flight(&config);
        assert_eq!(req.phase(), Phase::AwaitingParams);

        req.push_params([("A", &b"1"[..])].into_iter().collect());
        assert_eq!(req.phase(), Phase::AccumulatingBody);
        assert!(!req.push_stdin(b"abc"));
        assert!(req.push_stdin(b""));
        assert_eq!(req.phase(), Phase::Ended);

        // Input after the end is ignored
        assert!(!req.push_stdin(b"def"));
        req.push_params([("B", &b"2"[..])].into_iter().collect());
        assert_eq!(req.body, b"abc");
        assert!(!req.params.contains("B"));
    }

    #[test]
    fn body_limit() {
        let config = Config::default().with_max_body_len(Some(10));
        let mut req = in_flight(&config);
        req.push_stdin(b"0123456");
        req.push_stdin(b"789abc");
        req.push_stdin(b"d");
        assert_eq!(req.body, b"0123456789");

        let config = Config::default().with_max_body_len(None);
        let mut req = in_flight(&config);
        let data = vec![7; 100_000];
        req.push_stdin(&data);
        assert_eq!(req.body.len(), 100_000);
    }

    #[tokio::test]
    async fn write_chunks() {
        let config = Config::default().with_write_chunk_size(4);
        let mut out = Vec::new();
        let mut ctx = Context::new(in_flight(&config), &mut out, &config, ShutdownSignal::new());
        ctx.write(b"0123456789").await.unwrap();
        ctx.write(b"").await.unwrap();
        ctx.end().await.unwrap();
        drop(ctx);

        let records = records(&out);
        let contents: Vec<_> = records.iter().map(|(t, _, c)| (*t, c.as_slice())).collect();
        assert_eq!(contents, [
            (6, &b"0123"[..]),
            (6, &b"4567"[..]),
            (6, &b"89"[..]),
            (3, &[0, 0, 0, 0, 0, 0, 0, 0][..]),
        ]);
    }

    #[tokio::test]
    async fn end_once() {
        let config = Config::default();
        let mut out = Vec::new();
        let mut ctx = Context::new(in_flight(&config), &mut out, &config, ShutdownSignal::new());
        ctx.set_status(ExitStatus::Complete(7));
        ctx.end().await.unwrap();
        assert!(ctx.is_ended());
        ctx.end_with(ExitStatus::FAILURE).await.unwrap();
        ctx.end().await.unwrap();
        assert!(ctx.write(b"late").await.is_err());
        drop(ctx);

        let records = records(&out);
        assert_eq!(records, [(3, 1, vec![0, 0, 0, 7, 0, 0, 0, 0])]);
    }

    #[tokio::test]
    async fn cancelled_write_completes_record() {
        use std::time::Duration;
        use tokio::io::AsyncReadExt as _;
        use tokio_util::compat::TokioAsyncWriteCompatExt;

        let config = Config::default();
        let (mut client, server) = tokio::io::duplex(256);
        let mut writer = server.compat_write();
        let mut ctx = Context::new(in_flight(&config), &mut writer, &config, ShutdownSignal::new());

        // Nobody reads yet, so the write stalls once the pipe is full
        let res = tokio::time::timeout(Duration::from_millis(50), ctx.write(&[b'z'; 5000])).await;
        assert!(res.is_err());

        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            client.read_to_end(&mut out).await.unwrap();
            out
        });
        ctx.end().await.unwrap();
        drop(ctx);
        writer.close().await.unwrap();

        let out = reader.await.unwrap();
        let records = records(&out);
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].0, records[0].2.len()), (6, 5000));
        assert!(records[0].2.iter().all(|&b| b == b'z'));
        assert_eq!(records[1], (3, 1, vec![0; 8]));
    }

    #[tokio::test]
    async fn terminated_streams() {
        let config = Config::default().with_terminate_streams(true);
        let mut out = Vec::new();
        let mut ctx = Context::new(in_flight(&config), &mut out, &config, ShutdownSignal::new());
        ctx.write(b"out").await.unwrap();
        ctx.write_stderr(b"err").await.unwrap();
        ctx.end().await.unwrap();
        drop(ctx);

        let types: Vec<_> = records(&out).into_iter().map(|(t, _, c)| (t, c.len())).collect();
        assert_eq!(types, [(6, 3), (7, 3), (6, 0), (7, 0), (3, 8)]);
    }

    #[tokio::test]
    async fn accessors() {
        let config = Config::default();
        let mut req = in_flight(&config);
        req.push_params([("REQUEST_METHOD", &b"POST"[..])].into_iter().collect());
        req.push_stdin(b"payload");

        let remote = "10.0.0.1:4567".parse().unwrap();
        let mut out = Vec::new();
        let ctx = Context::new(req, &mut out, &config, ShutdownSignal::new())
            .with_addrs(Some(remote), None);
        assert_eq!(ctx.request_id(), 1);
        assert_eq!(ctx.role(), Role::Responder);
        assert!(!ctx.keep_conn());
        assert_eq!(ctx.remote_addr(), Some(remote));
        assert_eq!(ctx.local_addr(), None);
        assert_eq!(ctx.params().get_str("request_method"), Some("POST"));

        let mut body = String::new();
        ctx.body_reader().read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "payload");
        assert_eq!(ctx.body(), b"payload");
    }

    #[tokio::test]
    async fn shutdown_future() {
        let config = Config::default();
        let signal = ShutdownSignal::new();
        let mut out = Vec::new();
        let ctx = Context::new(in_flight(&config), &mut out, &config, signal.clone());
        let wait = ctx.shutdown();
        signal.trigger();
        wait.await;
    }
}
