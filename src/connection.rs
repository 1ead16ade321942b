use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures_util::FutureExt;

use crate::config::Config;
use crate::handler::{Handler, HandlerError};
use crate::protocol::body::BeginRequest;
use crate::protocol::{self as fcgi, Decoder, ProtocolVariables, Record, RecordBuilder, RecordType, Role};
use crate::request::{Context, ExitStatus, InFlight};
use crate::server::tasks::ShutdownSignal;
use crate::server::{Events, NoEvents};


/// Errors that end a connection or a request on it.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Reading from or writing to the transport failed.
    #[error("connection I/O failed")]
    Io(#[from] io::Error),
    /// A handler returned an error. The request was ended with
    /// [`ExitStatus::FAILURE`], the connection stays usable.
    #[error("request handler failed")]
    Handler(#[source] HandlerError),
    /// A handler panicked. The request was ended with
    /// [`ExitStatus::FAILURE`], the connection stays usable.
    #[error("request handler panicked: {0}")]
    HandlerPanicked(String),
    /// The peer sent nothing within the configured idle timeout.
    #[error("connection idle timeout elapsed")]
    IdleTimeout,
    /// An outgoing record could not be encoded.
    #[error("unexpected protocol error: {0}")]
    Protocol(#[from] fcgi::Error),
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// How a record's request ID relates to the in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Current,
    Other,
    Idle,
    Null,
}


/// A single FastCGI connection from a web server.
///
/// The connection decodes incoming records, assembles one request at a time
/// and dispatches it to the handler once its body is complete. Requests for
/// other IDs arriving in the meantime are refused, as the application does
/// not multiplex.
pub struct Connection<R, W> {
    reader: R,
    writer: W,
    config: Arc<Config>,
    handler: Option<Arc<dyn Handler>>,
    events: Arc<dyn Events>,
    shutdown: ShutdownSignal,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    decoder: Decoder,
    current: Option<InFlight>,
    keep_conn: bool,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    /// Creates a connection over the given stream halves.
    ///
    /// Without a handler, every request is ended as soon as its body is
    /// complete.
    pub fn new(reader: R, writer: W, config: Arc<Config>) -> Self {
        Self {
            reader, writer, config,
            handler: None,
            events: Arc::new(NoEvents),
            shutdown: ShutdownSignal::new(),
            remote_addr: None,
            local_addr: None,
            decoder: Decoder::new(),
            current: None,
            keep_conn: false,
        }
    }

    /// Sets the handler serving this connection's requests.
    #[must_use]
    pub fn with_handler(mut self, handler: Option<Arc<dyn Handler>>) -> Self {
        self.handler = handler;
        self
    }

    /// Sets the sink for errors of this connection's requests.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn Events>) -> Self {
        self.events = events;
        self
    }

    /// Sets the addresses exposed to handlers via [`Context`].
    #[must_use]
    pub fn with_addrs(mut self, remote: Option<SocketAddr>, local: Option<SocketAddr>) -> Self {
        self.remote_addr = remote;
        self.local_addr = local;
        self
    }

    #[must_use]
    pub(crate) fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Serves requests until the peer closes the connection, a request
    /// without the keep-conn flag ends or the server shuts down.
    ///
    /// # Errors
    /// Returns an error if the transport fails or the idle timeout elapses.
    /// Handler failures are reported through [`Events::on_error`] instead.
    pub async fn run(mut self) -> Result<(), Error> {
        let mut buf = vec![0; self.config.buffer_size.max(1)];
        let shutdown = self.shutdown.clone();

        loop {
            let n = tokio::select! {
                biased;
                () = shutdown.wait() => {
                    tracing::debug!("connection closed for shutdown");
                    break;
                },
                r = self.read(&mut buf) => r?,
            };
            if n == 0 {
                if self.decoder.has_partial() || self.current.is_some() {
                    tracing::debug!("peer closed connection mid-request");
                } else {
                    tracing::debug!("peer closed connection");
                }
                break;
            }

            let mut data = &buf[..n];
            while let Some(record) = self.decoder.decode(&mut data) {
                if self.dispatch(record).await? == Flow::Close {
                    tracing::debug!("closing connection after request");
                    self.writer.close().await?;
                    return Ok(());
                }
            }
        }

        self.writer.close().await?;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let read = self.reader.read(buf);
        match self.config.idle_timeout {
            Some(t) => Ok(tokio::time::timeout(t, read).await.map_err(|_| Error::IdleTimeout)??),
            None => Ok(read.await?),
        }
    }

    fn route(&self, request_id: u16) -> Route {
        match &self.current {
            _ if request_id == fcgi::FCGI_NULL_REQUEST_ID => Route::Null,
            Some(req) if req.request_id.get() == request_id => Route::Current,
            Some(_) => Route::Other,
            None => Route::Idle,
        }
    }

    fn after_end(&self) -> Flow {
        if self.keep_conn { Flow::Continue } else { Flow::Close }
    }

    async fn dispatch(&mut self, record: Record) -> Result<Flow, Error> {
        let request_id = record.request_id();
        match (record, self.route(request_id)) {
            (Record::BeginRequest { body, .. }, route) => self.begin(request_id, body, route).await,

            (Record::Params { params, .. }, Route::Current) => {
                if let Some(req) = &mut self.current {
                    req.push_params(params);
                }
                Ok(Flow::Continue)
            },
            (Record::Stdin { data, .. }, Route::Current) => {
                let complete = self.current.as_mut().is_some_and(|req| req.push_stdin(&data));
                if complete {
                    self.respond().await
                } else {
                    Ok(Flow::Continue)
                }
            },
            (Record::AbortRequest { .. }, Route::Current) => {
                tracing::debug!(request_id, "request aborted by peer");
                self.current = None;
                self.send_end(request_id, ExitStatus::SUCCESS).await?;
                Ok(self.after_end())
            },
            (Record::Params { .. } | Record::Stdin { .. } | Record::AbortRequest { .. }, Route::Other) => {
                let Some(req) = self.current.take() else { return Ok(Flow::Continue); };
                tracing::warn!(
                    request_id, in_flight = req.request_id.get(),
                    "record for unknown request, ending in-flight request",
                );
                self.send_end(req.request_id.get(), ExitStatus::CantMpxConn).await?;
                Ok(self.after_end())
            },

            (Record::GetValues { vars, .. }, Route::Null) => {
                self.answer_values(vars).await?;
                Ok(Flow::Continue)
            },
            (Record::Unknown { rtype, .. }, _) => {
                tracing::info!(request_id, rtype, "unknown record type ignored");
                Ok(Flow::Continue)
            },
            (record, route) => {
                tracing::debug!(request_id, ?route, ?record, "record without matching request ignored");
                Ok(Flow::Continue)
            },
        }
    }

    async fn begin(&mut self, request_id: u16, body: BeginRequest, route: Route) -> Result<Flow, Error> {
        let Some(id) = NonZeroU16::new(request_id) else {
            tracing::warn!(?body, "BeginRequest with null request ID ignored");
            return Ok(Flow::Continue);
        };
        match route {
            Route::Other => {
                tracing::info!(request_id, "multiplexed request rejected");
                self.send_end(request_id, ExitStatus::CantMpxConn).await?;
                return Ok(Flow::Continue);
            },
            Route::Current => tracing::warn!(request_id, "duplicate BeginRequest replaces in-flight request"),
            Route::Idle | Route::Null => (),
        }

        self.current = None;
        self.keep_conn = body.keep_conn();
        match body.role() {
            Ok(role @ Role::Responder) => {
                tracing::debug!(request_id, keep_conn = self.keep_conn, "new request received");
                self.current = Some(InFlight::new(id, role, self.keep_conn, &self.config));
                Ok(Flow::Continue)
            },
            _ => {
                tracing::info!(request_id, role = body.role_id, "unknown role rejected");
                self.send_end(request_id, ExitStatus::UnknownRole).await?;
                Ok(self.after_end())
            },
        }
    }

    /// Runs the handler for the completed in-flight request and ends it.
    async fn respond(&mut self) -> Result<Flow, Error> {
        let Some(req) = self.current.take() else { return Ok(Flow::Continue); };
        let request_id = req.request_id;
        let handler = self.handler.clone();

        let mut ctx = Context::new(req, &mut self.writer, &self.config, self.shutdown.clone())
            .with_addrs(self.remote_addr, self.local_addr);
        let failure = match handler {
            None => None,
            Some(h) => match AssertUnwindSafe(h.handle(&mut ctx)).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(Error::Handler(e)),
                Err(panic) => Some(Error::HandlerPanicked(panic_message(&*panic))),
            },
        };

        if failure.is_some() {
            ctx.end_with(ExitStatus::FAILURE).await?;
        } else {
            ctx.end().await?;
        }
        drop(ctx);

        if let Some(err) = failure {
            let error: &(dyn std::error::Error + 'static) = &err;
            tracing::error!(request_id = request_id.get(), error, "request handler failed");
            self.events.on_error(&err);
        }
        Ok(self.after_end())
    }

    async fn send_end(&mut self, request_id: u16, status: ExitStatus) -> Result<(), Error> {
        let record = status.to_record(request_id).build();
        self.writer.write_all(&record).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn answer_values(&mut self, vars: ProtocolVariables) -> Result<(), Error> {
        let mut content = Vec::new();
        vars.put_values(self.config.max_conns.get(), &mut content)?;
        let record = RecordBuilder::new(RecordType::GetValuesResult, fcgi::FCGI_NULL_REQUEST_ID)
            .content(content)?
            .aligned()
            .build();
        tracing::debug!(?vars, "GetValues answered");

        self.writer.write_all(&record).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}


#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    use super::*;
    use crate::handler::HandlerResult;
    use crate::protocol::{nv, RawHeader, RequestFlags};

    /// Echoes the request method and body.
    struct Echo;

    impl Handler for Echo {
        fn handle<'a>(&'a self, ctx: &'a mut Context<'_>) -> BoxFuture<'a, HandlerResult> {
            async move {
                let method = ctx.params().get_str("REQUEST_METHOD").unwrap_or("?").to_owned();
                let body = ctx.body().to_vec();
                ctx.write(b"Content-Type: text/plain\r\n\r\n").await?;
                ctx.write(method.as_bytes()).await?;
                ctx.write(&body).await?;
                Ok(())
            }.boxed()
        }
    }

    struct Failing;

    impl Handler for Failing {
        fn handle<'a>(&'a self, ctx: &'a mut Context<'_>) -> BoxFuture<'a, HandlerResult> {
            async move {
                ctx.write(b"partial").await?;
                Err("backend unavailable".into())
            }.boxed()
        }
    }

    struct Panicking;

    fn explode() -> HandlerResult {
        panic!("handler bug")
    }

    impl Handler for Panicking {
        fn handle<'a>(&'a self, _ctx: &'a mut Context<'_>) -> BoxFuture<'a, HandlerResult> {
            async move { explode() }.boxed()
        }
    }

    /// Ends the request itself with a custom status.
    struct EarlyEnd;

    impl Handler for EarlyEnd {
        fn handle<'a>(&'a self, ctx: &'a mut Context<'_>) -> BoxFuture<'a, HandlerResult> {
            async move {
                ctx.write(b"Status: 404 Not Found\r\n\r\n").await?;
                ctx.end_with(ExitStatus::Complete(4)).await?;
                ctx.set_status(ExitStatus::SUCCESS);
                Ok(())
            }.boxed()
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Events for Recorder {
        fn on_error(&self, error: &(dyn std::error::Error + 'static)) {
            self.0.lock().unwrap().push(error.to_string());
        }
    }

    fn begin(request_id: u16, role: Role, keep_conn: bool) -> Vec<u8> {
        let flags = if keep_conn { RequestFlags::KeepConn } else { RequestFlags::empty() };
        RecordBuilder::new(RecordType::BeginRequest, request_id)
            .content(BeginRequest::new(role, flags).to_bytes()).unwrap()
            .build()
    }

    fn params(request_id: u16, pairs: &[(&str, &str)]) -> Vec<u8> {
        let mut content = Vec::new();
        for (n, v) in pairs {
            nv::put((n.as_bytes(), v.as_bytes()), &mut content).unwrap();
        }
        RecordBuilder::new(RecordType::Params, request_id).content(content).unwrap().aligned().build()
    }

    fn stdin(request_id: u16, data: &[u8]) -> Vec<u8> {
        RecordBuilder::new(RecordType::Stdin, request_id).content(data).unwrap().aligned().build()
    }

    fn get_request(request_id: u16, keep_conn: bool) -> Vec<u8> {
        [
            begin(request_id, Role::Responder, keep_conn),
            params(request_id, &[("REQUEST_METHOD", "GET"), ("SCRIPT_NAME", "/")]),
            params(request_id, &[]),
            stdin(request_id, b""),
        ].concat()
    }

    /// Splits the output into (type, request id, content) triples.
    fn records(mut out: &[u8]) -> Vec<(RecordType, u16, Vec<u8>)> {
        let mut records = Vec::new();
        while !out.is_empty() {
            let head = RawHeader::from_bytes(out[..8].try_into().unwrap());
            let content = out[8..(8 + usize::from(head.content_length))].to_vec();
            let rtype = RecordType::try_from(head.rtype).unwrap();
            records.push((rtype, head.request_id, content));
            out = &out[(8 + head.body_len())..];
        }
        records
    }

    fn stdout_of(records: &[(RecordType, u16, Vec<u8>)], request_id: u16) -> Vec<u8> {
        records.iter()
            .filter(|(t, id, _)| *t == RecordType::Stdout && *id == request_id)
            .flat_map(|(_, _, c)| c.iter().copied())
            .collect()
    }

    /// Returns (app_status, protocol_status) of an EndRequest record.
    fn end_of(record: &(RecordType, u16, Vec<u8>)) -> (i32, u8) {
        assert_eq!(record.0, RecordType::EndRequest);
        let c = &record.2;
        (i32::from_be_bytes([c[0], c[1], c[2], c[3]]), c[4])
    }

    async fn serve(input: &[u8], config: Config, handler: Option<Arc<dyn Handler>>) -> Vec<u8> {
        serve_with(input, config, handler, Arc::new(NoEvents)).await.unwrap()
    }

    async fn serve_with(
        input: &[u8],
        config: Config,
        handler: Option<Arc<dyn Handler>>,
        events: Arc<dyn Events>,
    ) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        Connection::new(input, &mut out, Arc::new(config))
            .with_handler(handler)
            .with_events(events)
            .run().await?;
        Ok(out)
    }

    #[tokio::test]
    async fn minimal_get() {
        let out = serve(&get_request(1, false), Config::default(), Some(Arc::new(Echo))).await;
        let records = records(&out);
        assert_eq!(stdout_of(&records, 1), b"Content-Type: text/plain\r\n\r\nGET");
        let last = records.last().unwrap();
        assert_eq!(last.1, 1);
        assert_eq!(end_of(last), (0, 0));
    }

    #[tokio::test]
    async fn chunked_body() {
        let input = [
            begin(1, Role::Responder, false),
            params(1, &[("REQUEST_METHOD", "POST")]),
            params(1, &[]),
            stdin(1, b"hello "),
            stdin(1, b"world"),
            stdin(1, b""),
        ].concat();

        // Feeding a single byte per read must not change the outcome
        for buffer_size in [1, 3, 8192] {
            let config = Config { buffer_size, ..Config::default() };
            let out = serve(&input, config, Some(Arc::new(Echo))).await;
            let records = records(&out);
            assert_eq!(
                stdout_of(&records, 1),
                b"Content-Type: text/plain\r\n\r\nPOSThello world",
                "buffer size {buffer_size}",
            );
            assert_eq!(end_of(records.last().unwrap()), (0, 0));
        }
    }

    #[tokio::test]
    async fn unknown_record_interleaved() {
        let input = [
            begin(1, Role::Responder, false),
            RecordBuilder::with_raw_type(200, 1).content(&b"junk"[..]).unwrap().build(),
            params(1, &[("REQUEST_METHOD", "GET")]),
            RecordBuilder::with_raw_type(99, 0).build(),
            stdin(1, b""),
        ].concat();
        let out = serve(&input, Config::default(), Some(Arc::new(Echo))).await;
        let records = records(&out);
        assert_eq!(stdout_of(&records, 1), b"Content-Type: text/plain\r\n\r\nGET");
        assert_eq!(records.iter().filter(|r| r.0 == RecordType::EndRequest).count(), 1);
    }

    #[tokio::test]
    async fn max_body_len() {
        let input = [
            begin(1, Role::Responder, false),
            params(1, &[]),
            stdin(1, &[b'x'; 40]),
            stdin(1, &[b'y'; 40]),
            stdin(1, b""),
        ].concat();
        let config = Config::default().with_max_body_len(Some(50));
        let out = serve(&input, config, Some(Arc::new(Echo))).await;
        let stdout = stdout_of(&records(&out), 1);
        let body = &stdout[stdout.len() - 50..];
        assert_eq!(&body[..40], &[b'x'; 40]);
        assert_eq!(&body[40..], &[b'y'; 10]);
        assert_eq!(stdout.len(), "Content-Type: text/plain\r\n\r\n?".len() + 50);
    }

    #[tokio::test]
    async fn no_handler() {
        let out = serve(&get_request(5, false), Config::default(), None).await;
        let records = records(&out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, 5);
        assert_eq!(end_of(&records[0]), (0, 0));
    }

    #[tokio::test]
    async fn keep_alive() {
        let input = [get_request(1, true), get_request(2, true), get_request(3, false)].concat();
        let out = serve(&input, Config::default(), Some(Arc::new(Echo))).await;
        let records = records(&out);
        let ends: Vec<_> = records.iter()
            .filter(|r| r.0 == RecordType::EndRequest)
            .map(|r| r.1)
            .collect();
        assert_eq!(ends, [1, 2, 3]);
    }

    #[tokio::test]
    async fn close_without_keep_conn() {
        // Everything after the first request is never read
        let input = [get_request(1, false), get_request(2, false)].concat();
        let out = serve(&input, Config::default(), Some(Arc::new(Echo))).await;
        let records = records(&out);
        assert!(records.iter().all(|r| r.1 == 1));
    }

    #[tokio::test]
    async fn abort_request() {
        let input = [
            begin(1, Role::Responder, true),
            params(1, &[("REQUEST_METHOD", "GET")]),
            RecordBuilder::new(RecordType::AbortRequest, 1).build(),
            get_request(2, false),
        ].concat();
        let out = serve(&input, Config::default(), Some(Arc::new(Echo))).await;
        let records = records(&out);
        assert!(stdout_of(&records, 1).is_empty());
        assert_eq!(end_of(&records[0]), (0, 0));
        assert_eq!(records[0].1, 1);
        assert_eq!(stdout_of(&records, 2), b"Content-Type: text/plain\r\n\r\nGET");
    }

    #[tokio::test]
    async fn unknown_role() {
        let input = [
            begin(1, Role::Filter, true),
            get_request(2, false),
        ].concat();
        let out = serve(&input, Config::default(), Some(Arc::new(Echo))).await;
        let records = records(&out);
        assert_eq!(records[0].1, 1);
        assert_eq!(end_of(&records[0]), (0, 3));
        assert!(stdout_of(&records, 1).is_empty());
        assert!(!stdout_of(&records, 2).is_empty());
    }

    #[tokio::test]
    async fn multiplex_refused() {
        let input = [
            begin(1, Role::Responder, false),
            params(1, &[("REQUEST_METHOD", "GET")]),
            begin(2, Role::Responder, false),
            params(1, &[]),
            stdin(1, b""),
        ].concat();
        let out = serve(&input, Config::default(), Some(Arc::new(Echo))).await;
        let records = records(&out);
        assert_eq!(records[0].1, 2);
        assert_eq!(end_of(&records[0]), (0, 1));
        assert_eq!(stdout_of(&records, 1), b"Content-Type: text/plain\r\n\r\nGET");
        assert_eq!(end_of(records.last().unwrap()), (0, 0));
    }

    #[tokio::test]
    async fn mismatched_id_ends_request() {
        let input = [
            begin(1, Role::Responder, true),
            params(1, &[("REQUEST_METHOD", "GET")]),
            stdin(7, b"stray"),
            get_request(3, false),
        ].concat();
        let out = serve(&input, Config::default(), Some(Arc::new(Echo))).await;
        let records = records(&out);
        assert_eq!(records[0].1, 1);
        assert_eq!(end_of(&records[0]), (0, 1));
        assert!(stdout_of(&records, 1).is_empty());
        assert!(!stdout_of(&records, 3).is_empty());
    }

    #[tokio::test]
    async fn duplicate_begin_replaces() {
        let input = [
            begin(1, Role::Responder, false),
            params(1, &[("REQUEST_METHOD", "PUT")]),
            get_request(1, false),
        ].concat();
        let out = serve(&input, Config::default(), Some(Arc::new(Echo))).await;
        let records = records(&out);
        assert_eq!(stdout_of(&records, 1), b"Content-Type: text/plain\r\n\r\nGET");
        assert_eq!(records.iter().filter(|r| r.0 == RecordType::EndRequest).count(), 1);
    }

    #[tokio::test]
    async fn handler_ends_request() {
        let input = [get_request(1, true), get_request(2, false)].concat();
        let out = serve(&input, Config::default(), Some(Arc::new(EarlyEnd))).await;
        let records = records(&out);
        let ends: Vec<_> = records.iter()
            .filter(|r| r.0 == RecordType::EndRequest)
            .map(|r| (r.1, end_of(r)))
            .collect();
        assert_eq!(ends, [(1, (4, 0)), (2, (4, 0))]);
        assert_eq!(stdout_of(&records, 1), b"Status: 404 Not Found\r\n\r\n");
        assert_eq!(records.iter().filter(|r| r.1 == 1).last().map(|r| r.0), Some(RecordType::EndRequest));
    }

    #[tokio::test]
    async fn handler_error() {
        let events = Arc::new(Recorder::default());
        let out = serve_with(&get_request(1, false), Config::default(), Some(Arc::new(Failing)), events.clone())
            .await.unwrap();
        let records = records(&out);
        assert_eq!(stdout_of(&records, 1), b"partial");
        assert_eq!(end_of(records.last().unwrap()), (1, 0));
        assert_eq!(events.0.lock().unwrap().as_slice(), ["request handler failed"]);
    }

    #[tokio::test]
    async fn handler_panic() {
        let events = Arc::new(Recorder::default());
        let input = [get_request(1, true), get_request(2, false)].concat();
        let out = serve_with(&input, Config::default(), Some(Arc::new(Panicking)), events.clone())
            .await.unwrap();
        let ends: Vec<_> = records(&out).iter().map(|r| (r.1, end_of(r))).collect();
        assert_eq!(ends, [(1, (1, 0)), (2, (1, 0))]);
        assert_eq!(events.0.lock().unwrap().len(), 2);
        assert!(events.0.lock().unwrap()[0].contains("handler bug"));
    }

    #[tokio::test]
    async fn get_values() {
        let mut query = Vec::new();
        nv::put((b"FCGI_MPXS_CONNS", b""), &mut query).unwrap();
        nv::put((b"FCGI_MAX_CONNS", b""), &mut query).unwrap();
        let input = RecordBuilder::new(RecordType::GetValues, 0).content(query).unwrap().build();

        let config = Config::with_conns(NonZeroUsize::new(12).unwrap());
        let out = serve(&input, config, None).await;
        let records = records(&out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, RecordType::GetValuesResult);
        assert_eq!(records[0].1, 0);
        let pairs: Vec<_> = nv::NVIter::new(&records[0].2).collect();
        assert_eq!(pairs, [
            (&b"FCGI_MAX_CONNS"[..], &b"12"[..]),
            (&b"FCGI_MPXS_CONNS"[..], &b"0"[..]),
        ]);
    }

    #[tokio::test]
    async fn idle_timeout() {
        let (client, server) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(server);
        let config = Config::default().with_idle_timeout(Some(Duration::from_millis(20)));
        let res = Connection::new(
            tokio_util::compat::TokioAsyncReadCompatExt::compat(r),
            tokio_util::compat::TokioAsyncWriteCompatExt::compat_write(w),
            Arc::new(config),
        ).run().await;
        assert!(matches!(res, Err(Error::IdleTimeout)));
        drop(client);
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connection() {
        let (client, server) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(server);
        let signal = ShutdownSignal::new();
        let conn = Connection::new(
            tokio_util::compat::TokioAsyncReadCompatExt::compat(r),
            tokio_util::compat::TokioAsyncWriteCompatExt::compat_write(w),
            Arc::new(Config::default()),
        ).with_shutdown(signal.clone());

        let task = tokio::spawn(conn.run());
        tokio::task::yield_now().await;
        signal.trigger();
        let res = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(res.is_ok());
        drop(client);
    }
}
