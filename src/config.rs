use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::protocol::MAX_CONTENT_LEN;


/// Configuration of a FastCGI [`Server`](crate::Server).
///
/// A [`Config`] is shared immutably between all connections once the server
/// has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The local address to listen on.
    pub local_addr: IpAddr,
    /// The local TCP port to listen on. Port 0 picks a free port.
    pub port: u16,
    /// The size of each connection's read buffer.
    pub buffer_size: usize,
    /// The maximum content length of each Stdout/Stderr record written on
    /// behalf of a handler. Values above 65535 are capped.
    pub write_chunk_size: usize,
    /// The maximum number of request body bytes kept per request. Excess
    /// bytes are discarded. [`None`] disables the limit.
    pub max_body_len: Option<usize>,
    /// The maximum number of concurrently served connections. This is also
    /// reported as `FCGI_MAX_CONNS` and `FCGI_MAX_REQS`.
    pub max_conns: NonZeroUsize,
    /// Closes connections whose next read does not complete within this
    /// duration. [`None`] waits indefinitely.
    pub idle_timeout: Option<Duration>,
    /// Sends empty Stdout (and Stderr, if used) records to terminate the
    /// output streams before EndRequest.
    pub terminate_streams: bool,
}

impl Config {
    /// The default TCP port.
    pub const DEFAULT_PORT: u16 = 9001;
    /// The default read buffer size.
    pub const DEFAULT_BUF_SIZE: usize = 8192;
    /// The default maximum output record content length.
    pub const DEFAULT_CHUNK_SIZE: usize = 10240;
    /// The default request body limit of 32 MiB.
    pub const DEFAULT_MAX_BODY: usize = 32 << 20;
    /// The default connection limit.
    pub const DEFAULT_MAX_CONNS: NonZeroUsize = match NonZeroUsize::new(64) {
        Some(n) => n,
        None => unreachable!(),
    };

    /// Creates a default [`Config`] with a custom `max_conns` value.
    #[inline]
    #[must_use]
    pub fn with_conns(max_conns: NonZeroUsize) -> Self {
        Self { max_conns, ..Self::default() }
    }

    /// Sets the listening address.
    #[inline]
    #[must_use]
    pub fn with_addr(mut self, local_addr: IpAddr, port: u16) -> Self {
        self.local_addr = local_addr;
        self.port = port;
        self
    }

    /// Sets the request body limit.
    #[inline]
    #[must_use]
    pub fn with_max_body_len(mut self, max_body_len: Option<usize>) -> Self {
        self.max_body_len = max_body_len;
        self
    }

    /// Sets the maximum output record content length.
    #[inline]
    #[must_use]
    pub fn with_write_chunk_size(mut self, write_chunk_size: usize) -> Self {
        self.write_chunk_size = write_chunk_size;
        self
    }

    /// Sets the idle timeout of connections.
    #[inline]
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Enables or disables explicit output stream termination.
    #[inline]
    #[must_use]
    pub fn with_terminate_streams(mut self, terminate_streams: bool) -> Self {
        self.terminate_streams = terminate_streams;
        self
    }

    /// Returns the socket address to listen on.
    #[inline]
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.local_addr, self.port)
    }

    /// Returns the effective content length of output records, which is
    /// always between 1 and 65535.
    #[inline]
    #[must_use]
    pub(crate) fn chunk_len(&self) -> usize {
        self.write_chunk_size.clamp(1, MAX_CONTENT_LEN)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_addr: Ipv4Addr::UNSPECIFIED.into(),
            port: Self::DEFAULT_PORT,
            buffer_size: Self::DEFAULT_BUF_SIZE,
            write_chunk_size: Self::DEFAULT_CHUNK_SIZE,
            max_body_len: Some(Self::DEFAULT_MAX_BODY),
            max_conns: Self::DEFAULT_MAX_CONNS,
            idle_timeout: None,
            terminate_streams: false,
        }
    }
}
