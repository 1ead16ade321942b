use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_lock::Semaphore;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::Instrument;

use crate::config::Config;
use crate::connection::Connection;
use crate::handler::Handler;

/// Task tracking and shutdown signalling for connection tasks.
pub(crate) mod tasks;

use tasks::{ShutdownSignal, TaskToken, WaitGroup};


/// Receives lifecycle notifications from a [`Server`] and its connections.
///
/// All methods default to doing nothing. Notifications are delivered from
/// the task that caused them, so implementations should return quickly.
pub trait Events: Send + Sync {
    /// The server is about to bind `addr`.
    fn on_starting(&self, _addr: SocketAddr) {}
    /// The server is listening on `local_addr`.
    fn on_started(&self, _local_addr: SocketAddr) {}
    /// The server is about to stop accepting connections.
    fn on_stopping(&self) {}
    /// The server stopped accepting connections and all connections ended.
    fn on_stopped(&self) {}
    /// A web server connected from `remote_addr`.
    fn on_connected(&self, _remote_addr: SocketAddr) {}
    /// The connection from `remote_addr` was closed.
    fn on_disconnected(&self, _remote_addr: SocketAddr) {}
    /// An error occurred that did not stop the server, such as a failed
    /// handler, a broken connection or a failed accept.
    fn on_error(&self, _error: &(dyn std::error::Error + 'static)) {}
}

impl<E: Events + ?Sized> Events for Arc<E> {
    fn on_starting(&self, addr: SocketAddr) {
        (**self).on_starting(addr);
    }

    fn on_started(&self, local_addr: SocketAddr) {
        (**self).on_started(local_addr);
    }

    fn on_stopping(&self) {
        (**self).on_stopping();
    }

    fn on_stopped(&self) {
        (**self).on_stopped();
    }

    fn on_connected(&self, remote_addr: SocketAddr) {
        (**self).on_connected(remote_addr);
    }

    fn on_disconnected(&self, remote_addr: SocketAddr) {
        (**self).on_disconnected(remote_addr);
    }

    fn on_error(&self, error: &(dyn std::error::Error + 'static)) {
        (**self).on_error(error);
    }
}

/// An [`Events`] sink that ignores all notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl Events for NoEvents {}


/// Errors of the [`Server`] lifecycle.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The listening socket could not be created.
    #[error("binding to {addr} failed")]
    Bind {
        /// The configured listening address.
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Accepting a connection failed. The server keeps accepting.
    #[error("accepting a connection failed")]
    Accept(#[source] io::Error),
    /// [`Server::start`] was called on a running server.
    #[error("server is already running")]
    AlreadyRunning,
    /// [`Server::stop`] was called on a stopped server.
    #[error("server is not running")]
    NotRunning,
}


#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    accept: JoinHandle<()>,
    tasks: WaitGroup,
}

/// A FastCGI Responder server listening on TCP.
///
/// Each accepted connection is served on its own tokio task, with at most
/// [`Config::max_conns`] connections at a time. A server can be started and
/// stopped repeatedly. Dropping a running server signals all of its tasks to
/// shut down without waiting for them.
pub struct Server {
    config: Arc<Config>,
    handler: Option<Arc<dyn Handler>>,
    events: Arc<dyn Events>,
    lifecycle: Arc<async_lock::Mutex<()>>,
    running: Mutex<Option<Running>>,
}

impl Server {
    /// Creates a stopped server without a handler.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            handler: None,
            events: Arc::new(NoEvents),
            lifecycle: Arc::default(),
            running: Mutex::new(None),
        }
    }

    /// Sets the handler for all requests.
    #[must_use]
    pub fn with_handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Sets the receiver of lifecycle notifications.
    #[must_use]
    pub fn with_events<E: Events + 'static>(mut self, events: E) -> Self {
        self.events = Arc::new(events);
        self
    }

    /// Replaces the lock serializing [`Server::start`] and [`Server::stop`].
    /// Sharing one lock between servers serializes their lifecycles too.
    #[must_use]
    pub fn with_lifecycle_lock(mut self, lock: Arc<async_lock::Mutex<()>>) -> Self {
        self.lifecycle = lock;
        self
    }

    /// Returns the server's configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tests whether the server is accepting connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().is_some()
    }

    /// Returns the address the running server listens on.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state().as_ref().map(|r| r.local_addr)
    }

    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        // Running is replaced as a whole, a poisoned value is still consistent
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds the listening socket and starts accepting connections on a new
    /// task. Returns the bound address, which differs from
    /// [`Config::socket_addr`] if port 0 was configured.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyRunning`] if the server was started before
    /// and [`Error::Bind`] if the socket cannot be bound.
    pub async fn start(&self) -> Result<SocketAddr, Error> {
        let _guard = self.lifecycle.lock().await;
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        let addr = self.config.socket_addr();
        self.events.on_starting(addr);
        let listener = TcpListener::bind(addr).await
            .map_err(|source| Error::Bind { addr, source })?;
        let local = listener.local_addr()
            .map_err(|source| Error::Bind { addr, source })?;

        let shutdown = ShutdownSignal::new();
        let tasks = WaitGroup::new();
        let acceptor = Acceptor {
            listener, local,
            config: self.config.clone(),
            handler: self.handler.clone(),
            events: self.events.clone(),
            shutdown: shutdown.clone(),
            permits: Arc::new(Semaphore::new(self.config.max_conns.get())),
            token: tasks.add_task(),
        };
        let span = tracing::error_span!("fastcgi_server", protocol = "tcp", %local);
        let accept = tokio::spawn(acceptor.run().instrument(span));

        *self.state() = Some(Running { local_addr: local, shutdown, accept, tasks });
        tracing::info!(protocol = "tcp", %local, max_conns = self.config.max_conns.get(), "server started");
        self.events.on_started(local);
        Ok(local)
    }

    /// Stops accepting connections, signals shutdown to all connections and
    /// their handlers, and waits until every connection task has finished.
    ///
    /// # Errors
    /// Returns [`Error::NotRunning`] if the server is not running.
    pub async fn stop(&self) -> Result<(), Error> {
        let _guard = self.lifecycle.lock().await;
        let Some(running) = self.state().take() else {
            return Err(Error::NotRunning);
        };

        let local = running.local_addr;
        tracing::info!(%local, connections = running.tasks.tasks().saturating_sub(1), "server stopping");
        self.events.on_stopping();
        running.shutdown.trigger();
        if let Err(e) = running.accept.await {
            let error: &(dyn std::error::Error + 'static) = &e;
            tracing::error!(%local, error, "accept task failed");
        }
        running.tasks.await;

        tracing::info!(%local, "server stopped");
        self.events.on_stopped();
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(running) = self.state().take() {
            running.shutdown.trigger();
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("has_handler", &self.handler.is_some())
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}


/// The delay before accepting again after a failed accept. Errors such as
/// running out of file descriptors tend to persist for a while.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Sleeps for `delay`. Returns `false` if shutdown interrupted the sleep.
async fn pause(shutdown: &ShutdownSignal, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = shutdown.wait() => false,
        () = tokio::time::sleep(delay) => true,
    }
}


/// The accept loop of a running [`Server`].
struct Acceptor {
    listener: TcpListener,
    local: SocketAddr,
    config: Arc<Config>,
    handler: Option<Arc<dyn Handler>>,
    events: Arc<dyn Events>,
    shutdown: ShutdownSignal,
    permits: Arc<Semaphore>,
    /// Cloned into every connection task, dropped when accepting stops.
    token: TaskToken,
}

impl Acceptor {
    async fn run(self) {
        loop {
            // The permit is acquired *before* accepting to respect max_conns
            let permit = tokio::select! {
                biased;
                () = self.shutdown.wait() => break,
                p = self.permits.acquire_arc() => p,
            };
            let (stream, remote) = tokio::select! {
                biased;
                () = self.shutdown.wait() => break,
                r = self.listener.accept() => match r {
                    Ok(c) => c,
                    Err(e) => {
                        let err = Error::Accept(e);
                        {
                            let error: &(dyn std::error::Error + 'static) = &err;
                            tracing::info!(error, "accept failed");
                        }
                        self.events.on_error(&err);
                        if !pause(&self.shutdown, ACCEPT_BACKOFF).await {
                            break;
                        }
                        continue;
                    },
                },
            };

            let (r, w) = stream.into_split();
            let conn = Connection::new(r.compat(), w.compat_write(), self.config.clone())
                .with_handler(self.handler.clone())
                .with_events(self.events.clone())
                .with_addrs(Some(remote), Some(self.local))
                .with_shutdown(self.shutdown.clone());
            let events = self.events.clone();
            let token = self.token.clone();

            let span = tracing::error_span!("fastcgi_connection", protocol = "tcp", local = %self.local, %remote);
            tokio::spawn(async move {
                tracing::debug!("new connection accepted");
                events.on_connected(remote);
                if let Err(e) = conn.run().await {
                    let error: &(dyn std::error::Error + 'static) = &e;
                    tracing::info!(error, "connection failed");
                    events.on_error(&e);
                }
                tracing::debug!("connection closed");
                events.on_disconnected(remote);
                drop(permit);
                drop(token);
            }.instrument(span));
        }
        tracing::debug!("accept loop stopped");
    }
}
