use std::io;
use std::net::Ipv4Addr;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use fastcgi_responder::{handler_fn, Config, Context, Events, ExitStatus, HandlerResult, Server};


/// Routes a single request. Our example is stateless, but state could be
/// captured by implementing `Handler` on a struct instead.
fn handler<'a>(ctx: &'a mut Context<'_>) -> BoxFuture<'a, HandlerResult> {
    async move {
        let method = ctx.params().get_str("REQUEST_METHOD").unwrap_or_default().to_owned();
        let path = ctx.params().get_str("SCRIPT_NAME").unwrap_or_default().to_owned();
        match (method.as_str(), path.as_str()) {
            ("POST", "/echo") => handle_echo(ctx).await,
            ("GET" | "POST", _) => handle_env(ctx).await,
            _ => fallback(ctx).await,
        }
    }.boxed()
}

/// Print all request parameters, sorted by name.
async fn handle_env(ctx: &mut Context<'_>) -> HandlerResult {
    let mut out = Vec::with_capacity(4096);
    out.extend_from_slice(b"Content-Type: text/plain\r\nX-Powered-By: hello-fastcgi\r\n\r\n");
    out.extend_from_slice(b"Hello FastCGI!\n\n");

    // ParamMap iterates in case-insensitive name order already
    for (name, value) in ctx.params().iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.push(b'=');
        out.extend_from_slice(value);
        out.push(b'\n');
    }
    ctx.write(&out).await?;
    Ok(())
}

/// Echo the POSTed body back to the client.
async fn handle_echo(ctx: &mut Context<'_>) -> HandlerResult {
    let content_type = ctx.params().get_str("CONTENT_TYPE")
        .unwrap_or("application/octet-stream")
        .to_owned();
    let head = format!("Content-Type: {content_type}\r\nCache-Control: no-store\r\n\r\n");
    ctx.write(head.as_bytes()).await?;

    // CONTENT_LENGTH *should* match the body length. If it doesn't, the
    // body was either truncated or the web server misbehaves.
    let expected: usize = ctx.params().get_str("CONTENT_LENGTH").and_then(|v| v.parse().ok()).unwrap_or(0);
    let body = ctx.body().to_vec();
    if body.len() != expected {
        tracing::warn!(read = body.len(), expected, "echo body length mismatch");
    }
    ctx.write(&body).await?;
    Ok(())
}

/// Generate an error response for methods without a route.
async fn fallback(ctx: &mut Context<'_>) -> HandlerResult {
    ctx.write(b"Status: 501 Not Implemented\r\nContent-Type: text/plain\r\n\r\n").await?;
    ctx.write(b"HTTP method not implemented\n").await?;
    ctx.end_with(ExitStatus::Complete(2)).await?;
    Ok(())
}


/// Logs lifecycle notifications.
struct LogEvents;

impl Events for LogEvents {
    fn on_error(&self, error: &(dyn std::error::Error + 'static)) {
        tracing::warn!(error, "request failed");
    }
}


// This hello-world example uses the current-thread runtime for simplicity,
// but the multi-threaded one is recommended for real applications.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    // Allow up to 10 concurrent connections on our single-threaded runtime
    let Some(max_conns) = std::num::NonZeroUsize::new(10) else { return };
    let config = Config::with_conns(max_conns).with_addr(Ipv4Addr::LOCALHOST.into(), 9000);
    let server = Server::new(config)
        .with_handler(handler_fn(handler))
        .with_events(LogEvents);

    if let Err(e) = server.start().await {
        let error: &dyn std::error::Error = &e;
        tracing::error!(error, "server failed to start");
        return;
    }

    // Serve until we receive a quit signal
    if let Err(e) = quit().await {
        let error: &dyn std::error::Error = &e;
        tracing::error!(error, "waiting for quit signal failed");
    }

    // Gracefully shut down active connections before exiting the runtime
    tracing::info!("shutting down");
    if let Err(e) = server.stop().await {
        let error: &dyn std::error::Error = &e;
        tracing::error!(error, "server shutdown failed");
    }
}


/// Waits for a signal to shut the FastCGI server down.
#[cfg(not(unix))]
fn quit() -> impl std::future::Future<Output = io::Result<()>> {
    tokio::signal::ctrl_c()
}

/// Waits for a signal to shut the FastCGI server down.
#[cfg(unix)]
async fn quit() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = term.recv() => Ok(()),
    }
}


/// Sets up a basic `tracing` subscriber to stderr. Its verbosity level is
/// configured with the `RUST_LOG` environment variable.
fn init_tracing() {
    use tracing_subscriber::{filter::LevelFilter, fmt};
    let max_level = match std::env::var("RUST_LOG") {
        Ok(var) if !var.is_empty() => match var.parse::<LevelFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Ignoring `RUST_LOG={var}`: {e}");
                LevelFilter::INFO
            },
        },
        Ok(_) | Err(std::env::VarError::NotPresent) => LevelFilter::INFO,
        Err(e) => {
            eprintln!("Ignoring `RUST_LOG`: {e}");
            LevelFilter::INFO
        },
    };

    fmt::fmt()
        .with_timer(fmt::time::uptime())
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .init();
}
