use futures_util::future::BoxFuture;

use crate::request::Context;


/// The error type handlers may return. It is reported through
/// [`Events::on_error`](crate::Events::on_error) and ends the request with
/// [`ExitStatus::FAILURE`](crate::ExitStatus::FAILURE).
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The result of a [`Handler`] invocation.
pub type HandlerResult = Result<(), HandlerError>;


/// Serves a fully assembled Responder request.
///
/// The handler is invoked once per request, after the request body has been
/// received completely. Output is written through the [`Context`]. If the
/// handler returns without calling `Context::end`, the request is ended with
/// the status set via `Context::set_status`.
///
/// A single handler instance is shared by all connections.
pub trait Handler: Send + Sync {
    /// Handles a single request.
    fn handle<'a>(&'a self, ctx: &'a mut Context<'_>) -> BoxFuture<'a, HandlerResult>;
}

impl<H: Handler + ?Sized> Handler for std::sync::Arc<H> {
    #[inline]
    fn handle<'a>(&'a self, ctx: &'a mut Context<'_>) -> BoxFuture<'a, HandlerResult> {
        (**self).handle(ctx)
    }
}


/// A [`Handler`] backed by a function, created via [`handler_fn`].
#[derive(Debug, Clone, Copy)]
pub struct HandlerFn<F>(F);

/// Wraps a function or closure into a [`Handler`].
///
/// The function must box its future, as in
/// `fn handle<'a>(ctx: &'a mut Context<'_>) -> BoxFuture<'a, HandlerResult>`.
/// Named functions infer the required lifetimes more reliably than closures.
#[inline]
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Context<'_>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Context<'_>) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    #[inline]
    fn handle<'a>(&'a self, ctx: &'a mut Context<'_>) -> BoxFuture<'a, HandlerResult> {
        (self.0)(ctx)
    }
}
