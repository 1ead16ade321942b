/// Constructs an event at the trace level if `trace-more` is enabled.
///
/// Per-record events are too chatty for regular trace logging, so they are
/// compiled out unless explicitly requested.
#[cfg(feature = "trace-more")]
macro_rules! trace {
    ($($arg:tt)+) => (::tracing::trace!($($arg)+));
}
/// Constructs an event at the trace level if `trace-more` is enabled.
#[cfg(not(feature = "trace-more"))]
macro_rules! trace {
    ($($arg:tt)+) => {};
}
pub(crate) use trace;
