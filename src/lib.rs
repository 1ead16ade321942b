#![deny(unsafe_code, single_use_lifetimes, unused_lifetimes)]
#![warn(keyword_idents, let_underscore_drop, unreachable_pub, unused_import_braces)]

#![deny(clippy::suspicious, clippy::cargo)]
#![deny(clippy::exit, clippy::semicolon_inside_block, clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::multiple_crate_versions)]
#![allow(clippy::enum_glob_use, clippy::items_after_statements)]

//! A FastCGI application server for the Responder role.
//!
//! A [`Server`] accepts connections from a web server and runs one
//! [`Connection`] per socket. Each connection decodes the incoming record
//! stream, assembles one request at a time and hands it to a [`Handler`]
//! once the request body is complete. The handler writes its response
//! through a [`Context`], which frames the output as Stdout records and
//! ends the request.
//!
//! The wire format itself is available in [`protocol`].
//! See: <https://fastcgi-archives.github.io/FastCGI_Specification.html>


/// Byte buffer traits used by the wire format encoders.
pub mod ext;
mod macros;

pub mod protocol;

mod config;
pub use config::Config;

/// Case-insensitive FastCGI request parameters.
pub mod params;
pub use params::ParamMap;

mod handler;
pub use handler::{handler_fn, Handler, HandlerError, HandlerFn, HandlerResult};

mod request;
pub use request::{Context, ExitStatus};

/// The per-connection record dispatch loop.
pub mod connection;
pub use connection::Connection;

/// The TCP listener and its lifecycle.
pub mod server;
pub use server::{Events, NoEvents, Server};
