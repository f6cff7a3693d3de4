//! Byte streams a session runs over.
//!
//! Any tokio duplex stream works: a TCP or TLS stream, a
//! [`tokio::io::duplex`] pipe in tests, or an SSH channel bound to the
//! `netconf` subsystem with the `ssh` feature.

use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(feature = "ssh")]
pub mod ssh;

#[cfg(feature = "ssh")]
pub use ssh::{Endpoint, SshTransport};

/// Blanket trait for streams [`Session::connect`](crate::session::Session::connect) accepts.
pub trait Transport: AsyncRead + AsyncWrite + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + 'static {}
