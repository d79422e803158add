//! Backend transports.
//!
//! A transport pushes requests toward the backend and reports everything
//! coming back through the `BackendSink` it was built with. How bytes move
//! (sockets, IPC, FFI) is entirely the transport's business.

pub mod local;

use crate::bridge::protocol::Request;
use crate::error::TransportError;

pub use local::{LocalTransport, Model};

/// Outbound half of a backend connection.
pub trait Transport {
    /// Push a request toward the backend. Must not block the caller.
    fn send(&mut self, request: Request) -> Result<(), TransportError>;

    /// Stop accepting requests and release the backend.
    fn close(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, request: Request) -> Result<(), TransportError> {
        (**self).send(request)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
