use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;

/// This is an abstraction for the receiving half of a byte-stream socket, introduced to
///  facilitate mocking the I/O part away for testing and to keep the transport
///  independent of the concrete binding (TCP or WebSocket).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SocketReader: Send + 'static {
    /// The next delivery from the socket, of whatever size the OS / library hands us.
    ///  `Ok(None)` means the peer ended the stream cleanly.
    async fn recv(&mut self) -> std::io::Result<Option<Bytes>>;
}

/// The sending half of a byte-stream socket.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SocketWriter: Send + 'static {
    async fn send(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Close the sending side. Best-effort - errors during close are not interesting
    ///  to anyone.
    async fn close(&mut self);
}
