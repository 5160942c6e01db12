//! In-process socket halves for exercising the transport without real network I/O:
//!  the test drives the peer side of the connection through plain channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::socket::{SocketReader, SocketWriter};

pub struct ChannelSocketReader {
    rx: mpsc::UnboundedReceiver<std::io::Result<Bytes>>,
}

#[async_trait]
impl SocketReader for ChannelSocketReader {
    async fn recv(&mut self) -> std::io::Result<Option<Bytes>> {
        match self.rx.recv().await {
            None => Ok(None),
            Some(Ok(data)) => Ok(Some(data)),
            Some(Err(e)) => Err(e),
        }
    }
}

pub struct ChannelSocketWriter {
    tx: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl SocketWriter for ChannelSocketWriter {
    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer closed"));
        }
        self.tx
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The test's grip on the far side of the connection.
pub struct PeerHandle {
    to_transport: Mutex<Option<mpsc::UnboundedSender<std::io::Result<Bytes>>>>,
    from_transport: mpsc::UnboundedReceiver<Bytes>,
    writer_closed: Arc<AtomicBool>,
}

impl PeerHandle {
    /// Deliver bytes to the transport as one socket fragment.
    pub fn feed(&self, data: &[u8]) {
        self.to_transport
            .lock()
            .unwrap()
            .as_ref()
            .expect("stream already ended")
            .send(Ok(Bytes::copy_from_slice(data)))
            .expect("transport reader is gone");
    }

    /// Deliver a socket error to the transport.
    pub fn fail_stream(&self, err: std::io::Error) {
        self.to_transport
            .lock()
            .unwrap()
            .as_ref()
            .expect("stream already ended")
            .send(Err(err))
            .expect("transport reader is gone");
    }

    /// End the stream cleanly, as if the peer closed the connection.
    pub fn end_stream(&self) {
        self.to_transport.lock().unwrap().take();
    }

    /// The next buffer the transport wrote to its socket.
    pub async fn next_written(&mut self) -> Option<Bytes> {
        self.from_transport.recv().await
    }

    pub fn writer_closed(&self) -> bool {
        self.writer_closed.load(Ordering::SeqCst)
    }
}

/// A connected (reader, writer, peer) triple: the reader/writer halves go into a
///  `Transport`, the peer handle stays with the test.
pub fn socket_pair() -> (ChannelSocketReader, ChannelSocketWriter, PeerHandle) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    (
        ChannelSocketReader { rx: in_rx },
        ChannelSocketWriter {
            tx: out_tx,
            closed: closed.clone(),
        },
        PeerHandle {
            to_transport: Mutex::new(Some(in_tx)),
            from_transport: out_rx,
            writer_closed: closed,
        },
    )
}
