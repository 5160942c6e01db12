use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::chunk_header::{ChunkFinality, ChunkHeader, MessageType};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::packet_assembler::PacketAssembler;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::socket::{SocketReader, SocketWriter};

/// Notifications a connected transport delivers upward. During the handshake there are
///  no events - failures go to the caller of the pending operation instead.
#[derive(Debug)]
pub enum TransportEvent {
    /// a complete chunk received in steady state
    Chunk(Bytes),
    /// the data channel ended (remote close, error, or local disconnect)
    Closed(Option<TransportError>),
    /// the underlying socket resource is fully released
    SocketClosed(Option<TransportError>),
    /// the peer actively reset the connection after the handshake - upper layers may
    ///  want a different reconnection policy than for a graceful disconnect
    ConnectionBreak,
}

#[derive(Default)]
struct TransportCounters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    chunk_read_count: AtomicU64,
    chunk_written_count: AtomicU64,
}

/// A snapshot of a transport's traffic counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub chunk_read_count: u64,
    pub chunk_written_count: u64,
}

type PendingReceiver = oneshot::Sender<Result<Bytes, TransportError>>;

struct TransportInner {
    id: Uuid,
    config: Arc<TransportConfig>,
    writer: Mutex<Option<Box<dyn SocketWriter>>>,
    /// set between create_chunk and write - only one chunk may be under construction
    pending_chunk: AtomicBool,
    pending_receiver: StdMutex<Option<PendingReceiver>>,
    events_tx: mpsc::Sender<TransportEvent>,
    counters: TransportCounters,
    connected: AtomicBool,
    /// monotonic one-way flag; once set, this transport is on its way out
    disconnecting: AtomicBool,
    /// 'data channel ended' notified - guards against double emission
    socket_ended: AtomicBool,
    /// 'socket resource released' notified - guards against double emission
    socket_closed: AtomicBool,
    reader_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl TransportInner {
    fn take_pending_receiver(&self) -> Option<PendingReceiver> {
        self.pending_receiver.lock().unwrap().take()
    }

    async fn dispatch_chunk(&self, chunk: Bytes) {
        self.counters.chunk_read_count.fetch_add(1, Ordering::Relaxed);

        match self.take_pending_receiver() {
            Some(pending) => {
                trace!("transport {}: chunk resolves the one-time message receiver", self.id);
                // the receiver may have timed out concurrently; nothing to be done then
                let _ = pending.send(Ok(chunk));
            }
            None => {
                if self.events_tx.send(TransportEvent::Chunk(chunk)).await.is_err() {
                    trace!("transport {}: event receiver dropped, discarding chunk", self.id);
                }
            }
        }
    }

    fn fail_pending_receiver(&self, err: TransportError) {
        if let Some(pending) = self.take_pending_receiver() {
            let _ = pending.send(Err(err));
        }
    }

    async fn emit_closed(&self, err: Option<TransportError>) {
        if !self.connected.load(Ordering::SeqCst) {
            // before the handshake completes, failures reach the caller of the pending
            //  operation instead of the event stream
            return;
        }
        if self.socket_ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.events_tx.send(TransportEvent::Closed(err)).await;
    }

    async fn emit_socket_closed(&self, err: Option<TransportError>) {
        if self.socket_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.events_tx.send(TransportEvent::SocketClosed(err)).await;
    }

    /// The remote end of the data channel went away, cleanly or not.
    async fn handle_remote_end(&self, err: Option<TransportError>) {
        if self.disconnecting.load(Ordering::SeqCst) {
            // a local disconnect() drives its own shutdown notifications
            return;
        }

        debug!(
            "transport {}: connection ended ({} bytes read, {} bytes written)",
            self.id,
            self.counters.bytes_read.load(Ordering::Relaxed),
            self.counters.bytes_written.load(Ordering::Relaxed),
        );

        let receiver_err = TransportError::ConnectionAborted(match &err {
            Some(e) => format!("connection ended by peer: {}", e),
            None => "connection ended by peer".to_string(),
        });

        self.emit_closed(err).await;
        self.disconnecting.store(true, Ordering::SeqCst);
        self.fail_pending_receiver(receiver_err);
    }
}

/// One transport instance serves exactly one connection: it owns the socket halves,
///  feeds incoming bytes through a [`PacketAssembler`], counts traffic, and enforces
///  the single-pending-write / single-pending-receive discipline of the protocol.
///
/// Cheap to clone; all clones refer to the same connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Wire up a transport on an established pair of socket halves. Spawns the reader
    ///  task; the returned receiver carries the transport's steady-state events.
    pub fn new(
        config: Arc<TransportConfig>,
        reader: Box<dyn SocketReader>,
        writer: Box<dyn SocketWriter>,
    ) -> (Transport, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);

        let inner = Arc::new(TransportInner {
            id: Uuid::new_v4(),
            config,
            writer: Mutex::new(Some(writer)),
            pending_chunk: AtomicBool::new(false),
            pending_receiver: StdMutex::new(None),
            events_tx,
            counters: TransportCounters::default(),
            connected: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            socket_ended: AtomicBool::new(false),
            socket_closed: AtomicBool::new(false),
            reader_handle: StdMutex::new(None),
        });

        let handle = tokio::spawn(Self::reader_loop(reader, inner.clone()));
        *inner.reader_handle.lock().unwrap() = Some(handle);

        (Transport { inner }, events_rx)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub(crate) fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Construct a pre-allocated chunk with its header already written; the caller
    ///  appends up to `payload_len` bytes of payload and commits it with [`write`](Self::write).
    ///
    /// Only one chunk can be under construction at a time.
    pub fn create_chunk(
        &self,
        message_type: MessageType,
        finality: ChunkFinality,
        payload_len: usize,
    ) -> BytesMut {
        assert!(
            !self.inner.pending_chunk.swap(true, Ordering::SeqCst),
            "create_chunk has already been called (commit the pending chunk with write first)"
        );

        let total_len = payload_len + ChunkHeader::SERIALIZED_LEN;
        let mut buf = BytesMut::with_capacity(total_len);
        ChunkHeader {
            message_type,
            finality,
            chunk_len: total_len.prechecked_cast(),
        }
        .ser(&mut buf);
        buf
    }

    /// Write a chunk to the socket.
    ///
    /// When the socket is not in a writable state the chunk is dropped with a warning
    ///  rather than buffered or reported as an error. This fire-and-forget policy is part
    ///  of the transport's contract: by the time a write can fail, the close notification
    ///  is already on its way, and that is the authoritative signal.
    pub async fn write(&self, chunk: &[u8]) {
        let header = ChunkHeader::deser(&mut &chunk[..])
            .expect("chunk must start with a well-formed header");
        let declared_len: usize = header.chunk_len.safe_cast();
        assert_eq!(
            declared_len,
            chunk.len(),
            "length field of the chunk header must match the buffer length"
        );

        self.inner.pending_chunk.store(false, Ordering::SeqCst);

        let mut writer = self.inner.writer.lock().await;
        match writer.as_mut() {
            None => {
                warn!(
                    "transport {}: dropping chunk of {} bytes - socket is not writable",
                    self.inner.id,
                    chunk.len()
                );
            }
            Some(socket) => match socket.send(chunk).await {
                Ok(()) => {
                    self.inner
                        .counters
                        .bytes_written
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    self.inner.counters.chunk_written_count.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(
                        "transport {}: dropping chunk of {} bytes - socket reported: {}",
                        self.inner.id,
                        chunk.len(),
                        e
                    );
                }
            },
        }
    }

    /// Install the one-time message receiver: the very next assembled chunk resolves the
    ///  returned handle instead of being broadcast as a `Chunk` event. This is how a
    ///  synchronous-looking request/response step is expressed over the asynchronous
    ///  socket.
    ///
    /// At most one receiver can be pending; installing a second one is a protocol bug.
    ///  Installation is synchronous, so a chunk arriving between this call and
    ///  [`OneTimeReceive::wait`] is not lost.
    pub fn install_one_time_message_receiver(&self) -> OneTimeReceive {
        let rx = {
            let mut slot = self.inner.pending_receiver.lock().unwrap();
            assert!(slot.is_none(), "a one-time message receiver is already installed");
            let (tx, rx) = oneshot::channel();
            *slot = Some(tx);
            rx
        };

        OneTimeReceive {
            inner: self.inner.clone(),
            rx,
        }
    }

    pub(crate) fn mark_connected(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
    }

    /// true once the handshake has completed on this transport
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// true iff a socket is attached and the transport is not being torn down
    pub async fn is_valid(&self) -> bool {
        !self.inner.disconnecting.load(Ordering::SeqCst)
            && self.inner.writer.lock().await.is_some()
    }

    /// Disconnect the transport and close the underlying socket.
    ///
    /// Idempotent - a second call while already disconnecting returns without re-running
    ///  the teardown, and the `Closed` / `SocketClosed` notifications are emitted at most
    ///  once overall.
    pub async fn disconnect(&self) {
        if self.inner.disconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        assert!(
            self.inner.pending_receiver.lock().unwrap().is_none(),
            "disconnect must not be called while the one-time message receiver is in operation"
        );

        debug!("transport {}: disconnecting", self.inner.id);

        if let Some(mut socket) = self.inner.writer.lock().await.take() {
            socket.close().await;
        }
        if let Some(handle) = self.inner.reader_handle.lock().unwrap().take() {
            handle.abort();
        }

        self.inner.emit_closed(None).await;
        self.inner.emit_socket_closed(None).await;
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_read: self.inner.counters.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.inner.counters.bytes_written.load(Ordering::Relaxed),
            chunk_read_count: self.inner.counters.chunk_read_count.load(Ordering::Relaxed),
            chunk_written_count: self.inner.counters.chunk_written_count.load(Ordering::Relaxed),
        }
    }

    /// Reader task: pulls socket deliveries through the assembler and dispatches
    ///  complete chunks until the connection ends one way or the other.
    async fn reader_loop(mut socket: Box<dyn SocketReader>, inner: Arc<TransportInner>) {
        let mut assembler = PacketAssembler::new(inner.config.max_chunk_size);

        loop {
            match socket.recv().await {
                Ok(Some(data)) => {
                    if data.is_empty() {
                        continue;
                    }
                    inner
                        .counters
                        .bytes_read
                        .fetch_add(data.len() as u64, Ordering::Relaxed);

                    match assembler.feed(&data) {
                        Ok(chunks) => {
                            for chunk in chunks {
                                inner.dispatch_chunk(chunk).await;
                            }
                        }
                        Err(e) => {
                            warn!("transport {}: unrecoverable framing error: {}", inner.id, e);
                            inner.handle_remote_end(Some(e)).await;
                            break;
                        }
                    }
                }
                Ok(None) => {
                    debug!("transport {}: peer ended the stream", inner.id);
                    inner.handle_remote_end(None).await;
                    break;
                }
                Err(e) => {
                    warn!("transport {}: socket error: {}", inner.id, e);
                    if inner.connected.load(Ordering::SeqCst)
                        && matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe)
                    {
                        let _ = inner.events_tx.send(TransportEvent::ConnectionBreak).await;
                    }
                    inner.handle_remote_end(Some(e.into())).await;
                    break;
                }
            }
        }

        inner.emit_socket_closed(None).await;
    }
}

/// Handle for a pending one-time receive. Consuming it by value makes a second wait on
///  the same installation impossible.
pub struct OneTimeReceive {
    inner: Arc<TransportInner>,
    rx: oneshot::Receiver<Result<Bytes, TransportError>>,
}

impl OneTimeReceive {
    /// Wait for the next chunk, the configured timeout, or the end of the connection -
    ///  whichever comes first. A timeout clears the receiver slot but deliberately does
    ///  *not* close the socket; that decision belongs to the caller.
    pub async fn wait(self) -> Result<Bytes, TransportError> {
        let timeout = self.inner.config.handshake_timeout;
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionAborted(
                "transport dropped while waiting for a message".to_string(),
            )),
            Err(_) => {
                // clear the slot so a later exchange can install its own receiver
                self.inner.pending_receiver.lock().unwrap().take();
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}
