//! Chunked transport layer of the OPC UA binary protocol over byte-stream sockets
//!  (TCP and WebSocket bindings).
//!
//! The socket delivers bytes with arbitrary fragmentation; this crate turns that into a
//!  sequence of well-formed, length-delimited protocol messages ('chunks') and drives
//!  the connection through the protocol's handshake before any application-level
//!  traffic is allowed.
//!
//! ## Design goals
//!
//! * One transport instance per connection - no shared mutable state between
//!   connections except configuration defaults
//! * The abstraction is sending / receiving *chunks* (defined-length framed units) as
//!   opposed to a stream of bytes; re-assembly from fragments is this crate's job,
//!   splitting *messages* into chunks is the upper layer's
//! * The handshake is expressed as synchronous-looking request / response steps over
//!   the asynchronous socket, via a single-use, timeout-guarded receiver slot
//! * Everything above the socket is binding-agnostic: the TCP and WebSocket bindings
//!   only implement a minimal reader / writer pair
//! * Failure paths are explicit: handshake errors go to the caller of the pending
//!   operation, steady-state errors go to the event stream, and teardown notifications
//!   are delivered at most once each
//!
//! ## Chunk header
//!
//! Every chunk starts with a fixed 8-byte header - all numeric fields of the protocol
//!  are little-endian:
//!
//! ```ascii
//! 0: message type (3 ASCII bytes):
//!    * HEL  hello                       * ACK  acknowledge
//!    * ERR  error / abort               * RHE  reverse hello
//!    * MSG  application message         * OPN / CLO  secure channel (opaque here)
//! 3: finality (1 ASCII byte):
//!    * 'F'  this chunk completes its message
//!    * 'C'  the message continues in a following chunk
//!    * 'A'  the sender abandons the message mid-flight
//! 4: chunk length (u32 LE) - total chunk size *including* this header
//! ```
//!
//! A chunk is never dispatched upward until all `chunk length` bytes have arrived.
//!
//! ## Handshake messages
//!
//! *HEL* - sent once by the active connector:
//!
//! ```ascii
//!  0: protocol version (u32 LE)
//!  4: receive buffer size (u32 LE)        8: send buffer size (u32 LE)
//! 12: max message size (u32 LE, 0 = unlimited)
//! 16: max chunk count (u32 LE, 0 = unlimited)
//! 20: endpoint url (i32 LE length, -1 = null, then UTF-8 bytes; < 4096 bytes)
//! ```
//!
//! *ACK* - the listener's answer, mirroring the five numeric fields of HEL. The values
//!  become the negotiated parameters for the life of the connection.
//!
//! *ERR* - status code (u32 LE) followed by a reason string; both a handshake failure
//!  response and the final message of the abort protocol.
//!
//! *RHE* - server uri and endpoint url strings; sent by a server that dialed out to a
//!  client in reverse-connect mode, at most once per connection.
//!
//! ## Connection establishment
//!
//! Active mode ([`client_transport::ClientTransport::connect`]): dial the endpoint,
//!  send HEL, wait for a single final ACK (or ERR) chunk, store the negotiated
//!  parameters. Passive mode ([`reverse_connector::ReverseConnector`]): accept a
//!  pre-arranged connection, wait for RHE, validate the announced identity, then run
//!  the same HEL/ACK transaction over that connection.
//!
//! On a protocol violation the abort protocol sends a single ERR chunk (best-effort)
//!  and tears the connection down.

pub mod chunk_header;
pub mod client_transport;
pub mod config;
pub mod endpoint_url;
pub mod error;
mod handshake;
pub mod handshake_messages;
pub mod packet_assembler;
pub mod reverse_connector;
pub mod safe_converter;
pub mod socket;
pub mod status_code;
pub mod tcp;
pub mod transport;
pub mod websocket;

pub use handshake::{AcceptAnyServer, ServerIdentityPolicy};

#[cfg(test)]
pub(crate) mod test_util;
