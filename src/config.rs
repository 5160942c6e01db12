use std::time::Duration;

use anyhow::bail;

/// Minimum buffer size the protocol allows a peer to announce.
pub const MIN_BUFFER_SIZE: u32 = 8192;

pub struct TransportConfig {
    /// How long a one-time message receiver waits for the next chunk before the pending
    ///  operation fails. This bounds every step of the handshake.
    pub handshake_timeout: Duration,

    /// The version of the transport protocol announced in the Hello message.
    pub protocol_version: u32,

    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,

    /// Maximum size of an assembled message the peer may send us. 0 = unlimited.
    pub max_message_size: u32,

    /// Maximum number of chunks per message the peer may send us. 0 = unlimited.
    pub max_chunk_count: u32,

    /// Upper bound for a single chunk accepted by the packet assembler. This is a
    ///  local safety limit rather than a negotiated parameter - a peer declaring a
    ///  bigger chunk is either broken or hostile, and the buffer is never allocated.
    ///  0 = unlimited.
    pub max_chunk_size: u32,

    /// Capacity of the channel carrying steady-state transport events upward. A full
    ///  channel applies backpressure to the socket reader.
    pub event_channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> TransportConfig {
        TransportConfig {
            handshake_timeout: Duration::from_millis(30_000),
            protocol_version: 0,
            receive_buffer_size: 1024 * 64 * 10,
            send_buffer_size: 1024 * 64 * 10,
            max_message_size: 0,
            max_chunk_count: 0,
            max_chunk_size: 16 * 1024 * 1024,
            event_channel_capacity: 32,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.receive_buffer_size < MIN_BUFFER_SIZE {
            bail!("receive buffer size is below the protocol minimum of {}", MIN_BUFFER_SIZE);
        }
        if self.send_buffer_size < MIN_BUFFER_SIZE {
            bail!("send buffer size is below the protocol minimum of {}", MIN_BUFFER_SIZE);
        }
        if self.handshake_timeout.is_zero() {
            bail!("handshake timeout must not be zero");
        }
        if self.event_channel_capacity == 0 {
            bail!("event channel capacity must not be zero");
        }

        Ok(())
    }
}
