use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::chunk_header::{ChunkFinality, MessageType};
use crate::config::TransportConfig;
use crate::endpoint_url::EndpointUrl;
use crate::handshake;
use crate::handshake_messages::AcknowledgeMessage;
use crate::socket::{SocketReader, SocketWriter};
use crate::transport::{Transport, TransportEvent, TransportStats};
use crate::{tcp, websocket};

/// A transport that dialed out to a remote listener and initiated communication with a
///  Hello/Acknowledge transaction, negotiating the communication parameters with the
///  other end.
///
/// Steady-state chunks and shutdown notifications arrive on the
///  [`TransportEvent`] receiver returned alongside the connected instance.
pub struct ClientTransport {
    transport: Transport,
    parameters: AcknowledgeMessage,
    endpoint_url: String,
}

impl std::fmt::Debug for ClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTransport")
            .field("id", &self.transport.id())
            .field("parameters", &self.parameters)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

impl ClientTransport {
    /// Dial `endpoint_url` - the scheme selects the TCP or WebSocket binding - and
    ///  perform the Hello/Acknowledge transaction.
    ///
    /// On failure the socket is closed and the error describes the offending status
    ///  code (e.g. `BadProtocolVersionUnsupported` when the peer answered with an `ERR`
    ///  chunk).
    pub async fn connect(
        endpoint_url: &str,
        config: Arc<TransportConfig>,
    ) -> anyhow::Result<(ClientTransport, mpsc::Receiver<TransportEvent>)> {
        config.validate()?;
        let endpoint = EndpointUrl::parse(endpoint_url)?;

        debug!("connecting to {}", endpoint_url);
        let (reader, writer): (Box<dyn SocketReader>, Box<dyn SocketWriter>) =
            if endpoint.scheme.is_websocket() {
                let (r, w) = websocket::connect(&endpoint).await?;
                (Box::new(r), Box::new(w))
            } else {
                let (r, w) = tcp::connect(&endpoint).await?;
                (Box::new(r), Box::new(w))
            };

        let (transport, events) = Transport::new(config, reader, writer);
        let parameters = handshake::perform_hello_ack(&transport, endpoint_url).await?;
        transport.mark_connected();
        info!("transport {} connected to {}", transport.id(), endpoint_url);

        Ok((
            ClientTransport {
                transport,
                parameters,
                endpoint_url: endpoint_url.to_string(),
            },
            events,
        ))
    }

    pub(crate) fn from_parts(
        transport: Transport,
        parameters: AcknowledgeMessage,
        endpoint_url: String,
    ) -> ClientTransport {
        ClientTransport {
            transport,
            parameters,
            endpoint_url,
        }
    }

    /// The buffer sizes and limits the Acknowledge established for this connection.
    pub fn parameters(&self) -> &AcknowledgeMessage {
        &self.parameters
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn create_chunk(
        &self,
        message_type: MessageType,
        finality: ChunkFinality,
        payload_len: usize,
    ) -> BytesMut {
        self.transport.create_chunk(message_type, finality, payload_len)
    }

    pub async fn write(&self, chunk: &[u8]) {
        self.transport.write(chunk).await
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await
    }

    pub async fn is_valid(&self) -> bool {
        self.transport.is_valid().await
    }

    pub fn stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// The underlying transport, for callers layering their own protocol steps on top.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}
