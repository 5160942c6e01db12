use std::sync::Arc;

use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use tracing::{debug, warn};

use crate::chunk_header::{ChunkFinality, ChunkHeader, MessageType};
use crate::error::TransportError;
use crate::handshake_messages::{
    AcknowledgeMessage, ErrorMessage, HandshakeMessage, HelloMessage, ReverseHelloMessage,
    MAX_ENDPOINT_URL_LEN,
};
use crate::status_code::StatusCode;
use crate::transport::Transport;

/// Pluggable predicate deciding whether the ApplicationUri announced in a Reverse-Hello
///  belongs to a server this connector is willing to talk to.
#[cfg_attr(test, automock)]
pub trait ServerIdentityPolicy: Send + Sync + 'static {
    fn is_acceptable_server(&self, server_uri: &str) -> bool;
}

/// The default policy accepts any server URI.
pub struct AcceptAnyServer;

impl ServerIdentityPolicy for AcceptAnyServer {
    fn is_acceptable_server(&self, _server_uri: &str) -> bool {
        true
    }
}

/// Serialize a handshake message and commit it as a single final chunk.
pub(crate) async fn send_handshake_message<M: HandshakeMessage>(
    transport: &Transport,
    message_type: MessageType,
    message: &M,
) {
    let mut payload = BytesMut::new();
    message.ser(&mut payload);

    let mut chunk = transport.create_chunk(message_type, ChunkFinality::Final, payload.len());
    chunk.extend_from_slice(&payload);
    transport.write(&chunk).await;
}

/// The active handshake: send a Hello built from the transport's configuration, then
///  wait for the single final Acknowledge (or Error) chunk. On failure the socket is
///  closed before the error is returned.
pub(crate) async fn perform_hello_ack(
    transport: &Transport,
    endpoint_url: &str,
) -> Result<AcknowledgeMessage, TransportError> {
    assert!(!endpoint_url.is_empty(), "expecting a valid endpoint url");
    assert!(
        endpoint_url.len() < MAX_ENDPOINT_URL_LEN,
        "endpoint url must be shorter than {} bytes",
        MAX_ENDPOINT_URL_LEN
    );

    let config = transport.config();
    let hello = HelloMessage {
        protocol_version: config.protocol_version,
        receive_buffer_size: config.receive_buffer_size,
        send_buffer_size: config.send_buffer_size,
        max_message_size: config.max_message_size,
        max_chunk_count: config.max_chunk_count,
        endpoint_url: endpoint_url.to_string(),
    };

    // install the receiver before the Hello goes out so the response cannot slip past
    let pending = transport.install_one_time_message_receiver();

    debug!("sending HEL: {:?}", hello);
    send_handshake_message(transport, MessageType::Hello, &hello).await;

    let chunk = match pending.wait().await {
        Ok(chunk) => chunk,
        Err(e) => {
            transport.disconnect().await;
            return Err(e);
        }
    };

    match handle_ack_response(&chunk) {
        Ok(ack) => {
            debug!("received ACK: {:?}", ack);
            Ok(ack)
        }
        Err(e) => {
            transport.disconnect().await;
            Err(e)
        }
    }
}

fn handle_ack_response(chunk: &[u8]) -> Result<AcknowledgeMessage, TransportError> {
    let mut buf: &[u8] = chunk;
    let header = ChunkHeader::deser(&mut buf)?;

    if header.finality != ChunkFinality::Final {
        return Err(TransportError::ProtocolSequence {
            status: StatusCode::BadTcpMessageTypeInvalid,
            reason: "a Hello/Acknowledge exchange must be a single final chunk".to_string(),
        });
    }

    match header.message_type {
        MessageType::Error => {
            let response = ErrorMessage::deser(&mut buf)?;
            Err(TransportError::Rejected {
                status: response.status_code,
                reason: response.reason,
            })
        }
        MessageType::Acknowledge => AcknowledgeMessage::deser(&mut buf),
        other => Err(TransportError::ProtocolSequence {
            status: StatusCode::BadTcpMessageTypeInvalid,
            reason: format!("expected ACK or ERR in response to Hello, got {:?}", other),
        }),
    }
}

/// Decode the chunk a reverse connection must open with.
pub(crate) fn decode_reverse_hello(chunk: &[u8]) -> Result<ReverseHelloMessage, TransportError> {
    let mut buf: &[u8] = chunk;
    let header = ChunkHeader::deser(&mut buf)?;

    if header.message_type != MessageType::ReverseHello {
        return Err(TransportError::ProtocolSequence {
            status: StatusCode::BadCommunicationError,
            reason: "Expecting 'RHE' message to initiate communication".to_string(),
        });
    }
    if header.finality != ChunkFinality::Final {
        return Err(TransportError::ProtocolSequence {
            status: StatusCode::BadCommunicationError,
            reason: "a Reverse-Hello must be a single final chunk".to_string(),
        });
    }

    ReverseHelloMessage::deser(&mut buf)
}

/// Per-connection state of the passive handshake.
pub(crate) struct ReverseHandshake {
    expected_endpoint_url: String,
    identity_policy: Arc<dyn ServerIdentityPolicy>,
    reverse_hello_received: bool,
}

impl ReverseHandshake {
    pub(crate) fn new(
        expected_endpoint_url: String,
        identity_policy: Arc<dyn ServerIdentityPolicy>,
    ) -> ReverseHandshake {
        ReverseHandshake {
            expected_endpoint_url,
            identity_policy,
            reverse_hello_received: false,
        }
    }

    /// Validate a Reverse-Hello in the protocol's prescribed order, stopping at the
    ///  first failure.
    pub(crate) fn validate(&mut self, rhe: &ReverseHelloMessage) -> Result<(), TransportError> {
        assert!(
            !self.reverse_hello_received,
            "a second Reverse-Hello on the same connection is a protocol sequencing bug"
        );

        if rhe.server_uri.len() >= MAX_ENDPOINT_URL_LEN {
            return Err(TransportError::Validation {
                status: StatusCode::BadTcpEndpointUrlInvalid,
                reason: format!(
                    "serverUri of {} bytes exceeds the limit of {}",
                    rhe.server_uri.len(),
                    MAX_ENDPOINT_URL_LEN
                ),
            });
        }
        if !self.identity_policy.is_acceptable_server(&rhe.server_uri) {
            return Err(TransportError::Validation {
                status: StatusCode::BadTcpEndpointUrlInvalid,
                reason: format!("serverUri {:?} is not a known server", rhe.server_uri),
            });
        }
        if rhe.endpoint_url.len() >= MAX_ENDPOINT_URL_LEN {
            return Err(TransportError::Validation {
                status: StatusCode::BadTcpEndpointUrlInvalid,
                reason: format!(
                    "endpointUrl of {} bytes exceeds the limit of {}",
                    rhe.endpoint_url.len(),
                    MAX_ENDPOINT_URL_LEN
                ),
            });
        }
        if rhe.endpoint_url != self.expected_endpoint_url {
            return Err(TransportError::Validation {
                status: StatusCode::BadTcpEndpointUrlInvalid,
                reason: format!(
                    "endpointUrl {:?} does not match the url this connector was configured to reach",
                    rhe.endpoint_url
                ),
            });
        }

        self.reverse_hello_received = true;
        Ok(())
    }
}

/// Progress marker of the abort protocol: the error chunk goes out at most once, no
///  matter how many failures pile up while the connection is going down.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AbortState {
    NotAborted,
    Aborting,
    Aborted,
}

/// Send a `TCPError` chunk describing `err` to the peer (best-effort - the socket may
///  already be failing), tear the connection down, and hand the error back for the
///  caller to report.
pub(crate) async fn abort_with_error(
    transport: &Transport,
    state: &mut AbortState,
    err: TransportError,
) -> TransportError {
    match state {
        AbortState::NotAborted => {
            *state = AbortState::Aborting;

            let message = ErrorMessage {
                status_code: err.status_code(),
                reason: err.to_string(),
            };
            warn!("aborting connection: {}", message.reason);
            send_handshake_message(transport, MessageType::Error, &message).await;
            transport.disconnect().await;

            *state = AbortState::Aborted;
            err
        }
        _ => {
            // an abort is already in flight; report, but never send a second error chunk
            err
        }
    }
}
