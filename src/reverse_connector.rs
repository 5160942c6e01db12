use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client_transport::ClientTransport;
use crate::config::TransportConfig;
use crate::endpoint_url::EndpointUrl;
use crate::error::TransportError;
use crate::handshake::{
    abort_with_error, decode_reverse_hello, perform_hello_ack, AbortState, AcceptAnyServer,
    ReverseHandshake, ServerIdentityPolicy,
};
use crate::socket::{SocketReader, SocketWriter};
use crate::transport::{Transport, TransportEvent};
use crate::{tcp, websocket};

const BIND_ATTEMPTS: u32 = 5;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// The passive side of reverse-connect mode: a would-be server dials toward us (or an
///  outer listener hands us its connection), announces itself with a Reverse-Hello, and
///  only after the announced identity checks out does the normal Hello/Acknowledge
///  transaction run over the same connection.
pub struct ReverseConnector {
    config: Arc<TransportConfig>,
    /// the endpoint url this connector was configured to reach; a Reverse-Hello naming
    ///  any other url is rejected
    expected_endpoint_url: String,
    identity_policy: Arc<dyn ServerIdentityPolicy>,
}

impl ReverseConnector {
    pub fn new(expected_endpoint_url: impl Into<String>, config: Arc<TransportConfig>) -> ReverseConnector {
        ReverseConnector {
            config,
            expected_endpoint_url: expected_endpoint_url.into(),
            identity_policy: Arc::new(AcceptAnyServer),
        }
    }

    /// Replace the default accept-anything identity check.
    pub fn with_identity_policy(mut self, policy: Arc<dyn ServerIdentityPolicy>) -> ReverseConnector {
        self.identity_policy = policy;
        self
    }

    /// Bind a listener on the configured endpoint's port and accept a single reverse
    ///  connection. Binding retries for a while when the address is still in use.
    pub async fn listen_and_accept(
        &self,
    ) -> anyhow::Result<(ClientTransport, mpsc::Receiver<TransportEvent>)> {
        self.config.validate()?;
        let endpoint = EndpointUrl::parse(&self.expected_endpoint_url)?;

        let addr: SocketAddr = format!("0.0.0.0:{}", endpoint.port).parse()?;
        let listener = tcp::bind_with_retry(addr, BIND_ATTEMPTS, BIND_RETRY_DELAY).await?;
        info!("listening for reverse connections on {}", addr);

        self.accept_on(&listener).await
    }

    /// Accept a single reverse connection on an externally supplied listener, e.g. one
    ///  shared with an outer server.
    pub async fn accept_on(
        &self,
        listener: &TcpListener,
    ) -> anyhow::Result<(ClientTransport, mpsc::Receiver<TransportEvent>)> {
        let (stream, peer_addr) = listener.accept().await?;
        debug!("accepted reverse connection from {}", peer_addr);

        let (reader, writer) = tcp::split(stream);
        let connected = self.establish(Box::new(reader), Box::new(writer)).await?;
        Ok(connected)
    }

    /// Like [`accept_on`](Self::accept_on), but performing a WebSocket upgrade on the
    ///  accepted stream first.
    pub async fn accept_websocket_on(
        &self,
        listener: &TcpListener,
    ) -> anyhow::Result<(ClientTransport, mpsc::Receiver<TransportEvent>)> {
        let (stream, peer_addr) = listener.accept().await?;
        debug!("accepted reverse connection (websocket) from {}", peer_addr);

        let (reader, writer) = websocket::accept(stream).await?;
        let connected = self.establish(Box::new(reader), Box::new(writer)).await?;
        Ok(connected)
    }

    /// Drive the passive handshake over an already-connected pair of socket halves:
    ///  await the Reverse-Hello, validate it, then run Hello/Acknowledge.
    pub async fn establish(
        &self,
        reader: Box<dyn SocketReader>,
        writer: Box<dyn SocketWriter>,
    ) -> Result<(ClientTransport, mpsc::Receiver<TransportEvent>), TransportError> {
        let (transport, events) = Transport::new(self.config.clone(), reader, writer);

        // install before any await so the peer's Reverse-Hello cannot slip past
        let pending = transport.install_one_time_message_receiver();

        let mut reverse_handshake = ReverseHandshake::new(
            self.expected_endpoint_url.clone(),
            self.identity_policy.clone(),
        );
        let mut abort_state = AbortState::NotAborted;

        let chunk = match pending.wait().await {
            Ok(chunk) => chunk,
            Err(e) => {
                transport.disconnect().await;
                return Err(e);
            }
        };

        let reverse_hello = match decode_reverse_hello(&chunk) {
            Ok(reverse_hello) => reverse_hello,
            Err(e) => return Err(abort_with_error(&transport, &mut abort_state, e).await),
        };
        debug!("received RHE: {:?}", reverse_hello);

        if let Err(e) = reverse_handshake.validate(&reverse_hello) {
            return Err(abort_with_error(&transport, &mut abort_state, e).await);
        }

        let parameters = perform_hello_ack(&transport, &self.expected_endpoint_url).await?;
        transport.mark_connected();
        info!(
            "transport {} connected in reverse mode as {}",
            transport.id(),
            self.expected_endpoint_url
        );

        Ok((
            ClientTransport::from_parts(transport, parameters, self.expected_endpoint_url.clone()),
            events,
        ))
    }
}
