use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::endpoint_url::EndpointUrl;
use crate::socket::{SocketReader, SocketWriter};

fn to_io_error(e: tungstenite::Error) -> std::io::Error {
    match e {
        tungstenite::Error::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::Other, other),
    }
}

pub struct WsSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> SocketReader for WsSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Close(frame))) => {
                    debug!("peer sent close frame: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // keepalive traffic, handled by the library
                }
                Some(Ok(other)) => {
                    warn!("ignoring non-binary WebSocket message: {:?}", other);
                }
                Some(Err(e)) => return Err(to_io_error(e)),
            }
        }
    }
}

pub struct WsSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> SocketWriter for WsSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.sink
            .send(Message::binary(data.to_vec()))
            .await
            .map_err(to_io_error)
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!("error sending WebSocket close frame: {}", e);
        }
        if let Err(e) = self.sink.close().await {
            debug!("error closing WebSocket sink: {}", e);
        }
    }
}

fn split_ws<S>(ws: WebSocketStream<S>) -> (WsSocketReader<S>, WsSocketWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    (WsSocketReader { stream }, WsSocketWriter { sink })
}

/// Dial the WebSocket endpoint of a parsed `opc.ws://` / `opc.wss://` URL.
pub async fn connect(
    endpoint: &EndpointUrl,
) -> std::io::Result<(
    WsSocketReader<MaybeTlsStream<TcpStream>>,
    WsSocketWriter<MaybeTlsStream<TcpStream>>,
)> {
    let url = endpoint.websocket_url();
    debug!("dialing {}", url);
    let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(to_io_error)?;
    Ok(split_ws(ws))
}

/// Perform the server side of the WebSocket upgrade on an accepted TCP stream. This is
///  how a reverse-connect listener shares an outer TCP (or TLS) listener.
pub async fn accept(
    stream: TcpStream,
) -> std::io::Result<(WsSocketReader<TcpStream>, WsSocketWriter<TcpStream>)> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(to_io_error)?;
    Ok(split_ws(ws))
}
