use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::endpoint_url::EndpointUrl;
use crate::socket::{SocketReader, SocketWriter};

const READ_BUFFER_CAPACITY: usize = 8192;

pub struct TcpSocketReader {
    read_half: OwnedReadHalf,
}

#[async_trait]
impl SocketReader for TcpSocketReader {
    async fn recv(&mut self) -> std::io::Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
        let num_read = self.read_half.read_buf(&mut buf).await?;
        if num_read == 0 {
            Ok(None)
        } else {
            Ok(Some(buf.freeze()))
        }
    }
}

pub struct TcpSocketWriter {
    write_half: OwnedWriteHalf,
}

#[async_trait]
impl SocketWriter for TcpSocketWriter {
    async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.write_half.write_all(data).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.write_half.shutdown().await {
            debug!("error shutting down TCP stream: {}", e);
        }
    }
}

/// Split an established stream into the transport's reader / writer halves.
pub fn split(stream: TcpStream) -> (TcpSocketReader, TcpSocketWriter) {
    let (read_half, write_half) = stream.into_split();
    (TcpSocketReader { read_half }, TcpSocketWriter { write_half })
}

/// Dial the host / port of a parsed endpoint URL.
pub async fn connect(endpoint: &EndpointUrl) -> std::io::Result<(TcpSocketReader, TcpSocketWriter)> {
    debug!("dialing {}", endpoint.authority());
    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    Ok(split(stream))
}

/// Bind a listener, retrying for a while when the address is still in use - the
///  previous owner of a reverse-connect port may linger briefly after shutdown.
pub async fn bind_with_retry(
    addr: SocketAddr,
    max_attempts: u32,
    retry_delay: Duration,
) -> std::io::Result<TcpListener> {
    let mut attempt = 1;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse && attempt < max_attempts => {
                warn!("address {} in use (attempt {}/{}), retrying", addr, attempt, max_attempts);
                tokio::time::sleep(retry_delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_split_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = split(stream);
            let received = reader.recv().await.unwrap().unwrap();
            writer.send(&received).await.unwrap();
            writer.close().await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut reader, mut writer) = split(stream);
        writer.send(b"ping").await.unwrap();

        let echoed = reader.recv().await.unwrap().unwrap();
        assert_eq!(echoed.as_ref(), b"ping");

        // after the peer shuts down its write side the stream ends cleanly
        assert!(reader.recv().await.unwrap().is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_with_retry_gives_up() {
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = blocker.local_addr().unwrap();

        let result = bind_with_retry(addr, 2, Duration::from_millis(10)).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::AddrInUse);
    }
}
