//! Client stream abstraction over TCP, TLS and Unix sockets.

use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::tls::{create_tls_connector, TlsClientConfig};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream as ClientTlsStream;

pin_project! {
    /// A client stream that can be plain TCP, TLS or a Unix socket.
    #[project = ClientStreamProj]
    pub enum ClientStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: ClientTlsStream<TcpStream> },
        Unix { #[pin] stream: UnixStream },
    }
}

impl ClientStream {
    /// Dials `endpoint`, performing the TLS handshake for `ssl:` endpoints.
    ///
    /// The timeout covers connection setup including the handshake.
    pub async fn connect(
        endpoint: &Endpoint,
        tls: Option<&TlsClientConfig>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", endpoint);
        tokio::time::timeout(timeout, Self::dial(endpoint, tls))
            .await
            .map_err(|_| {
                tracing::debug!("Connection to {} timed out", endpoint);
                ClientError::Timeout
            })?
    }

    async fn dial(endpoint: &Endpoint, tls: Option<&TlsClientConfig>) -> Result<Self, ClientError> {
        match endpoint {
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                Ok(ClientStream::Unix { stream })
            }
            Endpoint::Tcp { .. } => {
                let stream = Self::dial_tcp(endpoint).await?;
                Ok(ClientStream::Plain { stream })
            }
            Endpoint::Ssl { host, .. } => {
                let tls = tls.ok_or_else(|| {
                    ClientError::TlsConfig(format!("{} requires a TLS configuration", endpoint))
                })?;
                let (connector, server_name) = create_tls_connector(tls, host)?;
                let tcp_stream = Self::dial_tcp(endpoint).await?;

                tracing::debug!("Performing TLS handshake...");
                let stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
                tracing::debug!("TLS handshake complete");
                Ok(ClientStream::Tls { stream })
            }
        }
    }

    async fn dial_tcp(endpoint: &Endpoint) -> Result<TcpStream, ClientError> {
        let addr = endpoint
            .socket_addr()
            .ok_or_else(|| ClientError::InvalidEndpoint(endpoint.to_string()))?;
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;
        stream.set_nodelay(true).ok();
        Ok(stream)
    }

    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls { .. })
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_read(cx, buf),
            ClientStreamProj::Unix { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_write(cx, buf),
            ClientStreamProj::Unix { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_flush(cx),
            ClientStreamProj::Tls { stream } => stream.poll_flush(cx),
            ClientStreamProj::Unix { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            ClientStreamProj::Tls { stream } => stream.poll_shutdown(cx),
            ClientStreamProj::Unix { stream } => stream.poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_connect_unix() {
        let dir = std::env::temp_dir().join(format!("ovsdb-stream-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("db.sock");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let endpoint = Endpoint::unix(&path);
        let mut stream = ClientStream::connect(&endpoint, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!stream.is_tls());
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_ssl_requires_tls_config() {
        let endpoint = Endpoint::ssl("127.0.0.1", 1);
        let result = ClientStream::connect(&endpoint, None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::TlsConfig(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let endpoint = Endpoint::unix("/nonexistent/ovsdb/db.sock");
        let result = ClientStream::connect(&endpoint, None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
