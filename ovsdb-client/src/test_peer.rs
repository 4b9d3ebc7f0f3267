//! Scripted server side of a JSON-RPC stream for tests.

use ovsdb_protocol::{Decoder, Encoder, Message, Request, Response};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) struct TestPeer<S> {
    stream: S,
    decoder: Decoder,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestPeer<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
        }
    }

    pub(crate) async fn next(&mut self) -> Message {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(message) = self.decoder.decode().unwrap() {
                return message;
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up");
            self.decoder.extend(&buf[..n]);
        }
    }

    /// Next request, skipping notifications.
    pub(crate) async fn next_request(&mut self) -> Request {
        loop {
            match self.next().await {
                Message::Request(request) => return request,
                Message::Notification(_) => continue,
                other => panic!("expected request, got {:?}", other),
            }
        }
    }

    /// Waits for a request of `method` and answers it with `result`.
    pub(crate) async fn answer(&mut self, method: &str, result: Value) -> Request {
        let request = self.next_request().await;
        assert_eq!(request.method, method);
        self.send(&Response::ok(request.id.clone(), result)).await;
        request
    }

    pub(crate) async fn send<T: Serialize>(&mut self, message: &T) {
        let encoded = Encoder::encode(message).unwrap();
        self.stream.write_all(&encoded).await.unwrap();
    }
}
