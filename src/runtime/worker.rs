//! Per-connection read, dispatch and reply loop.

use crate::delimiter::ResolvedDelimiter;
use crate::handler::Handler;
use crate::message::{Message, Reply};
use crate::runtime::connection::CloseSignal;
use crate::runtime::framing::{is_closed_kind, FrameReader};
use crate::runtime::ListenerContext;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, trace};

/// Drives one connection until it closes.
pub struct Worker<R, W> {
    id: usize,
    frames: FrameReader<R>,
    writer: W,
    close: CloseSignal,
    context: Arc<ListenerContext>,
}

impl<R, W> Worker<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a worker for the registry entry `id`.
    pub fn new(
        id: usize,
        reader: R,
        writer: W,
        close: CloseSignal,
        context: Arc<ListenerContext>,
    ) -> Self {
        let frames = FrameReader::new(reader, context.delimiter, context.read_timeout);
        Self {
            id,
            frames,
            writer,
            close,
            context,
        }
    }

    /// Run until a terminal read error or shutdown, then release the
    /// connection. Errors never escape the worker.
    pub async fn run(mut self) {
        loop {
            let frame = match self.frames.read_frame(&mut self.close).await {
                Ok(frame) => frame,
                Err(e) if e.is_timeout() => {
                    debug!(
                        timeout_ms = self.context.read_timeout.map(|t| t.as_millis() as u64),
                        pending = self.frames.pending().len(),
                        "Read timed out, waiting for more data"
                    );
                    continue;
                }
                Err(e) if e.is_connection_closed() => {
                    info!(reason = %e, "Connection is closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Error reading data from connection");
                    break;
                }
            };

            let message = Message::from_frame(&frame);
            if message.is_empty() {
                trace!("Skipping empty frame");
                continue;
            }

            trace!(bytes = frame.len(), "Dispatching message");
            let replies = dispatch(&self.context.handlers, &message).await;

            let Some(response) = encode_replies(&replies, self.context.delimiter) else {
                continue;
            };
            if !self.write(&response).await {
                break;
            }
        }

        self.context.registry.remove(self.id);
        trace!("Worker finished");
    }

    /// Write a reply frame. Returns false if the connection was closed by
    /// shutdown while writing.
    async fn write(&mut self, response: &[u8]) -> bool {
        let result = tokio::select! {
            biased;
            _ = &mut self.close => {
                info!("Connection is closed");
                return false;
            }
            result = self.writer.write_all(response) => result,
        };

        if let Err(e) = result {
            if is_closed_kind(e.kind()) {
                info!(error = %e, "Failed to write to closed connection");
            } else {
                error!(error = %e, "Failed to write to connection");
            }
        }
        true
    }
}

/// Invoke every handler in order and collect the non-empty replies.
///
/// A failing handler or an unreadable reply is logged and skipped.
pub async fn dispatch(handlers: &[Arc<dyn Handler>], message: &Message) -> Vec<String> {
    let mut replies = Vec::new();

    for (index, handler) in handlers.iter().enumerate() {
        let fields = match handler.handle(message).await {
            Ok(fields) => fields,
            Err(e) => {
                error!(handler = index, error = %e, "Error invoking handler");
                continue;
            }
        };

        match Reply::from_fields(&fields) {
            Ok(reply) if !reply.reply.is_empty() => replies.push(reply.reply),
            Ok(_) => {}
            Err(e) => {
                error!(handler = index, error = %e, "Failed to convert handler output");
            }
        }
    }

    replies
}

/// Join replies with the reply separator and terminate with a newline.
///
/// Returns `None` when there is nothing to send.
pub fn encode_replies(replies: &[String], delimiter: ResolvedDelimiter) -> Option<BytesMut> {
    if replies.is_empty() {
        return None;
    }

    let separator = delimiter.reply_separator();
    let size = replies.iter().map(|r| r.len() + 1).sum();
    let mut response = BytesMut::with_capacity(size);
    for (i, reply) in replies.iter().enumerate() {
        if i > 0 {
            response.put_u8(separator);
        }
        response.extend_from_slice(reply.as_bytes());
    }
    response.put_u8(b'\n');
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::message::Fields;
    use crate::runtime::connection::{detached_socket, ConnectionRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    /// Records messages and replies with a fixed value.
    struct Fixed {
        reply: Value,
        seen: Mutex<Vec<String>>,
    }

    impl Fixed {
        fn new(reply: Value) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Handler for Fixed {
        async fn handle(&self, message: &Message) -> Result<Fields, HandlerError> {
            self.seen.lock().unwrap().push(message.data.clone());
            let mut fields = Fields::new();
            fields.insert("reply".to_string(), self.reply.clone());
            Ok(fields)
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _message: &Message) -> Result<Fields, HandlerError> {
            Err(HandlerError::new("action failed"))
        }
    }

    fn context(
        handlers: Vec<Arc<dyn Handler>>,
        delimiter: ResolvedDelimiter,
        read_timeout: Option<Duration>,
    ) -> Arc<ListenerContext> {
        Arc::new(ListenerContext {
            handlers,
            delimiter,
            read_timeout,
            registry: ConnectionRegistry::new(0),
        })
    }

    fn register(ctx: &ListenerContext) -> (usize, CloseSignal) {
        let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
        ctx.registry.register(peer, detached_socket()).unwrap()
    }

    #[test]
    fn test_encode_replies() {
        let lf = ResolvedDelimiter::Byte(b'\n');
        assert!(encode_replies(&[], lf).is_none());
        assert_eq!(&encode_replies(&["A".into()], lf).unwrap()[..], b"A\n");
        assert_eq!(
            &encode_replies(&["A".into(), "B".into()], ResolvedDelimiter::Byte(b'\r')).unwrap()[..],
            b"A\rB\n"
        );
        assert_eq!(
            &encode_replies(&["A".into(), "B".into()], ResolvedDelimiter::None).unwrap()[..],
            b"A\nB\n"
        );
    }

    #[tokio::test]
    async fn test_dispatch_skips_empty_and_failed() {
        let a = Fixed::new(json!("A"));
        let empty = Fixed::new(json!(""));
        let bad = Fixed::new(json!(["x"]));
        let b = Fixed::new(json!("B"));
        let handlers: Vec<Arc<dyn Handler>> = vec![
            a.clone(),
            Arc::new(Failing),
            empty.clone(),
            bad.clone(),
            b.clone(),
        ];

        let replies = dispatch(&handlers, &Message::new("msg")).await;
        assert_eq!(replies, vec!["A".to_string(), "B".to_string()]);
        for handler in [&a, &empty, &bad, &b] {
            assert_eq!(handler.seen(), vec!["msg".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_worker_replies_per_frame() {
        let a = Fixed::new(json!("A"));
        let empty = Fixed::new(json!(""));
        let ctx = context(
            vec![a.clone(), empty.clone()],
            ResolvedDelimiter::Byte(b'\n'),
            None,
        );
        let (id, close) = register(&ctx);

        let reader = tokio_test::io::Builder::new().read(b"hello\n").build();
        let writer = tokio_test::io::Builder::new().write(b"A\n").build();
        Worker::new(id, reader, writer, close, Arc::clone(&ctx)).run().await;

        assert_eq!(a.seen(), vec!["hello".to_string()]);
        assert_eq!(empty.seen(), vec!["hello".to_string()]);
        // Worker removed itself on close
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_worker_skips_empty_frames() {
        let a = Fixed::new(json!("A"));
        let ctx = context(vec![a.clone()], ResolvedDelimiter::Byte(b'\n'), None);
        let (id, close) = register(&ctx);

        let reader = tokio_test::io::Builder::new().read(b"\n\nx\n").build();
        let writer = tokio_test::io::Builder::new().write(b"A\n").build();
        Worker::new(id, reader, writer, close, ctx).run().await;

        assert_eq!(a.seen(), vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_worker_no_write_without_replies() {
        let silent = Fixed::new(Value::Null);
        let ctx = context(vec![silent.clone()], ResolvedDelimiter::Byte(b'\n'), None);
        let (id, close) = register(&ctx);

        let reader = tokio_test::io::Builder::new().read(b"one\ntwo\n").build();
        // Any write would fail the mock
        let writer = tokio_test::io::Builder::new().build();
        Worker::new(id, reader, writer, close, ctx).run().await;

        assert_eq!(silent.seen(), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_worker_continues_after_write_failure() {
        let a = Fixed::new(json!("A"));
        let ctx = context(vec![a.clone()], ResolvedDelimiter::Byte(b'\n'), None);
        let (id, close) = register(&ctx);

        let reader = tokio_test::io::Builder::new().read(b"first\nsecond\n").build();
        let writer = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"))
            .write(b"A\n")
            .build();
        Worker::new(id, reader, writer, close, Arc::clone(&ctx)).run().await;

        assert_eq!(a.seen(), vec!["first".to_string(), "second".to_string()]);
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_worker_stream_mode_single_message() {
        let a = Fixed::new(json!("A"));
        let b = Fixed::new(json!("B"));
        let ctx = context(vec![a.clone(), b.clone()], ResolvedDelimiter::None, None);
        let (id, close) = register(&ctx);

        let reader = tokio_test::io::Builder::new()
            .read(b"line one\n")
            .read(b"line two")
            .build();
        let writer = tokio_test::io::Builder::new().write(b"A\nB\n").build();
        Worker::new(id, reader, writer, close, ctx).run().await;

        assert_eq!(a.seen(), vec!["line one\nline two".to_string()]);
    }

    #[tokio::test]
    async fn test_worker_survives_idle_timeout() {
        let a = Fixed::new(json!("A"));
        let ctx = context(
            vec![a.clone()],
            ResolvedDelimiter::Byte(b'\n'),
            Some(Duration::from_millis(50)),
        );
        let (id, close) = register(&ctx);

        let (client, server) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(server);
        let worker = tokio::spawn(Worker::new(id, reader, writer, close, Arc::clone(&ctx)).run());

        // Several timeout windows pass without data
        tokio::time::sleep(Duration::from_millis(180)).await;
        assert!(!worker.is_finished());
        assert_eq!(ctx.registry.len(), 1);
        assert!(a.seen().is_empty());

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(b"late\n").await.unwrap();
        let mut buf = [0u8; 2];
        client_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"A\n");
        assert_eq!(a.seen(), vec!["late".to_string()]);

        drop(client_write);
        drop(client_read);
        worker.await.unwrap();
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_worker_stops_on_close_signal() {
        let ctx = context(Vec::new(), ResolvedDelimiter::Byte(b'\n'), None);
        let (id, close) = register(&ctx);

        let (_client, server) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(server);
        let worker = tokio::spawn(Worker::new(id, reader, writer, close, Arc::clone(&ctx)).run());

        assert_eq!(ctx.registry.close_all(), 1);
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.registry.is_empty());
    }
}
