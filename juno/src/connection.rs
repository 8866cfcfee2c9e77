//! Transports carrying messages between a module and the juno host.
//!
//! A [`Connection`] only has to enqueue outbound messages in order;
//! inbound messages arrive separately on an [`Inbound`] channel that the
//! module drains with [`Module::listen`](crate::Module::listen).

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use juno_proto::Message;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// Inbound messages in the order the transport received them.
pub type Inbound = mpsc::UnboundedReceiver<Message>;

/// Outbound half of a duplex message channel.
pub trait Connection: Send + Sync + 'static {
    /// Enqueues `msg` for delivery without blocking.
    ///
    /// Messages are delivered in call order. Fails with
    /// [`Error::Disconnected`] once the connection is closed.
    fn send(&self, msg: Message) -> Result<()>;

    /// Closes the outbound half. Idempotent.
    ///
    /// Messages already enqueued are still delivered; the returned
    /// [`Drained`] resolves once they have been written.
    fn close(&self) -> Drained;
}

/// Completes when a closed connection has written out its queue.
///
/// Dropping it does not affect delivery.
#[derive(Debug)]
pub struct Drained(Option<oneshot::Receiver<()>>);

impl Drained {
    /// A `Drained` that is already complete.
    pub const fn ready() -> Self {
        Self(None)
    }
}

impl Future for Drained {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.0.as_mut() {
            // A writer that died early drops its sender; that counts as done.
            Some(rx) => Pin::new(rx).poll(cx).map(|_| ()),
            None => Poll::Ready(()),
        }
    }
}

/// Where the host listens.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Endpoint {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// TCP `host:port` address.
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Parses `unix:<path>`, `tcp:<host:port>`, or a bare value.
    ///
    /// A bare value is a TCP address when it contains `:` and does not
    /// look like a path; otherwise it is a socket path.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidEndpoint("empty endpoint".into()));
        }
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        let tcp = match s.strip_prefix("tcp:") {
            Some(addr) => addr,
            None if s.contains(':') && !s.starts_with(['/', '.', '~']) => s,
            None => return Ok(Self::Unix(PathBuf::from(s))),
        };
        match tcp.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(tcp.to_owned()))
            }
            _ => Err(Error::InvalidEndpoint(format!("expected host:port, got `{tcp}`"))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// Connection over a byte stream (Unix socket or TCP) to the host.
///
/// Owns two background tasks: a writer that drains the outbound queue
/// into the socket, and a reader that decodes frames onto [`Inbound`].
/// Lines that fail to decode are logged and dropped.
#[derive(Debug)]
pub struct SocketConnection {
    /// Outbound queue; `None` once closed.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Signalled by the writer task when it exits; taken by `close`.
    drained: Mutex<Option<oneshot::Receiver<()>>>,
}

impl SocketConnection {
    /// Connects to `endpoint`. Must be called inside a Tokio runtime.
    pub async fn connect(endpoint: &Endpoint) -> Result<(Self, Inbound)> {
        tracing::debug!(%endpoint, "connecting to juno");
        match endpoint {
            Endpoint::Unix(path) => Ok(Self::from_stream(UnixStream::connect(path).await?)),
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Self::from_stream(stream))
            }
        }
    }

    /// Drives an already established stream.
    pub fn from_stream<S>(stream: S) -> (Self, Inbound)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            write_loop(BufWriter::new(writer), out_rx).await;
            let _ = done_tx.send(());
        });
        tokio::spawn(read_loop(BufReader::new(reader), in_tx));
        let conn = Self {
            outbound: Mutex::new(Some(out_tx)),
            drained: Mutex::new(Some(done_rx)),
        };
        (conn, in_rx)
    }
}

impl Connection for SocketConnection {
    fn send(&self, msg: Message) -> Result<()> {
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(Error::Disconnected)?;
        tx.send(msg).map_err(|_| Error::Disconnected)
    }

    fn close(&self) -> Drained {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Drained(
            self.drained
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        )
    }
}

/// Writes queued messages until the queue closes or the socket fails.
async fn write_loop<W: AsyncWrite + Unpin>(mut w: W, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let written = async {
            juno_proto::send(&mut w, &msg).await?;
            w.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!(error = %e, "write to juno failed");
            return;
        }
    }
    let _ = w.shutdown().await;
}

/// Forwards decoded frames until end of stream or a transport error.
async fn read_loop<R: AsyncBufRead + Unpin>(mut r: R, tx: mpsc::UnboundedSender<Message>) {
    loop {
        let frame = match juno_proto::read_frame(&mut r).await {
            Ok(frame) => frame,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!("juno closed the connection");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "read from juno failed");
                return;
            }
        };
        match juno_proto::decode::<Message>(&frame) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed message"),
        }
    }
}

/// In-process connection that records every sent message.
///
/// Clones share the same record, so a test can hand one clone to a
/// [`Module`](crate::Module) and inspect traffic through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnection {
    /// Messages sent so far, oldest first.
    sent: Arc<Mutex<Vec<Message>>>,
    /// Set by [`Connection::close`].
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    /// Creates an open connection with an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recently sent message.
    pub fn last_sent(&self) -> Option<Message> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Whether [`Connection::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for MemoryConnection {
    fn send(&self, msg: Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Disconnected);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
        Ok(())
    }

    fn close(&self) -> Drained {
        self.closed.store(true, Ordering::Release);
        Drained::ready()
    }
}

#[cfg(test)]
mod tests {
    use juno_proto::{MessageType, RequestId};
    use tokio::io::AsyncBufReadExt;
    use tokio::net::UnixListener;

    use super::*;

    #[test]
    fn parse_endpoints() {
        assert_eq!(
            "../juno.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("../juno.sock"))
        );
        assert_eq!(
            "/run/juno.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/run/juno.sock"))
        );
        assert_eq!(
            "127.0.0.1:4000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:4000".into())
        );
        assert_eq!(
            "unix:/tmp/a:b.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/a:b.sock"))
        );
        assert_eq!(
            "tcp:localhost:2203".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("localhost:2203".into())
        );
    }

    #[test]
    fn reject_bad_endpoints() {
        assert!(matches!("".parse::<Endpoint>(), Err(Error::InvalidEndpoint(_))));
        assert!(matches!("host:port".parse::<Endpoint>(), Err(Error::InvalidEndpoint(_))));
        assert!(matches!("tcp::80".parse::<Endpoint>(), Err(Error::InvalidEndpoint(_))));
    }

    #[test]
    fn endpoint_display_roundtrips() {
        for s in ["unix:/run/juno.sock", "tcp:127.0.0.1:4000"] {
            assert_eq!(s.parse::<Endpoint>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn memory_connection_records_and_closes() {
        let conn = MemoryConnection::new();
        let observer = conn.clone();
        conn.send(Message::TriggerHook {
            request_id: "1".into(),
            hook: "h".into(),
        })
        .unwrap();
        assert_eq!(observer.sent().len(), 1);
        let _ = conn.close();
        assert!(observer.is_closed());
        assert!(matches!(
            conn.send(Message::InitializeAck {
                request_id: "2".into()
            }),
            Err(Error::Disconnected)
        ));
    }

    #[tokio::test]
    async fn unix_socket_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("juno.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let host = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, mut w) = stream.into_split();
            let mut r = tokio::io::BufReader::new(r);
            let received: Message = juno_proto::recv(&mut r).await.unwrap();
            w.write_all(b"garbage\n").await.unwrap();
            juno_proto::send(
                &mut w,
                &Message::InitializeAck {
                    request_id: received.request_id().unwrap().clone(),
                },
            )
            .await
            .unwrap();
            w.flush().await.unwrap();
            received
        });

        let (conn, mut inbound) = SocketConnection::connect(&Endpoint::Unix(path)).await.unwrap();
        conn.send(Message::Initialize {
            request_id: "init-1".into(),
            module_id: "test-module".into(),
            version: "1.0.0".into(),
            dependencies: Default::default(),
        })
        .unwrap();

        let reply = inbound.recv().await.unwrap();
        assert_eq!(reply.kind(), MessageType::InitializeAck);
        assert_eq!(reply.request_id(), Some(&RequestId::from("init-1")));

        let sent = host.await.unwrap();
        assert_eq!(sent.kind(), MessageType::Initialize);

        // Host task dropped its socket.
        assert!(inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_shuts_down_writer() {
        let (local, remote) = UnixStream::pair().unwrap();
        let (conn, _inbound) = SocketConnection::from_stream(local);
        conn.send(Message::TriggerHook {
            request_id: "last".into(),
            hook: "bye".into(),
        })
        .unwrap();
        conn.close().await;
        // Closing twice is harmless.
        conn.close().await;
        assert!(matches!(
            conn.send(Message::InitializeAck {
                request_id: "x".into()
            }),
            Err(Error::Disconnected)
        ));
        let mut r = tokio::io::BufReader::new(remote);
        let queued: Message = juno_proto::recv(&mut r).await.unwrap();
        assert_eq!(queued.request_id(), Some(&RequestId::from("last")));
        let mut line = String::new();
        assert_eq!(r.read_line(&mut line).await.unwrap(), 0);
    }
}
