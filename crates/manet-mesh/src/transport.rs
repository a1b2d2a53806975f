//! Point-to-point message transport.
//!
//! Every exchange is one connection carrying one frame: connect, send,
//! close. There is no retry and no queueing beyond what the OS (or the
//! in-memory channel) provides. Two adapters implement the [`Network`]
//! seam: [`TcpNetwork`] for real sockets and [`MemoryNetwork`] for
//! in-process runs, which still pushes every frame through the codec.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Encoder, FramedRead, FramedWrite};
use tracing::{debug, trace};

use manet_core::wire::{DEFAULT_MAX_FRAME, decode_frame_with};
use manet_core::{Endpoint, Envelope, ManetError, PacketCodec, Result};

/// A bound endpoint that yields one envelope per accepted exchange.
#[async_trait]
pub trait Listener: Send {
    /// Wait for the next incoming exchange and decode its single frame.
    async fn accept(&mut self) -> Result<Envelope>;

    /// The endpoint this listener is bound to.
    fn local_endpoint(&self) -> Endpoint;
}

/// Connect/send/close transport shared by routers and devices.
#[async_trait]
pub trait Network: Send + Sync {
    /// Bind a listener at `endpoint`. Port 0 asks for any free port.
    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Listener>>;

    /// Deliver one envelope to `endpoint`.
    async fn send(&self, endpoint: &Endpoint, envelope: &Envelope) -> Result<()>;
}

// ── TCP ────────────────────────────────────────────────────────

/// Real sockets: one TCP connection per message.
#[derive(Debug, Clone)]
pub struct TcpNetwork {
    max_frame: usize,
}

impl TcpNetwork {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for TcpNetwork {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

#[async_trait]
impl Network for TcpNetwork {
    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Listener>> {
        let listener = TcpListener::bind((endpoint.address.as_str(), endpoint.port)).await?;
        let local = listener.local_addr()?;
        debug!(addr = %local, "socket is listening");
        Ok(Box::new(TcpPacketListener {
            listener,
            local: Endpoint::new(endpoint.address.clone(), local.port()),
            max_frame: self.max_frame,
        }))
    }

    async fn send(&self, endpoint: &Endpoint, envelope: &Envelope) -> Result<()> {
        let stream = TcpStream::connect((endpoint.address.as_str(), endpoint.port))
            .await
            .map_err(|e| ManetError::Unreachable(format!("{endpoint}: {e}")))?;
        let mut framed = FramedWrite::new(stream, PacketCodec::new(self.max_frame));
        framed.send(envelope).await?;
        framed.into_inner().shutdown().await?;
        trace!(to = %endpoint, "sent frame");
        Ok(())
    }
}

struct TcpPacketListener {
    listener: TcpListener,
    local: Endpoint,
    max_frame: usize,
}

#[async_trait]
impl Listener for TcpPacketListener {
    async fn accept(&mut self) -> Result<Envelope> {
        let (stream, peer) = self.listener.accept().await?;
        let mut framed = FramedRead::new(stream, PacketCodec::new(self.max_frame));
        match framed.next().await {
            Some(Ok(envelope)) => Ok(envelope),
            Some(Err(e)) => Err(e.into()),
            None => Err(ManetError::ConnectionClosed(peer.to_string())),
        }
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local.clone()
    }
}

// ── In-memory ──────────────────────────────────────────────────

type Mailboxes = Arc<Mutex<HashMap<Endpoint, mpsc::UnboundedSender<Bytes>>>>;

/// In-process transport: endpoints map to channels of encoded frames.
#[derive(Clone)]
pub struct MemoryNetwork {
    mailboxes: Mailboxes,
    max_frame: usize,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    /// Frames larger than `max_frame` bytes are refused on send and receive,
    /// as with [`TcpNetwork::new`].
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
            max_frame,
        }
    }

    /// Push raw bytes into a mailbox, bypassing the encoder.
    #[cfg(test)]
    pub(crate) fn send_raw(&self, endpoint: &Endpoint, frame: &'static [u8]) -> Result<()> {
        let tx = self
            .mailboxes
            .lock()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| ManetError::Unreachable(endpoint.to_string()))?;
        tx.send(Bytes::from_static(frame))
            .map_err(|_| ManetError::Unreachable(endpoint.to_string()))
    }

    /// Number of endpoints currently bound.
    pub fn bound_count(&self) -> usize {
        self.mailboxes.lock().len()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Listener>> {
        let mut mailboxes = self.mailboxes.lock();
        if let Some(existing) = mailboxes.get(endpoint) {
            if !existing.is_closed() {
                return Err(ManetError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("{endpoint} is already bound"),
                )));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        mailboxes.insert(endpoint.clone(), tx);
        Ok(Box::new(MemoryListener {
            rx,
            local: endpoint.clone(),
            codec: PacketCodec::new(self.max_frame),
        }))
    }

    async fn send(&self, endpoint: &Endpoint, envelope: &Envelope) -> Result<()> {
        let mut buf = BytesMut::new();
        <PacketCodec as Encoder<&Envelope>>::encode(
            &mut PacketCodec::new(self.max_frame),
            envelope,
            &mut buf,
        )?;
        let tx = self
            .mailboxes
            .lock()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| ManetError::Unreachable(endpoint.to_string()))?;
        tx.send(buf.freeze())
            .map_err(|_| ManetError::Unreachable(endpoint.to_string()))
    }
}

struct MemoryListener {
    rx: mpsc::UnboundedReceiver<Bytes>,
    local: Endpoint,
    codec: PacketCodec,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> Result<Envelope> {
        let frame = self
            .rx
            .recv()
            .await
            .ok_or_else(|| ManetError::ConnectionClosed(self.local.to_string()))?;
        Ok(decode_frame_with(&mut self.codec, &frame)?)
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manet_core::{CodecError, Coordinate, Packet, RoutingTable};

    fn envelope(sender: &str) -> Envelope {
        Envelope::new(Packet::discovery(
            sender,
            Coordinate::new(1, 2),
            10,
            RoutingTable::new(),
        ))
    }

    #[tokio::test]
    async fn test_memory_send_and_accept() {
        let net = MemoryNetwork::new();
        let ep = Endpoint::new("mem", 1);
        let mut listener = net.bind(&ep).await.unwrap();
        net.send(&ep, &envelope("A")).await.unwrap();
        let got = listener.accept().await.unwrap();
        assert_eq!(got, envelope("A"));
        assert_eq!(listener.local_endpoint(), ep);
    }

    #[tokio::test]
    async fn test_memory_send_to_unbound_is_unreachable() {
        let net = MemoryNetwork::new();
        let err = net
            .send(&Endpoint::new("mem", 9), &envelope("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, ManetError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_memory_frame_limit() {
        let net = MemoryNetwork::with_max_frame(32);
        let ep = Endpoint::new("mem", 1);
        let _listener = net.bind(&ep).await.unwrap();
        let err = net.send(&ep, &envelope("A")).await.unwrap_err();
        assert!(matches!(err, ManetError::Codec(CodecError::FrameTooLarge { max: 32, .. })));
    }

    #[tokio::test]
    async fn test_memory_garbage_is_rejected_and_listener_survives() {
        let net = MemoryNetwork::new();
        let ep = Endpoint::new("mem", 1);
        let mut listener = net.bind(&ep).await.unwrap();
        net.send_raw(&ep, b"\x00\x00\x00\x05\x00oops").unwrap();
        net.send(&ep, &envelope("B")).await.unwrap();
        assert!(listener.accept().await.is_err());
        assert_eq!(listener.accept().await.unwrap(), envelope("B"));
    }

    #[tokio::test]
    async fn test_memory_double_bind_fails() {
        let net = MemoryNetwork::new();
        let ep = Endpoint::new("mem", 1);
        let _first = net.bind(&ep).await.unwrap();
        assert!(net.bind(&ep).await.is_err());
        assert_eq!(net.bound_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_rebind_after_drop() {
        let net = MemoryNetwork::new();
        let ep = Endpoint::new("mem", 1);
        drop(net.bind(&ep).await.unwrap());
        assert!(net.bind(&ep).await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_send_and_accept() {
        let net = TcpNetwork::default();
        let mut listener = net.bind(&Endpoint::new("127.0.0.1", 0)).await.unwrap();
        let ep = listener.local_endpoint();
        assert_ne!(ep.port, 0);

        let marked = envelope("B").marked();
        let sender = {
            let net = net.clone();
            let ep = ep.clone();
            let marked = marked.clone();
            tokio::spawn(async move { net.send(&ep, &marked).await })
        };
        let got = listener.accept().await.unwrap();
        sender.await.unwrap().unwrap();
        assert_eq!(got, marked);
        assert!(got.rebroadcast);
    }

    #[tokio::test]
    async fn test_tcp_rejects_garbage_and_keeps_listening() {
        let net = TcpNetwork::default();
        let mut listener = net.bind(&Endpoint::new("127.0.0.1", 0)).await.unwrap();
        let ep = listener.local_endpoint();

        let garbage = tokio::spawn({
            let ep = ep.clone();
            async move {
                let mut stream = TcpStream::connect((ep.address.as_str(), ep.port))
                    .await
                    .unwrap();
                stream.write_all(b"\x00\x00\x00\x05\x00oops").await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });
        assert!(listener.accept().await.is_err());
        garbage.await.unwrap();

        let net2 = net.clone();
        let ep2 = ep.clone();
        let good = tokio::spawn(async move { net2.send(&ep2, &envelope("C")).await });
        assert_eq!(listener.accept().await.unwrap(), envelope("C"));
        good.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tcp_send_to_closed_port_is_unreachable() {
        let net = TcpNetwork::default();
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = net
            .send(&Endpoint::new("127.0.0.1", port), &envelope("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, ManetError::Unreachable(_)));
    }
}
