use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::network::address::{Address, ConnType};
use crate::network::error::{TransportError, TransportResult};
use crate::network::message_type::{Body, MessageRegistry};
use crate::network::network_config::NetworkConfig;
use crate::network::packet::Packet;
use crate::network::retry::with_retry;
use crate::network::transport::Conn;

const LEN_PREFIX_SIZE: usize = size_of::<u32>();

/// A [Conn] over a plain TCP stream. Every packet is sent as a frame: its length as a big-endian
///  u32, followed by the serialized packet.
///
/// Reading and writing use separate halves of the stream behind separate locks, so one send and
///  one receive can be in flight at the same time, while concurrent sends (or receives) are
///  serialized.
pub struct TcpConn {
    local: Address,
    remote: Address,
    reader: Mutex<Option<FrameReader>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: CancellationToken,
    rx: AtomicU64,
    tx: AtomicU64,
    config: Arc<NetworkConfig>,
    registry: Arc<MessageRegistry>,
}

impl Debug for TcpConn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TcpConn{{{} -> {}}}", self.local, self.remote)
    }
}

impl TcpConn {
    /// Wraps an established stream. `remote` is the address the peer is known by, which is what
    ///  received packets are marked as coming from.
    pub fn new(stream: TcpStream, remote: Address, config: Arc<NetworkConfig>, registry: Arc<MessageRegistry>) -> TransportResult<TcpConn> {
        config.check()?;
        let local = Address::tcp(stream.local_addr()?);
        let (read_half, write_half) = stream.into_split();

        Ok(TcpConn {
            local,
            remote,
            reader: Mutex::new(Some(FrameReader::new(read_half))),
            writer: Mutex::new(Some(write_half)),
            closed: CancellationToken::new(),
            rx: AtomicU64::new(0),
            tx: AtomicU64::new(0),
            config,
            registry,
        })
    }

    /// Dials `address`, retrying a bounded number of times with a fixed delay between attempts,
    ///  see [NetworkConfig::max_retry_connect] and [NetworkConfig::wait_retry].
    pub async fn connect(address: &Address, config: Arc<NetworkConfig>, registry: Arc<MessageRegistry>) -> TransportResult<TcpConn> {
        if address.conn_type() != ConnType::PlainTcp {
            return Err(TransportError::WrongConnType { address: address.clone(), expected: ConnType::PlainTcp });
        }
        config.check()?;

        let location = address.network_address();
        let stream = with_retry(&config, "tcp connect", || async move {
            TcpStream::connect(location).await
        }).await
            .map_err(|source| TransportError::Connect { address: address.clone(), source })?;

        let conn = TcpConn::new(stream, address.clone(), config, registry)?;
        debug!(local = ?conn.local, remote = ?conn.remote, "connected");
        Ok(conn)
    }

    async fn write_frame(&self, writer: &mut OwnedWriteHalf, frame: &[u8]) -> TransportResult<()> {
        let len = u32::try_from(frame.len())
            .map_err(|_| TransportError::MessageTooLarge { len: frame.len(), max: u32::MAX as usize })?;
        writer.write_all(&len.to_be_bytes()).await?;

        for chunk in frame.chunks(self.config.max_chunk_size) {
            let mut remaining = chunk;
            while !remaining.is_empty() {
                let n = writer.write(remaining).await?;
                if n == 0 {
                    return Err(TransportError::Closed);
                }
                self.tx.fetch_add(n as u64, Ordering::Relaxed);
                remaining = &remaining[n..];
            }
            trace!(sent = chunk.len(), total = frame.len(), "sent chunk");
        }
        Ok(())
    }

    async fn receive_frame(&self) -> TransportResult<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(TransportError::Closed)?;
        let frame = reader.read_frame(self.config.max_message_size).await?;
        self.rx.fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(frame)
    }
}

#[async_trait]
impl Conn for TcpConn {
    async fn send(&self, cancel: &CancellationToken, msg: &dyn Body) -> TransportResult<()> {
        if cancel.is_cancelled() {
            return Err(TransportError::Canceled);
        }
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let mut buf = BytesMut::new();
        Packet::write(msg, &mut buf);
        if buf.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge { len: buf.len(), max: self.config.max_message_size });
        }
        trace!(conn = ?self, msg_type = ?msg.message_type(), len = buf.len(), "sending message");

        // a frame is never abandoned half-way because of the caller's cancellation, that would
        //  corrupt the stream - only closing the connection interrupts it
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            result = async {
                let mut writer = self.writer.lock().await;
                let writer = writer.as_mut().ok_or(TransportError::Closed)?;
                self.write_frame(writer, &buf).await
            } => result,
        }
    }

    async fn receive(&self, cancel: &CancellationToken) -> TransportResult<Packet> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Canceled),
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            frame = self.receive_frame() => frame?,
        };

        let packet = Packet::try_read(&frame, &self.registry, self.remote.clone())?;
        trace!(conn = ?self, msg_type = ?packet.msg_type, len = frame.len(), "received message");
        Ok(packet)
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        // in-flight sends and receives give up their locks when they see this
        self.closed.cancel();

        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(conn = ?self, error = %e, "error shutting down connection");
            }
        }
        drop(reader);

        debug!(conn = ?self, "closed");
        Ok(())
    }

    fn local(&self) -> Address {
        self.local.clone()
    }

    fn remote(&self) -> Address {
        self.remote.clone()
    }

    fn rx(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    fn tx(&self) -> u64 {
        self.tx.load(Ordering::Relaxed)
    }

    fn conn_type(&self) -> ConnType {
        ConnType::PlainTcp
    }
}

/// Reads length-prefixed frames. The progress of a partially read frame is kept across calls,
///  so a receive that is cancelled in the middle of a frame does not lose any data: the next
///  call continues where the previous one stopped.
struct FrameReader {
    stream: OwnedReadHalf,
    len_buf: [u8; LEN_PREFIX_SIZE],
    len_filled: usize,
    payload: Option<Vec<u8>>,
    payload_filled: usize,
}

impl FrameReader {
    fn new(stream: OwnedReadHalf) -> FrameReader {
        FrameReader {
            stream,
            len_buf: [0; LEN_PREFIX_SIZE],
            len_filled: 0,
            payload: None,
            payload_filled: 0,
        }
    }

    async fn read_frame(&mut self, max_len: usize) -> TransportResult<Vec<u8>> {
        while self.len_filled < LEN_PREFIX_SIZE {
            let n = self.stream.read(&mut self.len_buf[self.len_filled..]).await?;
            if n == 0 {
                // the peer closing between two frames is a regular close
                return Err(if self.len_filled == 0 { TransportError::Closed } else { TransportError::Eof });
            }
            self.len_filled += n;
        }

        if self.payload.is_none() {
            let len = u32::from_be_bytes(self.len_buf) as usize;
            if len > max_len {
                return Err(TransportError::MessageTooLarge { len, max: max_len });
            }
            self.payload = Some(vec![0u8; len]);
            self.payload_filled = 0;
        }

        if let Some(payload) = self.payload.as_mut() {
            while self.payload_filled < payload.len() {
                let n = self.stream.read(&mut payload[self.payload_filled..]).await?;
                if n == 0 {
                    return Err(TransportError::Eof);
                }
                self.payload_filled += n;
            }
        }

        self.len_filled = 0;
        self.payload_filled = 0;
        Ok(self.payload.take().unwrap_or_default())
    }
}
