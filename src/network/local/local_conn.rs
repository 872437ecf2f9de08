use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::network::address::{Address, ConnType};
use crate::network::error::{TransportError, TransportResult};
use crate::network::local::conn_queue::ConnQueue;
use crate::network::local::local_context::{Endpoint, LocalContext};
use crate::network::message_type::Body;
use crate::network::packet::Packet;
use crate::network::transport::Conn;

/// One side of a virtual connection inside a [LocalContext]. Sending puts the packet directly
///  into the peer's [ConnQueue], receiving takes packets from this side's own queue.
///
/// The queue is shared with the context (which routes packets from the peer into it), never with
///  the peer connection itself.
pub struct LocalConn {
    local: Endpoint,
    remote: Endpoint,
    queue: Arc<ConnQueue>,
    ctx: Arc<LocalContext>,
}

impl Debug for LocalConn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalConn{{{}#{} -> {}#{}}}", self.local.addr, self.local.uid, self.remote.addr, self.remote.uid)
    }
}

impl LocalConn {
    /// Only initializes the fields without registering anything with the context - connections
    ///  are created through [LocalContext::connect].
    pub(crate) fn new(ctx: Arc<LocalContext>, local: Endpoint, remote: Endpoint) -> LocalConn {
        LocalConn {
            local,
            remote,
            queue: Arc::new(ConnQueue::new()),
            ctx,
        }
    }

    pub(crate) fn queue(&self) -> Arc<ConnQueue> {
        self.queue.clone()
    }

    /// Connects `local` to `remote` in the given context, failing right away if `remote` is not
    ///  listening.
    pub fn connect(ctx: &Arc<LocalContext>, local: Address, remote: Address) -> TransportResult<Arc<LocalConn>> {
        ctx.connect(local, remote)
    }
}

#[async_trait]
impl Conn for LocalConn {
    async fn send(&self, cancel: &CancellationToken, msg: &dyn Body) -> TransportResult<()> {
        if cancel.is_cancelled() {
            return Err(TransportError::Canceled);
        }
        trace!(conn = ?self, msg_type = ?msg.message_type(), "sending message");
        let packet = Packet::new(msg, self.local.addr.clone());
        self.ctx.send(&self.remote, packet)
    }

    async fn receive(&self, cancel: &CancellationToken) -> TransportResult<Packet> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Canceled),
            packet = self.queue.pop() => packet,
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.queue.close();
        self.ctx.close(&self.local, &self.remote);
        Ok(())
    }

    fn local(&self) -> Address {
        self.local.addr.clone()
    }

    fn remote(&self) -> Address {
        self.remote.addr.clone()
    }

    /// byte counts are not tracked for virtual connections
    fn rx(&self) -> u64 {
        0
    }

    fn tx(&self) -> u64 {
        0
    }

    fn conn_type(&self) -> ConnType {
        ConnType::Local
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::test_util::handler::ChannelAcceptHandler;
    use crate::test_util::message::{BlobMessage, SimpleMessage, TextMessage, TEXT_MESSAGE_TYPE};

    use super::*;

    async fn connected_pair(ctx: &Arc<LocalContext>) -> (Arc<LocalConn>, Arc<dyn Conn>) {
        let (handler, mut accepted) = ChannelAcceptHandler::new();
        ctx.listening(Address::local("b"), handler).unwrap();
        let outgoing = LocalConn::connect(ctx, Address::local("a"), Address::local("b")).unwrap();
        let incoming = accepted.next().await;
        (outgoing, incoming)
    }

    #[tokio::test]
    async fn test_ping_scenario() {
        let ctx = LocalContext::new();
        let (a, b) = connected_pair(&ctx).await;
        let cancel = CancellationToken::new();

        a.send(&cancel, &TextMessage::new("ping")).await.unwrap();
        let packet = b.receive(&cancel).await.unwrap();
        assert_eq!(packet.msg_type, TEXT_MESSAGE_TYPE);
        assert_eq!(packet.downcast_ref::<TextMessage>(), Some(&TextMessage::new("ping")));
        assert_eq!(packet.from, Address::local("a"));

        a.close().await.unwrap();
        assert!(b.receive(&cancel).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_full_duplex_in_order() {
        let ctx = LocalContext::new();
        let (a, b) = connected_pair(&ctx).await;
        let cancel = CancellationToken::new();

        for n in 0..10 {
            a.send(&cancel, &SimpleMessage(n)).await.unwrap();
            b.send(&cancel, &SimpleMessage(100 + n)).await.unwrap();
        }
        for n in 0..10 {
            let at_b = b.receive(&cancel).await.unwrap();
            assert_eq!(at_b.downcast_ref::<SimpleMessage>(), Some(&SimpleMessage(n)));
            assert_eq!(at_b.from, Address::local("a"));

            let at_a = a.receive(&cancel).await.unwrap();
            assert_eq!(at_a.downcast_ref::<SimpleMessage>(), Some(&SimpleMessage(100 + n)));
            assert_eq!(at_a.from, Address::local("b"));
        }
    }

    #[tokio::test]
    async fn test_pending_packets_survive_peer_close() {
        let ctx = LocalContext::new();
        let (a, b) = connected_pair(&ctx).await;
        let cancel = CancellationToken::new();

        a.send(&cancel, &SimpleMessage(1)).await.unwrap();
        a.send(&cancel, &SimpleMessage(2)).await.unwrap();
        a.close().await.unwrap();

        assert!(a.send(&cancel, &SimpleMessage(3)).await.unwrap_err().is_closed());
        assert_eq!(b.receive(&cancel).await.unwrap().downcast_ref::<SimpleMessage>(), Some(&SimpleMessage(1)));
        assert_eq!(b.receive(&cancel).await.unwrap().downcast_ref::<SimpleMessage>(), Some(&SimpleMessage(2)));
        assert!(b.receive(&cancel).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_close_from_accepting_side() {
        let ctx = LocalContext::new();
        let (a, b) = connected_pair(&ctx).await;
        let cancel = CancellationToken::new();

        b.close().await.unwrap();
        assert!(a.receive(&cancel).await.unwrap_err().is_closed());
        assert!(a.send(&cancel, &SimpleMessage(1)).await.unwrap_err().is_closed());
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_double_close() {
        let ctx = LocalContext::new();
        let (a, b) = connected_pair(&ctx).await;

        a.close().await.unwrap();
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_blocked_receive() {
        let ctx = LocalContext::new();
        let (a, b) = connected_pair(&ctx).await;

        let receiver = tokio::spawn(async move {
            b.receive(&CancellationToken::new()).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!receiver.is_finished());

        a.close().await.unwrap();
        assert!(receiver.await.unwrap().unwrap_err().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_receive() {
        let ctx = LocalContext::new();
        let (_a, b) = connected_pair(&ctx).await;
        let cancel = CancellationToken::new();

        let receiver = tokio::spawn({
            let cancel = cancel.clone();
            async move { b.receive(&cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert!(matches!(receiver.await.unwrap(), Err(TransportError::Canceled)));
    }

    #[tokio::test]
    async fn test_byte_counters_and_type() {
        let ctx = LocalContext::new();
        let (a, b) = connected_pair(&ctx).await;
        let cancel = CancellationToken::new();

        a.send(&cancel, &BlobMessage::random(5000)).await.unwrap();
        b.receive(&cancel).await.unwrap();

        assert_eq!((a.rx(), a.tx(), b.rx(), b.tx()), (0, 0, 0, 0));
        assert_eq!(a.conn_type(), ConnType::Local);
        assert_eq!(b.conn_type(), ConnType::Local);
    }
}
