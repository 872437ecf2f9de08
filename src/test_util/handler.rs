use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::network::transport::{AcceptHandler, Conn};

/// An [AcceptHandler] that passes every accepted connection on to the test code through a
///  channel.
pub struct ChannelAcceptHandler {
    accepted: mpsc::UnboundedSender<Arc<dyn Conn>>,
}

impl ChannelAcceptHandler {
    pub fn new() -> (Arc<ChannelAcceptHandler>, AcceptedConns) {
        let (accepted, receiver) = mpsc::unbounded_channel();
        (Arc::new(ChannelAcceptHandler { accepted }), AcceptedConns { receiver })
    }
}

#[async_trait]
impl AcceptHandler for ChannelAcceptHandler {
    async fn on_accept(&self, conn: Arc<dyn Conn>) {
        // the test may have lost interest in further connections
        let _ = self.accepted.send(conn);
    }
}

/// the receiving side of a [ChannelAcceptHandler]
pub struct AcceptedConns {
    receiver: mpsc::UnboundedReceiver<Arc<dyn Conn>>,
}

impl AcceptedConns {
    const TIMEOUT: Duration = Duration::from_secs(10);

    /// returns the next accepted connection, panicking if there is none within ten seconds
    pub async fn next(&mut self) -> Arc<dyn Conn> {
        match tokio::time::timeout(Self::TIMEOUT, self.receiver.recv()).await {
            Ok(Some(conn)) => conn,
            Ok(None) => panic!("accept handler was dropped"),
            Err(_) => panic!("no connection was accepted within {:?}", Self::TIMEOUT),
        }
    }

    pub fn try_next(&mut self) -> Option<Arc<dyn Conn>> {
        self.receiver.try_recv().ok()
    }
}
