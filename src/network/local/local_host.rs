use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::network::address::{Address, ConnType};
use crate::network::error::{TransportError, TransportResult};
use crate::network::local::local_context::LocalContext;
use crate::network::local::local_listener::LocalListener;
use crate::network::network_config::NetworkConfig;
use crate::network::retry::with_retry;
use crate::network::server_identity::ServerIdentity;
use crate::network::transport::{AcceptHandler, Client, Conn, Host, Listener};

/// A node on a virtual network: listens on its own address and connects to other nodes of the
///  same [LocalContext].
#[derive(Debug)]
pub struct LocalHost {
    addr: Address,
    listener: LocalListener,
    ctx: Arc<LocalContext>,
    config: Arc<NetworkConfig>,
}

impl LocalHost {
    pub fn new(ctx: Arc<LocalContext>, addr: Address, config: Arc<NetworkConfig>) -> TransportResult<LocalHost> {
        config.check()?;
        let listener = LocalListener::new(ctx.clone(), addr.clone())?;
        Ok(LocalHost {
            addr,
            listener,
            ctx,
            config,
        })
    }
}

/// Connects with retries: the remote node may not have started listening yet.
async fn connect_with_retry(ctx: &Arc<LocalContext>, config: &NetworkConfig, own: &Address, remote: &Address) -> TransportResult<Arc<dyn Conn>> {
    if remote.conn_type() != ConnType::Local {
        return Err(TransportError::WrongConnType { address: remote.clone(), expected: ConnType::Local });
    }

    let conn: Arc<dyn Conn> = with_retry(config, "virtual connect", || async move {
        ctx.connect(own.clone(), remote.clone())
    }).await?;
    debug!(?own, ?remote, "connected");
    Ok(conn)
}

#[async_trait]
impl Listener for LocalHost {
    async fn listen(&self, handler: Arc<dyn AcceptHandler>) -> TransportResult<()> {
        self.listener.listen(handler).await
    }

    async fn stop(&self) -> TransportResult<()> {
        self.listener.stop().await
    }

    fn address(&self) -> Address {
        self.addr.clone()
    }

    fn is_listening(&self) -> bool {
        self.listener.is_listening()
    }

    fn incoming_type(&self) -> ConnType {
        self.listener.incoming_type()
    }
}

#[async_trait]
impl Host for LocalHost {
    async fn connect(&self, remote: &ServerIdentity) -> TransportResult<Arc<dyn Conn>> {
        connect_with_retry(&self.ctx, &self.config, &self.addr, &remote.address).await
    }
}

/// Establishes virtual connections on behalf of nodes that do not listen themselves.
#[derive(Debug)]
pub struct LocalClient {
    ctx: Arc<LocalContext>,
    config: Arc<NetworkConfig>,
}

impl LocalClient {
    pub fn new(ctx: Arc<LocalContext>, config: Arc<NetworkConfig>) -> TransportResult<LocalClient> {
        config.check()?;
        Ok(LocalClient { ctx, config })
    }
}

#[async_trait]
impl Client for LocalClient {
    async fn connect(&self, own: &ServerIdentity, remote: &ServerIdentity) -> TransportResult<Arc<dyn Conn>> {
        connect_with_retry(&self.ctx, &self.config, &own.address, &remote.address).await
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::test_util::handler::ChannelAcceptHandler;
    use crate::test_util::message::SimpleMessage;

    use super::*;

    fn config() -> Arc<NetworkConfig> {
        Arc::new(NetworkConfig {
            max_retry_connect: 4,
            wait_retry: Duration::from_millis(50),
            ..Default::default()
        })
    }

    fn identity(name: &str) -> ServerIdentity {
        ServerIdentity::new(Address::local(name))
    }

    async fn listening_host(ctx: &Arc<LocalContext>, name: &str) -> (Arc<LocalHost>, crate::test_util::handler::AcceptedConns) {
        let host = Arc::new(LocalHost::new(ctx.clone(), Address::local(name), config()).unwrap());
        let (handler, accepted) = ChannelAcceptHandler::new();
        tokio::spawn({
            let host = host.clone();
            async move { host.listen(handler).await }
        });
        while !host.is_listening() {
            tokio::task::yield_now().await;
        }
        (host, accepted)
    }

    #[tokio::test]
    async fn test_hosts_talk_to_each_other() {
        let ctx = LocalContext::new();
        let (a, _) = listening_host(&ctx, "a").await;
        let (b, mut accepted_by_b) = listening_host(&ctx, "b").await;
        let cancel = CancellationToken::new();

        let conn = a.connect(&identity("b")).await.unwrap();
        let incoming = accepted_by_b.next().await;

        conn.send(&cancel, &SimpleMessage(5)).await.unwrap();
        let packet = incoming.receive(&cancel).await.unwrap();
        assert_eq!(packet.downcast_ref::<SimpleMessage>(), Some(&SimpleMessage(5)));
        assert_eq!(packet.from, a.address());

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_fails() {
        let ctx = LocalContext::new();
        let host = LocalHost::new(ctx.clone(), Address::local("a"), config()).unwrap();
        let start = Instant::now();

        match host.connect(&identity("nobody")).await {
            Err(TransportError::NotListening { remote, .. }) => assert_eq!(remote, Address::local("nobody")),
            other => panic!("expected not listening, was {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_succeeds_when_remote_starts_listening_late() {
        let ctx = LocalContext::new();
        let host = LocalHost::new(ctx.clone(), Address::local("a"), config()).unwrap();

        let late = Arc::new(LocalHost::new(ctx.clone(), Address::local("late"), config()).unwrap());
        let (handler, mut accepted) = ChannelAcceptHandler::new();
        tokio::spawn({
            let late = late.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(70)).await;
                late.listen(handler).await
            }
        });

        let conn = host.connect(&identity("late")).await.unwrap();
        assert_eq!(conn.remote(), Address::local("late"));
        assert_eq!(accepted.next().await.remote(), Address::local("a"));
    }

    #[tokio::test]
    async fn test_connect_to_tcp_address() {
        let ctx = LocalContext::new();
        let host = LocalHost::new(ctx, Address::local("a"), config()).unwrap();
        let remote = ServerIdentity::new(Address::tcp("127.0.0.1:2000".parse().unwrap()));
        assert!(matches!(host.connect(&remote).await, Err(TransportError::WrongConnType { .. })));
    }

    #[tokio::test]
    async fn test_client() {
        let ctx = LocalContext::new();
        let (_b, mut accepted) = listening_host(&ctx, "b").await;
        let client = LocalClient::new(ctx.clone(), config()).unwrap();

        let conn = client.connect(&identity("client"), &identity("b")).await.unwrap();
        assert_eq!(conn.local(), Address::local("client"));
        assert_eq!(accepted.next().await.remote(), Address::local("client"));
    }

    #[test]
    fn test_invalid_config() {
        let ctx = LocalContext::new();
        let invalid = Arc::new(NetworkConfig {
            max_retry_connect: 0,
            ..Default::default()
        });
        assert!(matches!(LocalHost::new(ctx.clone(), Address::local("a"), invalid.clone()), Err(TransportError::InvalidConfig(_))));
        assert!(matches!(LocalClient::new(ctx, invalid), Err(TransportError::InvalidConfig(_))));
    }
}
