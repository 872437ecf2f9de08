use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::network::address::{Address, ConnType};
use crate::network::error::{TransportError, TransportResult};
use crate::network::message_type::MessageRegistry;
use crate::network::network_config::NetworkConfig;
use crate::network::server_identity::ServerIdentity;
use crate::network::tcp::tcp_conn::TcpConn;
use crate::network::tcp::tcp_listener::TcpListener;
use crate::network::transport::{AcceptHandler, Client, Conn, Host, Listener};

/// A node on a TCP network, listening on the address of its [ServerIdentity].
#[derive(Debug)]
pub struct TcpHost {
    identity: ServerIdentity,
    listener: TcpListener,
    config: Arc<NetworkConfig>,
    registry: Arc<MessageRegistry>,
}

impl TcpHost {
    pub fn new(identity: ServerIdentity, config: Arc<NetworkConfig>, registry: Arc<MessageRegistry>) -> TransportResult<TcpHost> {
        let listener = TcpListener::new(identity.address.clone(), config.clone(), registry.clone())?;
        Ok(TcpHost {
            identity,
            listener,
            config,
            registry,
        })
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn bound_address(&self) -> Option<SocketAddr> {
        self.listener.bound_address()
    }
}

async fn connect_tcp(remote: &Address, config: &Arc<NetworkConfig>, registry: &Arc<MessageRegistry>) -> TransportResult<Arc<dyn Conn>> {
    if remote.conn_type() != ConnType::PlainTcp {
        return Err(TransportError::WrongConnType { address: remote.clone(), expected: ConnType::PlainTcp });
    }
    let conn = TcpConn::connect(remote, config.clone(), registry.clone()).await?;
    Ok(Arc::new(conn))
}

#[async_trait]
impl Listener for TcpHost {
    async fn listen(&self, handler: Arc<dyn AcceptHandler>) -> TransportResult<()> {
        self.listener.listen(handler).await
    }

    async fn stop(&self) -> TransportResult<()> {
        self.listener.stop().await
    }

    fn address(&self) -> Address {
        self.identity.address.clone()
    }

    fn is_listening(&self) -> bool {
        self.listener.is_listening()
    }

    fn incoming_type(&self) -> ConnType {
        self.listener.incoming_type()
    }
}

#[async_trait]
impl Host for TcpHost {
    async fn connect(&self, remote: &ServerIdentity) -> TransportResult<Arc<dyn Conn>> {
        connect_tcp(&remote.address, &self.config, &self.registry).await
    }
}

/// Establishes outgoing TCP connections for nodes that do not listen themselves.
#[derive(Debug)]
pub struct TcpClient {
    config: Arc<NetworkConfig>,
    registry: Arc<MessageRegistry>,
}

impl TcpClient {
    pub fn new(config: Arc<NetworkConfig>, registry: Arc<MessageRegistry>) -> TransportResult<TcpClient> {
        config.check()?;
        Ok(TcpClient { config, registry })
    }
}

#[async_trait]
impl Client for TcpClient {
    async fn connect(&self, _own: &ServerIdentity, remote: &ServerIdentity) -> TransportResult<Arc<dyn Conn>> {
        connect_tcp(&remote.address, &self.config, &self.registry).await
    }
}
