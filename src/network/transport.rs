use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio_util::sync::CancellationToken;

use crate::network::address::{Address, ConnType};
use crate::network::error::TransportResult;
use crate::network::message_type::Body;
use crate::network::packet::Packet;
use crate::network::server_identity::ServerIdentity;

/// A [Conn] is a bidirectional, point-to-point packet channel to a single peer. The TCP and the
///  virtual transport behave the same way as seen through this trait: packets arrive in the
///  order they were sent, and closing either side ends the conversation for both sides.
///
/// `send` and `receive` can be called concurrently from different tasks. Each of them is
///  serialized internally, so concurrent sends never interleave on the wire.
#[async_trait]
pub trait Conn: Debug + Send + Sync {
    /// Sends a message to the remote side. Fails with [crate::network::error::TransportError::Closed]
    ///  if this connection or its peer was closed.
    async fn send(&self, cancel: &CancellationToken, msg: &dyn Body) -> TransportResult<()>;

    /// Waits for the next packet. Returns [crate::network::error::TransportError::Closed] once
    ///  no more packets will arrive, and [crate::network::error::TransportError::Canceled] as soon
    ///  as `cancel` is triggered.
    async fn receive(&self, cancel: &CancellationToken) -> TransportResult<Packet>;

    /// Closing is idempotent, closing an already closed connection returns `Ok`.
    async fn close(&self) -> TransportResult<()>;

    fn local(&self) -> Address;
    fn remote(&self) -> Address;

    /// number of bytes received since the connection was established
    fn rx(&self) -> u64;
    /// number of bytes sent since the connection was established
    fn tx(&self) -> u64;

    fn conn_type(&self) -> ConnType;
}

/// This trait decouples accepting connections from what application code does with them. A
///  listener calls it in a task of its own for every accepted connection, so implementations can
///  run the connection's entire lifetime inside `on_accept`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AcceptHandler: Send + Sync + 'static {
    async fn on_accept(&self, conn: Arc<dyn Conn>);
}

#[async_trait]
pub trait Listener: Send + Sync {
    /// Starts accepting connections on the listener's address, calling `handler` for each of
    ///  them. This call blocks until [Listener::stop] is called.
    async fn listen(&self, handler: Arc<dyn AcceptHandler>) -> TransportResult<()>;

    /// Stops a running [Listener::listen] and waits for it to terminate. A stop that arrives
    ///  before `listen` has started is remembered, and the next `listen` returns right away
    ///  instead of blocking.
    async fn stop(&self) -> TransportResult<()>;

    fn address(&self) -> Address;

    fn is_listening(&self) -> bool;

    fn incoming_type(&self) -> ConnType;
}

/// A [Host] is a node's presence on the network: it listens on the node's own address and
///  establishes outgoing connections to other nodes.
#[async_trait]
pub trait Host: Listener {
    async fn connect(&self, remote: &ServerIdentity) -> TransportResult<Arc<dyn Conn>>;
}

/// A [Client] establishes outgoing connections without listening itself.
#[async_trait]
pub trait Client: Send + Sync {
    async fn connect(&self, own: &ServerIdentity, remote: &ServerIdentity) -> TransportResult<Arc<dyn Conn>>;
}
