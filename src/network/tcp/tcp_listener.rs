use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::network::address::{Address, ConnType};
use crate::network::error::{TransportError, TransportResult};
use crate::network::message_type::MessageRegistry;
use crate::network::network_config::NetworkConfig;
use crate::network::retry::with_retry;
use crate::network::tcp::tcp_conn::TcpConn;
use crate::network::transport::{AcceptHandler, Listener};

/// Accepts TCP connections on a fixed address, handing each of them to an [AcceptHandler] in a
///  task of its own.
#[derive(Debug)]
pub struct TcpListener {
    addr: Address,
    config: Arc<NetworkConfig>,
    registry: Arc<MessageRegistry>,
    state: Mutex<ListenerState>,
}

#[derive(Debug, Default)]
struct ListenerState {
    listening: bool,
    /// set by a `stop` that came before `listen` got going, consumed by the next `listen`
    stop_requested: bool,
    quit: CancellationToken,
    bound: Option<SocketAddr>,
}

impl TcpListener {
    pub fn new(addr: Address, config: Arc<NetworkConfig>, registry: Arc<MessageRegistry>) -> TransportResult<TcpListener> {
        config.check()?;
        Ok(TcpListener {
            addr,
            config,
            registry,
            state: Default::default(),
        })
    }

    /// The socket address the listener is actually bound to while it is listening. This differs
    ///  from [Listener::address] when binding to port 0.
    pub fn bound_address(&self) -> Option<SocketAddr> {
        self.lock().bound
    }

    fn lock(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn bind_addr(&self) -> TransportResult<SocketAddr> {
        let resolved = if self.config.bind_all_interfaces {
            self.addr.global_bind().await
        }
        else {
            self.addr.socket_addr().await
        };
        resolved.map_err(|e| TransportError::InvalidAddress(e.to_string()))
    }

    fn mark_stopped(&self) {
        let mut state = self.lock();
        state.listening = false;
        state.bound = None;
    }

    async fn accept_loop(&self, socket: tokio::net::TcpListener, quit: CancellationToken, handler: Arc<dyn AcceptHandler>) {
        loop {
            tokio::select! {
                biased;
                _ = quit.cancelled() => break,
                accepted = socket.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let config = self.config.clone();
                        let registry = self.registry.clone();
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handle_accepted(peer, stream, config, registry, handler).await
                        });
                    }
                    Err(e) => {
                        warn!(addr = ?self.addr, error = %e, "error accepting connection");
                        // errors like running out of file descriptors tend to persist for a while
                        tokio::select! {
                            _ = quit.cancelled() => break,
                            _ = tokio::time::sleep(self.config.wait_retry) => {}
                        }
                    }
                },
            }
        }
    }
}

#[instrument(name="accepted_connection", skip_all, fields(peer = format!("{:?}", peer)))]
async fn handle_accepted(peer: SocketAddr, stream: TcpStream, config: Arc<NetworkConfig>, registry: Arc<MessageRegistry>, handler: Arc<dyn AcceptHandler>) {
    debug!("accepted connection");
    match TcpConn::new(stream, Address::tcp(peer), config, registry) {
        Ok(conn) => handler.on_accept(Arc::new(conn)).await,
        Err(e) => warn!(error = %e, "could not set up accepted connection"),
    }
}

#[async_trait]
impl Listener for TcpListener {
    async fn listen(&self, handler: Arc<dyn AcceptHandler>) -> TransportResult<()> {
        if self.addr.conn_type() != ConnType::PlainTcp {
            return Err(TransportError::WrongConnType { address: self.addr.clone(), expected: ConnType::PlainTcp });
        }
        let bind_addr = self.bind_addr().await?;

        let quit = {
            let mut state = self.lock();
            if state.listening {
                return Err(TransportError::AlreadyListening(self.addr.clone()));
            }
            if state.stop_requested {
                state.stop_requested = false;
                debug!(addr = ?self.addr, "stopped before listening started");
                return Ok(());
            }
            state.listening = true;
            state.quit = CancellationToken::new();
            state.quit.clone()
        };

        let socket = match with_retry(&self.config, "tcp bind", || tokio::net::TcpListener::bind(bind_addr)).await {
            Ok(socket) => socket,
            Err(e) => {
                self.mark_stopped();
                return Err(TransportError::Bind { address: self.addr.clone(), reason: e.to_string() });
            }
        };
        let bound = match socket.local_addr() {
            Ok(bound) => bound,
            Err(e) => {
                self.mark_stopped();
                return Err(e.into());
            }
        };
        self.lock().bound = Some(bound);
        info!(addr = ?self.addr, ?bound, "listening");

        self.accept_loop(socket, quit, handler).await;

        self.mark_stopped();
        info!(addr = ?self.addr, "stopped listening");
        Ok(())
    }

    async fn stop(&self) -> TransportResult<()> {
        {
            let mut state = self.lock();
            if !state.listening {
                state.stop_requested = true;
                return Ok(());
            }
            state.quit.cancel();
        }

        for _ in 0..self.config.max_stop_polls {
            if !self.is_listening() {
                return Ok(());
            }
            tokio::time::sleep(self.config.stop_poll_interval).await;
        }
        if self.is_listening() {
            return Err(TransportError::Timeout(format!("listener on {} did not stop", self.addr)));
        }
        Ok(())
    }

    fn address(&self) -> Address {
        self.addr.clone()
    }

    fn is_listening(&self) -> bool {
        self.lock().listening
    }

    fn incoming_type(&self) -> ConnType {
        ConnType::PlainTcp
    }
}
