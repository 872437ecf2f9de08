use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, Instrument};

use crate::network::address::Address;
use crate::network::error::{TransportError, TransportResult};
use crate::network::local::conn_queue::ConnQueue;
use crate::network::local::local_conn::LocalConn;
use crate::network::packet::Packet;
use crate::network::transport::{AcceptHandler, Conn};

/// One side of a virtual connection. The uid is unique per direction, so two connections between
///  the same pair of addresses never share a queue:
///
/// ```text
/// local://a -> local://b  =>  Endpoint { addr: local://a, uid: 14 }
/// local://a <- local://b  =>  Endpoint { addr: local://b, uid: 15 }
/// ```
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Endpoint {
    pub addr: Address,
    pub uid: u64,
}

/// A [LocalContext] is a virtual network inside a single process. It keeps track of which
///  addresses are listening and of the queues of all established virtual connections, which
///  allows [LocalConn]s and [crate::network::local::LocalListener]s to mimic their TCP
///  counterparts without any sockets.
///
/// Contexts are independent of each other, so tests can run their own network each, in
///  parallel.
pub struct LocalContext {
    inner: Mutex<LocalContextInner>,
}

#[derive(Default)]
struct LocalContextInner {
    /// maps an endpoint to the inbound queue of the connection owning it
    queues: FxHashMap<Endpoint, Arc<ConnQueue>>,
    listening: FxHashMap<Address, Listening>,
    next_uid: u64,
}

struct Listening {
    handler: Arc<dyn AcceptHandler>,
    /// cancelled when the address stops listening, whether explicitly or through a reset
    stopped: CancellationToken,
}

impl Debug for LocalContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        write!(f, "LocalContext{{connections:{}, listening:{:?}}}", inner.queues.len(), inner.listening.keys().collect::<Vec<_>>())
    }
}

impl LocalContext {
    pub fn new() -> Arc<LocalContext> {
        Arc::new(LocalContext {
            inner: Mutex::new(Default::default()),
        })
    }

    /// Forgets all connections and listeners, turning this into a fresh context. Connections
    ///  that are still open can not send any more after a reset, and listeners stop listening.
    pub fn reset(&self) {
        // uids keep counting: connections from before the reset still hold their endpoints
        let (queues, listening) = {
            let mut inner = self.lock();
            (std::mem::take(&mut inner.queues), std::mem::take(&mut inner.listening))
        };
        for queue in queues.values() {
            queue.close();
        }
        for listening in listening.values() {
            listening.stopped.cancel();
        }
        debug!("reset virtual network");
    }

    pub fn is_listening(&self, addr: &Address) -> bool {
        self.lock().listening.contains_key(addr)
    }

    /// Puts an address into listening mode: connecting to it calls `handler` with the accepted
    ///  connection. The returned token is cancelled when the address stops listening, either
    ///  through [LocalContext::stop_listening] or through [LocalContext::reset].
    pub fn listening(&self, addr: Address, handler: Arc<dyn AcceptHandler>) -> TransportResult<CancellationToken> {
        let mut inner = self.lock();
        if inner.listening.contains_key(&addr) {
            return Err(TransportError::AlreadyListening(addr));
        }
        trace!(?addr, "listening");
        let stopped = CancellationToken::new();
        inner.listening.insert(addr, Listening { handler, stopped: stopped.clone() });
        Ok(stopped)
    }

    pub fn stop_listening(&self, addr: &Address) {
        let removed = self.lock().listening.remove(addr);
        if let Some(listening) = removed {
            listening.stopped.cancel();
            trace!(?addr, "stopped listening");
        }
    }

    /// Establishes a virtual connection if `remote` is listening: the remote side's handler is
    ///  called with the incoming connection in a separate task, and the outgoing connection is
    ///  returned.
    ///
    /// There is no retrying at this level - connecting to an address that is not listening
    ///  fails immediately.
    pub fn connect(self: &Arc<Self>, local: Address, remote: Address) -> TransportResult<Arc<LocalConn>> {
        let (incoming, outgoing, handler) = {
            let mut inner = self.lock();

            let handler = match inner.listening.get(&remote) {
                Some(listening) => listening.handler.clone(),
                None => return Err(TransportError::NotListening { local, remote }),
            };

            let out_endpoint = Endpoint { addr: local, uid: inner.next_uid };
            let inc_endpoint = Endpoint { addr: remote, uid: inner.next_uid + 1 };
            inner.next_uid += 2;

            let outgoing = Arc::new(LocalConn::new(self.clone(), out_endpoint.clone(), inc_endpoint.clone()));
            let incoming = Arc::new(LocalConn::new(self.clone(), inc_endpoint.clone(), out_endpoint.clone()));

            inner.queues.insert(out_endpoint, outgoing.queue());
            inner.queues.insert(inc_endpoint, incoming.queue());

            (incoming, outgoing, handler)
        };

        debug!(local = ?outgoing.local(), remote = ?outgoing.remote(), "established virtual connection");

        let span = tracing::debug_span!("accepted_connection", addr = ?incoming.remote());
        tokio::spawn(async move {
            handler.on_accept(incoming).await;
        }.instrument(span));

        Ok(outgoing)
    }

    /// Queues a packet for the connection owning `endpoint`. Fails with [TransportError::Closed]
    ///  if that connection no longer exists.
    pub fn send(&self, endpoint: &Endpoint, packet: Packet) -> TransportResult<()> {
        let queue = self.lock().queues.get(endpoint).cloned()
            .ok_or(TransportError::Closed)?;
        queue.push(packet);
        Ok(())
    }

    /// Removes the connection owning `local`, and closes and removes its peer connection owning
    ///  `remote` if that is still registered.
    pub fn close(&self, local: &Endpoint, remote: &Endpoint) {
        let remote_queue = {
            let mut inner = self.lock();
            inner.queues.remove(local);
            inner.queues.remove(remote)
        };
        if let Some(remote_queue) = remote_queue {
            remote_queue.close();
        }
    }

    /// the number of connection endpoints that are currently registered, two per open connection
    pub fn len(&self) -> usize {
        self.lock().queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LocalContextInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
