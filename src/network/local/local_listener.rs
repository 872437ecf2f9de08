use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::network::address::{Address, ConnType};
use crate::network::error::{TransportError, TransportResult};
use crate::network::local::local_context::LocalContext;
use crate::network::transport::{AcceptHandler, Listener};

/// Listens on an address of a [LocalContext]. Like its TCP counterpart, [Listener::listen]
///  blocks until the listener is stopped.
#[derive(Debug)]
pub struct LocalListener {
    addr: Address,
    ctx: Arc<LocalContext>,
    state: Mutex<ListenerState>,
}

#[derive(Debug, Default)]
struct ListenerState {
    /// cancelled by the context when the address stops listening
    stopped: Option<CancellationToken>,
    /// set by a `stop` that came before `listen` got going, consumed by the next `listen`
    stop_requested: bool,
}

impl ListenerState {
    fn active(&self) -> Option<CancellationToken> {
        self.stopped.as_ref()
            .filter(|stopped| !stopped.is_cancelled())
            .cloned()
    }
}

impl LocalListener {
    /// Fails if `addr` is not a virtual address or if it is already listening in `ctx`.
    pub fn new(ctx: Arc<LocalContext>, addr: Address) -> TransportResult<LocalListener> {
        if addr.conn_type() != ConnType::Local {
            return Err(TransportError::WrongConnType { address: addr, expected: ConnType::Local });
        }
        if ctx.is_listening(&addr) {
            return Err(TransportError::AlreadyListening(addr));
        }
        Ok(LocalListener {
            addr,
            ctx,
            state: Default::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Listener for LocalListener {
    async fn listen(&self, handler: Arc<dyn AcceptHandler>) -> TransportResult<()> {
        let stopped = {
            let mut state = self.lock();
            if state.stop_requested {
                state.stop_requested = false;
                debug!(addr = ?self.addr, "stopped before listening started");
                return Ok(());
            }
            let stopped = self.ctx.listening(self.addr.clone(), handler)?;
            state.stopped = Some(stopped.clone());
            stopped
        };
        debug!(addr = ?self.addr, "listening on virtual address");

        stopped.cancelled().await;
        debug!(addr = ?self.addr, "stopped listening on virtual address");
        Ok(())
    }

    async fn stop(&self) -> TransportResult<()> {
        let mut state = self.lock();
        match state.active() {
            // after a reset the address may belong to another listener, so only an active
            //  registration is removed
            Some(stopped) => {
                self.ctx.stop_listening(&self.addr);
                stopped.cancel();
            }
            None => state.stop_requested = true,
        }
        Ok(())
    }

    fn address(&self) -> Address {
        self.addr.clone()
    }

    fn is_listening(&self) -> bool {
        self.lock().active().is_some()
    }

    fn incoming_type(&self) -> ConnType {
        ConnType::Local
    }
}
