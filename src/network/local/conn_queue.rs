use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::network::error::{TransportError, TransportResult};
use crate::network::packet::Packet;

/// The inbound side of a virtual connection: a closable FIFO of packets. Once the queue is
///  closed, nothing is appended any more, but packets that were queued before are still handed
///  out by [ConnQueue::pop] until the queue is empty.
#[derive(Debug, Default)]
pub struct ConnQueue {
    state: Mutex<ConnQueueState>,
    changed: Notify,
}

#[derive(Debug, Default)]
struct ConnQueueState {
    queue: VecDeque<Packet>,
    closed: bool,
}

impl ConnQueue {
    pub fn new() -> ConnQueue {
        Default::default()
    }

    /// A no-op if the queue is closed.
    pub fn push(&self, packet: Packet) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.queue.push_back(packet);
        }
        self.changed.notify_waiters();
    }

    /// Waits until there is a packet in the queue or the queue is closed and drained.
    pub async fn pop(&self) -> TransportResult<Packet> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // register for notification before looking at the state, otherwise a push between
            //  checking and awaiting would go unnoticed
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(packet) = state.queue.pop_front() {
                    return Ok(packet);
                }
                if state.closed {
                    return Err(TransportError::Closed);
                }
            }

            notified.await;
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnQueueState> {
        // the state is consistent after every single statement, so a panic while holding the
        //  lock does not leave it broken
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::network::address::Address;
    use crate::test_util::message::SimpleMessage;

    use super::*;

    fn packet(n: u32) -> Packet {
        Packet::new(&SimpleMessage(n), Address::local("a"))
    }

    fn value(packet: &Packet) -> u32 {
        packet.downcast_ref::<SimpleMessage>().unwrap().0
    }

    #[tokio::test]
    async fn test_fifo() {
        let queue = ConnQueue::new();
        for n in 0..5 {
            queue.push(packet(n));
        }
        for n in 0..5 {
            assert_eq!(value(&queue.pop().await.unwrap()), n);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain_after_close() {
        let queue = ConnQueue::new();
        queue.push(packet(1));
        queue.push(packet(2));
        queue.close();
        queue.push(packet(3));

        assert_eq!(queue.len(), 2);
        assert_eq!(value(&queue.pop().await.unwrap()), 1);
        assert_eq!(value(&queue.pop().await.unwrap()), 2);
        assert!(queue.pop().await.unwrap_err().is_closed());
        assert!(queue.pop().await.unwrap_err().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(ConnQueue::new());

        let popper = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!popper.is_finished());

        queue.push(packet(7));
        assert_eq!(value(&popper.await.unwrap().unwrap()), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_all_waiting_pops() {
        let queue = Arc::new(ConnQueue::new());

        let poppers = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.pop().await })
            })
            .collect::<Vec<_>>();

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert!(queue.is_closed());

        for popper in poppers {
            assert!(popper.await.unwrap().unwrap_err().is_closed());
        }
    }
}
