//! Bounded outbound packet queue
//!
//! Capture never waits on the network. When the writer falls behind, the
//! oldest unsent packet is discarded and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use crate::voice::EncodedPacket;

#[derive(Debug, Default)]
struct QueueState {
    packets: VecDeque<EncodedPacket>,
    closed: bool,
}

/// Single-consumer FIFO with drop-oldest overflow
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
    dropped: AtomicU64,
}

impl OutboundQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a packet, returning the packet evicted to make room
    ///
    /// Packets pushed after `close` are discarded.
    pub fn push(&self, packet: EncodedPacket) -> Option<EncodedPacket> {
        let evicted = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return None;
            }

            let evicted = if state.packets.len() >= self.capacity {
                state.packets.pop_front()
            } else {
                None
            };
            state.packets.push_back(packet);
            evicted
        };

        if evicted.is_some() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                dropped = total,
                capacity = self.capacity,
                "outbound queue full, dropped oldest frame"
            );
        }

        self.notify.notify_one();
        evicted
    }

    /// Wait for the next packet; `None` once closed and drained
    pub async fn pop(&self) -> Option<EncodedPacket> {
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(packet) = state.packets.pop_front() {
                    return Some(packet);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting packets and wake the consumer
    pub fn close(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        self.notify.notify_one();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .packets
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
