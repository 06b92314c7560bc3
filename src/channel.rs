//! Streaming channel
//!
//! Hands chunks from the capture thread to at most one listener. Delivery is a
//! direct call: nothing is queued beyond the chunk in flight, a slow listener
//! stalls the reader, and with no listener the chunk is dropped.

use crate::types::AudioChunk;
use crossbeam_channel::SendTimeoutError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked rendezvous send rechecks for interruption
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Listener invoked once per captured chunk, on the capture thread
pub type ChunkListener = Box<dyn FnMut(AudioChunk) -> Delivery + Send>;

/// Outcome of handing a chunk to the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped,
}

/// Single-listener chunk channel
#[derive(Default)]
pub struct StreamingChannel {
    listener: Mutex<Option<ChunkListener>>,
    interrupted: Arc<AtomicBool>,
}

impl StreamingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, replacing any previous one
    pub fn set_listener<F>(&self, mut listener: F)
    where
        F: FnMut(AudioChunk) + Send + 'static,
    {
        self.set_raw_listener(Box::new(move |chunk| {
            listener(chunk);
            Delivery::Delivered
        }));
    }

    /// Register a listener that reports its own delivery outcome
    pub fn set_raw_listener(&self, listener: ChunkListener) {
        let replaced = self.listener.lock().replace(listener).is_some();
        if replaced {
            tracing::debug!("Replaced audio chunk listener");
        }
    }

    /// Subscribe with a pull-style receiver, replacing any previous listener.
    ///
    /// The reader waits for the receiver to take each chunk. A wait in progress
    /// gives up with [`Delivery::Dropped`] once the channel is interrupted.
    pub fn subscribe(&self) -> ChunkReceiver {
        // Zero capacity: the reader blocks until the receiver takes the chunk
        let (tx, rx) = crossbeam_channel::bounded::<AudioChunk>(0);
        let interrupted = self.interrupted.clone();
        self.set_raw_listener(Box::new(move |mut chunk| loop {
            match tx.send_timeout(chunk, SEND_POLL_INTERVAL) {
                Ok(()) => return Delivery::Delivered,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if interrupted.load(Ordering::SeqCst) {
                        tracing::debug!("Chunk #{} abandoned on stop", pending.sequence);
                        return Delivery::Dropped;
                    }
                    chunk = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Delivery::Dropped,
            }
        }));
        ChunkReceiver { rx }
    }

    /// Make blocked and future rendezvous sends give up
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Re-arm after [`interrupt`](Self::interrupt), before a new session starts
    pub fn resume(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn clear_listener(&self) {
        self.listener.lock().take();
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Hand one chunk to the listener
    pub fn deliver(&self, chunk: AudioChunk) -> Delivery {
        let mut slot = self.listener.lock();
        match slot.as_mut() {
            Some(listener) => listener(chunk),
            None => Delivery::Dropped,
        }
    }
}

impl std::fmt::Debug for StreamingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingChannel")
            .field("has_listener", &self.has_listener())
            .finish()
    }
}

/// Receiving end of [`StreamingChannel::subscribe`]
pub struct ChunkReceiver {
    rx: crossbeam_channel::Receiver<AudioChunk>,
}

impl ChunkReceiver {
    /// Receive the next chunk, blocking until one is captured
    pub fn recv(&self) -> Option<AudioChunk> {
        self.rx.recv().ok()
    }

    /// Try to receive without blocking
    pub fn try_recv(&self) -> Option<AudioChunk> {
        self.rx.try_recv().ok()
    }

    /// Receive with timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Option<AudioChunk> {
        self.rx.recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64) -> AudioChunk {
        AudioChunk::new(vec![seq as u8; 8], seq)
    }

    #[test]
    fn test_drop_without_listener() {
        let channel = StreamingChannel::new();
        assert_eq!(channel.deliver(chunk(0)), Delivery::Dropped);
    }

    #[test]
    fn test_callback_listener() {
        let channel = StreamingChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        channel.set_listener(move |c| sink.lock().push(c.sequence));

        assert_eq!(channel.deliver(chunk(0)), Delivery::Delivered);
        assert_eq!(channel.deliver(chunk(1)), Delivery::Delivered);
        assert_eq!(*seen.lock(), vec![0, 1]);

        channel.clear_listener();
        assert!(!channel.has_listener());
        assert_eq!(channel.deliver(chunk(2)), Delivery::Dropped);
    }

    #[test]
    fn test_new_listener_replaces_old() {
        let channel = StreamingChannel::new();
        let first = Arc::new(Mutex::new(0u32));
        let second = Arc::new(Mutex::new(0u32));

        let f = first.clone();
        channel.set_listener(move |_| *f.lock() += 1);
        channel.deliver(chunk(0));

        let s = second.clone();
        channel.set_listener(move |_| *s.lock() += 1);
        channel.deliver(chunk(1));

        assert_eq!(*first.lock(), 1);
        assert_eq!(*second.lock(), 1);
    }

    #[test]
    fn test_subscribe_blocks_producer_until_taken() {
        let channel = Arc::new(StreamingChannel::new());
        let rx = channel.subscribe();

        let producer = channel.clone();
        let handle = std::thread::spawn(move || producer.deliver(chunk(5)));

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got.sequence, 5);
        assert_eq!(handle.join().unwrap(), Delivery::Delivered);
    }

    #[test]
    fn test_dropped_receiver_drops_chunks() {
        let channel = StreamingChannel::new();
        let rx = channel.subscribe();
        drop(rx);
        assert_eq!(channel.deliver(chunk(0)), Delivery::Dropped);
    }

    #[test]
    fn test_interrupt_releases_blocked_send() {
        let channel = Arc::new(StreamingChannel::new());
        let _rx = channel.subscribe();

        let producer = channel.clone();
        let handle = std::thread::spawn(move || producer.deliver(chunk(0)));

        // Nobody receives; the send stays blocked until interrupted
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        channel.interrupt();
        assert_eq!(handle.join().unwrap(), Delivery::Dropped);

        channel.resume();
        assert!(!channel.is_interrupted());
    }
}
