use crate::error::SinkError;
use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;
use tracing::debug;

/// Bounded queue of byte records between a serializer and an I/O consumer.
///
/// `write` blocks while the queue is full. Closing releases blocked
/// producers with [`SinkError::Closed`]; the consumer still drains every
/// record that was accepted before it observes end-of-stream.
pub struct ChannelSink {
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    capacity: usize,
}

/// Consumer side of a [`ChannelSink`]. Yields records in FIFO order and ends
/// once the sink is closed and drained.
pub struct Records {
    rx: Receiver<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Records) {
        let (tx, rx) = bounded(capacity);
        let (close_tx, close_rx) = bounded(0);
        let sink = Self {
            tx: Mutex::new(Some(tx)),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            capacity,
        };
        (sink, Records { rx })
    }

    pub fn write(&self, record: Vec<u8>) -> Result<usize, SinkError> {
        let tx = self.tx.lock().clone().ok_or(SinkError::Closed)?;
        let len = record.len();

        select! {
            send(tx, record) -> res => res.map(|_| len).map_err(|_| SinkError::Closed),
            recv(self.close_rx) -> _ => Err(SinkError::Closed),
        }
    }

    pub fn close(&self) {
        let had_sender = self.tx.lock().take().is_some();
        self.close_tx.lock().take();
        if had_sender {
            debug!(capacity = self.capacity, "Channel sink closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records currently queued and not yet consumed.
    pub fn len(&self) -> usize {
        self.tx.lock().as_ref().map_or(0, |tx| tx.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for Records {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
