//! Bounded signaling channel from the capture path to the playback path.
//!
//! Carries zero-payload interrupt tokens. Capacity is one: a single token is
//! enough to abort playback, and duplicates are harmless to drop. Posting
//! never blocks the producer.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// A stateless token meaning "abort current playback now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptSignal;

/// Create the capture-to-playback interrupt channel.
pub fn interrupt_channel() -> (InterruptSender, InterruptReceiver) {
    let (tx, rx) = bounded(1);
    (InterruptSender { tx }, InterruptReceiver { rx })
}

/// Producer half, held by the capture pipeline.
#[derive(Clone)]
pub struct InterruptSender {
    tx: Sender<InterruptSignal>,
}

impl InterruptSender {
    /// Post an interrupt. If a token is already pending the new one is
    /// dropped; the producer is never blocked either way.
    pub fn notify(&self) {
        let _ = self.tx.try_send(InterruptSignal);
    }
}

/// Consumer half, held by the playback controller.
pub struct InterruptReceiver {
    rx: Receiver<InterruptSignal>,
}

impl InterruptReceiver {
    /// Drain all pending tokens; true if at least one was present.
    pub fn take(&self) -> bool {
        let mut seen = false;
        loop {
            match self.rx.try_recv() {
                Ok(_) => seen = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return seen,
            }
        }
    }

    /// Discard any stale tokens, e.g. before a new playback starts.
    pub fn drain(&self) {
        let _ = self.take();
    }
}
