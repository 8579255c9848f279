//! The work queue: sniffer threads push captured frames here; one consumer
//! thread (the handler) pops them in submission order per-producer.

use std::sync::mpsc;

use crate::interface::Interface;

/// A frame captured on some interface, queued for the handler.
pub struct WorkItem {
    pub arrival_if: Interface,
    pub frame: Vec<u8>,
}

pub type Sender = mpsc::Sender<WorkItem>;
pub type Receiver = mpsc::Receiver<WorkItem>;

/// Creates an unbounded multi-producer/single-consumer queue. `Sender`
/// clones are handed to each sniffer thread; `Receiver` stays with the
/// handler thread.
pub fn channel() -> (Sender, Receiver) {
    mpsc::channel()
}
