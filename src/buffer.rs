//! A bounded, cancellable channel carrying a [`Patch`] stream from a
//! producer (the differ, or a caller constructing patches by hand) to a
//! consumer (the applier).

use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};

use crate::error::{Error, Result};
use crate::patch::{Patch, PatchValue};

/// A one-shot broadcast-by-closing cancellation signal, shared between a
/// [`PatchSender`] and [`PatchReceiver`] pair. Cancelling drops the
/// underlying sender, which closes the channel for good — every future
/// `select!` against it observes the cancellation, not just the first.
pub struct CancelToken {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        CancelToken { tx: Mutex::new(Some(tx)), rx }
    }

    pub fn cancel(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a linked sender/receiver pair over a channel of `capacity`
/// patches.
pub fn channel(capacity: usize) -> (PatchSender, PatchReceiver) {
    let (tx, rx) = bounded(capacity);
    let cancel = Arc::new(CancelToken::new());
    (PatchSender { tx, cancel: cancel.clone() }, PatchReceiver { rx, cancel })
}

pub struct PatchSender {
    tx: Sender<Patch>,
    cancel: Arc<CancelToken>,
}

impl PatchSender {
    /// Sends one patch, blocking if the channel is full. Errs with
    /// `Error::Cancelled` if the receiver side cancels first.
    pub fn send_patch(&self, patch: Patch) -> Result<()> {
        select! {
            send(self.tx, patch) -> res => res.map_err(|_| Error::Cancelled),
            recv(self.cancel.rx) -> _ => Err(Error::Cancelled),
        }
    }

    /// Convenience for sending a single leaf-level key/value change.
    pub fn send_kv(&self, key: Vec<u8>, key_below_start: Vec<u8>, from: Option<Vec<u8>>, to: Option<Vec<u8>>) -> Result<()> {
        self.send_patch(Patch {
            end_key: key,
            key_below_start,
            from: from.map(PatchValue::Value),
            to: to.map(PatchValue::Value),
            subtree_count: 1,
            level: 0,
        })
    }

    /// Sends the terminator patch, signalling the stream is complete.
    pub fn send_done(&self) -> Result<()> {
        self.send_patch(Patch::terminator())
    }
}

pub struct PatchReceiver {
    rx: Receiver<Patch>,
    cancel: Arc<CancelToken>,
}

impl PatchReceiver {
    /// Blocks for the next patch, or errs with `Error::Cancelled` if this
    /// side (or the peer) cancels first.
    pub fn next_patch(&self) -> Result<Patch> {
        select! {
            recv(self.rx) -> res => res.map_err(|_| Error::Cancelled),
            recv(self.cancel.rx) -> _ => Err(Error::Cancelled),
        }
    }

    /// Cancels the stream: the peer's next `send_patch`/`next_patch` call
    /// errs instead of blocking.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_patches_in_order() {
        let (tx, rx) = channel(4);
        tx.send_kv(b"a".to_vec(), Vec::new(), None, Some(b"1".to_vec())).unwrap();
        tx.send_kv(b"b".to_vec(), b"a".to_vec(), None, Some(b"2".to_vec())).unwrap();
        tx.send_done().unwrap();

        let p1 = rx.next_patch().unwrap();
        assert_eq!(p1.end_key, b"a");
        let p2 = rx.next_patch().unwrap();
        assert_eq!(p2.end_key, b"b");
        let p3 = rx.next_patch().unwrap();
        assert!(p3.is_terminator());
    }

    #[test]
    fn closing_unblocks_the_peer_with_cancelled() {
        let (tx, rx) = channel(0);
        rx.close();
        let err = tx.send_patch(Patch::terminator());
        assert!(matches!(err, Err(Error::Cancelled)));
    }
}
