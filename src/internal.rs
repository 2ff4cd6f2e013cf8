//! # Summary
//!
//! This module abstracts over internal connections to other tasks.
//!
//! Backed by `tokio::sync::mpsc` unbounded channels. Since the channels are
//! unbounded, a send only fails once the receiving task has exited, which
//! happens whenever a connection closes. Senders therefore never treat a
//! failed send as an error.

use tokio::sync::mpsc;

/// Intra-server receiving channel.
#[derive(Debug)]
pub struct Rx<T>(mpsc::UnboundedReceiver<T>);

/// Intra-server transmission channel. All clones send to the same receiving end.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Tx<T>(mpsc::UnboundedSender<T>);

/// Create a new pair of linked receiving and transmitting channels.
pub fn new<T>() -> (Rx<T>, Tx<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Rx(rx), Tx(tx))
}

impl<T> Tx<T> {
    /// Attempt to send a message through the channel.
    /// Returns `false` if the receiving end has been dropped.
    pub fn try_send(&self, message: T) -> bool {
        self.0.send(message).is_ok()
    }
}

impl<T> Rx<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.0.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_after_drop_is_reported() {
        let (mut rx, tx) = new::<usize>();
        let copy = tx.clone();
        assert!(copy.try_send(1));
        assert!(tx.try_send(2));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        drop(rx);
        assert!(!tx.try_send(3));
    }
}
