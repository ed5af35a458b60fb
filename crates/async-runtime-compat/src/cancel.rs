//! Cancellation tokens built on channel closure
//!
//! A token is a zero-capacity signal: cancelling closes the underlying channel,
//! which wakes every pending `cancelled()` future at once regardless of which
//! runtime polls it.

use async_channel::{Receiver, Sender};

/// Cloneable cancellation signal shared between a task and its owner
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl CancellationToken {
    /// Create a new, uncancelled token
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::bounded(1);
        Self { sender, receiver }
    }

    /// Cancel the token; idempotent
    pub fn cancel(&self) {
        self.sender.close();
    }

    /// Whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.receiver.is_closed()
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        // Nothing is ever sent, so recv only returns once the channel closes.
        while self.receiver.recv().await.is_ok() {}
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_observe_cancellation() {
        smol::block_on(async {
            let token = CancellationToken::new();
            let observer = token.clone();
            let waiter = smol::spawn(async move {
                observer.cancelled().await;
                true
            });

            token.cancel();
            assert!(waiter.await);
        });
    }
}
