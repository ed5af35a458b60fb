//! Smol runtime spawner implementation

use crate::{BoxTask, Spawner};

/// Spawner for the Smol runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolSpawner;

impl Spawner for SmolSpawner {
    fn spawn(&self, future: BoxTask) {
        smol::spawn(future).detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CancellationToken;

    #[smol_potat::test]
    async fn test_smol_spawner() {
        let spawner = SmolSpawner;
        let (tx, rx) = async_channel::bounded(1);

        spawner.spawn(Box::pin(async move {
            tx.send(42).await.unwrap();
        }));

        assert_eq!(rx.recv().await.unwrap(), 42);
    }

    #[smol_potat::test]
    async fn test_spawned_task_observes_cancellation() {
        let spawner = SmolSpawner;
        let token = CancellationToken::new();
        let (done_tx, done_rx) = async_channel::bounded::<()>(1);

        let task_token = token.clone();
        spawner.spawn(Box::pin(async move {
            let _done = done_tx;
            task_token.cancelled().await;
        }));

        token.cancel();
        // The sender is dropped when the task exits, closing the channel.
        assert!(done_rx.recv().await.is_err());
    }
}
