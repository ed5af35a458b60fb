//! Tokio runtime spawner implementation

use crate::{BoxTask, Spawner};

/// Spawner for the Tokio runtime
///
/// Must be used from within a running tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, future: BoxTask) {
        // JoinHandle detaches when dropped
        drop(tokio::spawn(future));
    }
}
