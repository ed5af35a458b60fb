//! Runtime-agnostic async utilities
//!
//! This crate provides the small set of runtime services the envctl runtime
//! needs (spawning background tasks, timers, timeouts and cancellation)
//! without coupling the library crates to a specific executor.
//!
//! # Examples
//!
//! ```no_run
//! use async_runtime_compat::prelude::*;
//!
//! async fn example<S: Spawner>(spawner: &S) {
//!     let token = CancellationToken::new();
//!     let child = token.clone();
//!     spawner.spawn(Box::pin(async move {
//!         child.cancelled().await;
//!     }));
//!     token.cancel();
//! }
//!
//! # #[cfg(feature = "smol")]
//! smol::block_on(async {
//!     example(&SmolSpawner).await;
//! });
//! ```

#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;

mod cancel;
pub mod runtime_utils;

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(feature = "smol")]
pub mod smol;

pub use cancel::CancellationToken;
pub use runtime_utils::{sleep, timeout, TimedOut};

/// A boxed, sendable background future
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawner that can spawn futures on an async runtime
pub trait Spawner: Send + Sync {
    /// Spawn a future on the runtime
    ///
    /// The future will run to completion in the background. Callers that need
    /// to observe completion pair the task with a [`CancellationToken`] and a
    /// completion channel rather than relying on a runtime join handle.
    fn spawn(&self, future: BoxTask);
}

impl<S: Spawner + ?Sized> Spawner for std::sync::Arc<S> {
    fn spawn(&self, future: BoxTask) {
        (**self).spawn(future)
    }
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::runtime_utils::{sleep, timeout, TimedOut};
    pub use crate::{BoxTask, CancellationToken, Spawner};

    #[cfg(feature = "tokio")]
    pub use crate::tokio::TokioSpawner;

    #[cfg(feature = "smol")]
    pub use crate::smol::SmolSpawner;
}

/// Create a spawner for the runtime selected by features
///
/// smol wins when both runtime features are enabled; tokio is only chosen when
/// a tokio runtime is actually running on the current thread.
#[cfg(feature = "smol")]
pub fn default_spawner() -> Option<std::sync::Arc<dyn Spawner>> {
    Some(std::sync::Arc::new(smol::SmolSpawner))
}

/// Create a spawner for the runtime selected by features
#[cfg(all(feature = "tokio", not(feature = "smol")))]
pub fn default_spawner() -> Option<std::sync::Arc<dyn Spawner>> {
    ::tokio::runtime::Handle::try_current()
        .ok()
        .map(|_| std::sync::Arc::new(tokio::TokioSpawner) as std::sync::Arc<dyn Spawner>)
}

/// Create a spawner for the runtime selected by features
#[cfg(not(any(feature = "smol", feature = "tokio")))]
pub fn default_spawner() -> Option<std::sync::Arc<dyn Spawner>> {
    None
}
