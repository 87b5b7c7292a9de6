//! Deferred results of in-flight collectives.
//!
//! An [`Awaitable`] is returned as soon as an operation has been issued. The
//! issuing worker may keep doing local work and only blocks when it calls
//! [`Awaitable::wait`]. `wait` consumes the handle, so a result is retrieved
//! exactly once.
//!
//! An `Awaitable<Awaitable<T>>` models a two-stage operation whose second stage
//! cannot be issued until the first stage has completed: awaiting the outer
//! handle completes stage one and issues stage two.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use embshard_core::Result;

/// A handle to an issued operation that yields `T` on completion.
///
/// # Examples
///
/// ```
/// use embshard_dist::Awaitable;
///
/// futures::executor::block_on(async {
///     let pending = Awaitable::ready(21).map(|v| Ok(v * 2));
///     assert_eq!(pending.wait().await.unwrap(), 42);
/// });
/// ```
#[must_use = "an issued collective must be awaited by every participant"]
pub struct Awaitable<T> {
    label: &'static str,
    fut: BoxFuture<'static, Result<T>>,
}

impl<T: Send + 'static> Awaitable<T> {
    /// Wraps a pending operation.
    pub fn new<F>(label: &'static str, fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            label,
            fut: fut.boxed(),
        }
    }

    /// An awaitable that is already complete.
    pub fn ready(value: T) -> Self {
        Self {
            label: "ready",
            fut: futures::future::ready(Ok(value)).boxed(),
        }
    }

    /// Returns the label of the operation this handle tracks.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Blocks the caller until the operation completes and returns its value.
    pub async fn wait(self) -> Result<T> {
        self.fut.await
    }

    /// Applies `f` to the value once the operation completes.
    pub fn map<U, F>(self, f: F) -> Awaitable<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let label = self.label;
        Awaitable {
            label,
            fut: async move { f(self.fut.await?) }.boxed(),
        }
    }
}

impl<T: Send + 'static> Awaitable<Awaitable<T>> {
    /// Collapses both stages into a single handle.
    pub fn flatten(self) -> Awaitable<T> {
        let label = self.label;
        Awaitable {
            label,
            fut: async move { self.fut.await?.wait().await }.boxed(),
        }
    }
}

impl<T> fmt::Debug for Awaitable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Awaitable")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
