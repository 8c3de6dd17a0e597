//! Handles for callbacks registered on broadcast channels.

use tokio::sync::broadcast;

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback as well.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Run `callback` for every value sent on `rx` until the handle goes away.
    ///
    /// Lagged receivers skip the missed values and keep going.
    pub(crate) fn spawn_listener<T, F>(id: u64, mut rx: broadcast::Receiver<T>, callback: F) -> Self
    where
        T: Clone + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(value) => callback(value),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self::new(id, move || {
            handle.abort();
        })
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("id", &self.id)
            .field("registered", &self.unregister_fn.is_some())
            .finish()
    }
}
