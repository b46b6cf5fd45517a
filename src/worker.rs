use std::thread::{Builder, JoinHandle};

use log::{debug, warn};

use crate::error::{GlitchError, Result};

type StopFn = Box<dyn Fn() + Send + Sync>;

/// A named background thread with an explicit stop request.
///
/// The body runs on its own OS thread. `stop_fn` is how the owner asks the
/// body to finish, usually by raising a cancellation flag the body polls.
/// Dropping a worker requests a stop and waits for the thread, so a worker
/// never outlives its owner.
///
/// # Usage Pattern
///
/// 1. `Worker::start` spawns the thread
/// 2. `request_stop` asks the body to return
/// 3. `join` collects the body's result
pub struct Worker<T> {
    name: String,
    stop_fn: StopFn,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawn `body` on a thread called `name`.
    ///
    /// # Returns
    ///
    /// * `Ok(Worker)` - Thread is running.
    /// * `Err(GlitchError::Spawn)` - The OS refused to create the thread.
    pub fn start<S, F>(name: &str, stop_fn: S, body: F) -> Result<Self>
    where
        S: Fn() + Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let handle = Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|source| GlitchError::Spawn {
                name: name.to_string(),
                source,
            })?;
        debug!("Started {} thread", name);
        Ok(Self {
            name: name.to_string(),
            stop_fn: Box::new(stop_fn),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the body to return. Safe to call any number of times.
    pub fn request_stop(&self) {
        (self.stop_fn)();
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Wait for the body and return its result.
    ///
    /// Does not request a stop by itself; a body that never returns blocks here.
    pub fn join(mut self) -> Result<T> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<T> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| GlitchError::WorkerPanicked(self.name.clone()))?;
        let result = handle
            .join()
            .map_err(|_| GlitchError::WorkerPanicked(self.name.clone()));
        debug!("Joined {} thread", self.name);
        result
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            (self.stop_fn)();
            if handle.join().is_err() {
                warn!("{} thread panicked", self.name);
            }
        }
    }
}
