//! Background execution of engine calls
//!
//! Work runs on the rayon global pool. The caller gets a [`Pending`] it can
//! block on, poll, or drop; dropping it does not stop the work, and a result
//! nobody collects is simply discarded.

use crate::error::{EvalError, Result};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use std::panic::{self, AssertUnwindSafe};

/// Result of a call running in the background
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<T>,
}

impl<T> Pending<T> {
    /// Block until the call finishes
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| EvalError::Logic("background call terminated without a result".to_string()))
    }

    /// Return the result if the call has finished
    pub fn try_wait(&self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(v) => Ok(Some(v)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(EvalError::Logic(
                "background call terminated without a result".to_string(),
            )),
        }
    }
}

/// Run `work` on the rayon pool
pub fn spawn<T, F>(work: F) -> Pending<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = bounded(1);
    rayon::spawn(move || {
        // a panic must not reach rayon's handler, which aborts; dropping
        // `tx` unsent reports it to the waiter instead
        if let Ok(value) = panic::catch_unwind(AssertUnwindSafe(work)) {
            // receiver may be gone; the result is then dropped
            let _ = tx.send(value);
        }
    });
    Pending { rx }
}
