//! Instance handle registry
//!
//! Handles are plain `u64`s so they survive any FFI layer unchanged. `0` is
//! never issued and always means "no instance". The registry lock guards only
//! the map; each instance carries its own lock, and callers hold an
//! `Arc<Instance>` while working so a concurrent `free` cannot pull the
//! instance out from under an in-flight call.

use crate::cancel::CancellationToken;
use crate::engine::JsonEval;
use crate::error::{EvalError, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Opaque instance handle
pub type Handle = u64;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// A registered engine plus its current cancellation token
#[derive(Debug)]
pub struct Instance {
    eval: Mutex<JsonEval>,
    token: Mutex<CancellationToken>,
}

impl Instance {
    fn new(eval: JsonEval) -> Self {
        Self {
            eval: Mutex::new(eval),
            token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Lock the engine
    pub fn lock(&self) -> MutexGuard<'_, JsonEval> {
        self.eval.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Token that the next call should observe
    pub fn token(&self) -> CancellationToken {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Trigger the current token and arm a fresh one for later calls
    pub fn cancel(&self) {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Run `f` with the engine locked and the current token
    pub fn with<T>(&self, f: impl FnOnce(&mut JsonEval, &CancellationToken) -> T) -> T {
        let token = self.token();
        let mut eval = self.lock();
        f(&mut eval, &token)
    }
}

/// Handle to instance map
#[derive(Debug)]
pub struct Registry {
    instances: Mutex<HashMap<Handle, Arc<Instance>>>,
    next: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    /// The registry behind the C API
    pub fn global() -> &'static Registry {
        &GLOBAL_REGISTRY
    }

    fn map(&self) -> MutexGuard<'_, HashMap<Handle, Arc<Instance>>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an engine and return its handle
    pub fn insert(&self, eval: JsonEval) -> Handle {
        let mut handle = self.next.fetch_add(1, Ordering::Relaxed);
        if handle == 0 {
            // wrapped
            handle = self.next.fetch_add(1, Ordering::Relaxed);
        }
        self.map().insert(handle, Arc::new(Instance::new(eval)));
        debug!(handle, "registered instance");
        handle
    }

    /// Look up a live instance
    pub fn get(&self, handle: Handle) -> Result<Arc<Instance>> {
        self.map().get(&handle).cloned().ok_or(EvalError::InvalidHandle)
    }

    /// Unregister; the instance drops once in-flight calls release it
    pub fn remove(&self, handle: Handle) -> bool {
        let removed = self.map().remove(&handle).is_some();
        if removed {
            debug!(handle, "released instance");
        }
        removed
    }

    /// Best-effort cancel of the instance's running call
    pub fn cancel(&self, handle: Handle) -> Result<()> {
        self.get(handle)?.cancel();
        Ok(())
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// True if no handles are live
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
