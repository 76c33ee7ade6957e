//! Cooperative cancellation: per-task tokens and the engine-wide registry.
//!
//! Each submitted task gets one token. Host functions observe it at every
//! blocking boundary; `Engine::cancel_task` and `Engine::shutdown` set it.
//! A token is set at most once and never reset.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::EngineError;
use crate::task::TaskId;

/// Granularity of cancellation-aware sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token. Returns true only for the call that actually set it.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(EngineError::Canceled)` once the token is set.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_canceled() {
            Err(EngineError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    /// Returns false if the token was set before the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_canceled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Shared registry of task id -> cancellation token.
#[derive(Default)]
pub struct CancelRegistry {
    tokens: RwLock<HashMap<TaskId, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and return its fresh token.
    pub fn register(&self, id: &TaskId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), token.clone());
        token
    }

    pub fn get(&self, id: &TaskId) -> Option<CancellationToken> {
        self.tokens
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Drop the token once the task is terminal.
    pub fn unregister(&self, id: &TaskId) {
        self.tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Every task with a registered token.
    pub fn ids(&self) -> Vec<TaskId> {
        self.tokens
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Set the token for `id`. Returns false if no token is registered.
    pub fn cancel(&self, id: &TaskId) -> bool {
        match self.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
