//! Fixed pool of OCR engine instances handed out as RAII leases.
//!
//! An engine is used by one worker at a time. Dropping the lease puts the
//! engine back and wakes one waiter, on every exit path including panics.

use std::ops::Deref;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::cancel::CancellationToken;
use super::types::OcrEngine;
use super::PipelineError;

/// How long a waiter sleeps between cancellation checks.
const CHECKOUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ═══════════════════════════════════════════════════════════
// EnginePool
// ═══════════════════════════════════════════════════════════

pub struct EnginePool {
    idle: Mutex<Vec<Box<dyn OcrEngine>>>,
    returned: Condvar,
    size: usize,
}

impl EnginePool {
    pub fn new(engines: Vec<Box<dyn OcrEngine>>) -> Result<Self, PipelineError> {
        if engines.is_empty() {
            return Err(PipelineError::EngineUnavailable(
                "engine pool has no engines".into(),
            ));
        }
        Ok(Self {
            size: engines.len(),
            idle: Mutex::new(engines),
            returned: Condvar::new(),
        })
    }

    /// Total engines owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Engines currently idle.
    pub fn available(&self) -> usize {
        self.lock_idle().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Block until an engine is free.
    ///
    /// Returns `Cancelled` if `cancel` fires while waiting.
    pub fn checkout(&self, cancel: &CancellationToken) -> Result<EngineLease<'_>, PipelineError> {
        let mut idle = self.lock_idle()?;
        loop {
            cancel.check()?;
            if let Some(engine) = idle.pop() {
                return Ok(EngineLease {
                    engine: Some(engine),
                    pool: self,
                });
            }
            idle = self
                .returned
                .wait_timeout(idle, CHECKOUT_POLL_INTERVAL)
                .map_err(|_| lock_poisoned())?
                .0;
        }
    }

    /// Take an engine without blocking.
    pub fn try_checkout(&self) -> Option<EngineLease<'_>> {
        let engine = self.lock_idle().ok()?.pop()?;
        Some(EngineLease {
            engine: Some(engine),
            pool: self,
        })
    }

    /// Verify the pool's engines can serve `language`.
    ///
    /// Engines in one pool are interchangeable, so one is asked.
    pub fn ensure_language(
        &self,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let lease = self.checkout(cancel)?;
        lease
            .ensure_language(language)
            .map_err(|e| PipelineError::EngineUnavailable(e.to_string()))
    }

    // ── Internal ──

    fn lock_idle(&self) -> Result<MutexGuard<'_, Vec<Box<dyn OcrEngine>>>, PipelineError> {
        self.idle.lock().map_err(|_| lock_poisoned())
    }

    fn give_back(&self, engine: Box<dyn OcrEngine>) {
        // A poisoned lock still holds a valid Vec; the engine must not be lost.
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.push(engine);
        drop(idle);
        self.returned.notify_one();
    }
}

fn lock_poisoned() -> PipelineError {
    PipelineError::Worker("engine pool lock poisoned".into())
}

// ═══════════════════════════════════════════════════════════
// EngineLease
// ═══════════════════════════════════════════════════════════

/// Scoped handle on a pooled engine. Returned to the pool on drop.
pub struct EngineLease<'a> {
    engine: Option<Box<dyn OcrEngine>>,
    pool: &'a EnginePool,
}

impl Deref for EngineLease<'_> {
    type Target = dyn OcrEngine;

    fn deref(&self) -> &Self::Target {
        match &self.engine {
            Some(engine) => engine.as_ref(),
            None => unreachable!("engine is only taken in drop"),
        }
    }
}

impl Drop for EngineLease<'_> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.give_back(engine);
        }
    }
}
