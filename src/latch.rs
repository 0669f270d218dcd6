use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// An error recorded by a worker while executing a task whose caller was not
/// waiting for the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatchedError {
    message: String,
    fatal: bool,
}

impl LatchedError {
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

impl fmt::Display for LatchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Per-worker error slot. The first error wins: once set, the latch ignores
/// further errors until [`ErrorLatch::get_error`] clears it.
#[derive(Debug, Default)]
pub struct ErrorLatch {
    slot: Mutex<Option<LatchedError>>,
}

impl ErrorLatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. Returns `false` when an error was already active and
    /// this one was dropped.
    pub fn set(&self, message: impl Into<String>, fatal: bool) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(LatchedError {
            message: message.into(),
            fatal,
        });
        true
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.lock().as_ref().is_some_and(LatchedError::is_fatal)
    }

    /// Read and clear the latched error.
    pub fn get_error(&self) -> Option<LatchedError> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<LatchedError>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
