//! Cooperative cancellation for in-flight sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag an embedding supervisor can set to abort a session.
///
/// The process driver polls the token between stream reads, so
/// cancellation takes effect within one poll interval plus the kill
/// grace period. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        assert!(!CancelToken::new().is_cancelled());
    }

    /// Verifies that clones observe a cancel issued through any handle.
    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
    }
}
