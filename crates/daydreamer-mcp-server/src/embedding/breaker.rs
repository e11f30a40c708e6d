//! Memory circuit breaker.
//!
//! Embedding inference is the only thing in this process that can blow the
//! memory budget of a shared host. The breaker samples this process's RSS
//! (never system-wide memory) before each model-touching call: above the
//! threshold it opens, and it stays open until RSS drops below the recovery
//! mark. A successful call never closes it on its own.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use super::EmbeddingError;

pub type RssProbe = Box<dyn Fn() -> u64 + Send + Sync>;

pub struct MemoryBreaker {
    threshold_bytes: u64,
    recovery_bytes: u64,
    open: AtomicBool,
    probe: RssProbe,
}

impl MemoryBreaker {
    pub fn new(threshold_bytes: u64, recovery_bytes: u64) -> Self {
        Self::with_probe(threshold_bytes, recovery_bytes, Box::new(process_rss_bytes))
    }

    pub fn with_probe(threshold_bytes: u64, recovery_bytes: u64, probe: RssProbe) -> Self {
        Self {
            threshold_bytes,
            recovery_bytes: recovery_bytes.min(threshold_bytes),
            open: AtomicBool::new(false),
            probe,
        }
    }

    /// Sample RSS and gate the call.
    pub fn check(&self) -> Result<(), EmbeddingError> {
        let rss = (self.probe)();

        if self.open.load(Ordering::Acquire) {
            if rss < self.recovery_bytes {
                info!(rss_bytes = rss, "memory breaker recovered, closing");
                self.open.store(false, Ordering::Release);
                return Ok(());
            }
            return Err(EmbeddingError::ResourceExhausted(rss));
        }

        if rss > self.threshold_bytes {
            warn!(
                rss_bytes = rss,
                threshold_bytes = self.threshold_bytes,
                "memory breaker opened"
            );
            self.open.store(true, Ordering::Release);
            return Err(EmbeddingError::ResourceExhausted(rss));
        }

        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Current RSS sample, for diagnostics.
    pub fn rss_bytes(&self) -> u64 {
        (self.probe)()
    }
}

/// Resident set size of this process, in bytes.
pub fn process_rss_bytes() -> u64 {
    use sysinfo::{ProcessesToUpdate, System};

    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(sysinfo::Process::memory).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;

    fn breaker_with_rss(rss: Arc<AtomicU64>) -> MemoryBreaker {
        MemoryBreaker::with_probe(
            1000,
            800,
            Box::new(move || rss.load(Ordering::SeqCst)),
        )
    }

    #[test]
    fn opens_above_threshold() {
        let rss = Arc::new(AtomicU64::new(500));
        let breaker = breaker_with_rss(Arc::clone(&rss));
        assert!(breaker.check().is_ok());

        rss.store(1500, Ordering::SeqCst);
        assert!(matches!(
            breaker.check(),
            Err(EmbeddingError::ResourceExhausted(_))
        ));
        assert!(breaker.is_open());
    }

    #[test]
    fn stays_open_until_recovery_threshold() {
        let rss = Arc::new(AtomicU64::new(1500));
        let breaker = breaker_with_rss(Arc::clone(&rss));
        assert!(breaker.check().is_err());

        // Below the trip threshold but above recovery: still open. The
        // breaker never closes just because a call would have succeeded.
        rss.store(900, Ordering::SeqCst);
        assert!(breaker.check().is_err());
        assert!(breaker.is_open());

        rss.store(700, Ordering::SeqCst);
        assert!(breaker.check().is_ok());
        assert!(!breaker.is_open());
    }

    #[test]
    fn recovery_is_clamped_to_threshold() {
        let breaker = MemoryBreaker::with_probe(1000, 5000, Box::new(|| 0));
        assert_eq!(breaker.recovery_bytes, 1000);
    }

    #[test]
    fn process_rss_probe_reports_something() {
        // Smoke check only; the exact value is platform-dependent.
        let _ = process_rss_bytes();
    }
}
