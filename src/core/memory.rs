//! # Memory Governor
//!
//! Tracks accelerator memory usage and the health of the AI path.
//!
//! ## Capability Latch
//!
//! ```text
//!              failure                 failures >= threshold
//! Available ───────────▶ Degraded ─────────────────────────▶ Disabled
//!     ▲                     │                                   │
//!     └─────── success ─────┘                                   │
//!     └──────────────────────── reset() ────────────────────────┘
//! ```
//!
//! A success clears the failure counter but never leaves `Disabled`; only an
//! explicit [`MemoryGovernor::reset`] re-enables the AI path.
//!
//! ## Cleanup Exclusion
//!
//! At most one cleanup runs at a time. [`MemoryGovernor::try_begin_cleanup`]
//! hands out a [`CleanupGuard`] that clears the flag on drop, and inference
//! waits on [`MemoryGovernor::wait_for_cleanup`] before starting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::GovernorConfig;
use crate::error::{PipelineError, classify};
use crate::models::GpuMemory;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Health of the AI upscaling path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiCapability {
    Available,
    Degraded,
    Disabled,
}

/// Snapshot of the governor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryState {
    pub current_usage_mb: f64,
    pub consecutive_failures: u32,
    pub capability: AiCapability,
}

impl MemoryState {
    pub fn ai_disabled(&self) -> bool {
        self.capability == AiCapability::Disabled
    }
}

/// Marks a cleanup in progress until dropped.
#[derive(Debug)]
pub struct CleanupGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct MemoryGovernor {
    state: Mutex<MemoryState>,
    config: GovernorConfig,
    gpu: Arc<dyn GpuMemory>,
    cleanup_in_progress: AtomicBool,
    orphaned_inferences: AtomicUsize,
}

impl std::fmt::Debug for MemoryGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGovernor")
            .field("state", &*self.state.lock())
            .field("config", &self.config)
            .field("cleanup_in_progress", &self.cleanup_in_progress())
            .field("orphaned_inferences", &self.orphaned_inferences())
            .finish()
    }
}

impl MemoryGovernor {
    pub fn new(config: GovernorConfig, gpu: Arc<dyn GpuMemory>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                current_usage_mb: 0.0,
                consecutive_failures: 0,
                capability: AiCapability::Available,
            }),
            config,
            gpu,
            cleanup_in_progress: AtomicBool::new(false),
            orphaned_inferences: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn state(&self) -> MemoryState {
        *self.state.lock()
    }

    pub fn capability(&self) -> AiCapability {
        self.state.lock().capability
    }

    pub fn is_ai_disabled(&self) -> bool {
        self.capability() == AiCapability::Disabled
    }

    /// Count an AI-path failure. Errors that are not AI failures are ignored.
    pub fn record_failure(&self, error: &PipelineError) -> AiCapability {
        if !classify::counts_toward_ai_disable(error) {
            return self.capability();
        }

        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let previous = state.capability;
        state.capability = if state.consecutive_failures >= self.config.failure_threshold {
            AiCapability::Disabled
        } else if previous == AiCapability::Disabled {
            AiCapability::Disabled
        } else {
            AiCapability::Degraded
        };

        if state.capability == AiCapability::Disabled && previous != AiCapability::Disabled {
            warn!(
                failures = state.consecutive_failures,
                error = %error,
                "AI path disabled after repeated failures"
            );
        } else {
            debug!(
                failures = state.consecutive_failures,
                capability = ?state.capability,
                "AI failure recorded"
            );
        }
        state.capability
    }

    /// Clear the failure counter. A latched `Disabled` stays latched.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        if state.capability != AiCapability::Disabled {
            state.capability = AiCapability::Available;
        }
    }

    /// Re-enable the AI path.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if state.capability == AiCapability::Disabled {
            info!("AI path re-enabled");
        }
        state.consecutive_failures = 0;
        state.capability = AiCapability::Available;
    }

    /// Read the accelerator's current usage into the state and return it in MB.
    pub fn sample(&self) -> f64 {
        let mb = self.gpu.bytes_in_use() as f64 / BYTES_PER_MB;
        self.state.lock().current_usage_mb = mb;
        mb
    }

    pub fn over_threshold(&self, usage_mb: f64) -> bool {
        usage_mb > self.config.memory_threshold_mb as f64
    }

    /// Claim the cleanup slot, or `None` if another cleanup holds it.
    pub fn try_begin_cleanup(&self) -> Option<CleanupGuard<'_>> {
        self.cleanup_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CleanupGuard {
                flag: &self.cleanup_in_progress,
            })
    }

    pub fn cleanup_in_progress(&self) -> bool {
        self.cleanup_in_progress.load(Ordering::Acquire)
    }

    /// Yield until no cleanup is running.
    pub async fn wait_for_cleanup(&self) {
        while self.cleanup_in_progress() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub fn orphan_started(&self) -> usize {
        self.orphaned_inferences.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn orphan_finished(&self) {
        let _ = self
            .orphaned_inferences
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Timed-out inferences that have not wound down yet.
    pub fn orphaned_inferences(&self) -> usize {
        self.orphaned_inferences.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct FakeGpu(AtomicU64);

    impl GpuMemory for FakeGpu {
        fn bytes_in_use(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn governor() -> MemoryGovernor {
        MemoryGovernor::new(GovernorConfig::default(), Arc::new(FakeGpu(AtomicU64::new(0))))
    }

    fn inference_error() -> PipelineError {
        PipelineError::inference(2, "kernel failed")
    }

    #[test]
    fn latches_disabled_at_threshold() {
        let gov = governor();
        assert_eq!(gov.record_failure(&inference_error()), AiCapability::Degraded);
        assert_eq!(gov.record_failure(&inference_error()), AiCapability::Degraded);
        assert_eq!(gov.record_failure(&inference_error()), AiCapability::Disabled);

        gov.record_success();
        assert_eq!(gov.capability(), AiCapability::Disabled);
        assert_eq!(gov.state().consecutive_failures, 0);

        gov.reset();
        assert_eq!(gov.capability(), AiCapability::Available);
    }

    #[test]
    fn success_between_failures_restarts_the_count() {
        let gov = governor();
        gov.record_failure(&inference_error());
        gov.record_failure(&inference_error());
        gov.record_success();
        assert_eq!(gov.capability(), AiCapability::Available);
        gov.record_failure(&inference_error());
        gov.record_failure(&inference_error());
        assert_eq!(gov.capability(), AiCapability::Degraded);
    }

    #[test]
    fn non_ai_errors_do_not_count() {
        let gov = governor();
        for _ in 0..5 {
            gov.record_failure(&PipelineError::load("a.png", "truncated"));
        }
        assert_eq!(gov.capability(), AiCapability::Available);
        assert_eq!(gov.state().consecutive_failures, 0);
    }

    #[test]
    fn cleanup_guard_is_exclusive() {
        let gov = governor();
        let guard = gov.try_begin_cleanup().unwrap();
        assert!(gov.cleanup_in_progress());
        assert!(gov.try_begin_cleanup().is_none());
        drop(guard);
        assert!(!gov.cleanup_in_progress());
        assert!(gov.try_begin_cleanup().is_some());
    }

    #[test]
    fn sample_converts_to_megabytes() {
        let gpu = Arc::new(FakeGpu(AtomicU64::new(3 * 1024 * 1024)));
        let gov = MemoryGovernor::new(GovernorConfig::default(), gpu.clone());
        assert_eq!(gov.sample(), 3.0);
        assert_eq!(gov.state().current_usage_mb, 3.0);
        assert!(!gov.over_threshold(3.0));
        assert!(gov.over_threshold(2048.0));
    }

    #[test]
    fn orphan_count_never_underflows() {
        let gov = governor();
        gov.orphan_finished();
        assert_eq!(gov.orphaned_inferences(), 0);
        assert_eq!(gov.orphan_started(), 1);
        gov.orphan_finished();
        assert_eq!(gov.orphaned_inferences(), 0);
    }
}
