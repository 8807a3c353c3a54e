//! # Resource Manager
//!
//! Owns the single instance of shared mutable state: the memory governor, the
//! model pool and the clock driving eviction. Every pipeline operation receives
//! an `Arc<ResourceManager>` instead of reaching for globals.
//!
//! ## Cleanup Levels
//!
//! - **Safe**: disposes idle models and flushes runtime caches. Never touches a
//!   model that is leased. Triggered by [`ResourceManager::poll_memory`] above
//!   the memory threshold.
//! - **Aggressive**: disposes every model and resets the detector. Refused while
//!   any lease is live.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::core::clock::{Clock, SystemClock};
use crate::core::memory::{AiCapability, MemoryGovernor, MemoryState};
use crate::core::model_pool::ModelPool;
use crate::models::{GpuMemory, ObjectDetector, SuperResolutionRuntime};

/// Result of one cleanup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Another cleanup held the slot.
    Skipped,
    /// A lease was live; nothing was disposed.
    Refused { in_use: usize },
    Completed { disposed: usize },
}

/// Point-in-time view for logging and the CLI `--stats` flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStats {
    pub memory: MemoryState,
    pub live_models: Vec<(u32, usize)>,
    pub orphaned_inferences: usize,
    pub cleanup_in_progress: bool,
}

impl std::fmt::Display for ResourceStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gpu {:.1} MB | ai {:?} ({} consecutive failures) | models {:?} | orphaned {}",
            self.memory.current_usage_mb,
            self.memory.capability,
            self.memory.consecutive_failures,
            self.live_models,
            self.orphaned_inferences
        )
    }
}

pub struct ResourceManager {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    governor: Arc<MemoryGovernor>,
    pool: ModelPool,
    runtime: Arc<dyn SuperResolutionRuntime>,
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("governor", &self.governor)
            .field("pool", &self.pool)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl ResourceManager {
    pub fn new(
        config: PipelineConfig,
        runtime: Arc<dyn SuperResolutionRuntime>,
        gpu: Arc<dyn GpuMemory>,
    ) -> Self {
        Self::with_clock(config, runtime, gpu, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: PipelineConfig,
        runtime: Arc<dyn SuperResolutionRuntime>,
        gpu: Arc<dyn GpuMemory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let governor = Arc::new(MemoryGovernor::new(config.governor.clone(), gpu));
        let pool = ModelPool::new(runtime.clone(), governor.clone(), clock.clone(), config.pool.clone());
        Self {
            config,
            clock,
            governor,
            pool,
            runtime,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn governor(&self) -> &Arc<MemoryGovernor> {
        &self.governor
    }

    pub fn pool(&self) -> &ModelPool {
        &self.pool
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn capability(&self) -> AiCapability {
        self.governor.capability()
    }

    /// Sample GPU usage; run a safe cleanup if over threshold and nothing is leased.
    pub fn poll_memory(&self) -> (f64, Option<CleanupOutcome>) {
        let usage_mb = self.governor.sample();
        if !self.governor.over_threshold(usage_mb) {
            return (usage_mb, None);
        }
        if self.pool.any_in_use() {
            debug!(usage_mb, "over memory threshold but models are leased");
            return (usage_mb, None);
        }
        warn!(usage_mb, "GPU memory over threshold, running safe cleanup");
        (usage_mb, Some(self.safe_cleanup()))
    }

    /// Dispose idle models and flush runtime caches.
    pub fn safe_cleanup(&self) -> CleanupOutcome {
        let Some(_guard) = self.governor.try_begin_cleanup() else {
            return CleanupOutcome::Skipped;
        };
        let disposed = self.pool.sweep_idle();
        self.runtime.release_cached_buffers();
        debug!(disposed, "safe cleanup finished");
        CleanupOutcome::Completed { disposed }
    }

    /// Dispose every model and reset the detector. Refused while any lease is live.
    pub fn aggressive_cleanup(&self, detector: Option<&dyn ObjectDetector>) -> CleanupOutcome {
        let Some(_guard) = self.governor.try_begin_cleanup() else {
            return CleanupOutcome::Skipped;
        };
        match self.pool.dispose_all() {
            Err(in_use) => {
                warn!(in_use, "aggressive cleanup refused: models in use");
                CleanupOutcome::Refused { in_use }
            }
            Ok(disposed) => {
                if let Some(detector) = detector {
                    detector.reset();
                }
                self.runtime.release_cached_buffers();
                info!(disposed, "aggressive cleanup finished");
                CleanupOutcome::Completed { disposed }
            }
        }
    }

    /// Re-enable the AI path after it latched off.
    pub fn reset(&self) {
        self.governor.reset();
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            memory: self.governor.state(),
            live_models: self.pool.live_models(),
            orphaned_inferences: self.governor.orphaned_inferences(),
            cleanup_in_progress: self.governor.cleanup_in_progress(),
        }
    }

    /// Background task: run due evictions and poll memory every poll interval.
    ///
    /// Holds only a weak reference; the task ends once the manager is dropped.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.governor.poll_interval().max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    debug!("resource monitor stopping");
                    break;
                };
                let evicted = manager.pool.run_due_evictions();
                if evicted > 0 {
                    debug!(evicted, "monitor evicted idle models");
                }
                manager.poll_memory();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::models::fallback::ResamplingRuntime;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeGpu(AtomicU64);

    impl GpuMemory for FakeGpu {
        fn bytes_in_use(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn manager(gpu_mb: u64) -> (ResourceManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let manager = ResourceManager::with_clock(
            PipelineConfig::default(),
            Arc::new(ResamplingRuntime::default()),
            Arc::new(FakeGpu(AtomicU64::new(gpu_mb * 1024 * 1024))),
            clock.clone(),
        );
        (manager, clock)
    }

    #[tokio::test]
    async fn poll_below_threshold_does_nothing() {
        let (manager, _) = manager(10);
        let (usage, outcome) = manager.poll_memory();
        assert_eq!(usage, 10.0);
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn poll_over_threshold_skips_while_leased() {
        let (manager, clock) = manager(4096);
        let lease = manager.pool().acquire(2).await;
        assert_eq!(manager.poll_memory().1, None);
        assert_eq!(manager.pool().usage_count(2), Some(1));

        drop(lease);
        clock.advance(Duration::from_secs(31));
        assert_eq!(
            manager.poll_memory().1,
            Some(CleanupOutcome::Completed { disposed: 1 })
        );
        assert!(manager.pool().live_models().is_empty());
    }

    #[tokio::test]
    async fn aggressive_cleanup_respects_leases() {
        let (manager, _) = manager(0);
        let lease = manager.pool().acquire(4).await;
        assert_eq!(
            manager.aggressive_cleanup(None),
            CleanupOutcome::Refused { in_use: 1 }
        );
        drop(lease);
        assert_eq!(
            manager.aggressive_cleanup(None),
            CleanupOutcome::Completed { disposed: 1 }
        );
    }

    #[tokio::test]
    async fn concurrent_cleanup_is_skipped() {
        let (manager, _) = manager(0);
        let _guard = manager.governor().try_begin_cleanup().unwrap();
        assert_eq!(manager.safe_cleanup(), CleanupOutcome::Skipped);
        assert_eq!(manager.aggressive_cleanup(None), CleanupOutcome::Skipped);
    }
}
