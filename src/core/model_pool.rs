//! # Model Pool
//!
//! Reference-counted cache of loaded super-resolution models, at most one
//! instance per scale factor.
//!
//! ## Lifecycle
//!
//! ```text
//!  acquire(s) ──▶ load on miss ──▶ usage += 1 ──▶ ModelLease
//!                                                    │ drop
//!                                                    ▼
//!                        usage -= 1; at 0 schedule eviction check
//!                                                    │ run_due_evictions()
//!                                                    ▼
//!                   still unused and idle >= idle_timeout ──▶ dispose
//! ```
//!
//! A lease is returned exactly once: [`ModelLease`] releases itself on drop,
//! so early returns and `?` in callers can't leak a usage count.
//!
//! When the AI path is disabled, or a load fails, `acquire` returns a fallback
//! lease carrying no model. Callers check [`ModelLease::model`] and move on to
//! the non-AI stages of the cascade.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::core::clock::Clock;
use crate::core::memory::MemoryGovernor;
use crate::error::PipelineError;
use crate::models::{SuperResolutionModel, SuperResolutionRuntime};

/// Why a lease carries no model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    AiDisabled,
    LoadFailed,
}

struct Slot {
    instance: Arc<dyn SuperResolutionModel>,
    usage_count: usize,
    last_used_at: Instant,
    eviction_due: Option<Instant>,
}

struct PoolInner {
    slots: Mutex<HashMap<u32, Slot>>,
    runtime: Arc<dyn SuperResolutionRuntime>,
    governor: Arc<MemoryGovernor>,
    clock: Arc<dyn Clock>,
    config: PoolConfig,
}

impl PoolInner {
    fn release(&self, scale: u32) {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&scale) else {
            return;
        };
        slot.usage_count = slot.usage_count.saturating_sub(1);
        slot.last_used_at = now;
        if slot.usage_count == 0 {
            slot.eviction_due = Some(now + self.config.eviction_delay());
            debug!(scale, "model idle, eviction check scheduled");
        }
    }

    /// Remove every unused slot matching `pick`; dispose after unlocking.
    fn evict_where(&self, pick: impl Fn(&Slot, Instant) -> bool) -> usize {
        let now = self.clock.now();
        let evicted: Vec<(u32, Arc<dyn SuperResolutionModel>)> = {
            let mut slots = self.slots.lock();
            let scales: Vec<u32> = slots
                .iter()
                .filter(|(_, slot)| slot.usage_count == 0 && pick(slot, now))
                .map(|(scale, _)| *scale)
                .collect();
            scales
                .into_iter()
                .filter_map(|scale| slots.remove(&scale).map(|slot| (scale, slot.instance)))
                .collect()
        };

        for (scale, instance) in &evicted {
            instance.dispose();
            info!(scale, "disposed idle model");
        }
        evicted.len()
    }
}

/// Handle to a pooled model, or a fallback marker when no model is available.
pub struct ModelLease {
    scale: u32,
    backing: Backing,
}

enum Backing {
    Pooled {
        instance: Arc<dyn SuperResolutionModel>,
        pool: Arc<PoolInner>,
    },
    Fallback(FallbackReason),
}

impl ModelLease {
    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn model(&self) -> Option<&Arc<dyn SuperResolutionModel>> {
        match &self.backing {
            Backing::Pooled { instance, .. } => Some(instance),
            Backing::Fallback(_) => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.backing, Backing::Fallback(_))
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self.backing {
            Backing::Fallback(reason) => Some(reason),
            Backing::Pooled { .. } => None,
        }
    }
}

impl fmt::Debug for ModelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLease")
            .field("scale", &self.scale)
            .field("fallback", &self.fallback_reason())
            .finish()
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        if let Backing::Pooled { pool, .. } = &self.backing {
            pool.release(self.scale);
        }
    }
}

/// Shared handle to the pool; clones refer to the same slots.
#[derive(Clone)]
pub struct ModelPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ModelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelPool")
            .field("live", &self.live_models())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ModelPool {
    pub fn new(
        runtime: Arc<dyn SuperResolutionRuntime>,
        governor: Arc<MemoryGovernor>,
        clock: Arc<dyn Clock>,
        config: PoolConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(HashMap::new()),
                runtime,
                governor,
                clock,
                config,
            }),
        }
    }

    /// Lease the model for `scale`, loading it on first use.
    pub async fn acquire(&self, scale: u32) -> ModelLease {
        let now = self.inner.clock.now();
        let cached = {
            let mut slots = self.inner.slots.lock();
            slots.get_mut(&scale).map(|slot| {
                slot.usage_count += 1;
                slot.last_used_at = now;
                slot.eviction_due = None;
                slot.instance.clone()
            })
        };
        if let Some(instance) = cached {
            return self.pooled(scale, instance);
        }

        if self.inner.governor.is_ai_disabled() {
            debug!(scale, "AI disabled, handing out fallback lease");
            return self.fallback(scale, FallbackReason::AiDisabled);
        }

        match self.inner.runtime.load(scale).await {
            Ok(loaded) => {
                let now = self.inner.clock.now();
                let mut slots = self.inner.slots.lock();
                let slot = slots.entry(scale).or_insert_with(|| {
                    info!(scale, "loaded super-resolution model");
                    Slot {
                        instance: loaded.clone(),
                        usage_count: 0,
                        last_used_at: now,
                        eviction_due: None,
                    }
                });
                if !Arc::ptr_eq(&slot.instance, &loaded) {
                    // Another caller loaded the same scale first.
                    loaded.dispose();
                }
                slot.usage_count += 1;
                slot.last_used_at = now;
                slot.eviction_due = None;
                let instance = slot.instance.clone();
                drop(slots);
                self.pooled(scale, instance)
            }
            Err(e) => {
                let error = PipelineError::model_load(scale, format!("{e:#}"));
                warn!(scale, error = %error, "model load failed, using fallback");
                self.inner.governor.record_failure(&error);
                self.fallback(scale, FallbackReason::LoadFailed)
            }
        }
    }

    /// Return a lease. Equivalent to dropping it.
    pub fn release(&self, lease: ModelLease) {
        drop(lease);
    }

    /// Current usage count for `scale`, `None` if not loaded.
    pub fn usage_count(&self, scale: u32) -> Option<usize> {
        self.inner.slots.lock().get(&scale).map(|s| s.usage_count)
    }

    /// `(scale, usage_count)` for every live model, sorted by scale.
    pub fn live_models(&self) -> Vec<(u32, usize)> {
        let mut live: Vec<_> = self
            .inner
            .slots
            .lock()
            .iter()
            .map(|(scale, slot)| (*scale, slot.usage_count))
            .collect();
        live.sort_unstable();
        live
    }

    pub fn any_in_use(&self) -> bool {
        self.inner.slots.lock().values().any(|s| s.usage_count > 0)
    }

    /// Run eviction checks whose scheduled time has passed.
    pub fn run_due_evictions(&self) -> usize {
        let idle_timeout = self.inner.config.idle_timeout();
        self.inner.evict_where(|slot, now| {
            slot.eviction_due.is_some_and(|due| due <= now)
                && now.duration_since(slot.last_used_at) >= idle_timeout
        })
    }

    /// Dispose every unused model idle for at least the idle timeout.
    pub fn sweep_idle(&self) -> usize {
        let idle_timeout = self.inner.config.idle_timeout();
        self.inner
            .evict_where(|slot, now| now.duration_since(slot.last_used_at) >= idle_timeout)
    }

    /// Dispose every model. Refused with the in-use count if any lease is live.
    pub fn dispose_all(&self) -> Result<usize, usize> {
        let in_use = self
            .inner
            .slots
            .lock()
            .values()
            .filter(|s| s.usage_count > 0)
            .count();
        if in_use > 0 {
            return Err(in_use);
        }
        Ok(self.inner.evict_where(|_, _| true))
    }

    fn pooled(&self, scale: u32, instance: Arc<dyn SuperResolutionModel>) -> ModelLease {
        ModelLease {
            scale,
            backing: Backing::Pooled {
                instance,
                pool: self.inner.clone(),
            },
        }
    }

    fn fallback(&self, scale: u32, reason: FallbackReason) -> ModelLease {
        ModelLease {
            scale,
            backing: Backing::Fallback(reason),
        }
    }
}
