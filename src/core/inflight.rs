//! # In-flight Inference Tracking
//!
//! An [`InferenceHold`] keeps a model lease alive for as long as any part of
//! an inference is still running. The cascade creates one per model call and
//! the call's task carries it; models that move work off the task (for
//! example onto `spawn_blocking`) take another hold with [`current`] and move
//! it into that work.
//!
//! When the cascade gives up on a call it marks the hold as orphaned. The
//! governor's orphan count then drops only when the last hold goes away, which
//! is also when the lease returns to the pool.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::core::memory::MemoryGovernor;
use crate::core::model_pool::ModelLease;

tokio::task_local! {
    static CURRENT: InferenceHold;
}

struct Inference {
    lease: ModelLease,
    governor: Arc<MemoryGovernor>,
    orphaned: AtomicBool,
}

impl Drop for Inference {
    fn drop(&mut self) {
        if self.orphaned.load(Ordering::Acquire) {
            self.governor.orphan_finished();
            debug!(
                scale = self.lease.scale(),
                orphans = self.governor.orphaned_inferences(),
                "orphaned inference wound down"
            );
        }
    }
}

/// Shared claim on a running inference; the lease is released with the last one.
#[derive(Clone)]
pub struct InferenceHold(Arc<Inference>);

impl std::fmt::Debug for InferenceHold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceHold")
            .field("scale", &self.0.lease.scale())
            .field("orphaned", &self.is_orphaned())
            .finish()
    }
}

impl InferenceHold {
    pub(crate) fn new(lease: ModelLease, governor: Arc<MemoryGovernor>) -> Self {
        Self(Arc::new(Inference {
            lease,
            governor,
            orphaned: AtomicBool::new(false),
        }))
    }

    /// Count this inference as orphaned until every hold is dropped.
    /// Returns the orphan count including this one.
    pub(crate) fn orphan(&self) -> usize {
        let orphans = self.0.governor.orphan_started();
        self.0.orphaned.store(true, Ordering::Release);
        orphans
    }

    pub fn is_orphaned(&self) -> bool {
        self.0.orphaned.load(Ordering::Acquire)
    }

    /// Run `fut` with this hold visible to [`current`].
    pub(crate) fn scope<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        CURRENT.scope(self, fut)
    }
}

/// Hold on the inference the calling task is running, if any.
pub fn current() -> Option<InferenceHold> {
    CURRENT.try_with(Clone::clone).ok()
}
