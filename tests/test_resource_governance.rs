//! Integration tests for the memory governor, model pool and resource manager
//!
//! Idle eviction is driven by a `ManualClock`, so nothing here depends on
//! wall-clock timing.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::mock_models::{FixedGpu, ModelBehavior, ScriptedDetector, ScriptedRuntime};
use common::test_images::gradient_png;
use smart_crop::config::PipelineConfig;
use smart_crop::core::{
    AiCapability, CleanupOutcome, FallbackReason, ManualClock, ResourceManager,
};
use smart_crop::models::fallback::NoAccelerator;
use smart_crop::{ImagePipeline, ProcessOptions};

fn manager_with(
    config: PipelineConfig,
    runtime: Arc<ScriptedRuntime>,
    clock: Arc<ManualClock>,
) -> Arc<ResourceManager> {
    Arc::new(ResourceManager::with_clock(
        config,
        runtime,
        Arc::new(NoAccelerator),
        clock,
    ))
}

fn fast_eviction() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.pool.eviction_delay_ms = 1_000;
    config.pool.idle_timeout_ms = 1_000;
    config
}

#[tokio::test]
async fn test_latched_failures_stop_model_loads() {
    let runtime = Arc::new(ScriptedRuntime::failing_loads());
    let manager = manager_with(
        PipelineConfig::default(),
        runtime.clone(),
        Arc::new(ManualClock::new()),
    );

    for expected in [AiCapability::Degraded, AiCapability::Degraded, AiCapability::Disabled] {
        let lease = manager.pool().acquire(2).await;
        assert_eq!(lease.fallback_reason(), Some(FallbackReason::LoadFailed));
        assert_eq!(manager.capability(), expected);
    }
    assert_eq!(runtime.loads(), 3);

    let lease = manager.pool().acquire(2).await;
    assert!(lease.is_fallback());
    assert_eq!(lease.fallback_reason(), Some(FallbackReason::AiDisabled));
    assert_eq!(runtime.loads(), 3, "a disabled governor must not reach the runtime");
}

#[tokio::test]
async fn test_reset_reenables_the_ai_path() {
    let runtime = Arc::new(ScriptedRuntime::failing_loads());
    let manager = manager_with(
        PipelineConfig::default(),
        runtime.clone(),
        Arc::new(ManualClock::new()),
    );
    for _ in 0..3 {
        drop(manager.pool().acquire(4).await);
    }
    assert_eq!(manager.capability(), AiCapability::Disabled);

    manager.reset();
    assert_eq!(manager.capability(), AiCapability::Available);
    assert_eq!(manager.governor().state().consecutive_failures, 0);

    drop(manager.pool().acquire(4).await);
    assert_eq!(runtime.loads(), 4);
}

#[tokio::test]
async fn test_pipeline_keeps_answering_after_the_ai_path_latches_off() {
    let runtime = Arc::new(ScriptedRuntime::new(ModelBehavior::Fail));
    let pipeline = ImagePipeline::builder()
        .with_runtime(runtime.clone())
        .build()
        .unwrap();
    let sources: Vec<_> = (0..4).map(|_| gradient_png(80, 40)).collect();

    let results = pipeline
        .resize(&sources, 160, &ProcessOptions::default())
        .await;

    assert!(results.iter().all(|r| r.is_ok() && !r.used_ai));
    assert!(results.iter().all(|r| r.dimensions == (160, 80)));
    assert_eq!(pipeline.resources().capability(), AiCapability::Disabled);
    // The fourth image is planned straight onto the fallback path.
    assert_eq!(runtime.inference_calls(), 3);
    assert_eq!(runtime.loads(), 1);
}

#[tokio::test]
async fn test_usage_count_tracks_live_leases() {
    let runtime = Arc::new(ScriptedRuntime::new(ModelBehavior::Upscale));
    let manager = manager_with(fast_eviction(), runtime.clone(), Arc::new(ManualClock::new()));
    let pool = manager.pool();

    let first = pool.acquire(2).await;
    let second = pool.acquire(2).await;
    let other = pool.acquire(4).await;
    assert_eq!(runtime.loads(), 2, "same scale shares one instance");
    assert_eq!(pool.usage_count(2), Some(2));
    assert_eq!(pool.live_models(), vec![(2, 2), (4, 1)]);

    drop(first);
    assert_eq!(pool.usage_count(2), Some(1));
    pool.release(second);
    drop(other);
    assert_eq!(pool.usage_count(2), Some(0));
    assert!(!pool.any_in_use());
}

#[tokio::test]
async fn test_idle_models_are_evicted_after_the_timeout() {
    let runtime = Arc::new(ScriptedRuntime::new(ModelBehavior::Upscale));
    let clock = Arc::new(ManualClock::new());
    let manager = manager_with(fast_eviction(), runtime.clone(), clock.clone());
    let pool = manager.pool();

    drop(pool.acquire(2).await);
    assert_eq!(pool.run_due_evictions(), 0, "eviction check not due yet");

    clock.advance(Duration::from_millis(999));
    assert_eq!(pool.run_due_evictions(), 0);

    clock.advance(Duration::from_millis(1));
    assert_eq!(pool.run_due_evictions(), 1);
    assert_eq!(pool.usage_count(2), None);
    assert_eq!(runtime.disposals(), 1);

    // A fresh acquire loads again.
    drop(pool.acquire(2).await);
    assert_eq!(runtime.loads(), 2);
}

#[tokio::test]
async fn test_leased_models_survive_eviction() {
    let runtime = Arc::new(ScriptedRuntime::new(ModelBehavior::Upscale));
    let clock = Arc::new(ManualClock::new());
    let manager = manager_with(fast_eviction(), runtime.clone(), clock.clone());
    let pool = manager.pool();

    let held = pool.acquire(3).await;
    clock.advance(Duration::from_secs(60));
    assert_eq!(pool.run_due_evictions(), 0);
    assert_eq!(pool.sweep_idle(), 0);
    assert_eq!(pool.usage_count(3), Some(1));

    drop(held);
    clock.advance(Duration::from_secs(1));
    assert_eq!(pool.sweep_idle(), 1);
    assert_eq!(runtime.disposals(), 1);
}

#[tokio::test]
async fn test_aggressive_cleanup_waits_for_leases_and_resets_detector() {
    let runtime = Arc::new(ScriptedRuntime::new(ModelBehavior::Upscale));
    let manager = manager_with(
        PipelineConfig::default(),
        runtime.clone(),
        Arc::new(ManualClock::new()),
    );
    let detector = ScriptedDetector::new(Vec::new());

    let lease = manager.pool().acquire(2).await;
    drop(manager.pool().acquire(4).await);

    assert_eq!(
        manager.aggressive_cleanup(Some(&detector)),
        CleanupOutcome::Refused { in_use: 1 }
    );
    assert_eq!(detector.resets.load(Ordering::SeqCst), 0);
    assert_eq!(manager.pool().live_models().len(), 2);

    drop(lease);
    assert_eq!(
        manager.aggressive_cleanup(Some(&detector)),
        CleanupOutcome::Completed { disposed: 2 }
    );
    assert_eq!(detector.resets.load(Ordering::SeqCst), 1);
    assert!(manager.pool().live_models().is_empty());
    assert_eq!(runtime.disposals(), 2);
}

#[tokio::test]
async fn test_memory_poll_over_threshold_sweeps_idle_models() {
    let runtime = Arc::new(ScriptedRuntime::new(ModelBehavior::Upscale));
    let clock = Arc::new(ManualClock::new());
    let manager = Arc::new(ResourceManager::with_clock(
        fast_eviction(),
        runtime.clone(),
        Arc::new(FixedGpu(2 * 1024 * 1024 * 1024)),
        clock.clone(),
    ));

    drop(manager.pool().acquire(2).await);
    clock.advance(Duration::from_secs(2));

    let (usage_mb, outcome) = manager.poll_memory();
    assert!((usage_mb - 2048.0).abs() < 1e-6);
    assert_eq!(outcome, Some(CleanupOutcome::Completed { disposed: 1 }));
    assert_eq!(manager.stats().live_models, Vec::<(u32, usize)>::new());
    assert!((manager.governor().state().current_usage_mb - 2048.0).abs() < 1e-6);
}
