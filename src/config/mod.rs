//! # Configuration Module
//!
//! Configuration structures, defaults and JSON loading for the pipeline.

pub mod config;

pub use config::{
    CascadeConfig, DetectorConfig, GovernorConfig, LimitsConfig, PipelineConfig, PoolConfig,
};
