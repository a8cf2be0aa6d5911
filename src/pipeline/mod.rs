//! Pipeline - message handling between the transport and the aggregators
//!
//! - `config` - Subscription and aggregation settings from env/CLI
//! - `engine` - Routing, sample parsing, reduction checks, publication rendering

pub mod config;
pub mod engine;

pub use config::PipelineConfig;
pub use engine::{AggregationEngine, EngineError};
