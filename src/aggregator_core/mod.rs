//! Aggregator Core - Windowed reduction of keyed numeric samples
//!
//! # Architecture
//!
//! ```text
//! put(key, sample) → SampleBuffer[key]
//!     ↓ (window elapsed, checked on put and on every loop tick)
//! Reducer (avg | min | max | count | custom)
//!     ↓
//! WindowHistory[key] (bounded to N entries, earliest evicted)
//!     ↓
//! HistorySnapshot → update callback / returned to the caller
//! ```

pub mod naming;
pub mod reducer;
pub mod window;

pub use reducer::{ReduceFn, Reducer, ReducerArityMismatch, UnknownReducer};
pub use window::{
    AggregationKey, AggregatorConfig, AggregatorError, HistorySnapshot, UpdateCallback,
    WindowHistory, WindowedAggregator,
};
