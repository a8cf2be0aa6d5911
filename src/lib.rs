pub mod aggregator_core;
pub mod pipeline;
pub mod routing;
pub mod transport_core;
