pub mod config;
pub mod error_handler;
pub mod loopback;
pub mod mqtt;
pub mod payload;
pub mod supervisor;
pub mod transport;

pub use config::{ConfigError, RuntimeConfig, SupervisorSettings};
pub use error_handler::{ConstantBackoff, FibonacciBackoff, MaxRetriesExceeded};
pub use loopback::{LoopbackHandle, LoopbackTransport};
pub use mqtt::{MqttSettings, MqttTransport};
pub use supervisor::{ConnectionState, ConnectionSupervisor, StopHandle, SupervisorError};
pub use transport::{Publication, QoS, Transport, TransportError, TransportEvent};
