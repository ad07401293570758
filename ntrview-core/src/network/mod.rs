mod connection;
pub mod control;
pub mod hz;

pub use connection::ConnectionInfo;
pub use control::{ControlChannel, ControlConfig, DEFAULT_CONTROL_PORT, SEQUENCE_STRIDE};
pub use hz::{DEFAULT_HZ_PORT, HzOptions, HzSession};
