//! Transports implementing [`LineTransport`](crate::core::LineTransport).

pub mod serial_adapter;
pub use serial_adapter::SerialTransport;

pub mod mock_adapter;
pub use mock_adapter::{MockHandle, MockTransport};
