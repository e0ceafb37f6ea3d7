//! Wiring for the `herald` binary: layered configuration and the concrete
//! messaging transports.

pub mod config;
pub mod transport;

pub use config::HeraldConfig;
pub use transport::Transport;
