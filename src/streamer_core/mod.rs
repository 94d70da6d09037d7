pub mod backoff;
pub mod config;
pub mod connection;
pub mod ws_client;

pub use backoff::ExponentialBackoff;
pub use config::{ConfigError, RuntimeConfig};
pub use connection::{ConnectionManager, ConnectionState, LiveMessage, ShutdownHandle};
pub use ws_client::WsTransport;
