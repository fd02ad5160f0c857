//! Channel gateway: the subscription registry, the relay dispatcher and the
//! per-connection WebSocket loop.

pub mod connection;
pub mod dispatcher;
pub mod registry;

pub use connection::handle_connection;
pub use dispatcher::{Dispatcher, RelayError, RelayMode};
pub use registry::ChannelRegistry;
