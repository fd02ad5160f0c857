//! Client side of parley: a REST wrapper and the channel connection state
//! machine used by viewers to receive live group events.

pub mod connection;
pub mod error;
pub mod rest;

pub use connection::{ChannelConnection, ConnectionState};
pub use error::{ClientError, ClientResult};
pub use rest::RestClient;
