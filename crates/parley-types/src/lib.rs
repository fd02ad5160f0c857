pub mod api;
pub mod error;
pub mod events;
pub mod models;

pub use error::ErrorKind;
pub use models::{Group, Membership, Message, Visibility};
