//! Consistency engine: ownership, uniqueness, no-op and cascade rules for
//! groups and messages, enforced before anything reaches the store.

pub mod engine;
pub mod error;
mod groups;
mod messages;
mod validation;

pub use engine::{Engine, MessageEdit, NewMessage};
pub use error::{EngineError, EngineResult};
