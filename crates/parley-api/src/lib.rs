//! REST surface and channel upgrade for parley.
//!
//! [`build_router`] wires every route to an [`AppState`]; the server binary
//! only adds a listener.

pub mod channel;
pub mod error;
pub mod groups;
pub mod messages;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use router::build_router;
pub use state::{AppState, AppStateInner};
