use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use parley_core::Engine;
use parley_gateway::{Dispatcher, RelayMode};
use parley_types::events::RelayEvent;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Engine,
    pub dispatcher: Dispatcher,
    /// HMAC secret for verifying identity tokens.
    pub jwt_secret: String,
    /// History page size when a request does not name one.
    pub page_size: u32,
}

impl AppStateInner {
    pub fn new(engine: Engine, dispatcher: Dispatcher, jwt_secret: String, page_size: u32) -> AppState {
        Arc::new(Self {
            engine,
            dispatcher,
            jwt_secret,
            page_size,
        })
    }

    /// In server relay mode, push a confirmed mutation to the group's channel.
    /// A no-op in client mode, where the mutating client relays it itself.
    pub async fn publish(&self, group_id: Uuid, relay: RelayEvent, actor: Uuid) {
        if self.dispatcher.relay_mode() != RelayMode::Server {
            return;
        }
        let kind = relay.kind();
        let delivered = self.dispatcher.publish(group_id, relay, Some(actor)).await;
        debug!("Published {} to group {} ({} peers)", kind, group_id, delivered);
    }
}
