use std::collections::{HashMap, HashSet};

use uuid::Uuid;

/// Which connections are subscribed to which group channels.
///
/// Keeps a forward index (group -> connections) for fan-out and a reverse
/// index (connection -> groups) so a disconnect only touches the channels that
/// connection had joined. Empty channels are pruned eagerly.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: HashMap<Uuid, HashSet<Uuid>>,
    joined: HashMap<Uuid, HashSet<Uuid>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection. Returns false if it was already subscribed.
    pub fn join(&mut self, connection_id: Uuid, group_id: Uuid) -> bool {
        let added = self
            .channels
            .entry(group_id)
            .or_default()
            .insert(connection_id);
        self.joined.entry(connection_id).or_default().insert(group_id);
        added
    }

    /// Unsubscribe a connection. Returns false if it was not subscribed.
    pub fn leave(&mut self, connection_id: Uuid, group_id: Uuid) -> bool {
        let removed = match self.channels.get_mut(&group_id) {
            Some(subs) => {
                let removed = subs.remove(&connection_id);
                if subs.is_empty() {
                    self.channels.remove(&group_id);
                }
                removed
            }
            None => false,
        };
        if let Some(groups) = self.joined.get_mut(&connection_id) {
            groups.remove(&group_id);
            if groups.is_empty() {
                self.joined.remove(&connection_id);
            }
        }
        removed
    }

    /// Remove a connection from every channel. Returns the groups it left.
    pub fn leave_all(&mut self, connection_id: Uuid) -> Vec<Uuid> {
        let groups: Vec<Uuid> = self
            .joined
            .remove(&connection_id)
            .map(|g| g.into_iter().collect())
            .unwrap_or_default();
        for group_id in &groups {
            if let Some(subs) = self.channels.get_mut(group_id) {
                subs.remove(&connection_id);
                if subs.is_empty() {
                    self.channels.remove(group_id);
                }
            }
        }
        groups
    }

    /// Drop a whole channel. Returns the connections that were subscribed.
    pub fn close_channel(&mut self, group_id: Uuid) -> Vec<Uuid> {
        let subs: Vec<Uuid> = self
            .channels
            .remove(&group_id)
            .map(|s| s.into_iter().collect())
            .unwrap_or_default();
        for connection_id in &subs {
            if let Some(groups) = self.joined.get_mut(connection_id) {
                groups.remove(&group_id);
                if groups.is_empty() {
                    self.joined.remove(connection_id);
                }
            }
        }
        subs
    }

    /// Snapshot of a channel's subscribers.
    pub fn subscribers(&self, group_id: Uuid) -> Vec<Uuid> {
        self.channels
            .get(&group_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, connection_id: Uuid, group_id: Uuid) -> bool {
        self.channels
            .get(&group_id)
            .is_some_and(|s| s.contains(&connection_id))
    }

    pub fn channels_of(&self, connection_id: Uuid) -> Vec<Uuid> {
        self.joined
            .get(&connection_id)
            .map(|g| g.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.channels.values().map(HashSet::len).sum()
    }
}
