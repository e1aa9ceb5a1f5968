//! In-memory channel and active-subscriber indexes.
//!
//! Channels are indexed by id and by name; peers that enabled notifications
//! become active subscribers held in an arena keyed by a generated handle,
//! cross-linked with the channels they subscribe to. The link is maintained
//! on both sides (`Channel::active_subers` holds suber handles,
//! `ActiveSuber::chan_ids` holds channel ids) because both directions are
//! hot: notification fan-out walks a channel's subscribers, disconnect
//! teardown walks a suber's channels.
//!
//! Everything here is mutated only from the single dispatch task, so there
//! is no locking.

use std::collections::{HashMap, HashSet};

use crate::config::CHAN_ID_START;
use crate::rpc::ChanInfo;
use crate::storage::{Storage, StorageError};

pub struct Channel {
    pub info: ChanInfo,
    /// Handles of active subscribers linked to this channel.
    pub active_subers: HashSet<u64>,
}

pub struct ActiveSuber {
    pub node_id: String,
    /// Channels this peer receives notifications for.
    pub chan_ids: HashSet<u64>,
}

#[derive(Default)]
pub struct FeedsIndex {
    channels: HashMap<u64, Channel>,
    ids_by_name: HashMap<String, u64>,
    subers: HashMap<u64, ActiveSuber>,
    suber_ids_by_node: HashMap<String, u64>,
    next_suber_id: u64,
    next_chan_id: u64,
    /// Node the owner receives notifications on, once enabled.
    pub owner_notif_node: Option<String>,
}

impl FeedsIndex {
    pub fn new() -> Self {
        FeedsIndex {
            next_chan_id: CHAN_ID_START,
            ..Default::default()
        }
    }

    /// Populate both channel indexes from storage and place the channel-id
    /// cursor after the highest persisted id.
    pub fn load(storage: &Storage) -> Result<Self, StorageError> {
        let mut index = FeedsIndex::new();
        for info in storage.query_channels(&Default::default())? {
            index.insert_channel(info);
        }
        vlogi!(
            "feeds: loaded {} channel(s), next channel id {}",
            index.channels.len(),
            index.next_chan_id
        );
        Ok(index)
    }

    pub fn next_chan_id(&self) -> u64 {
        self.next_chan_id
    }

    pub fn insert_channel(&mut self, info: ChanInfo) {
        if info.chan_id >= self.next_chan_id {
            self.next_chan_id = info.chan_id + 1;
        }
        self.ids_by_name.insert(info.name.clone(), info.chan_id);
        self.channels.insert(
            info.chan_id,
            Channel {
                info,
                active_subers: HashSet::new(),
            },
        );
    }

    pub fn has_channel_name(&self, name: &str) -> bool {
        self.ids_by_name.contains_key(name)
    }

    pub fn channel(&self, chan_id: u64) -> Option<&Channel> {
        self.channels.get(&chan_id)
    }

    pub fn channel_mut(&mut self, chan_id: u64) -> Option<&mut Channel> {
        self.channels.get_mut(&chan_id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    // -----------------------------------------------------------------------
    // Active subscribers
    // -----------------------------------------------------------------------

    pub fn has_suber(&self, node_id: &str) -> bool {
        self.suber_ids_by_node.contains_key(node_id)
    }

    pub fn suber_id(&self, node_id: &str) -> Option<u64> {
        self.suber_ids_by_node.get(node_id).copied()
    }

    pub fn suber(&self, suber_id: u64) -> Option<&ActiveSuber> {
        self.subers.get(&suber_id)
    }

    pub fn suber_count(&self) -> usize {
        self.subers.len()
    }

    pub fn subers(&self) -> impl Iterator<Item = (u64, &ActiveSuber)> {
        self.subers.iter().map(|(id, suber)| (*id, suber))
    }

    /// Register a peer as an active subscriber and return its handle.
    pub fn activate_suber(&mut self, node_id: &str) -> u64 {
        let id = self.next_suber_id;
        self.next_suber_id += 1;
        self.subers.insert(
            id,
            ActiveSuber {
                node_id: node_id.to_string(),
                chan_ids: HashSet::new(),
            },
        );
        self.suber_ids_by_node.insert(node_id.to_string(), id);
        id
    }

    /// Link a suber and a channel in both directions. Returns false when
    /// either side is gone.
    pub fn link(&mut self, suber_id: u64, chan_id: u64) -> bool {
        let (Some(suber), Some(channel)) =
            (self.subers.get_mut(&suber_id), self.channels.get_mut(&chan_id))
        else {
            return false;
        };
        suber.chan_ids.insert(chan_id);
        channel.active_subers.insert(suber_id);
        true
    }

    /// Remove one suber/channel link, both directions.
    pub fn unlink(&mut self, suber_id: u64, chan_id: u64) {
        if let Some(suber) = self.subers.get_mut(&suber_id) {
            suber.chan_ids.remove(&chan_id);
        }
        if let Some(channel) = self.channels.get_mut(&chan_id) {
            channel.active_subers.remove(&suber_id);
        }
    }

    /// Unlink by node id; used when a subscribed peer unsubscribes.
    pub fn unlink_node(&mut self, node_id: &str, chan_id: u64) {
        if let Some(suber_id) = self.suber_id(node_id) {
            self.unlink(suber_id, chan_id);
        }
    }

    /// Node ids to notify for a channel event.
    pub fn active_nodes_of(&self, chan_id: u64) -> Vec<String> {
        let Some(channel) = self.channels.get(&chan_id) else {
            return Vec::new();
        };
        channel
            .active_subers
            .iter()
            .filter_map(|id| self.subers.get(id))
            .map(|s| s.node_id.clone())
            .collect()
    }

    /// Tear down a peer's notification state: clear the owner slot when the
    /// peer holds it, otherwise drop its ActiveSuber and every link it owns.
    pub fn deactivate(&mut self, node_id: &str) {
        if self.owner_notif_node.as_deref() == Some(node_id) {
            vlogi!("feeds: owner notifications disabled ({})", crate::logging::node_id(node_id));
            self.owner_notif_node = None;
            return;
        }

        let Some(suber_id) = self.suber_ids_by_node.remove(node_id) else {
            return;
        };
        let Some(suber) = self.subers.remove(&suber_id) else {
            return;
        };
        for chan_id in &suber.chan_ids {
            if let Some(channel) = self.channels.get_mut(chan_id) {
                channel.active_subers.remove(&suber_id);
            }
        }
        vlogi!(
            "feeds: deactivated subscriber {} ({} channel(s))",
            crate::logging::node_id(node_id),
            suber.chan_ids.len()
        );
    }
}
