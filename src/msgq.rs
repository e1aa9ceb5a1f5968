//! Per-peer outbound message queues.
//!
//! Handlers enqueue marshalled responses and notifications here; the
//! transport front drains each peer's queue after every dispatch and writes
//! the messages to the peer's socket in order. Queues are bounded: when a
//! slow peer falls too far behind, the oldest message is dropped.

use std::collections::{HashMap, VecDeque};

pub struct MsgQueue {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    max_queued: usize,
}

impl MsgQueue {
    pub fn new(max_queued: usize) -> Self {
        MsgQueue {
            queues: HashMap::new(),
            max_queued,
        }
    }

    pub fn enqueue(&mut self, node_id: &str, message: Vec<u8>) {
        let queue = self.queues.entry(node_id.to_string()).or_default();
        while queue.len() >= self.max_queued {
            queue.pop_front();
            vlogw!(
                "msgq: queue full for {}, dropping oldest message",
                crate::logging::node_id(node_id)
            );
        }
        queue.push_back(message);
    }

    /// Take every pending message for a peer, in enqueue order.
    pub fn drain(&mut self, node_id: &str) -> Vec<Vec<u8>> {
        match self.queues.get_mut(node_id) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Peers that currently have something queued.
    pub fn pending_peers(&self) -> Vec<String> {
        self.queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(node, _)| node.clone())
            .collect()
    }

    pub fn pending_count(&self, node_id: &str) -> usize {
        self.queues.get(node_id).map(VecDeque::len).unwrap_or(0)
    }

    /// Forget a disconnected peer entirely.
    pub fn remove(&mut self, node_id: &str) {
        self.queues.remove(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_enqueue_order() {
        let mut q = MsgQueue::new(8);
        q.enqueue("peer", b"one".to_vec());
        q.enqueue("peer", b"two".to_vec());
        assert_eq!(q.pending_count("peer"), 2);
        assert_eq!(q.drain("peer"), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(q.pending_count("peer"), 0);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = MsgQueue::new(2);
        q.enqueue("peer", b"a".to_vec());
        q.enqueue("peer", b"b".to_vec());
        q.enqueue("peer", b"c".to_vec());
        assert_eq!(q.drain("peer"), vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn peers_tracked_independently() {
        let mut q = MsgQueue::new(8);
        q.enqueue("a", b"x".to_vec());
        q.enqueue("b", b"y".to_vec());
        let mut peers = q.pending_peers();
        peers.sort();
        assert_eq!(peers, vec!["a", "b"]);

        q.remove("a");
        assert_eq!(q.pending_peers(), vec!["b"]);
    }
}
