use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::stream::StreamInner;

/// Live streams by local id, plus recently released ids that must not be
/// handed out again until late frames for them have drained.
pub(crate) struct RoutingTable {
    streams: HashMap<u32, Arc<StreamInner>>,
    retired: VecDeque<(u32, Instant)>,
    next_id: u32,
    retire_ttl: Duration,
}

impl RoutingTable {
    pub(crate) fn new(retire_ttl: Duration) -> Self {
        Self {
            streams: HashMap::new(),
            retired: VecDeque::new(),
            next_id: 1,
            retire_ttl,
        }
    }

    /// A non-zero id that is neither live nor retired.
    pub(crate) fn allocate(&mut self, now: Instant) -> Option<u32> {
        self.purge_retired(now);
        if self.streams.len() + self.retired.len() >= u32::MAX as usize {
            return None;
        }
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.streams.contains_key(&id) && !self.is_retired(id) {
                return Some(id);
            }
        }
    }

    pub(crate) fn insert(&mut self, id: u32, stream: Arc<StreamInner>) {
        self.streams.insert(id, stream);
    }

    pub(crate) fn get(&self, id: u32) -> Option<Arc<StreamInner>> {
        self.streams.get(&id).cloned()
    }

    /// Remove a stream and keep its id out of circulation for the TTL.
    pub(crate) fn retire(&mut self, id: u32, now: Instant) -> Option<Arc<StreamInner>> {
        let removed = self.streams.remove(&id);
        if removed.is_some() {
            self.retired.push_back((id, now));
        }
        removed
    }

    pub(crate) fn streams(&self) -> Vec<Arc<StreamInner>> {
        self.streams.values().cloned().collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<StreamInner>> {
        self.retired.clear();
        self.streams.drain().map(|(_, stream)| stream).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    pub(crate) fn purge_retired(&mut self, now: Instant) {
        while let Some(&(_, at)) = self.retired.front() {
            if now.duration_since(at) < self.retire_ttl {
                break;
            }
            self.retired.pop_front();
        }
    }

    fn is_retired(&self, id: u32) -> bool {
        self.retired.iter().any(|&(retired, _)| retired == id)
    }
}
