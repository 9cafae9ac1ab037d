//! In-memory store state and the pending-change journal

use super::ResourceHash;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Integer slot addressing a resource id
pub(crate) type Slot = i64;

/// Full in-memory image of a store.
///
/// Slots are dense and allocated in first-seen order; a slot stays bound to
/// its resource hash for the lifetime of the store.
#[derive(Clone)]
pub(crate) struct StoreState<R, E> {
    pub next_slot: Slot,
    pub slots: HashMap<ResourceHash, Slot>,
    pub resources: BTreeMap<Slot, (ResourceHash, R)>,
    pub entities: BTreeMap<Slot, E>,
    pub successors: BTreeMap<Slot, BTreeSet<Slot>>,
    pub predecessors: BTreeMap<Slot, BTreeSet<Slot>>,
}

impl<R, E> Default for StoreState<R, E> {
    fn default() -> Self {
        Self {
            next_slot: 1,
            slots: HashMap::new(),
            resources: BTreeMap::new(),
            entities: BTreeMap::new(),
            successors: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        }
    }
}

impl<R: Clone, E: Clone> StoreState<R, E> {
    pub fn slot(&self, hash: &ResourceHash) -> Option<Slot> {
        self.slots.get(hash).copied()
    }

    pub fn resource(&self, slot: Slot) -> Option<&R> {
        self.resources.get(&slot).map(|(_, r)| r)
    }

    pub fn entity_by_hash(&self, hash: &ResourceHash) -> Option<E> {
        self.slot(hash).and_then(|s| self.entities.get(&s).cloned())
    }

    pub fn edge_count(&self) -> usize {
        self.successors.values().map(BTreeSet::len).sum()
    }

    /// Resources behind `slots`, skipping unbound slots
    pub fn resources_of<'a>(&self, slots: impl IntoIterator<Item = &'a Slot>) -> Vec<R> {
        slots
            .into_iter()
            .filter_map(|s| self.resource(*s).cloned())
            .collect()
    }

    pub fn successors_of(&self, slot: Slot) -> Vec<R> {
        match self.successors.get(&slot) {
            Some(succ) => self.resources_of(succ),
            None => Vec::new(),
        }
    }

    /// Predecessors of `slot` that still hold an entity
    pub fn live_predecessors_of(&self, slot: Slot) -> Vec<R> {
        match self.predecessors.get(&slot) {
            Some(pred) => self.resources_of(pred.iter().filter(|p| self.entities.contains_key(*p))),
            None => Vec::new(),
        }
    }

    /// `start` and every slot reachable over outgoing edges, breadth first
    pub fn reachable_from(&self, start: Slot) -> Vec<Slot> {
        let mut seen = BTreeSet::from([start]);
        let mut order = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(slot) = queue.pop_front() {
            if let Some(succ) = self.successors.get(&slot) {
                for &next in succ {
                    if seen.insert(next) {
                        order.push(next);
                        queue.push_back(next);
                    }
                }
            }
        }
        order
    }

    pub fn reaches(&self, from: Slot, target: Slot) -> bool {
        self.reachable_from(from).contains(&target)
    }

    pub fn insert_edge(&mut self, from: Slot, to: Slot) -> bool {
        let inserted = self.successors.entry(from).or_default().insert(to);
        if inserted {
            self.predecessors.entry(to).or_default().insert(from);
        }
        inserted
    }

    /// Drop every outgoing edge of `slot`
    pub fn remove_outgoing(&mut self, slot: Slot) {
        if let Some(succ) = self.successors.remove(&slot) {
            for to in succ {
                if let Some(pred) = self.predecessors.get_mut(&to) {
                    pred.remove(&slot);
                    if pred.is_empty() {
                        self.predecessors.remove(&to);
                    }
                }
            }
        }
    }
}

/// Slots touched since the last commit
#[derive(Debug, Default)]
pub(crate) struct Journal {
    /// The whole store was cleared; the database must be wiped first
    pub cleared: bool,
    pub resources: BTreeSet<Slot>,
    /// Upserted or removed entities; the working state decides which
    pub entities: BTreeSet<Slot>,
    /// Slots whose outgoing edge set changed
    pub edges: BTreeSet<Slot>,
}

impl Journal {
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.resources.is_empty() && self.entities.is_empty() && self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len() + self.entities.len() + self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::stable_hash;

    fn hash(n: u32) -> ResourceHash {
        stable_hash(|h| {
            h.put_u32(n);
        })
    }

    fn state_with(n: i64) -> StoreState<u32, String> {
        let mut state = StoreState::default();
        for slot in 1..=n {
            state.slots.insert(hash(slot as u32), slot);
            state.resources.insert(slot, (hash(slot as u32), slot as u32));
            state.entities.insert(slot, format!("e{slot}"));
        }
        state.next_slot = n + 1;
        state
    }

    #[test]
    fn test_reachability_is_breadth_first() {
        let mut state = state_with(4);
        state.insert_edge(1, 2);
        state.insert_edge(1, 3);
        state.insert_edge(2, 4);
        assert_eq!(state.reachable_from(1), vec![1, 2, 3, 4]);
        assert!(state.reaches(1, 4));
        assert!(!state.reaches(4, 1));
    }

    #[test]
    fn test_remove_outgoing_updates_predecessors() {
        let mut state = state_with(3);
        state.insert_edge(1, 3);
        state.insert_edge(2, 3);
        state.remove_outgoing(1);
        assert!(state.successors.get(&1).is_none());
        assert_eq!(state.predecessors[&3], BTreeSet::from([2]));
    }

    #[test]
    fn test_live_predecessors_skip_removed_entities() {
        let mut state = state_with(3);
        state.insert_edge(1, 3);
        state.insert_edge(2, 3);
        state.entities.remove(&1);
        assert_eq!(state.live_predecessors_of(3), vec![2]);
    }

    #[test]
    fn test_journal_empty() {
        let mut journal = Journal::default();
        assert!(journal.is_empty());
        journal.edges.insert(4);
        assert!(!journal.is_empty());
        assert_eq!(journal.len(), 1);
    }
}
