use crate::store::{compare_names, EntityStore};
use mumble_core::{ChannelId, ROOT_CHANNEL_ID};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Channels the last rebuild could not attach to the hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyReport {
    /// Non-root channels whose parent is absent from the store.
    pub orphaned: Vec<ChannelId>,
    /// Channels on, or hanging below, a parent cycle.
    pub cyclic: Vec<ChannelId>,
}

impl HierarchyReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty() && self.cyclic.is_empty()
    }
}

/// Recompute child lists and member order from the flat store.
///
/// Derived indexes are cleared first so repeated calls never accumulate.
/// Channels whose parent chain loops are left out of every child list, so
/// the result is always a forest.
pub fn rebuild(store: &mut EntityStore) -> HierarchyReport {
    let users = &store.users;
    for channel in store.channels.values_mut() {
        channel.children.clear();
        channel.members.sort_by(|a, b| {
            let name_a = users.get(a).map(|user| user.name.as_str()).unwrap_or("");
            let name_b = users.get(b).map(|user| user.name.as_str()).unwrap_or("");
            compare_names(name_a, name_b).then_with(|| a.cmp(b))
        });
    }

    let cyclic = find_cyclic(store);
    let mut report = HierarchyReport::default();
    let mut children_of: BTreeMap<ChannelId, Vec<ChannelId>> = BTreeMap::new();
    for channel in store.channels.values() {
        if channel.id == ROOT_CHANNEL_ID {
            continue;
        }
        if cyclic.contains(&channel.id) {
            report.cyclic.push(channel.id);
            continue;
        }
        match channel.parent_id {
            Some(parent_id) if store.channels.contains_key(&parent_id) => {
                children_of.entry(parent_id).or_default().push(channel.id);
            }
            parent_id => {
                debug!(
                    event = "channel_parent_missing",
                    channel_id = channel.id,
                    parent_id = ?parent_id
                );
                report.orphaned.push(channel.id);
            }
        }
    }

    if !report.cyclic.is_empty() {
        warn!(event = "channel_parent_cycle", channels = ?report.cyclic);
    }

    for children in children_of.values_mut() {
        children.sort_by(|a, b| {
            let name_a = store.channels.get(a).map(|c| c.name.as_str()).unwrap_or("");
            let name_b = store.channels.get(b).map(|c| c.name.as_str()).unwrap_or("");
            compare_names(name_a, name_b).then_with(|| a.cmp(b))
        });
    }
    for (parent_id, children) in children_of {
        if let Some(parent) = store.channels.get_mut(&parent_id) {
            parent.children = children;
        }
    }

    report
}

/// Walk every parent chain once, memoizing outcomes, and collect the
/// channels whose chain revisits itself before ending.
fn find_cyclic(store: &EntityStore) -> BTreeSet<ChannelId> {
    let mut settled: BTreeMap<ChannelId, bool> = BTreeMap::new();
    for &start in store.channels.keys() {
        if settled.contains_key(&start) {
            continue;
        }
        let mut path = Vec::new();
        let mut on_path = BTreeSet::new();
        let mut current = start;
        let looped = loop {
            if let Some(&known) = settled.get(&current) {
                break known;
            }
            if !on_path.insert(current) {
                break true;
            }
            path.push(current);
            if current == ROOT_CHANNEL_ID {
                break false;
            }
            match store.channels.get(&current).and_then(|c| c.parent_id) {
                Some(parent_id) if store.channels.contains_key(&parent_id) => current = parent_id,
                _ => break false,
            }
        };
        for id in path {
            settled.insert(id, looped);
        }
    }
    settled
        .into_iter()
        .filter_map(|(id, looped)| looped.then_some(id))
        .collect()
}
