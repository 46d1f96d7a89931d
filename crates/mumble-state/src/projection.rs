use crate::store::EntityStore;
use mumble_core::{ChannelId, TalkingState, TreeLayout, UserFlags, UserId, ROOT_CHANNEL_ID};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayUser {
    pub id: UserId,
    pub name: String,
    pub flags: UserFlags,
    pub talking_state: TalkingState,
    pub is_local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayChannel {
    pub id: ChannelId,
    pub name: String,
    pub users: Vec<DisplayUser>,
    pub subchannels: Vec<DisplayChannel>,
}

impl DisplayChannel {
    /// Users in this channel and every channel below it.
    pub fn total_users(&self) -> usize {
        self.users.len()
            + self
                .subchannels
                .iter()
                .map(DisplayChannel::total_users)
                .sum::<usize>()
    }

    pub fn find(&self, id: ChannelId) -> Option<&DisplayChannel> {
        if self.id == id {
            return Some(self);
        }
        self.subchannels.iter().find_map(|sub| sub.find(id))
    }
}

/// A detached, read-only copy of the hierarchy prepared for one layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTree {
    pub layout: TreeLayout,
    pub root: DisplayChannel,
}

impl DisplayTree {
    pub fn find(&self, id: ChannelId) -> Option<&DisplayChannel> {
        self.root.find(id)
    }

    pub fn total_users(&self) -> usize {
        self.root.total_users()
    }
}

/// Copy the subtree reachable from the root and prune it for `layout`.
/// Returns `None` while the store has no root channel.
pub fn project(
    store: &EntityStore,
    layout: TreeLayout,
    local_user_id: Option<UserId>,
) -> Option<DisplayTree> {
    let mut visited = BTreeSet::new();
    let mut root = copy_subtree(store, ROOT_CHANNEL_ID, local_user_id, &mut visited)?;

    match layout {
        TreeLayout::Full => {}
        TreeLayout::PopulatedOnly => {
            prune_unpopulated(&mut root);
        }
        TreeLayout::CurrentChannel => match current_channel_path(store, local_user_id) {
            Some(path) => focus_path(&mut root, &path),
            None => debug!(
                event = "current_channel_unknown",
                local_user_id = ?local_user_id,
                "showing full tree"
            ),
        },
    }

    Some(DisplayTree { layout, root })
}

fn copy_subtree(
    store: &EntityStore,
    id: ChannelId,
    local_user_id: Option<UserId>,
    visited: &mut BTreeSet<ChannelId>,
) -> Option<DisplayChannel> {
    if !visited.insert(id) {
        return None;
    }
    let channel = store.channel(id)?;
    let users = channel
        .members
        .iter()
        .filter_map(|user_id| store.user(*user_id))
        .map(|user| DisplayUser {
            id: user.id,
            name: user.name.clone(),
            flags: user.flags,
            talking_state: user.talking_state,
            is_local: local_user_id == Some(user.id),
        })
        .collect();
    let subchannels = channel
        .children
        .iter()
        .filter_map(|child| copy_subtree(store, *child, local_user_id, visited))
        .collect();
    Some(DisplayChannel {
        id: channel.id,
        name: channel.name.clone(),
        users,
        subchannels,
    })
}

/// Drops every subtree without users and returns the remaining total.
fn prune_unpopulated(channel: &mut DisplayChannel) -> usize {
    let mut total = channel.users.len();
    channel.subchannels.retain_mut(|sub| {
        let count = prune_unpopulated(sub);
        total += count;
        count > 0
    });
    total
}

/// Root-first list of channel ids leading to the local user's channel.
/// `None` unless every hop is attached in the rebuilt hierarchy.
fn current_channel_path(
    store: &EntityStore,
    local_user_id: Option<UserId>,
) -> Option<Vec<ChannelId>> {
    let mut current = store.user(local_user_id?)?.channel_id?;
    let mut path = vec![current];
    let mut seen = BTreeSet::from([current]);
    while current != ROOT_CHANNEL_ID {
        let parent_id = store.channel(current)?.parent_id?;
        let parent = store.channel(parent_id)?;
        if !parent.children.contains(&current) || !seen.insert(parent_id) {
            return None;
        }
        path.push(parent_id);
        current = parent_id;
    }
    path.reverse();
    Some(path)
}

fn focus_path(root: &mut DisplayChannel, path: &[ChannelId]) {
    let mut node = root;
    for next in path.iter().skip(1) {
        node.users.clear();
        node.subchannels.retain(|sub| sub.id == *next);
        if node.subchannels.is_empty() {
            return;
        }
        node = &mut node.subchannels[0];
    }
    node.subchannels.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::rebuild;
    use mumble_core::{ChannelPayload, UserPayload};

    fn channel(
        id: ChannelId,
        name: &str,
        parent: Option<ChannelId>,
        users: &[(UserId, &str)],
    ) -> ChannelPayload {
        let mut payload = ChannelPayload::new(id, name, parent);
        payload.users = users
            .iter()
            .map(|(user_id, user_name)| UserPayload::new(*user_id, *user_name))
            .collect();
        payload
    }

    fn built(channels: Vec<ChannelPayload>) -> EntityStore {
        let mut store = EntityStore::from_snapshot(&channels).expect("store");
        rebuild(&mut store);
        store
    }

    fn shape(channel: &DisplayChannel) -> String {
        if channel.subchannels.is_empty() {
            return channel.name.clone();
        }
        let inner: Vec<String> = channel.subchannels.iter().map(shape).collect();
        format!("{}{{{}}}", channel.name, inner.join(","))
    }

    #[test]
    fn full_layout_copies_everything() {
        let store = built(vec![
            channel(0, "root", None, &[(1, "amy")]),
            channel(1, "A", Some(0), &[]),
            channel(2, "B", Some(1), &[(2, "ben")]),
        ]);
        let tree = project(&store, TreeLayout::Full, Some(1)).expect("tree");
        assert_eq!(shape(&tree.root), "root{A{B}}");
        assert_eq!(tree.total_users(), 2);
        assert!(tree.root.users[0].is_local);
        assert_eq!(tree.find(1).map(DisplayChannel::total_users), Some(1));
    }

    #[test]
    fn populated_only_keeps_ancestors_of_populated_channels() {
        let store = built(vec![
            channel(0, "root", None, &[]),
            channel(1, "A", Some(0), &[(1, "amy"), (2, "ben")]),
            channel(2, "B", Some(0), &[]),
            channel(3, "C", Some(2), &[(3, "cat")]),
            channel(4, "D", Some(0), &[]),
            channel(5, "E", Some(4), &[]),
        ]);
        let tree = project(&store, TreeLayout::PopulatedOnly, None).expect("tree");
        assert_eq!(shape(&tree.root), "root{A,B{C}}");
    }

    #[test]
    fn current_channel_keeps_only_the_path() {
        let store = built(vec![
            channel(0, "root", None, &[(1, "amy")]),
            channel(1, "X", Some(0), &[(2, "ben")]),
            channel(2, "Sibling", Some(0), &[(3, "cat")]),
            channel(3, "Y", Some(1), &[(9, "me")]),
            channel(4, "Y sibling", Some(1), &[]),
            channel(5, "Below Y", Some(3), &[]),
        ]);
        let tree = project(&store, TreeLayout::CurrentChannel, Some(9)).expect("tree");
        assert_eq!(shape(&tree.root), "root{X{Y}}");
        assert!(tree.root.users.is_empty());
        let x = tree.find(1).expect("x");
        assert!(x.users.is_empty());
        let y = tree.find(3).expect("y");
        assert_eq!(y.users.len(), 1);
        assert!(y.users[0].is_local);
    }

    #[test]
    fn current_channel_without_local_user_falls_back_to_full() {
        let store = built(vec![
            channel(0, "root", None, &[]),
            channel(1, "X", Some(0), &[]),
        ]);
        let tree = project(&store, TreeLayout::CurrentChannel, None).expect("tree");
        assert_eq!(shape(&tree.root), "root{X}");
        let tree = project(&store, TreeLayout::CurrentChannel, Some(404)).expect("tree");
        assert_eq!(shape(&tree.root), "root{X}");
    }

    #[test]
    fn local_user_in_root_sees_only_root() {
        let store = built(vec![
            channel(0, "root", None, &[(9, "me")]),
            channel(1, "X", Some(0), &[(2, "ben")]),
        ]);
        let tree = project(&store, TreeLayout::CurrentChannel, Some(9)).expect("tree");
        assert_eq!(shape(&tree.root), "root");
        assert_eq!(tree.root.users.len(), 1);
    }

    #[test]
    fn projection_leaves_store_untouched() {
        let store = built(vec![
            channel(0, "root", None, &[]),
            channel(1, "A", Some(0), &[]),
        ]);
        let before = store.clone();
        let _ = project(&store, TreeLayout::PopulatedOnly, None);
        let _ = project(&store, TreeLayout::CurrentChannel, None);
        assert_eq!(store, before);
    }
}
