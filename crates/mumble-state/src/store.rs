use mumble_core::{
    ChannelId, ChannelPayload, FlagDelta, TalkingState, UserFlags, UserId, UserPayload,
    ROOT_CHANNEL_ID,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// A channel in the canonical store. `children` and `members` are derived
/// indexes; `parent_id` is the only authoritative link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub parent_id: Option<ChannelId>,
    pub children: Vec<ChannelId>,
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// `None` means the user is not in any known channel.
    pub channel_id: Option<ChannelId>,
    pub flags: UserFlags,
    pub talking_state: TalkingState,
}

pub fn normalize_user(payload: &UserPayload, channel_id: Option<ChannelId>) -> User {
    User {
        id: payload.id,
        name: payload.name.clone(),
        channel_id,
        flags: payload.flags(),
        talking_state: TalkingState::Passive,
    }
}

pub fn normalize_channel(payload: &ChannelPayload) -> Channel {
    Channel {
        id: payload.id,
        name: payload.name.clone(),
        parent_id: payload.parent_id.filter(|_| payload.id != ROOT_CHANNEL_ID),
        children: Vec::new(),
        members: Vec::new(),
    }
}

pub fn apply_mute_deafen_delta(user: &mut User, incoming: &FlagDelta) -> bool {
    user.flags.apply(incoming)
}

/// Base-letter name order: case and accents are ignored. Ties fall back to
/// the raw name so the order is total.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    fold_name(a).cmp(&fold_name(b)).then_with(|| a.cmp(b))
}

fn fold_name(name: &str) -> String {
    name.nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect::<String>()
        .to_lowercase()
}

/// Canonical id-indexed store of channels and users. Every mutation keeps
/// `User::channel_id` and `Channel::members` in lockstep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityStore {
    pub(crate) channels: BTreeMap<ChannelId, Channel>,
    pub(crate) users: BTreeMap<UserId, User>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh store from a channel snapshot. Returns `None` when the
    /// snapshot has no root channel.
    pub fn from_snapshot(channels: &[ChannelPayload]) -> Option<Self> {
        let mut store = Self::new();
        for payload in channels {
            store.channels.insert(payload.id, normalize_channel(payload));
        }
        if !store.channels.contains_key(&ROOT_CHANNEL_ID) {
            return None;
        }
        for payload in channels {
            for user in &payload.users {
                store.insert_user(normalize_user(user, None));
                store.move_user(user.id, Some(payload.id));
            }
        }
        Some(store)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn root(&self) -> Option<&Channel> {
        self.channels.get(&ROOT_CHANNEL_ID)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Insert a channel or, if the id is known, refresh its name and parent.
    /// Returns whether a new channel was created.
    pub fn upsert_channel(&mut self, payload: &ChannelPayload) -> bool {
        match self.channels.get_mut(&payload.id) {
            Some(existing) => {
                let fresh = normalize_channel(payload);
                existing.name = fresh.name;
                existing.parent_id = fresh.parent_id;
                false
            }
            None => {
                self.channels.insert(payload.id, normalize_channel(payload));
                true
            }
        }
    }

    pub fn rename_channel(&mut self, id: ChannelId, name: &str) -> bool {
        match self.channels.get_mut(&id) {
            Some(channel) => {
                channel.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove a channel and all of its descendants. Former members become
    /// channel-less. Returns the removed ids, empty if `id` was unknown.
    pub fn remove_channel_cascade(&mut self, id: ChannelId) -> Vec<ChannelId> {
        if !self.channels.contains_key(&id) {
            return Vec::new();
        }

        let mut children_of: BTreeMap<ChannelId, Vec<ChannelId>> = BTreeMap::new();
        for channel in self.channels.values() {
            if let Some(parent_id) = channel.parent_id {
                children_of.entry(parent_id).or_default().push(channel.id);
            }
        }

        let mut doomed = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            if !doomed.insert(next) {
                continue;
            }
            if let Some(children) = children_of.get(&next) {
                queue.extend(children.iter().copied());
            }
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for channel_id in doomed {
            if let Some(channel) = self.channels.remove(&channel_id) {
                for user_id in channel.members {
                    if let Some(user) = self.users.get_mut(&user_id) {
                        user.channel_id = None;
                    }
                }
                removed.push(channel_id);
            }
        }
        removed
    }

    /// Insert a user record, replacing any previous record with the same id.
    /// The user is placed according to its `channel_id` if that channel is
    /// known, otherwise it is stored channel-less.
    pub fn insert_user(&mut self, mut user: User) {
        self.detach_user(user.id);
        let target = user.channel_id.filter(|id| self.channels.contains_key(id));
        user.channel_id = target;
        if let Some(channel_id) = target {
            if let Some(channel) = self.channels.get_mut(&channel_id) {
                channel.members.push(user.id);
            }
        }
        self.users.insert(user.id, user);
    }

    /// Returns whether the user had to be created from the payload.
    pub fn ensure_user(&mut self, payload: &UserPayload) -> bool {
        if self.users.contains_key(&payload.id) {
            return false;
        }
        self.insert_user(normalize_user(payload, None));
        true
    }

    pub fn remove_user(&mut self, id: UserId) -> Option<User> {
        self.detach_user(id);
        self.users.remove(&id)
    }

    /// Move a user to `to` (or out of every channel with `None`). An unknown
    /// target leaves the user channel-less. Returns whether the placement
    /// changed; unknown users are ignored.
    pub fn move_user(&mut self, id: UserId, to: Option<ChannelId>) -> bool {
        let target = to.filter(|channel_id| self.channels.contains_key(channel_id));
        let Some(current) = self.users.get(&id).map(|user| user.channel_id) else {
            return false;
        };
        if current == target {
            return false;
        }
        self.detach_user(id);
        if let Some(channel_id) = target {
            if let Some(channel) = self.channels.get_mut(&channel_id) {
                channel.members.push(id);
            }
        }
        if let Some(user) = self.users.get_mut(&id) {
            user.channel_id = target;
        }
        true
    }

    /// `None` if the user is unknown, otherwise whether any flag changed.
    pub fn apply_flag_delta(&mut self, id: UserId, delta: &FlagDelta) -> Option<bool> {
        self.users
            .get_mut(&id)
            .map(|user| apply_mute_deafen_delta(user, delta))
    }

    /// `None` if the user is unknown, otherwise whether the state changed.
    pub fn set_talking_state(&mut self, id: UserId, state: TalkingState) -> Option<bool> {
        self.users.get_mut(&id).map(|user| {
            if user.talking_state == state {
                false
            } else {
                user.talking_state = state;
                true
            }
        })
    }

    /// Checks that every channel's member list is exactly the set of users
    /// whose `channel_id` points at it.
    pub fn membership_consistent(&self) -> bool {
        let mut expected: BTreeMap<ChannelId, BTreeSet<UserId>> = BTreeMap::new();
        for user in self.users.values() {
            if let Some(channel_id) = user.channel_id {
                if !self.channels.contains_key(&channel_id) {
                    return false;
                }
                expected.entry(channel_id).or_default().insert(user.id);
            }
        }
        self.channels.values().all(|channel| {
            let members: BTreeSet<UserId> = channel.members.iter().copied().collect();
            members.len() == channel.members.len()
                && members == expected.remove(&channel.id).unwrap_or_default()
        })
    }

    fn detach_user(&mut self, id: UserId) {
        let Some(previous) = self.users.get(&id).and_then(|user| user.channel_id) else {
            return;
        };
        if let Some(channel) = self.channels.get_mut(&previous) {
            channel.members.retain(|member| *member != id);
        }
        if let Some(user) = self.users.get_mut(&id) {
            user.channel_id = None;
        }
    }
}
