use crate::hierarchy::{rebuild, HierarchyReport};
use crate::projection::{project, DisplayTree};
use crate::router::route_frame;
use crate::store::EntityStore;
use mumble_core::protocol::{InboundMsg, OutboundRequest, DEFAULT_MAX_FRAME_BYTES};
use mumble_core::{ChannelId, TreeLayout, UserId};
use mumble_prefs::PreferenceStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where outbound requests go. Sending must never block or fail loudly;
/// a sink with no live connection drops the request.
pub trait RequestSink {
    fn send_request(&mut self, request: &OutboundRequest);
}

impl RequestSink for Vec<OutboundRequest> {
    fn send_request(&mut self, request: &OutboundRequest) {
        self.push(request.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    TransportUp,
    TransportUpNoSession,
    SessionSynced,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Disconnected => "disconnected",
            SessionPhase::TransportUp => "transport_up",
            SessionPhase::TransportUpNoSession => "transport_up_no_session",
            SessionPhase::SessionSynced => "session_synced",
        }
    }

    /// Banner shown above the tree, if the phase warrants one.
    pub fn status_line(self) -> Option<&'static str> {
        match self {
            SessionPhase::Disconnected => Some("transport disconnected"),
            SessionPhase::TransportUpNoSession => Some("voice session disconnected"),
            SessionPhase::TransportUp => Some("synchronizing"),
            SessionPhase::SessionSynced => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalUserState {
    pub muted: bool,
    pub deafened: bool,
}

/// Sole owner and writer of the entity store. Every inbound message and
/// user command passes through here, one at a time; readers only ever see
/// the published [`DisplayTree`].
pub struct SessionController<S, P> {
    sink: S,
    prefs: P,
    store: EntityStore,
    transport_up: bool,
    session_connected: Option<bool>,
    synced: bool,
    phase: SessionPhase,
    local_user_id: Option<UserId>,
    local_state: LocalUserState,
    layout: TreeLayout,
    view: Option<Arc<DisplayTree>>,
    revision: u64,
    report: HierarchyReport,
    max_frame_bytes: usize,
}

impl<S: RequestSink, P: PreferenceStore> SessionController<S, P> {
    pub fn new(sink: S, prefs: P) -> Self {
        let layout = prefs.tree_layout();
        Self {
            sink,
            prefs,
            store: EntityStore::new(),
            transport_up: false,
            session_connected: None,
            synced: false,
            phase: SessionPhase::Disconnected,
            local_user_id: None,
            local_state: LocalUserState::default(),
            layout,
            view: None,
            revision: 0,
            report: HierarchyReport::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn view(&self) -> Option<Arc<DisplayTree>> {
        self.view.clone()
    }

    /// Bumped every time a new view is published.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn layout(&self) -> TreeLayout {
        self.layout
    }

    pub fn local_user_id(&self) -> Option<UserId> {
        self.local_user_id
    }

    pub fn local_state(&self) -> LocalUserState {
        self.local_state
    }

    pub fn hierarchy_report(&self) -> &HierarchyReport {
        &self.report
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn prefs(&self) -> &P {
        &self.prefs
    }

    pub fn transport_opened(&mut self) {
        self.transport_up = true;
        self.session_connected = None;
        self.synced = false;
        self.refresh_phase();
        self.request_snapshot();
    }

    /// The store is kept for display but nothing is applied to it until
    /// the next snapshot replaces it.
    pub fn transport_closed(&mut self) {
        self.transport_up = false;
        self.session_connected = None;
        self.synced = false;
        self.refresh_phase();
    }

    pub fn handle_text(&mut self, text: &str) {
        if let Some(msg) = route_frame(text, self.max_frame_bytes) {
            self.handle_message(msg);
        }
    }

    pub fn handle_message(&mut self, msg: InboundMsg) {
        if !self.transport_up {
            debug!(event = "message_while_disconnected", kind = msg.kind());
            return;
        }
        match msg {
            InboundMsg::Channels { channels } => {
                let Some(mut store) = EntityStore::from_snapshot(&channels) else {
                    warn!(
                        event = "snapshot_missing_root",
                        channels = channels.len(),
                        "keeping previous store"
                    );
                    return;
                };
                self.report = rebuild(&mut store);
                self.store = store;
                self.synced = true;
                info!(
                    event = "snapshot_applied",
                    channels = self.store.channel_count(),
                    users = self.store.user_count()
                );
                self.refresh_phase();
                self.publish();
            }
            InboundMsg::IsConnected { connected } => {
                self.session_connected = Some(connected);
                if !connected {
                    self.synced = false;
                }
                self.refresh_phase();
            }
            InboundMsg::LocalUserId(payload) => {
                self.local_user_id = Some(payload.id);
                self.publish();
            }
            InboundMsg::LocalUserState { muted, deafened } => {
                self.local_state = LocalUserState { muted, deafened };
            }
            InboundMsg::SetMutedAck | InboundMsg::SetDeafenedAck => {
                self.sink.send_request(&OutboundRequest::LocalUserState);
            }
            InboundMsg::Connected => {
                self.session_connected = Some(true);
                self.refresh_phase();
                self.request_snapshot();
            }
            InboundMsg::Disconnected => {
                self.session_connected = Some(false);
                self.synced = false;
                self.refresh_phase();
            }
            InboundMsg::Unknown => {}
            incremental => self.apply_incremental(incremental),
        }
    }

    fn apply_incremental(&mut self, msg: InboundMsg) {
        if !self.synced {
            debug!(event = "event_before_sync", kind = msg.kind());
            return;
        }
        let changed = match msg {
            InboundMsg::ChannelEntered(payload) => {
                let created = self.store.ensure_user(&payload.user);
                let target = payload.to_channel.map(|channel| {
                    if self.store.channel(channel.id).is_none() {
                        debug!(event = "channel_synthesized", channel_id = channel.id);
                        self.store.upsert_channel(&channel);
                    }
                    channel.id
                });
                self.store.move_user(payload.user.id, target) || created
            }
            InboundMsg::ChannelExited(payload) => {
                let created = self.store.ensure_user(&payload.user);
                self.store.move_user(payload.user.id, None) || created
            }
            InboundMsg::UserAdded(payload) => self.store.ensure_user(&payload.user),
            InboundMsg::UserRemoved(payload) => {
                let removed = self.store.remove_user(payload.id).is_some();
                if !removed {
                    debug!(event = "user_remove_unknown", user_id = payload.id);
                }
                removed
            }
            InboundMsg::ChannelAdded(payload) => {
                self.store.upsert_channel(&payload.channel);
                true
            }
            InboundMsg::ChannelRemoved(payload) => {
                let removed = self.store.remove_channel_cascade(payload.id);
                if removed.is_empty() {
                    debug!(event = "channel_remove_unknown", channel_id = payload.id);
                }
                !removed.is_empty()
            }
            InboundMsg::ChannelRenamed(payload) => {
                let renamed = self
                    .store
                    .rename_channel(payload.channel.id, &payload.channel.name);
                if !renamed {
                    debug!(event = "channel_rename_unknown", channel_id = payload.channel.id);
                }
                renamed
            }
            InboundMsg::UserMuteDeafenState(payload) => {
                match self.store.apply_flag_delta(payload.id, &payload.flags) {
                    Some(changed) => changed,
                    None => {
                        debug!(event = "flags_for_unknown_user", user_id = payload.id);
                        false
                    }
                }
            }
            InboundMsg::UserMuteDeafenStateChanged(payload) => {
                let created = self.store.ensure_user(&payload.user);
                let changed = self
                    .store
                    .apply_flag_delta(payload.user.id, &payload.flags)
                    .unwrap_or(false);
                changed || created
            }
            InboundMsg::UserTalkingStateChanged(payload) => {
                let created = self.store.ensure_user(&payload.user);
                let changed = self
                    .store
                    .set_talking_state(payload.user.id, payload.talking_state)
                    .unwrap_or(false);
                changed || created
            }
            other => {
                debug!(event = "message_ignored", kind = other.kind());
                false
            }
        };
        if changed {
            self.report = rebuild(&mut self.store);
            self.publish();
        }
    }

    pub fn toggle_muted(&mut self) {
        let muted = !self.local_state.muted;
        self.sink.send_request(&OutboundRequest::SetMuted { muted });
    }

    pub fn toggle_deafened(&mut self) {
        let deafened = !self.local_state.deafened;
        self.sink
            .send_request(&OutboundRequest::SetDeafened { deafened });
    }

    /// Flip the local-only mute of another user. Unknown users are ignored.
    pub fn toggle_local_mute(&mut self, user_id: UserId) {
        let Some(user) = self.store.user(user_id) else {
            debug!(event = "local_mute_unknown_user", user_id);
            return;
        };
        let enable = !user.flags.locally_muted;
        self.sink
            .send_request(&OutboundRequest::SetLocalMute { id: user_id, enable });
    }

    pub fn change_channel(&mut self, channel_id: ChannelId) {
        self.sink
            .send_request(&OutboundRequest::ChangeChannel { channel_id });
    }

    pub fn set_layout(&mut self, layout: TreeLayout) {
        if let Err(err) = self.prefs.set_tree_layout(layout) {
            warn!("prefs_save_error: {err}");
        }
        if self.layout != layout {
            info!(event = "layout_changed", layout = layout.as_str());
            self.layout = layout;
            self.publish();
        }
    }

    pub fn cycle_layout(&mut self) {
        self.set_layout(self.layout.next());
    }

    pub fn is_collapsed(&self, channel_id: ChannelId) -> bool {
        self.prefs.channel_collapsed(channel_id)
    }

    /// Collapse state is presentation only and never changes the projection.
    pub fn toggle_collapsed(&mut self, channel_id: ChannelId) -> bool {
        let collapsed = !self.prefs.channel_collapsed(channel_id);
        if let Err(err) = self.prefs.set_channel_collapsed(channel_id, collapsed) {
            warn!("prefs_save_error: {err}");
        }
        collapsed
    }

    fn request_snapshot(&mut self) {
        for request in OutboundRequest::snapshot_batch() {
            self.sink.send_request(&request);
        }
    }

    fn publish(&mut self) {
        self.view = project(&self.store, self.layout, self.local_user_id).map(Arc::new);
        self.revision += 1;
    }

    fn refresh_phase(&mut self) {
        let next = if !self.transport_up {
            SessionPhase::Disconnected
        } else if self.session_connected == Some(false) {
            SessionPhase::TransportUpNoSession
        } else if self.synced {
            SessionPhase::SessionSynced
        } else {
            SessionPhase::TransportUp
        };
        if next != self.phase {
            info!(
                event = "session_phase",
                from = self.phase.as_str(),
                to = next.as_str()
            );
            self.phase = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mumble_prefs::MemoryPreferences;

    type Controller = SessionController<Vec<OutboundRequest>, MemoryPreferences>;

    fn synced() -> Controller {
        let mut controller = SessionController::new(Vec::new(), MemoryPreferences::new());
        controller.transport_opened();
        controller.handle_text(
            r#"{"type": "response/channels", "channels": [
                {"id": 0, "name": "Root", "parentId": -1, "users": [{"id": 1, "name": "me"}]},
                {"id": 1, "name": "Lobby", "parentId": 0}
            ]}"#,
        );
        controller.handle_text(r#"{"type": "response/local_user_id", "id": 1}"#);
        controller.handle_text(r#"{"type": "response/local_user_state", "muted": true, "deafened": false}"#);
        controller.sink_mut().clear();
        controller
    }

    #[test]
    fn transport_open_requests_snapshot() {
        let mut controller: Controller =
            SessionController::new(Vec::new(), MemoryPreferences::new());
        assert_eq!(controller.phase(), SessionPhase::Disconnected);
        controller.transport_opened();
        assert_eq!(controller.phase(), SessionPhase::TransportUp);
        assert_eq!(controller.sink().as_slice(), OutboundRequest::snapshot_batch());
    }

    #[test]
    fn phases_follow_transport_and_session() {
        let mut controller = synced();
        assert_eq!(controller.phase(), SessionPhase::SessionSynced);
        controller.handle_text(r#"{"type": "event/disconnected"}"#);
        assert_eq!(controller.phase(), SessionPhase::TransportUpNoSession);
        controller.handle_text(r#"{"type": "event/connected"}"#);
        assert_eq!(controller.phase(), SessionPhase::TransportUp);
        assert_eq!(controller.sink().len(), 4);
        controller.transport_closed();
        assert_eq!(controller.phase(), SessionPhase::Disconnected);
        assert!(controller.view().is_some());
    }

    #[test]
    fn commands_are_sent_without_optimistic_state() {
        let mut controller = synced();
        controller.toggle_muted();
        controller.toggle_deafened();
        controller.toggle_local_mute(1);
        controller.toggle_local_mute(55);
        controller.change_channel(1);
        assert_eq!(
            controller.sink().as_slice(),
            [
                OutboundRequest::SetMuted { muted: false },
                OutboundRequest::SetDeafened { deafened: true },
                OutboundRequest::SetLocalMute { id: 1, enable: true },
                OutboundRequest::ChangeChannel { channel_id: 1 },
            ]
        );
        assert!(controller.local_state().muted);
        assert_eq!(controller.store().user(1).and_then(|u| u.channel_id), Some(0));

        controller.sink_mut().clear();
        controller.handle_text(r#"{"type": "response/set_muted"}"#);
        assert_eq!(controller.sink().as_slice(), [OutboundRequest::LocalUserState]);
    }

    #[test]
    fn events_before_snapshot_are_ignored() {
        let mut controller: Controller =
            SessionController::new(Vec::new(), MemoryPreferences::new());
        controller.transport_opened();
        controller.handle_text(r#"{"type": "event/user_added", "user": {"id": 3, "name": "x"}}"#);
        assert_eq!(controller.store().user_count(), 0);
        assert_eq!(controller.revision(), 0);
    }

    #[test]
    fn snapshot_without_root_keeps_previous_store() {
        let mut controller = synced();
        controller.handle_text(
            r#"{"type": "response/channels", "channels": [{"id": 5, "name": "Orphan", "parentId": 0}]}"#,
        );
        assert_eq!(controller.store().channel_count(), 2);
    }

    #[test]
    fn layout_and_collapse_are_persisted() {
        let mut controller = synced();
        let before = controller.revision();
        controller.set_layout(TreeLayout::CurrentChannel);
        assert_eq!(controller.prefs().tree_layout(), TreeLayout::CurrentChannel);
        assert_eq!(controller.revision(), before + 1);
        assert_eq!(controller.view().map(|view| view.layout), Some(TreeLayout::CurrentChannel));

        assert!(!controller.is_collapsed(1));
        assert!(controller.toggle_collapsed(1));
        assert!(controller.is_collapsed(1));
        assert_eq!(controller.revision(), before + 1);

        controller.cycle_layout();
        assert_eq!(controller.layout(), TreeLayout::Full);
    }

    #[test]
    fn unchanged_flags_do_not_republish() {
        let mut controller = synced();
        let before = controller.revision();
        controller.handle_text(r#"{"type": "response/user_mute_deafen_state", "id": 1, "muted": false}"#);
        assert_eq!(controller.revision(), before);
        controller.handle_text(r#"{"type": "response/user_mute_deafen_state", "id": 1, "muted": true}"#);
        assert_eq!(controller.revision(), before + 1);
    }
}
