use crate::transport::{TransportEvent, TransportHandle};
use crossterm::event::{KeyCode, KeyEvent};
use mumble_core::{ChannelId, UserId};
use mumble_prefs::PreferenceStore;
use mumble_state::{DisplayChannel, DisplayUser, RequestSink, SessionController, SessionPhase};
use tracing::info;

pub type Controller<S = TransportHandle> = SessionController<S, Box<dyn PreferenceStore>>;

/// One line of the rendered tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeRow {
    Channel {
        id: ChannelId,
        depth: usize,
        name: String,
        user_count: usize,
        collapsed: bool,
        expandable: bool,
    },
    User {
        depth: usize,
        channel_id: ChannelId,
        user: DisplayUser,
    },
}

impl TreeRow {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            TreeRow::Channel { id, .. } => *id,
            TreeRow::User { channel_id, .. } => *channel_id,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            TreeRow::Channel { .. } => None,
            TreeRow::User { user, .. } => Some(user.id),
        }
    }
}

pub struct App<S = TransportHandle> {
    pub controller: Controller<S>,
    pub selected: usize,
    pub help_open: bool,
    pub status_note: Option<String>,
    pub endpoint: String,
}

impl<S: RequestSink> App<S> {
    pub fn new(controller: Controller<S>, endpoint: String) -> Self {
        Self {
            controller,
            selected: 0,
            help_open: false,
            status_note: None,
            endpoint,
        }
    }

    pub fn apply_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                info!(event = "transport_opened", endpoint = %self.endpoint);
                self.status_note = None;
                self.controller.transport_opened();
            }
            TransportEvent::Closed => {
                info!(event = "transport_closed", endpoint = %self.endpoint);
                self.controller.transport_closed();
            }
            TransportEvent::Error(message) => {
                self.status_note = Some(message);
            }
            TransportEvent::Message(text) => self.controller.handle_text(&text),
        }
        self.clamp_selection();
    }

    /// The tree is only shown while the session is synced. Otherwise the
    /// status line takes its place.
    pub fn tree_visible(&self) -> bool {
        self.controller.phase() == SessionPhase::SessionSynced
    }

    /// Flatten the published view into display rows, hiding the contents
    /// of collapsed channels.
    pub fn rows(&self) -> Vec<TreeRow> {
        let mut rows = Vec::new();
        if !self.tree_visible() {
            return rows;
        }
        if let Some(view) = self.controller.view() {
            self.push_channel_rows(&view.root, 0, &mut rows);
        }
        rows
    }

    fn push_channel_rows(&self, channel: &DisplayChannel, depth: usize, rows: &mut Vec<TreeRow>) {
        let collapsed = self.controller.is_collapsed(channel.id);
        rows.push(TreeRow::Channel {
            id: channel.id,
            depth,
            name: channel.name.clone(),
            user_count: channel.users.len(),
            collapsed,
            expandable: !channel.users.is_empty() || !channel.subchannels.is_empty(),
        });
        if collapsed {
            return;
        }
        for user in &channel.users {
            rows.push(TreeRow::User {
                depth: depth + 1,
                channel_id: channel.id,
                user: user.clone(),
            });
        }
        for sub in &channel.subchannels {
            self.push_channel_rows(sub, depth + 1, rows);
        }
    }

    pub fn selected_row(&self) -> Option<TreeRow> {
        self.rows().into_iter().nth(self.selected)
    }

    fn clamp_selection(&mut self) {
        let count = self.rows().len();
        self.selected = self.selected.min(count.saturating_sub(1));
    }

    fn move_selection(&mut self, delta: isize) {
        let count = self.rows().len();
        if count == 0 {
            self.selected = 0;
            return;
        }
        let next = self.selected as isize + delta;
        self.selected = next.clamp(0, count as isize - 1) as usize;
    }

    /// Returns true when the app should exit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if matches!(key.code, KeyCode::Char('?') | KeyCode::F(1)) {
            self.help_open = !self.help_open;
            return false;
        }
        if self.help_open {
            if key.code == KeyCode::Esc {
                self.help_open = false;
            }
            return false;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Home | KeyCode::Char('g') => self.selected = 0,
            KeyCode::End | KeyCode::Char('G') => self.move_selection(isize::MAX / 2),
            KeyCode::Char('m') => self.controller.toggle_muted(),
            KeyCode::Char('d') => self.controller.toggle_deafened(),
            KeyCode::Char('l') | KeyCode::Tab => self.controller.cycle_layout(),
            KeyCode::Char(' ') | KeyCode::Char('c') => {
                if let Some(TreeRow::Channel { id, .. }) = self.selected_row() {
                    self.controller.toggle_collapsed(id);
                }
            }
            KeyCode::Enter => {
                if let Some(row) = self.selected_row() {
                    self.controller.change_channel(row.channel_id());
                }
            }
            KeyCode::Char('x') => {
                if let Some(user) = self.selected_row().and_then(|row| row.user_id()) {
                    if Some(user) != self.controller.local_user_id() {
                        self.controller.toggle_local_mute(user);
                    }
                }
            }
            _ => return false,
        }
        self.clamp_selection();
        false
    }
}
