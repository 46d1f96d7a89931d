use crate::{ChannelId, ChannelPayload, FlagDelta, TalkingState, UserId, UserPayload};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel snapshots of large servers are the biggest frames we expect.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Every message the event source can send, keyed by its `type` field.
/// Types this client does not know decode to `Unknown` and are dropped
/// by the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMsg {
    #[serde(rename = "response/channels")]
    Channels {
        #[serde(default)]
        channels: Vec<ChannelPayload>,
    },
    #[serde(rename = "response/is_connected")]
    IsConnected {
        #[serde(default)]
        connected: bool,
    },
    #[serde(rename = "response/local_user_id")]
    LocalUserId(LocalUserIdPayload),
    #[serde(rename = "response/local_user_state")]
    LocalUserState {
        #[serde(default)]
        muted: bool,
        #[serde(default)]
        deafened: bool,
    },
    #[serde(rename = "response/user_mute_deafen_state")]
    UserMuteDeafenState(UserMuteDeafenStatePayload),
    #[serde(rename = "response/set_muted")]
    SetMutedAck,
    #[serde(rename = "response/set_deafened")]
    SetDeafenedAck,
    #[serde(rename = "event/connected")]
    Connected,
    #[serde(rename = "event/disconnected")]
    Disconnected,
    #[serde(rename = "event/channel_entered")]
    ChannelEntered(ChannelEnteredPayload),
    #[serde(rename = "event/channel_exited")]
    ChannelExited(UserEventPayload),
    #[serde(rename = "event/user_added")]
    UserAdded(UserEventPayload),
    #[serde(rename = "event/user_removed")]
    UserRemoved(UserRemovedPayload),
    #[serde(rename = "event/channel_added")]
    ChannelAdded(ChannelEventPayload),
    #[serde(rename = "event/channel_removed")]
    ChannelRemoved(ChannelRemovedPayload),
    #[serde(rename = "event/channel_renamed")]
    ChannelRenamed(ChannelEventPayload),
    #[serde(rename = "event/user_mute_deafen_state_changed")]
    UserMuteDeafenStateChanged(MuteDeafenChangedPayload),
    #[serde(rename = "event/user_talking_state_changed")]
    UserTalkingStateChanged(TalkingStateChangedPayload),
    #[serde(other)]
    Unknown,
}

impl InboundMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMsg::Channels { .. } => "response/channels",
            InboundMsg::IsConnected { .. } => "response/is_connected",
            InboundMsg::LocalUserId(_) => "response/local_user_id",
            InboundMsg::LocalUserState { .. } => "response/local_user_state",
            InboundMsg::UserMuteDeafenState(_) => "response/user_mute_deafen_state",
            InboundMsg::SetMutedAck => "response/set_muted",
            InboundMsg::SetDeafenedAck => "response/set_deafened",
            InboundMsg::Connected => "event/connected",
            InboundMsg::Disconnected => "event/disconnected",
            InboundMsg::ChannelEntered(_) => "event/channel_entered",
            InboundMsg::ChannelExited(_) => "event/channel_exited",
            InboundMsg::UserAdded(_) => "event/user_added",
            InboundMsg::UserRemoved(_) => "event/user_removed",
            InboundMsg::ChannelAdded(_) => "event/channel_added",
            InboundMsg::ChannelRemoved(_) => "event/channel_removed",
            InboundMsg::ChannelRenamed(_) => "event/channel_renamed",
            InboundMsg::UserMuteDeafenStateChanged(_) => "event/user_mute_deafen_state_changed",
            InboundMsg::UserTalkingStateChanged(_) => "event/user_talking_state_changed",
            InboundMsg::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalUserIdPayload {
    #[serde(deserialize_with = "crate::deserialize_id")]
    pub id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserMuteDeafenStatePayload {
    #[serde(deserialize_with = "crate::deserialize_id")]
    pub id: UserId,
    #[serde(flatten)]
    pub flags: FlagDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelEnteredPayload {
    pub user: UserPayload,
    #[serde(default, rename = "toChannel")]
    pub to_channel: Option<ChannelPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserEventPayload {
    pub user: UserPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserRemovedPayload {
    #[serde(deserialize_with = "crate::deserialize_id")]
    pub id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelEventPayload {
    pub channel: ChannelPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelRemovedPayload {
    #[serde(deserialize_with = "crate::deserialize_id")]
    pub id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MuteDeafenChangedPayload {
    pub user: UserPayload,
    #[serde(flatten)]
    pub flags: FlagDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TalkingStateChangedPayload {
    pub user: UserPayload,
    #[serde(rename = "talkingState")]
    pub talking_state: TalkingState,
}

/// Requests sent back to the event source. All of them are fire-and-forget;
/// the resulting state arrives later as a response or event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundRequest {
    #[serde(rename = "request/is_connected")]
    IsConnected,
    #[serde(rename = "request/local_user_id")]
    LocalUserId,
    #[serde(rename = "request/local_user_state")]
    LocalUserState,
    #[serde(rename = "request/channels")]
    Channels,
    #[serde(rename = "request/change_channel")]
    ChangeChannel {
        #[serde(rename = "channelId")]
        channel_id: ChannelId,
    },
    #[serde(rename = "request/set_local_mute")]
    SetLocalMute { id: UserId, enable: bool },
    #[serde(rename = "request/set_muted")]
    SetMuted { muted: bool },
    #[serde(rename = "request/set_deafened")]
    SetDeafened { deafened: bool },
}

impl OutboundRequest {
    /// The request batch that (re)establishes a full view of the session.
    pub fn snapshot_batch() -> [OutboundRequest; 4] {
        [
            OutboundRequest::IsConnected,
            OutboundRequest::LocalUserId,
            OutboundRequest::LocalUserState,
            OutboundRequest::Channels,
        ]
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundRequest::IsConnected => "request/is_connected",
            OutboundRequest::LocalUserId => "request/local_user_id",
            OutboundRequest::LocalUserState => "request/local_user_state",
            OutboundRequest::Channels => "request/channels",
            OutboundRequest::ChangeChannel { .. } => "request/change_channel",
            OutboundRequest::SetLocalMute { .. } => "request/set_local_mute",
            OutboundRequest::SetMuted { .. } => "request/set_muted",
            OutboundRequest::SetDeafened { .. } => "request/set_deafened",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_request(
    request: &OutboundRequest,
    max_frame_bytes: usize,
) -> Result<String, ProtocolError> {
    let encoded =
        serde_json::to_string(request).map_err(|err| ProtocolError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(ProtocolError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_message(text: &str, max_frame_bytes: usize) -> Result<InboundMsg, ProtocolError> {
    let raw = text.trim_end_matches(['\r', '\n']);
    if raw.len() > max_frame_bytes {
        return Err(ProtocolError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| ProtocolError::Decode(err.to_string()))
}
