use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub mod protocol;

pub type ChannelId = u32;
pub type UserId = u32;

/// The root channel of every voice session.
pub const ROOT_CHANNEL_ID: ChannelId = 0;

/// Which part of the channel hierarchy the sidebar shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TreeLayout {
    #[default]
    Full,
    PopulatedOnly,
    CurrentChannel,
}

impl TreeLayout {
    pub const ALL: [TreeLayout; 3] = [
        TreeLayout::Full,
        TreeLayout::PopulatedOnly,
        TreeLayout::CurrentChannel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TreeLayout::Full => "FULL",
            TreeLayout::PopulatedOnly => "POPULATED_ONLY",
            TreeLayout::CurrentChannel => "CURRENT_CHANNEL",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TreeLayout::Full => "all channels",
            TreeLayout::PopulatedOnly => "populated channels",
            TreeLayout::CurrentChannel => "current channel",
        }
    }

    pub fn next(self) -> Self {
        match self {
            TreeLayout::Full => TreeLayout::PopulatedOnly,
            TreeLayout::PopulatedOnly => TreeLayout::CurrentChannel,
            TreeLayout::CurrentChannel => TreeLayout::Full,
        }
    }
}

impl fmt::Display for TreeLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TreeLayout {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_uppercase().replace('-', "_");
        match normalized.as_str() {
            "FULL" => Ok(TreeLayout::Full),
            "POPULATED_ONLY" | "POPULATED" => Ok(TreeLayout::PopulatedOnly),
            "CURRENT_CHANNEL" | "CURRENT" => Ok(TreeLayout::CurrentChannel),
            other => Err(format!("Unknown tree layout: {other}")),
        }
    }
}

/// Voice-activity status of a user as reported by the voice client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TalkingState {
    Invalid,
    #[default]
    Passive,
    Talking,
    Whispering,
    Shouting,
    TalkingMuted,
}

impl TalkingState {
    pub fn code(self) -> i8 {
        match self {
            TalkingState::Invalid => -1,
            TalkingState::Passive => 0,
            TalkingState::Talking => 1,
            TalkingState::Whispering => 2,
            TalkingState::Shouting => 3,
            TalkingState::TalkingMuted => 4,
        }
    }

    /// Codes outside the known range map to `Invalid`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => TalkingState::Passive,
            1 => TalkingState::Talking,
            2 => TalkingState::Whispering,
            3 => TalkingState::Shouting,
            4 => TalkingState::TalkingMuted,
            _ => TalkingState::Invalid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TalkingState::Invalid => "invalid",
            TalkingState::Passive => "passive",
            TalkingState::Talking => "talking",
            TalkingState::Whispering => "whispering",
            TalkingState::Shouting => "shouting",
            TalkingState::TalkingMuted => "talking_muted",
        }
    }

    pub fn is_speaking(self) -> bool {
        matches!(
            self,
            TalkingState::Talking | TalkingState::Whispering | TalkingState::Shouting
        )
    }
}

impl fmt::Display for TalkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TalkingState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        let normalized = normalized.trim_start_matches("mumble_ts_");
        match normalized {
            "invalid" => Ok(TalkingState::Invalid),
            "passive" => Ok(TalkingState::Passive),
            "talking" => Ok(TalkingState::Talking),
            "whispering" => Ok(TalkingState::Whispering),
            "shouting" => Ok(TalkingState::Shouting),
            "talking_muted" | "talking-muted" => Ok(TalkingState::TalkingMuted),
            other => Err(format!("Unknown talking state: {other}")),
        }
    }
}

impl Serialize for TalkingState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i8(self.code())
    }
}

impl<'de> Deserialize<'de> for TalkingState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TalkingStateVisitor;

        impl<'de> Visitor<'de> for TalkingStateVisitor {
            type Value = TalkingState;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a talking state as integer code or name")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(TalkingState::from_code(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(i64::try_from(value)
                    .map(TalkingState::from_code)
                    .unwrap_or(TalkingState::Invalid))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if let Ok(code) = value.trim().parse::<i64>() {
                    return Ok(TalkingState::from_code(code));
                }
                value.parse::<TalkingState>().map_err(E::custom)
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                self.visit_str(&value)
            }
        }

        deserializer.deserialize_any(TalkingStateVisitor)
    }
}

/// Mute, deafen and related status flags of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UserFlags {
    pub muted: bool,
    pub deafened: bool,
    pub suppressed: bool,
    pub self_muted: bool,
    pub self_deafened: bool,
    pub locally_muted: bool,
    pub locally_ignored: bool,
    pub priority_speaker: bool,
    pub recording: bool,
}

impl UserFlags {
    /// Compare-and-set every flag present in `delta`. Returns whether any
    /// stored flag changed.
    pub fn apply(&mut self, delta: &FlagDelta) -> bool {
        fn update(slot: &mut bool, incoming: Option<bool>) -> bool {
            match incoming {
                Some(value) if *slot != value => {
                    *slot = value;
                    true
                }
                _ => false,
            }
        }

        let mut dirty = false;
        dirty |= update(&mut self.muted, delta.muted);
        dirty |= update(&mut self.deafened, delta.deafened);
        dirty |= update(&mut self.suppressed, delta.suppressed);
        dirty |= update(&mut self.self_muted, delta.self_muted);
        dirty |= update(&mut self.self_deafened, delta.self_deafened);
        dirty |= update(&mut self.locally_muted, delta.locally_muted);
        dirty |= update(&mut self.locally_ignored, delta.locally_ignored);
        dirty |= update(&mut self.priority_speaker, delta.priority_speaker);
        dirty |= update(&mut self.recording, delta.recording);
        dirty
    }
}

/// Partial flag update. Absent fields leave the stored flag untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlagDelta {
    #[serde(deserialize_with = "deserialize_flag_delta")]
    pub muted: Option<bool>,
    #[serde(deserialize_with = "deserialize_flag_delta")]
    pub deafened: Option<bool>,
    #[serde(deserialize_with = "deserialize_flag_delta")]
    pub suppressed: Option<bool>,
    #[serde(deserialize_with = "deserialize_flag_delta")]
    pub self_muted: Option<bool>,
    #[serde(deserialize_with = "deserialize_flag_delta")]
    pub self_deafened: Option<bool>,
    #[serde(deserialize_with = "deserialize_flag_delta")]
    pub locally_muted: Option<bool>,
    #[serde(deserialize_with = "deserialize_flag_delta")]
    pub locally_ignored: Option<bool>,
    #[serde(deserialize_with = "deserialize_flag_delta")]
    pub priority_speaker: Option<bool>,
    #[serde(deserialize_with = "deserialize_flag_delta")]
    pub recording: Option<bool>,
}

/// A user record as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub muted: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub deafened: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub suppressed: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub self_muted: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub self_deafened: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub locally_muted: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub locally_ignored: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub priority_speaker: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub recording: bool,
}

impl UserPayload {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            muted: false,
            deafened: false,
            suppressed: false,
            self_muted: false,
            self_deafened: false,
            locally_muted: false,
            locally_ignored: false,
            priority_speaker: false,
            recording: false,
        }
    }

    pub fn flags(&self) -> UserFlags {
        UserFlags {
            muted: self.muted,
            deafened: self.deafened,
            suppressed: self.suppressed,
            self_muted: self.self_muted,
            self_deafened: self.self_deafened,
            locally_muted: self.locally_muted,
            locally_ignored: self.locally_ignored,
            priority_speaker: self.priority_speaker,
            recording: self.recording,
        }
    }
}

/// A channel record as it appears on the wire. `users` is only populated
/// in channel snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPayload {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: ChannelId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_parent_id")]
    pub parent_id: Option<ChannelId>,
    #[serde(default)]
    pub users: Vec<UserPayload>,
}

impl ChannelPayload {
    pub fn new(id: ChannelId, name: impl Into<String>, parent_id: Option<ChannelId>) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id,
            users: Vec::new(),
        }
    }
}

/// Deserialize an ID that can be either a string or a number into a u32
fn deserialize_id<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => s.trim().parse::<u32>().map_err(de::Error::custom),
        Value::Number(n) => n
            .as_u64()
            .and_then(|u| u32::try_from(u).ok())
            .ok_or_else(|| de::Error::custom("invalid u32")),
        _ => Err(de::Error::custom("expected string or number for id")),
    }
}

/// Parent ids arrive as numbers, numeric strings, null, or -1 for the root.
/// Anything that is not a non-negative integer means "no parent".
fn deserialize_parent_id<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    let parsed = match val {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    Ok(parsed.and_then(|id| u32::try_from(id).ok()))
}

/// Status flags are coerced to strict booleans: null and missing are false,
/// numbers and strings follow their usual truthiness.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(flag_truthiness(&val))
}

/// Like `deserialize_flag`, but an explicit null counts as absent so a
/// delta never clears a flag it does not mention.
fn deserialize_flag_delta<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(match val {
        Value::Null => None,
        other => Some(flag_truthiness(&other)),
    })
}

fn flag_truthiness(val: &Value) -> bool {
    match val {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn talking_state_accepts_codes_and_names() {
        let parsed: Vec<TalkingState> =
            serde_json::from_str(r#"[0, 1, 2, 3, 4, -1, 9, "talking", "MUMBLE_TS_SHOUTING", "2"]"#)
                .expect("parse talking states");
        assert_eq!(
            parsed,
            vec![
                TalkingState::Passive,
                TalkingState::Talking,
                TalkingState::Whispering,
                TalkingState::Shouting,
                TalkingState::TalkingMuted,
                TalkingState::Invalid,
                TalkingState::Invalid,
                TalkingState::Talking,
                TalkingState::Shouting,
                TalkingState::Whispering,
            ]
        );
        assert_eq!(
            serde_json::to_string(&TalkingState::TalkingMuted).expect("encode"),
            "4"
        );
    }

    #[test]
    fn tree_layout_names_round_trip_and_cycle() {
        for layout in TreeLayout::ALL {
            assert_eq!(layout.as_str().parse::<TreeLayout>(), Ok(layout));
        }
        assert_eq!("populated-only".parse::<TreeLayout>(), Ok(TreeLayout::PopulatedOnly));
        assert!("sideways".parse::<TreeLayout>().is_err());
        assert_eq!(TreeLayout::CurrentChannel.next(), TreeLayout::Full);
    }

    #[test]
    fn user_payload_coerces_flags_to_booleans() {
        let user: UserPayload = serde_json::from_str(
            r#"{"id": "7", "name": "alice", "muted": 1, "deafened": null, "selfMuted": true, "recording": "false"}"#,
        )
        .expect("parse user");
        assert_eq!(user.id, 7);
        let flags = user.flags();
        assert!(flags.muted);
        assert!(!flags.deafened);
        assert!(flags.self_muted);
        assert!(!flags.recording);
        assert!(!flags.priority_speaker);
    }

    #[test]
    fn parent_id_treats_negative_and_garbage_as_absent() {
        let root: ChannelPayload =
            serde_json::from_str(r#"{"id": 0, "name": "Root", "parentId": -1}"#).expect("root");
        assert_eq!(root.parent_id, None);
        let child: ChannelPayload =
            serde_json::from_str(r#"{"id": 4, "name": "Lobby", "parentId": "0"}"#).expect("child");
        assert_eq!(child.parent_id, Some(0));
        let odd: ChannelPayload =
            serde_json::from_str(r#"{"id": 5, "parentId": "up"}"#).expect("odd");
        assert_eq!(odd.parent_id, None);
        assert!(odd.name.is_empty());
        assert!(odd.users.is_empty());
    }

    #[test]
    fn flag_delta_only_touches_present_fields() {
        let mut flags = UserFlags {
            muted: true,
            recording: true,
            ..UserFlags::default()
        };
        let delta: FlagDelta =
            serde_json::from_str(r#"{"muted": true, "selfDeafened": true}"#).expect("delta");
        assert!(flags.apply(&delta));
        assert!(flags.muted);
        assert!(flags.self_deafened);
        assert!(flags.recording);

        assert!(!flags.apply(&delta));
        assert!(!flags.apply(&FlagDelta::default()));
    }

    #[test]
    fn flag_delta_coerces_loose_values() {
        let delta: FlagDelta = serde_json::from_str(
            r#"{"muted": 1, "deafened": "0", "selfMuted": "yes", "recording": null}"#,
        )
        .expect("delta");
        assert_eq!(delta.muted, Some(true));
        assert_eq!(delta.deafened, Some(false));
        assert_eq!(delta.self_muted, Some(true));
        assert_eq!(delta.recording, None);
        assert_eq!(delta.suppressed, None);
    }
}
