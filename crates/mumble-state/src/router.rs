use mumble_core::protocol::{decode_message, InboundMsg};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct TypeOnly {
    #[serde(rename = "type", default)]
    kind: String,
}

/// Decode one text frame into a routable message. Malformed frames and
/// message types this client does not handle are logged and dropped.
pub fn route_frame(text: &str, max_frame_bytes: usize) -> Option<InboundMsg> {
    match decode_message(text, max_frame_bytes) {
        Ok(InboundMsg::Unknown) => {
            let kind = serde_json::from_str::<TypeOnly>(text)
                .map(|header| header.kind)
                .unwrap_or_default();
            debug!(event = "message_unhandled", kind = %kind);
            None
        }
        Ok(msg) => Some(msg),
        Err(err) => {
            warn!("mumble_decode_error: {err}");
            None
        }
    }
}
