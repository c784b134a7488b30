#![forbid(unsafe_code)]

//! Extension message protocol.
//!
//! Messages are JSON objects tagged by `action`; replies carry a `status`.
//! Action and status strings are part of the extension's external contract
//! and must not change:
//!
//! | action | direction | reply |
//! |---|---|---|
//! | `ping` | host → content | `pong` |
//! | `toggleMainMenu` | host → content | `success` |
//! | `openImagePanel` | host → content | `success` |
//! | `showOverlay` | host → content | `success` |
//! | `hideOverlay` | host → content | `success` |
//! | `updateImageState` | content → host | none |
//!
//! Anything else gets `unknown_action`.

use std::fmt;

use ppx_core::{Position, Size};
use ppx_runtime::ImageId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every action the protocol knows, in wire spelling.
pub const KNOWN_ACTIONS: [&str; 6] = [
    "ping",
    "toggleMainMenu",
    "openImagePanel",
    "showOverlay",
    "hideOverlay",
    "updateImageState",
];

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    Ping,
    ToggleMainMenu,
    OpenImagePanel,
    #[serde(rename_all = "camelCase")]
    ShowOverlay {
        src: String,
        image_id: ImageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Position>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<Size>,
    },
    HideOverlay,
    /// Geometry of the active image changed (for cross-context mirroring).
    #[serde(rename_all = "camelCase")]
    UpdateImageState {
        image_id: ImageId,
        position: Position,
        size: Size,
    },
}

impl Message {
    /// Wire name of this message's action.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::ToggleMainMenu => "toggleMainMenu",
            Self::OpenImagePanel => "openImagePanel",
            Self::ShowOverlay { .. } => "showOverlay",
            Self::HideOverlay => "hideOverlay",
            Self::UpdateImageState { .. } => "updateImageState",
        }
    }

    /// Decode a message, telling unknown actions apart from bad payloads.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingAction)?;
        if !KNOWN_ACTIONS.contains(&action) {
            return Err(ProtocolError::UnknownAction(action.to_owned()));
        }
        Self::deserialize(value).map_err(ProtocolError::Malformed)
    }

    pub fn to_value(&self) -> Value {
        // Serializing a plain enum of owned data into a Value cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Reply to a host → content message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Success,
    UnknownAction,
}

/// Failure to decode an incoming message.
#[derive(Debug)]
pub enum ProtocolError {
    /// No string `action` field.
    MissingAction,
    UnknownAction(String),
    /// Known action with a payload that does not fit it.
    Malformed(serde_json::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAction => write!(f, "message has no action"),
            Self::UnknownAction(action) => write!(f, "unknown action: {action}"),
            Self::Malformed(e) => write!(f, "malformed message payload: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Malformed(e) => Some(e),
            Self::MissingAction | Self::UnknownAction(_) => None,
        }
    }
}
