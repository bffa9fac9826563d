//! Mochi Command Protocol
//!
//! Every operation is one UTF-8 text frame written to the single data
//! characteristic. There is no length prefix, terminator or escaping, so a
//! payload that needs an internal delimiter cannot be expressed.

use crate::domain::error::LinkError;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Mochi BLE Service UUID
pub const SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";

/// Data Characteristic UUID - read, write and notify
pub const DATA_CHAR_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

/// Firmware advertises as `MOCHI-<chip id>`
pub const DEVICE_NAME_PREFIX: &str = "MOCHI-";

const SET_TIME_VERB: &str = "unix";
const GET_SETTINGS_VERB: &str = "get_json";
const SET_SETTINGS_VERB: &str = "set_json";

/// One outgoing frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFrame {
    /// `unix:<epoch seconds>`
    SetTime(i64),
    /// `get_json`
    GetSettings,
    /// `set_json:<json>`
    SetSettings(String),
    /// Anything else, passed through uninterpreted
    Raw(String),
}

impl CommandFrame {
    pub fn encode(&self) -> String {
        match self {
            Self::SetTime(epoch) => format!("{SET_TIME_VERB}:{epoch}"),
            Self::GetSettings => GET_SETTINGS_VERB.to_string(),
            Self::SetSettings(json) => format!("{SET_SETTINGS_VERB}:{json}"),
            Self::Raw(text) => text.clone(),
        }
    }

    /// Classify text the way the firmware would.
    pub fn parse(text: &str) -> Self {
        if text == GET_SETTINGS_VERB {
            return Self::GetSettings;
        }
        match text.split_once(':') {
            Some((SET_TIME_VERB, arg)) => match arg.parse() {
                Ok(epoch) => Self::SetTime(epoch),
                Err(_) => Self::Raw(text.to_string()),
            },
            Some((SET_SETTINGS_VERB, json)) => Self::SetSettings(json.to_string()),
            _ => Self::Raw(text.to_string()),
        }
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<DeviceAction> for CommandFrame {
    fn from(action: DeviceAction) -> Self {
        Self::Raw(action.as_str().to_string())
    }
}

/// Button commands understood by the firmware. Sent verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Feed,
    Play,
    Grow,
    /// Resets the pet and wipes its saved state
    Kill,
    /// Toggles auto-click
    Prev,
    /// Toggles auto-click
    Next,
}

impl DeviceAction {
    pub const ALL: [DeviceAction; 6] = [
        Self::Feed,
        Self::Play,
        Self::Grow,
        Self::Kill,
        Self::Prev,
        Self::Next,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "FEED",
            Self::Play => "PLAY",
            Self::Grow => "GROW",
            Self::Kill => "KILL",
            Self::Prev => "prev",
            Self::Next => "next",
        }
    }
}

impl FromStr for DeviceAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Decode an incoming frame. Frames are text; invalid UTF-8 is a protocol error.
pub fn decode_frame(bytes: &[u8]) -> Result<String, LinkError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| LinkError::Protocol(format!("frame is not UTF-8: {e}")))
}

/// Parse a UUID string from configuration.
pub fn parse_uuid(uuid_str: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| anyhow::anyhow!("Invalid UUID format {uuid_str:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid(SERVICE_UUID).unwrap();
        assert_eq!(uuid.as_fields().0, 0x4fafc201);
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_encode_frames() {
        assert_eq!(CommandFrame::SetTime(1_710_081_000).encode(), "unix:1710081000");
        assert_eq!(CommandFrame::GetSettings.encode(), "get_json");
        assert_eq!(
            CommandFrame::SetSettings(r#"{"timezone":"Asia/Tokyo"}"#.into()).encode(),
            r#"set_json:{"timezone":"Asia/Tokyo"}"#
        );
        assert_eq!(CommandFrame::from(DeviceAction::Feed).encode(), "FEED");
        assert_eq!(CommandFrame::from(DeviceAction::Next).encode(), "next");
    }

    #[test]
    fn test_parse_frames() {
        assert_eq!(CommandFrame::parse("get_json"), CommandFrame::GetSettings);
        assert_eq!(CommandFrame::parse("unix:42"), CommandFrame::SetTime(42));
        // The JSON itself may contain colons; only the first one splits.
        assert_eq!(
            CommandFrame::parse(r#"set_json:{"a":"b:c"}"#),
            CommandFrame::SetSettings(r#"{"a":"b:c"}"#.into())
        );
        assert_eq!(
            CommandFrame::parse("unix:soon"),
            CommandFrame::Raw("unix:soon".into())
        );
        assert_eq!(CommandFrame::parse("PLAY"), CommandFrame::Raw("PLAY".into()));
    }

    #[test]
    fn test_device_actions() {
        assert_eq!("feed".parse::<DeviceAction>(), Ok(DeviceAction::Feed));
        assert_eq!("NEXT".parse::<DeviceAction>(), Ok(DeviceAction::Next));
        assert!("dance".parse::<DeviceAction>().is_err());
    }

    #[test]
    fn test_decode_frame() {
        assert_eq!(decode_frame(b"{\"timezone\":\"UTC\"}").unwrap(), "{\"timezone\":\"UTC\"}");
        assert!(matches!(decode_frame(&[0xff, 0xfe]), Err(LinkError::Protocol(_))));
    }
}
