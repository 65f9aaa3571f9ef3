use crate::config::EMPTY_VALUE_PLACEHOLDER;
use regex_lite::Regex;
use std::fmt;
use std::sync::LazyLock;

/// `(branch.)?leaf="value"`, the branch being dotted and optionally indexed segments
static RESPONSE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:(\w+(?:\[\d+\])?(?:\.\w+(?:\[\d+\])?)*)\.)?(\w+)="([^"]*)""#)
        .expect("response pattern is valid")
});

/// Kind of an inbound line, taken from its first character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `S`: reply to the in-flight command
    Status,
    /// `N`: unsolicited state change for a watched path
    Notification,
    /// `E`: the in-flight command failed
    Error,
}

impl MessageKind {
    fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'S' => Some(MessageKind::Status),
            'N' => Some(MessageKind::Notification),
            'E' => Some(MessageKind::Error),
            _ => None,
        }
    }
}

/// A single parsed line received from the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub kind: MessageKind,
    /// Device path, e.g. `C[1].Z[2]`
    pub branch: Option<String>,
    /// Variable name, e.g. `volume`
    pub leaf: Option<String>,
    /// Variable value, or the error text for [`MessageKind::Error`]
    pub value: Option<String>,
}

impl WireMessage {
    fn bare(kind: MessageKind) -> Self {
        Self {
            kind,
            branch: None,
            leaf: None,
            value: None,
        }
    }
}

/// Parse a raw line received from the controller
///
/// The device speaks Latin-1, so every byte maps to exactly one character.
/// Returns `None` for empty lines and lines with an unknown tag; those are
/// dropped without affecting the connection.
pub fn parse_line(raw: &[u8]) -> Option<WireMessage> {
    let decoded: String = raw.iter().map(|&b| char::from(b)).collect();
    let text = decoded.trim();
    let tag = text.chars().next()?;

    let Some(kind) = MessageKind::from_tag(tag) else {
        tracing::warn!("Dropping line with unknown tag: {:?}", text);
        return None;
    };

    // Tags are ASCII, so the payload starts at byte 1
    let payload = text[1..].trim();

    if kind == MessageKind::Error {
        tracing::debug!("Device responded with error: {}", payload);
        let mut msg = WireMessage::bare(kind);
        msg.value = (!payload.is_empty()).then(|| payload.to_string());
        return Some(msg);
    }

    let Some(caps) = RESPONSE_REGEX.captures(payload) else {
        return Some(WireMessage::bare(kind));
    };

    let value = caps
        .get(3)
        .map(|m| m.as_str())
        .filter(|v| !v.is_empty() && *v != EMPTY_VALUE_PLACEHOLDER)
        .map(str::to_string);

    Some(WireMessage {
        kind,
        branch: caps.get(1).map(|m| m.as_str().to_string()),
        leaf: caps.get(2).map(|m| m.as_str().to_string()),
        value,
    })
}

/// Outbound RIO command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `GET <path>.<key>`
    Get { path: String, key: String },
    /// `SET <path>.<key>="<value>"`
    Set {
        path: String,
        key: String,
        value: String,
    },
    /// `WATCH <path> ON|OFF`
    Watch { path: String, enabled: bool },
    /// `EVENT <path>!<name> <args...>`
    Event {
        path: String,
        name: String,
        args: Vec<String>,
    },
    /// `VERSION`
    Version,
    /// Pre-formatted command text
    Raw(String),
}

impl Command {
    /// Read `key` under `path`
    pub fn get(path: impl Into<String>, key: impl Into<String>) -> Self {
        Command::Get {
            path: path.into(),
            key: key.into(),
        }
    }

    /// Write `value` to `key` under `path`
    pub fn set(path: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Command::Set {
            path: path.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    /// Start or stop notifications for `path`
    pub fn watch(path: impl Into<String>, enabled: bool) -> Self {
        Command::Watch {
            path: path.into(),
            enabled,
        }
    }

    /// Fire event `name` at `path` with space separated `args`
    pub fn event<I, A>(path: impl Into<String>, name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        Command::Event {
            path: path.into(),
            name: name.into(),
            args: args.into_iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Get { path, key } => write!(f, "GET {}.{}", path, key),
            Command::Set { path, key, value } => write!(f, "SET {}.{}=\"{}\"", path, key, value),
            Command::Watch { path, enabled } => {
                write!(f, "WATCH {} {}", path, if *enabled { "ON" } else { "OFF" })
            }
            Command::Event { path, name, args } => {
                write!(f, "EVENT {}!{}", path, name)?;
                if !args.is_empty() {
                    write!(f, " {}", args.join(" "))?;
                }
                Ok(())
            }
            Command::Version => f.write_str("VERSION"),
            Command::Raw(text) => f.write_str(text),
        }
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Command::Raw(text.to_string())
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Command::Raw(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification() {
        let msg = parse_line(b"N C[1].Z[2].volume=\"30\"\r\n").unwrap();
        assert_eq!(msg.kind, MessageKind::Notification);
        assert_eq!(msg.branch.as_deref(), Some("C[1].Z[2]"));
        assert_eq!(msg.leaf.as_deref(), Some("volume"));
        assert_eq!(msg.value.as_deref(), Some("30"));
    }

    #[test]
    fn test_parse_placeholder_value_is_none() {
        let msg = parse_line(b"N S[1].songName=\"------\"").unwrap();
        assert_eq!(msg.leaf.as_deref(), Some("songName"));
        assert_eq!(msg.value, None);

        let msg = parse_line(b"N S[1].artistName=\"\"").unwrap();
        assert_eq!(msg.value, None);
    }

    #[test]
    fn test_parse_status_without_branch() {
        let msg = parse_line(b"S VERSION=\"1.14.01\"").unwrap();
        assert_eq!(msg.kind, MessageKind::Status);
        assert_eq!(msg.branch, None);
        assert_eq!(msg.leaf.as_deref(), Some("VERSION"));
        assert_eq!(msg.value.as_deref(), Some("1.14.01"));
    }

    #[test]
    fn test_parse_bare_status() {
        let msg = parse_line(b"S\r\n").unwrap();
        assert_eq!(msg, WireMessage::bare(MessageKind::Status));
    }

    #[test]
    fn test_parse_error_keeps_payload() {
        let msg = parse_line(b"E Invalid Command").unwrap();
        assert_eq!(msg.kind, MessageKind::Error);
        assert_eq!(msg.value.as_deref(), Some("Invalid Command"));
        assert_eq!(msg.leaf, None);
    }

    #[test]
    fn test_parse_empty_and_unknown() {
        assert!(parse_line(b"").is_none());
        assert!(parse_line(b"\r\n").is_none());
        assert!(parse_line(b"X something").is_none());
    }

    #[test]
    fn test_parse_latin1_value() {
        let msg = parse_line(b"N S[2].artistName=\"Bj\xf6rk\"").unwrap();
        assert_eq!(msg.value.as_deref(), Some("Björk"));
    }

    #[test]
    fn test_parse_unmatched_payload() {
        let msg = parse_line(b"N garbage").unwrap();
        assert_eq!(msg.kind, MessageKind::Notification);
        assert_eq!(msg.leaf, None);
        assert_eq!(msg.value, None);
    }

    #[test]
    fn test_command_formatting() {
        assert_eq!(Command::get("C[1].Z[1]", "name").to_string(), "GET C[1].Z[1].name");
        assert_eq!(
            Command::set("C[1].Z[1]", "volume", "20").to_string(),
            "SET C[1].Z[1].volume=\"20\""
        );
        assert_eq!(Command::watch("S[3]", true).to_string(), "WATCH S[3] ON");
        assert_eq!(Command::watch("S[3]", false).to_string(), "WATCH S[3] OFF");
        assert_eq!(
            Command::event("C[1].Z[2]", "KeyPress", ["Volume", "25"]).to_string(),
            "EVENT C[1].Z[2]!KeyPress Volume 25"
        );
        assert_eq!(
            Command::event("C[1].Z[2]", "ZoneOn", Vec::<String>::new()).to_string(),
            "EVENT C[1].Z[2]!ZoneOn"
        );
        assert_eq!(Command::Version.to_string(), "VERSION");
    }
}
