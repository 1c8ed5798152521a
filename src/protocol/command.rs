//! Commands received from the server
//!
//! A command arrives as the body of a `200 OK` response carrying a command id.
//! How the body is read depends only on its content type: G-code text is taken
//! verbatim, JSON is parsed into one of the known commands, anything else is an
//! unknown command. Bodies that cannot be interpreted become
//! [`CommandData::Broken`] so the server still gets an answer for the id.

use crate::transport::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Server-assigned command identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub u32);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a command asks for
#[derive(Debug, Clone, PartialEq)]
pub enum CommandData {
    /// We do not know this command or its content type
    Unknown,
    /// The body could not be read or parsed
    Broken { reason: String },
    /// Raw G-code to run
    Gcode(String),
    SendInfo,
    PausePrint,
    ResumePrint,
    StopPrint,
    StartPrint { path: String },
}

impl CommandData {
    /// Commands that are carried out by the device rather than the agent
    pub fn is_device_command(&self) -> bool {
        matches!(
            self,
            CommandData::Gcode(_)
                | CommandData::PausePrint
                | CommandData::ResumePrint
                | CommandData::StopPrint
                | CommandData::StartPrint { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: CommandId,
    pub data: CommandData,
}

/// JSON command envelope as sent by the server
#[derive(Debug, Deserialize)]
struct RawCommand {
    command: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    kwargs: Map<String, Value>,
}

impl Command {
    pub fn unknown(id: CommandId) -> Self {
        Self {
            id,
            data: CommandData::Unknown,
        }
    }

    pub fn broken<S: Into<String>>(id: CommandId, reason: S) -> Self {
        Self {
            id,
            data: CommandData::Broken {
                reason: reason.into(),
            },
        }
    }

    /// Build a command from a response body according to its content type
    pub fn from_body(id: CommandId, content_type: ContentType, body: &[u8]) -> Self {
        match content_type {
            ContentType::TextGcode => Self::gcode_command(id, body),
            ContentType::ApplicationJson => Self::parse_json_command(id, body),
            // No idea how to even read these
            ContentType::TextPlain | ContentType::ApplicationOctetStream => Self::unknown(id),
        }
    }

    pub fn gcode_command(id: CommandId, body: &[u8]) -> Self {
        match std::str::from_utf8(body) {
            Ok(text) => Self {
                id,
                data: CommandData::Gcode(text.to_string()),
            },
            Err(_) => Self::broken(id, "G-code is not valid UTF-8"),
        }
    }

    pub fn parse_json_command(id: CommandId, body: &[u8]) -> Self {
        let raw: RawCommand = match serde_json::from_slice(body) {
            Ok(raw) => raw,
            Err(e) => return Self::broken(id, format!("Invalid command JSON: {e}")),
        };

        let data = match raw.command.as_str() {
            "SEND_INFO" => CommandData::SendInfo,
            "PAUSE_PRINT" => CommandData::PausePrint,
            "RESUME_PRINT" => CommandData::ResumePrint,
            "STOP_PRINT" => CommandData::StopPrint,
            "START_PRINT" => {
                let path = raw
                    .kwargs
                    .get("path")
                    .or_else(|| raw.args.first())
                    .and_then(Value::as_str);
                match path {
                    Some(path) if !path.is_empty() => CommandData::StartPrint {
                        path: path.to_string(),
                    },
                    _ => return Self::broken(id, "START_PRINT requires a path"),
                }
            }
            _ => CommandData::Unknown,
        };

        Self { id, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: CommandId = CommandId(42);

    #[test]
    fn test_gcode_command() {
        let cmd = Command::from_body(ID, ContentType::TextGcode, b"G28\nM104 S200");
        assert_eq!(cmd.id, ID);
        assert_eq!(cmd.data, CommandData::Gcode("G28\nM104 S200".to_string()));
        assert!(cmd.data.is_device_command());
    }

    #[test]
    fn test_gcode_must_be_utf8() {
        let cmd = Command::from_body(ID, ContentType::TextGcode, &[0x47, 0xff, 0xfe]);
        assert!(matches!(cmd.data, CommandData::Broken { .. }));
    }

    #[test]
    fn test_json_commands() {
        let cases = [
            (r#"{"command":"SEND_INFO"}"#, CommandData::SendInfo),
            (r#"{"command":"PAUSE_PRINT","args":[]}"#, CommandData::PausePrint),
            (r#"{"command":"RESUME_PRINT"}"#, CommandData::ResumePrint),
            (r#"{"command":"STOP_PRINT","kwargs":{}}"#, CommandData::StopPrint),
            (
                r#"{"command":"START_PRINT","kwargs":{"path":"/usb/box.gcode"}}"#,
                CommandData::StartPrint {
                    path: "/usb/box.gcode".to_string(),
                },
            ),
            (
                r#"{"command":"START_PRINT","args":["/usb/cube.gcode"]}"#,
                CommandData::StartPrint {
                    path: "/usb/cube.gcode".to_string(),
                },
            ),
            (r#"{"command":"SELF_DESTRUCT"}"#, CommandData::Unknown),
        ];

        for (body, expected) in cases {
            let cmd = Command::from_body(ID, ContentType::ApplicationJson, body.as_bytes());
            assert_eq!(cmd.data, expected, "Failed for body: {body}");
        }
    }

    #[test]
    fn test_broken_json_commands() {
        let bodies = [
            "Hello world",
            "{}",
            r#"{"command": 7}"#,
            r#"{"command":"START_PRINT"}"#,
            r#"{"command":"START_PRINT","kwargs":{"path":""}}"#,
        ];

        for body in bodies {
            let cmd = Command::from_body(ID, ContentType::ApplicationJson, body.as_bytes());
            assert!(
                matches!(cmd.data, CommandData::Broken { .. }),
                "Expected broken command for body: {body}"
            );
        }
    }

    #[test]
    fn test_unknown_content_type() {
        for content_type in [ContentType::TextPlain, ContentType::ApplicationOctetStream] {
            let cmd = Command::from_body(ID, content_type, br#"{"command":"SEND_INFO"}"#);
            assert_eq!(cmd.data, CommandData::Unknown);
        }
    }
}
