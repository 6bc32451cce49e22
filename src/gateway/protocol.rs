//! Client channel wire format.
//!
//! All messages are JSON objects with a `"type"` field.
//!
//! ## Client → server
//!
//! | Type              | Fields                                                   |
//! |-------------------|----------------------------------------------------------|
//! | `connect-request` | `host`, `port?`, `username`, `password?`, `rows?`, `cols?` |
//! | `input`           | `data`                                                   |
//! | `resize`          | `rows`, `cols`                                           |
//! | `load-commands`   |                                                          |
//! | `save-command`    | `command`                                                |
//! | `disconnect`      |                                                          |
//!
//! `port`, `rows` and `cols` accept numbers or numeric strings. Binary
//! frames are treated as `input`.
//!
//! ## Server → client
//!
//! | Type               | Fields                                    |
//! |--------------------|-------------------------------------------|
//! | `status`           | `status` (`connecting`, `connected`, `disconnected`, `lost`) |
//! | `error`            | `message`                                 |
//! | `output`           | `data`                                    |
//! | `commands-loaded`  | `commands` (category → list)              |

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::types::{ConnectionRequest, DEFAULT_SSH_PORT, SessionStatus, TermSize};

/// Message received from the browser.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    ConnectRequest(ConnectParams),
    Input {
        data: String,
    },
    Resize {
        #[serde(default, deserialize_with = "lenient_dimension")]
        rows: u16,
        #[serde(default, deserialize_with = "lenient_dimension")]
        cols: u16,
    },
    LoadCommands,
    SaveCommand {
        #[serde(default)]
        command: String,
    },
    Disconnect,
}

/// Fields of a `connect-request`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub host: String,
    #[serde(default, deserialize_with = "lenient_port")]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient_dimension")]
    pub rows: u16,
    #[serde(default, deserialize_with = "lenient_dimension")]
    pub cols: u16,
}

impl ConnectParams {
    pub fn into_request(self) -> ConnectionRequest {
        let mut request = ConnectionRequest::new(self.host.trim(), self.username.trim())
            .with_port(self.port.unwrap_or(DEFAULT_SSH_PORT))
            .with_size(TermSize::new(self.rows, self.cols).or_default());
        request.credential = self.password;
        request
    }
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

/// Message sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Status {
        status: SessionStatus,
    },
    Error {
        message: String,
    },
    Output {
        data: String,
    },
    CommandsLoaded {
        commands: BTreeMap<String, Vec<String>>,
    },
}

impl ServerMessage {
    pub fn status(status: SessionStatus) -> Self {
        ServerMessage::Status { status }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// True for `disconnected` and `lost` statuses.
    pub fn is_terminal_status(&self) -> bool {
        matches!(self, ServerMessage::Status { status } if status.is_terminal())
    }
}

pub fn parse_client_message(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}

fn lenient_int(value: Option<Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Port as number or numeric string; anything else falls back to the default.
fn lenient_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(lenient_int(value)
        .and_then(|n| u16::try_from(n).ok())
        .filter(|port| *port != 0))
}

/// Terminal dimension; missing or unparsable values become zero.
fn lenient_dimension<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(lenient_int(value)
        .map(|n| n.clamp(0, i64::from(u16::MAX)) as u16)
        .unwrap_or(0))
}

/// Incremental UTF-8 decoder for shell output.
///
/// A multi-byte character split across chunks is carried over to the next
/// call instead of being replaced. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    carry: Vec<u8>,
}

impl Utf8Chunker {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Flush a trailing partial character.
    pub fn finish(&mut self) -> String {
        if self.carry.is_empty() {
            return String::new();
        }
        String::from_utf8_lossy(&std::mem::take(&mut self.carry)).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod client_messages {
        use super::*;

        #[test]
        fn test_connect_request_with_numeric_port() {
            let msg = parse_client_message(
                r#"{"type":"connect-request","host":"internal.example","port":2222,"username":"alice","password":"p","rows":40,"cols":120}"#,
            )
            .unwrap();
            let ClientMessage::ConnectRequest(params) = msg else {
                panic!("expected connect-request");
            };
            let request = params.into_request();
            assert_eq!(request.host, "internal.example");
            assert_eq!(request.port, 2222);
            assert_eq!(request.credential.as_deref(), Some("p"));
            assert_eq!(request.initial_size, TermSize::new(40, 120));
        }

        #[test]
        fn test_connect_request_with_string_port() {
            let msg = parse_client_message(
                r#"{"type":"connect-request","host":"h","port":"2200","username":"u"}"#,
            )
            .unwrap();
            let ClientMessage::ConnectRequest(params) = msg else {
                panic!("expected connect-request");
            };
            assert_eq!(params.port, Some(2200));
        }

        #[test]
        fn test_connect_request_defaults() {
            let msg =
                parse_client_message(r#"{"type":"connect-request","host":"h","username":"u"}"#)
                    .unwrap();
            let ClientMessage::ConnectRequest(params) = msg else {
                panic!("expected connect-request");
            };
            let request = params.into_request();
            assert_eq!(request.port, 22);
            assert_eq!(request.credential, None);
            assert_eq!(request.initial_size, TermSize::new(24, 80));
        }

        #[test]
        fn test_invalid_port_falls_back() {
            let msg = parse_client_message(
                r#"{"type":"connect-request","host":"h","port":"ssh","username":"u"}"#,
            )
            .unwrap();
            let ClientMessage::ConnectRequest(params) = msg else {
                panic!("expected connect-request");
            };
            assert_eq!(params.into_request().port, 22);
        }

        #[test]
        fn test_missing_host_still_parses() {
            let msg = parse_client_message(r#"{"type":"connect-request","username":"u"}"#).unwrap();
            let ClientMessage::ConnectRequest(params) = msg else {
                panic!("expected connect-request");
            };
            assert!(params.into_request().validate().is_err());
        }

        #[test]
        fn test_resize_negative_becomes_zero() {
            let msg = parse_client_message(r#"{"type":"resize","rows":-3,"cols":"0"}"#).unwrap();
            assert_eq!(msg, ClientMessage::Resize { rows: 0, cols: 0 });
        }

        #[test]
        fn test_unit_messages() {
            assert_eq!(
                parse_client_message(r#"{"type":"load-commands"}"#).unwrap(),
                ClientMessage::LoadCommands
            );
            assert_eq!(
                parse_client_message(r#"{"type":"disconnect"}"#).unwrap(),
                ClientMessage::Disconnect
            );
        }

        #[test]
        fn test_unknown_type_rejected() {
            assert!(parse_client_message(r#"{"type":"reboot"}"#).is_err());
        }

        #[test]
        fn test_password_hidden_in_debug() {
            let params = ConnectParams {
                host: "h".into(),
                port: None,
                username: "u".into(),
                password: Some("hunter2".into()),
                rows: 0,
                cols: 0,
            };
            assert!(!format!("{:?}", params).contains("hunter2"));
        }
    }

    mod server_messages {
        use super::*;

        #[test]
        fn test_status_serialization() {
            let json = serde_json::to_string(&ServerMessage::status(SessionStatus::Lost)).unwrap();
            assert_eq!(json, r#"{"type":"status","status":"lost"}"#);
        }

        #[test]
        fn test_commands_loaded_serialization() {
            let mut commands = BTreeMap::new();
            commands.insert("custom".to_string(), vec!["uptime".to_string()]);
            let json = serde_json::to_string(&ServerMessage::CommandsLoaded { commands }).unwrap();
            assert_eq!(
                json,
                r#"{"type":"commands-loaded","commands":{"custom":["uptime"]}}"#
            );
        }

        #[test]
        fn test_terminal_status_detection() {
            assert!(ServerMessage::status(SessionStatus::Disconnected).is_terminal_status());
            assert!(!ServerMessage::status(SessionStatus::Connected).is_terminal_status());
            assert!(!ServerMessage::error("x").is_terminal_status());
        }
    }

    mod utf8 {
        use super::*;

        #[test]
        fn test_split_character_is_carried() {
            let mut decoder = Utf8Chunker::default();
            let bytes = "héllo".as_bytes();
            assert_eq!(decoder.decode(&bytes[..2]), "h");
            assert_eq!(decoder.decode(&bytes[2..]), "éllo");
        }

        #[test]
        fn test_invalid_byte_replaced() {
            let mut decoder = Utf8Chunker::default();
            assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        }

        #[test]
        fn test_finish_flushes_partial() {
            let mut decoder = Utf8Chunker::default();
            assert_eq!(decoder.decode(&[0xe2, 0x82]), "");
            assert_eq!(decoder.finish(), "\u{FFFD}");
            assert_eq!(decoder.finish(), "");
        }
    }
}
