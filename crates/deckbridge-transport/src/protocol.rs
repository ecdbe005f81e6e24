//! Wire protocol for host-deck communication.
//!
//! Every frame is an envelope `{"id": <type id>, "data": <payload as a JSON
//! string>}`. The type id selects the payload shape; decoding happens in two
//! independent stages (envelope, then payload).
//!
//! Type ids come from the static table in [`MessageKind`], which is the wire
//! contract. An older flat framing (`{"id": "change-session", "sessionId": ..}`)
//! is not compatible with this one and is not accepted.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("Malformed {id} payload: {source}")]
    Payload {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A typed payload with a fixed wire id.
pub trait Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind tag written into the envelope.
    const KIND: MessageKind;

    /// Borrow this message out of a decoded payload, if it is one.
    fn from_payload(payload: &Payload) -> Option<&Self>;

    /// Wrap this message as a decoded payload.
    fn into_payload(self) -> Payload;
}

macro_rules! message_kinds {
    ($( $(#[$doc:meta])* $variant:ident($ty:ident) = $id:literal; )+) => {
        /// Every message kind known on the wire.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageKind {
            $( $(#[$doc])* $variant, )+
        }

        impl MessageKind {
            /// All known kinds.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// Wire type id.
            #[must_use]
            pub const fn id(self) -> &'static str {
                match self {
                    $(Self::$variant => $id,)+
                }
            }

            /// Look up a kind by wire type id.
            #[must_use]
            pub fn from_id(id: &str) -> Option<Self> {
                match id {
                    $($id => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Decode the inner payload of this kind.
            ///
            /// # Errors
            /// Returns error if `data` does not match the payload shape.
            pub fn decode(self, data: &str) -> Result<Payload, serde_json::Error> {
                Ok(match self {
                    $(Self::$variant => Payload::$variant(serde_json::from_str(data)?),)+
                })
            }
        }

        /// A decoded payload of any known kind.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Payload {
            $( $variant($ty), )+
        }

        impl Payload {
            /// Kind of this payload.
            #[must_use]
            pub const fn kind(&self) -> MessageKind {
                match self {
                    $(Self::$variant(_) => MessageKind::$variant,)+
                }
            }
        }

        $(
            impl Message for $ty {
                const KIND: MessageKind = MessageKind::$variant;

                fn from_payload(payload: &Payload) -> Option<&Self> {
                    match payload {
                        Payload::$variant(message) => Some(message),
                        _ => None,
                    }
                }

                fn into_payload(self) -> Payload {
                    Payload::$variant(self)
                }
            }
        )+
    };
}

message_kinds! {
    /// Host asks the deck to drive a session.
    ChangeActiveSession(ChangeActiveSessionMessage) = "ChangeActiveSessionMessage";
    /// Deck announces which session it drives.
    ActiveSessionChanged(ActiveSessionChangedMessage) = "ActiveSessionChangedMessage";
    /// Deck asks for a new terminal.
    CreateTerminal(CreateTerminalMessage) = "CreateTerminalMessage";
    /// Deck asks to type a command into the active terminal.
    ExecuteTerminalCommand(ExecuteTerminalCommandMessage) = "ExecuteTerminalCommandMessage";
    /// Deck asks to run a host command.
    ExecuteCommand(ExecuteCommandMessage) = "ExecuteCommandMessage";
    /// Deck asks to change the language of the active document.
    ChangeLanguage(ChangeLanguageMessage) = "ChangeLanguageMessage";
    /// Deck asks to insert a named snippet.
    InsertSnippet(InsertSnippetMessage) = "InsertSnippetMessage";
    /// Deck asks to open a folder.
    OpenFolder(OpenFolderMessage) = "OpenFolderMessage";
}

/// Read a `null` field as its default value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Session-change notification sent by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeActiveSessionMessage {
    pub session_id: String,
}

/// Active-session notification sent by the deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionChangedMessage {
    pub session_id: String,
}

/// Terminal creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub preserve_focus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<HashMap<String, String>>,
}

/// Terminal command request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTerminalCommandMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub command: String,
}

/// Host command request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub command: String,
    /// Command arguments, themselves JSON-encoded.
    #[serde(default, deserialize_with = "null_as_default")]
    pub arguments: String,
}

impl ExecuteCommandMessage {
    /// Decode `arguments`.
    ///
    /// Empty arguments and falsy values (`null`, `false`, `0`, `""`) yield
    /// `None`: the command runs without arguments.
    ///
    /// # Errors
    /// Returns error if `arguments` is not valid JSON.
    pub fn parsed_arguments(&self) -> Result<Option<Value>, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(&self.arguments)?;
        Ok(is_truthy(&value).then_some(value))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n.abs() > 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Document language change request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLanguageMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub language_id: String,
}

/// Snippet insertion request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertSnippetMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

/// Folder open request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFolderMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub new_window: bool,
}

/// Wire unit: a type id plus the JSON-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type id.
    pub id: String,
    /// Payload encoded as a JSON string.
    pub data: String,
}

impl Envelope {
    /// Wrap a typed message.
    ///
    /// # Errors
    /// Returns error if the message cannot be serialized.
    pub fn wrap<M: Message>(message: &M) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: M::KIND.id().to_string(),
            data: serde_json::to_string(message).map_err(ProtocolError::Encode)?,
        })
    }

    /// Encode this envelope as a wire frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parse a wire frame into an envelope without touching the payload.
    ///
    /// # Errors
    /// Returns error if the frame is not a JSON `{id, data}` object.
    pub fn from_wire(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Envelope)
    }

    /// Kind named by the type id, if known.
    #[must_use]
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_id(&self.id)
    }

    /// Decode the inner payload.
    ///
    /// # Errors
    /// Returns error if the type id is unknown or the payload is malformed.
    pub fn decode(&self) -> Result<Payload, ProtocolError> {
        let kind = self
            .kind()
            .ok_or_else(|| ProtocolError::UnknownType(self.id.clone()))?;
        kind.decode(&self.data).map_err(|source| ProtocolError::Payload {
            id: self.id.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let message = ChangeActiveSessionMessage {
            session_id: "abc".to_string(),
        };
        let wire = Envelope::wrap(&message).unwrap().to_wire().unwrap();
        assert_eq!(
            wire,
            r#"{"id":"ChangeActiveSessionMessage","data":"{\"sessionId\":\"abc\"}"}"#
        );
    }

    #[test]
    fn test_decode_roundtrip() {
        let message = CreateTerminalMessage {
            name: Some("build".to_string()),
            preserve_focus: true,
            working_directory: Some("/tmp".to_string()),
            environment: Some(HashMap::from([("RUST_LOG".to_string(), "debug".to_string())])),
            ..CreateTerminalMessage::default()
        };
        let wire = Envelope::wrap(&message).unwrap().to_wire().unwrap();

        let envelope = Envelope::from_wire(&wire).unwrap();
        assert_eq!(envelope.id, "CreateTerminalMessage");
        let payload = envelope.decode().unwrap();
        assert_eq!(payload.kind(), MessageKind::CreateTerminal);
        assert_eq!(CreateTerminalMessage::from_payload(&payload), Some(&message));
        assert_eq!(ExecuteCommandMessage::from_payload(&payload), None);
    }

    #[test]
    fn test_kind_table() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_id(kind.id()), Some(*kind));
        }
        assert_eq!(MessageKind::from_id("change-session"), None);
    }

    #[test]
    fn test_decode_stages_fail_independently() {
        assert!(matches!(
            Envelope::from_wire("{not json"),
            Err(ProtocolError::Envelope(_))
        ));

        let envelope = Envelope::from_wire(r#"{"id":"ActiveSessionChangedMessage","data":"{oops"}"#).unwrap();
        assert!(matches!(
            envelope.decode(),
            Err(ProtocolError::Payload { ref id, .. }) if id == "ActiveSessionChangedMessage"
        ));

        let unknown = Envelope::from_wire(r#"{"id":"Nope","data":"{}"}"#).unwrap();
        assert!(matches!(unknown.decode(), Err(ProtocolError::UnknownType(_))));
    }

    #[test]
    fn test_lenient_payload_fields() {
        let payload = MessageKind::OpenFolder.decode(r#"{"path":"/src"}"#).unwrap();
        let Payload::OpenFolder(open) = payload else {
            panic!("Wrong payload kind");
        };
        assert_eq!(open.path, "/src");
        assert!(!open.new_window);
    }

    #[test]
    fn test_null_fields_read_as_defaults() {
        let payload = MessageKind::ExecuteCommand
            .decode(r#"{"command":"workbench.action.files.save","arguments":null}"#)
            .unwrap();
        let Payload::ExecuteCommand(execute) = payload else {
            panic!("Wrong payload kind");
        };
        assert_eq!(execute.command, "workbench.action.files.save");
        assert_eq!(execute.parsed_arguments().unwrap(), None);

        let payload = MessageKind::CreateTerminal
            .decode(r#"{"name":"t","preserveFocus":null,"shellPath":null}"#)
            .unwrap();
        let Payload::CreateTerminal(terminal) = payload else {
            panic!("Wrong payload kind");
        };
        assert_eq!(terminal.name.as_deref(), Some("t"));
        assert!(!terminal.preserve_focus);
        assert_eq!(terminal.shell_path, None);

        for (kind, data) in [
            (MessageKind::ExecuteTerminalCommand, r#"{"command":null}"#),
            (MessageKind::ChangeLanguage, r#"{"languageId":null}"#),
            (MessageKind::InsertSnippet, r#"{"name":null}"#),
            (MessageKind::OpenFolder, r#"{"path":null,"newWindow":null}"#),
        ] {
            assert!(kind.decode(data).is_ok(), "{data}");
        }
    }

    #[test]
    fn test_parsed_arguments() {
        let mut message = ExecuteCommandMessage {
            command: "workbench.action.files.save".to_string(),
            arguments: String::new(),
        };
        assert_eq!(message.parsed_arguments().unwrap(), None);

        for falsy in ["null", "false", "0", "\"\""] {
            message.arguments = falsy.to_string();
            assert_eq!(message.parsed_arguments().unwrap(), None, "{falsy}");
        }

        message.arguments = "[1]".to_string();
        assert_eq!(message.parsed_arguments().unwrap(), Some(serde_json::json!([1])));

        message.arguments = r#"{"force":true}"#.to_string();
        assert_eq!(
            message.parsed_arguments().unwrap(),
            Some(serde_json::json!({"force": true}))
        );

        message.arguments = "{broken".to_string();
        assert!(message.parsed_arguments().is_err());
    }
}
