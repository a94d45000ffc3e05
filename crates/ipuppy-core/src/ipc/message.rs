//! Jupyter messages and the content shapes ipuppy reads or writes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version written into outgoing headers.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Message kinds the client understands.
///
/// Anything else a kernel sends (`execute_input`, `clear_output`, comm
/// traffic, ...) has no variant and is dropped by the readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    KernelInfoRequest,
    KernelInfoReply,
    ExecuteRequest,
    ExecuteReply,
    ExecuteResult,
    Stream,
    Error,
    DisplayData,
    Status,
    CompleteRequest,
    CompleteReply,
}

impl MessageType {
    /// Wire name of the message type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::KernelInfoRequest => "kernel_info_request",
            MessageType::KernelInfoReply => "kernel_info_reply",
            MessageType::ExecuteRequest => "execute_request",
            MessageType::ExecuteReply => "execute_reply",
            MessageType::ExecuteResult => "execute_result",
            MessageType::Stream => "stream",
            MessageType::Error => "error",
            MessageType::DisplayData => "display_data",
            MessageType::Status => "status",
            MessageType::CompleteRequest => "complete_request",
            MessageType::CompleteReply => "complete_reply",
        }
    }

    /// Parse a wire name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "kernel_info_request" => MessageType::KernelInfoRequest,
            "kernel_info_reply" => MessageType::KernelInfoReply,
            "execute_request" => MessageType::ExecuteRequest,
            "execute_reply" => MessageType::ExecuteReply,
            "execute_result" => MessageType::ExecuteResult,
            "stream" => MessageType::Stream,
            "error" => MessageType::Error,
            "display_data" => MessageType::DisplayData,
            "status" => MessageType::Status,
            "complete_request" => MessageType::CompleteRequest,
            "complete_reply" => MessageType::CompleteReply,
            _ => return None,
        })
    }
}

/// Message header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub date: String,
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
}

/// A decoded kernel message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: Header,
    /// Header of the request this message answers; `{}` when there is none.
    pub parent_header: Value,
    pub metadata: Value,
    pub content: Value,
}

impl Message {
    /// Build a new request with a fresh message id.
    pub fn request(session: &str, msg_type: MessageType, content: Value) -> Self {
        Self::request_with_id(uuid::Uuid::new_v4().to_string(), session, msg_type, content)
    }

    /// Build a request whose `msg_id` is the given correlation id.
    pub fn request_with_id(
        msg_id: impl Into<String>,
        session: &str,
        msg_type: MessageType,
        content: Value,
    ) -> Self {
        Self {
            header: Header {
                msg_id: msg_id.into(),
                session: session.to_string(),
                username: "ipuppy".to_string(),
                date: chrono::Utc::now().to_rfc3339(),
                msg_type: msg_type.as_str().to_string(),
                version: PROTOCOL_VERSION.to_string(),
            },
            parent_header: Value::Object(Map::new()),
            metadata: Value::Object(Map::new()),
            content,
        }
    }

    /// This message's id.
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    /// Known message type, if any.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::parse(&self.header.msg_type)
    }

    /// Correlation id of the request this message belongs to.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header.get("msg_id").and_then(Value::as_str)
    }

    /// Whether this message answers or reports on the given request.
    pub fn is_child_of(&self, correlation_id: &str) -> bool {
        self.parent_msg_id() == Some(correlation_id)
    }

    /// Deserialize the content into a typed shape.
    pub fn content_as<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.content)
    }
}

/// `execute_request` content.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequestContent {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub user_expressions: Map<String, Value>,
    pub allow_stdin: bool,
    pub stop_on_error: bool,
}

impl ExecuteRequestContent {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: Map::new(),
            allow_stdin: false,
            stop_on_error: true,
        }
    }
}

/// `complete_request` content.
#[derive(Debug, Clone, Serialize)]
pub struct CompleteRequestContent {
    pub code: String,
    pub cursor_pos: usize,
}

/// `complete_reply` content.
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteReplyContent {
    pub status: String,
    #[serde(default)]
    pub matches: Vec<String>,
    #[serde(default)]
    pub cursor_start: usize,
    #[serde(default)]
    pub cursor_end: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// `execute_result` content.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResultContent {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub execution_count: Option<u64>,
}

/// `stream` content.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamContent {
    pub name: String,
    pub text: String,
}

/// `error` content.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// `display_data` content.
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayDataContent {
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// `status` content.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusContent {
    pub execution_state: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_type_names_are_symmetric() {
        for kind in [
            MessageType::KernelInfoRequest,
            MessageType::ExecuteRequest,
            MessageType::ExecuteResult,
            MessageType::Status,
            MessageType::CompleteReply,
        ] {
            assert_eq!(MessageType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageType::parse("comm_open"), None);
    }

    #[test]
    fn test_request_with_id_uses_correlation_id() {
        let msg = Message::request_with_id(
            "corr-1",
            "session-a",
            MessageType::ExecuteRequest,
            serde_json::to_value(ExecuteRequestContent::new("1+1")).unwrap(),
        );
        assert_eq!(msg.msg_id(), "corr-1");
        assert_eq!(msg.header.msg_type, "execute_request");
        assert_eq!(msg.header.version, PROTOCOL_VERSION);
        assert_eq!(msg.content["code"], "1+1");
        assert_eq!(msg.parent_msg_id(), None);
    }

    #[test]
    fn test_parent_lookup() {
        let mut msg = Message::request("s", MessageType::Status, json!({"execution_state": "idle"}));
        msg.parent_header = json!({"msg_id": "abc", "msg_type": "execute_request"});
        assert!(msg.is_child_of("abc"));
        assert!(!msg.is_child_of("abd"));

        let status: StatusContent = msg.content_as().unwrap();
        assert_eq!(status.execution_state, "idle");
    }
}
