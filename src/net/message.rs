//! Wire messages of the line-delimited JSON protocol.
//!
//! ```text
//! client → {"hello":{"username":"alice"}}
//! server → {"hello":{"session-id":7,"capabilities":[...]}}
//! client → {"rpc":{"message-id":"1","operation":"lock","params":{"target":"running"}}}
//! server → {"rpc-reply":{"message-id":"1","ok":null}}
//! ```
//!
//! A client opens a secondary channel on an existing session with a new
//! connection whose hello carries `"attach": <session-id>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operations::RpcError;

/// Messages sent by a client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientMessage {
    Hello(ClientHello),
    Rpc(Request),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientHello {
    pub username: String,
    /// Session to open a secondary channel on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

/// A remote operation invocation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Request {
    pub message_id: String,
    pub operation: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(message_id: impl Into<String>, operation: impl Into<String>, params: Value) -> Self {
        Self {
            message_id: message_id.into(),
            operation: operation.into(),
            params,
        }
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMessage {
    Hello(ServerHello),
    RpcReply(Reply),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerHello {
    pub session_id: u32,
    pub capabilities: Vec<String>,
}

/// Reply to one request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

impl Reply {
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            outcome: ReplyOutcome::Ok(()),
        }
    }

    pub fn error(message_id: Option<String>, error: &RpcError) -> Self {
        Self {
            message_id,
            outcome: ReplyOutcome::RpcError(ErrorBody::from(error)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyOutcome {
    Ok(()),
    Data(Value),
    RpcError(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorBody {
    pub tag: String,
    pub message: String,
    /// Lock holder, for `lock-denied`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u32>,
}

impl From<&RpcError> for ErrorBody {
    fn from(error: &RpcError) -> Self {
        Self {
            tag: error.tag().to_string(),
            message: error.to_string(),
            session_id: error.holder().map(|id| id.as_u32()),
        }
    }
}

/// Encode a server message as one protocol line.
pub fn encode_line(message: &ServerMessage) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::SessionId;
    use serde_json::json;

    #[test]
    fn parses_client_rpc() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"rpc":{"message-id":"4","operation":"lock","params":{"target":"candidate"}}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Rpc(req) => {
                assert_eq!(req.message_id, "4");
                assert_eq!(req.operation, "lock");
                assert_eq!(req.params["target"], json!("candidate"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn reply_shapes() {
        let ok = serde_json::to_value(ServerMessage::RpcReply(Reply::ok("1"))).unwrap();
        assert_eq!(ok, json!({"rpc-reply": {"message-id": "1", "ok": null}}));

        let denied = RpcError::LockDenied { holder: SessionId::from_raw(3) };
        let err = serde_json::to_value(ServerMessage::RpcReply(Reply::error(Some("2".into()), &denied))).unwrap();
        assert_eq!(err["rpc-reply"]["rpc-error"]["tag"], json!("lock-denied"));
        assert_eq!(err["rpc-reply"]["rpc-error"]["session-id"], json!(3));
    }
}
