use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Reserved `system` content: the server is shutting down and the client
/// must close its side of the connection.
pub const SHUTDOWN_CONTENT: &str = "__SHUTDOWN__";

/// Reserved `system` content prefix: a client announcing its name as its
/// first message on a fresh connection. System records carry no sender, so
/// the name travels in the content.
pub const JOIN_CONTENT_PREFIX: &str = "__JOIN__:";

/// Scheduling class of a message; lower is more urgent.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Priority {
    System = 0,
    Text = 1,
    File = 2,
}

/// One application-level message record, JSON-encoded inside segment
/// payloads.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatMessage {
    Text {
        sender: String,
        recipient: String,
        timestamp: u64,
        content: String,
    },
    File {
        sender: String,
        recipient: String,
        timestamp: u64,
        name: String,
        mime: String,
        size: u64,
        /// Base64 of the file bytes.
        data: String,
    },
    System {
        timestamp: u64,
        content: String,
        /// Present only on the roster snapshot sent to a newly attached
        /// peer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        roster: Option<Vec<String>>,
    },
}

impl ChatMessage {
    pub fn text(sender: &str, recipient: &str, content: &str) -> ChatMessage {
        ChatMessage::Text {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            timestamp: timestamp_now(),
            content: content.to_string(),
        }
    }

    pub fn file(sender: &str, recipient: &str, name: &str, bytes: &[u8]) -> ChatMessage {
        ChatMessage::File {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            timestamp: timestamp_now(),
            name: name.to_string(),
            mime: mime_for(name).to_string(),
            size: bytes.len() as u64,
            data: BASE64.encode(bytes),
        }
    }

    pub fn system(content: impl Into<String>) -> ChatMessage {
        ChatMessage::System {
            timestamp: timestamp_now(),
            content: content.into(),
            roster: None,
        }
    }

    /// The roster snapshot for a newly attached peer.
    pub fn roster(names: Vec<String>) -> ChatMessage {
        ChatMessage::System {
            timestamp: timestamp_now(),
            content: format!("currently connected: {}", names.join(", ")),
            roster: Some(names),
        }
    }

    pub fn join_announcement(name: &str) -> ChatMessage {
        ChatMessage::system(format!("{}{}", JOIN_CONTENT_PREFIX, name))
    }

    pub fn shutdown() -> ChatMessage {
        ChatMessage::system(SHUTDOWN_CONTENT)
    }

    /// The peer name carried by a join announcement, if this is one.
    pub fn join_name(&self) -> Option<&str> {
        match self {
            ChatMessage::System { content, .. } => content.strip_prefix(JOIN_CONTENT_PREFIX),
            _ => None,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, ChatMessage::System { content, .. } if content == SHUTDOWN_CONTENT)
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            ChatMessage::Text { sender, .. } | ChatMessage::File { sender, .. } => Some(sender),
            ChatMessage::System { .. } => None,
        }
    }

    pub fn recipient(&self) -> Option<&str> {
        match self {
            ChatMessage::Text { recipient, .. } | ChatMessage::File { recipient, .. } => {
                Some(recipient)
            }
            ChatMessage::System { .. } => None,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            ChatMessage::System { .. } => Priority::System,
            ChatMessage::Text { .. } => Priority::Text,
            ChatMessage::File { .. } => Priority::File,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("chat message encoding cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<ChatMessage> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The decoded file bytes, for file records.
    pub fn file_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ChatMessage::File { data, .. } => Ok(BASE64.decode(data.as_bytes())?),
            _ => anyhow::bail!("not a file message"),
        }
    }
}

fn timestamp_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time is before the UNIX epoch")
        .as_millis() as u64
}

fn mime_for(name: &str) -> &'static str {
    match name.rsplit('.').next().unwrap_or("").to_ascii_lowercase().as_str() {
        "txt" | "md" | "log" => "text/plain",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
