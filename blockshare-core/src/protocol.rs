//! Wire protocol: message types exchanged with peers and the index server.

use serde::{Deserialize, Serialize};

use crate::descriptor::FileDescriptor;

/// One candidate peer for a file, as reported by the index server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub ip: String,
    pub port: u16,
    /// Path the sharing peer serves the file under.
    pub filename: String,
    pub file_descriptor: FileDescriptor,
    /// Per-share secret used to authenticate with that peer.
    pub secret: String,
}

impl Source {
    /// `ip:port` for logging.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// All wire message types. Encoding is one JSON object per line (see wire module),
/// discriminated by a `"type"` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Message {
    AuthenticateRequest {
        secret: String,
    },
    AuthenticateReply {
        success: bool,
    },
    WelcomeMsg {
        text: String,
    },
    ErrorMsg {
        text: String,
    },
    /// Ask a sharing peer for one block; `block_hash` pins the expected content.
    BlockRequest {
        filename: String,
        block_hash: String,
        block_index: usize,
    },
    BlockReply {
        filename: String,
        file_hash: String,
        block_index: usize,
        #[serde(rename = "dataBase64", with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Ends a connection's request/reply phase.
    Goodbye,

    // Index server requests and replies.
    LookupRequest {
        filename: String,
        file_hash: String,
    },
    LookupReply {
        sources: Vec<Source>,
    },
    ShareRequest {
        file_descriptor: FileDescriptor,
        filename: String,
        secret: String,
        port: u16,
    },
    ShareReply {
        num_sharers: u32,
    },
    SearchRequest {
        max_hits: u32,
        keywords: Vec<String>,
    },
    SearchReply {
        hits: Vec<Source>,
        seed_counts: Vec<u32>,
    },
    DropShareRequest {
        filename: String,
        file_hash: String,
        secret: String,
        port: u16,
    },
    DropShareReply {
        success: bool,
    },
}

impl Message {
    pub fn error(text: impl Into<String>) -> Self {
        Message::ErrorMsg { text: text.into() }
    }

    /// Variant name, for logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::AuthenticateRequest { .. } => "AuthenticateRequest",
            Message::AuthenticateReply { .. } => "AuthenticateReply",
            Message::WelcomeMsg { .. } => "WelcomeMsg",
            Message::ErrorMsg { .. } => "ErrorMsg",
            Message::BlockRequest { .. } => "BlockRequest",
            Message::BlockReply { .. } => "BlockReply",
            Message::Goodbye => "Goodbye",
            Message::LookupRequest { .. } => "LookupRequest",
            Message::LookupReply { .. } => "LookupReply",
            Message::ShareRequest { .. } => "ShareRequest",
            Message::ShareReply { .. } => "ShareReply",
            Message::SearchRequest { .. } => "SearchRequest",
            Message::SearchReply { .. } => "SearchReply",
            Message::DropShareRequest { .. } => "DropShareRequest",
            Message::DropShareReply { .. } => "DropShareReply",
        }
    }
}

/// Block bytes as standard Base64 text.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
