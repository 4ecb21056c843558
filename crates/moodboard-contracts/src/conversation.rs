use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Key scoping every piece of per-chat state (references, session mode).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ConversationId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Handle to image content. Resolution to bytes happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// Bytes hosted by the transport, fetched on demand with `token`.
    Remote { token: String },
    Local { path: PathBuf },
    Inline {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ImageRef {
    pub fn remote(token: impl Into<String>) -> Self {
        Self::Remote {
            token: token.into(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local { path: path.into() }
    }

    pub fn inline(bytes: Vec<u8>, mime_type: Option<&str>) -> Self {
        Self::Inline {
            bytes,
            mime_type: mime_type.map(str::to_string),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Remote { .. } => "remote",
            Self::Local { .. } => "local",
            Self::Inline { .. } => "inline",
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local { path } => Some(path.as_path()),
            _ => None,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BASE64
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
