use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CLIPBOARD_ID: &str = "default";
const KEY_PREFIX: &str = "clipboard:";

/// User-chosen name partitioning independent shared buffers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClipboardId(String);

impl ClipboardId {
    /// Normalizes missing or empty input to `"default"`.
    pub fn new(raw: Option<&str>) -> Self {
        match raw {
            Some(id) if !id.is_empty() => ClipboardId(id.to_owned()),
            _ => ClipboardId(DEFAULT_CLIPBOARD_ID.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn store_key(&self) -> String {
        format!("{}{}", KEY_PREFIX, self.0)
    }
}

impl Default for ClipboardId {
    fn default() -> Self {
        ClipboardId::new(None)
    }
}

impl fmt::Display for ClipboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipboardId {
    fn from(s: &str) -> Self {
        ClipboardId::new(Some(s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardRecord {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl ClipboardRecord {
    pub fn new(content: impl Into<String>, timestamp: i64) -> Self {
        ClipboardRecord {
            content: content.into(),
            timestamp,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp == 0
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
