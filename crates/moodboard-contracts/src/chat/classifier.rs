use serde::{Deserialize, Serialize};

pub const DEFAULT_SAVE_KEYWORDS: &[&str] = &["add", "ref", "style", "salva", "mood"];

/// Caption keywords that turn a photo into a style reference even when the
/// conversation is not collecting references. Substring match, lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionKeywords {
    keywords: Vec<String>,
}

impl Default for CaptionKeywords {
    fn default() -> Self {
        Self::new(DEFAULT_SAVE_KEYWORDS.iter().copied())
    }
}

impl CaptionKeywords {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for keyword in keywords {
            let value = keyword.as_ref().trim().to_lowercase();
            if !value.is_empty() && !normalized.contains(&value) {
                normalized.push(value);
            }
        }
        Self {
            keywords: normalized,
        }
    }

    pub fn keywords(&self) -> &[String] {
        self.keywords.as_slice()
    }

    pub fn matches(&self, caption: &str) -> bool {
        let normalized = normalize_caption(caption);
        if normalized.is_empty() {
            return false;
        }
        self.keywords
            .iter()
            .any(|keyword| normalized.contains(keyword.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveTrigger {
    SessionMode,
    Caption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoIntent {
    SaveAsReference { via: SaveTrigger },
    TreatAsSubject,
}

impl PhotoIntent {
    pub fn is_save(self) -> bool {
        matches!(self, Self::SaveAsReference { .. })
    }
}

pub fn normalize_caption(caption: &str) -> String {
    caption.trim().to_lowercase()
}

pub fn classify(session_mode: bool, caption: &str, keywords: &CaptionKeywords) -> PhotoIntent {
    if session_mode {
        return PhotoIntent::SaveAsReference {
            via: SaveTrigger::SessionMode,
        };
    }
    if keywords.matches(caption) {
        return PhotoIntent::SaveAsReference {
            via: SaveTrigger::Caption,
        };
    }
    PhotoIntent::TreatAsSubject
}
