use async_trait::async_trait;
use regex::bytes::{Regex, RegexBuilder};
use std::sync::LazyLock;

use super::{Classification, InspectionError, Inspector};

/// Substrings that mark a file as infected, matched case-insensitively.
pub const SUSPICIOUS_KEYWORDS: [&str; 3] = ["rm -rf", "eval", "bitcoin"];

static KEYWORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = SUSPICIOUS_KEYWORDS
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&alternation)
        .case_insensitive(true)
        .unicode(false)
        .build()
        .expect("keyword alternation is a valid pattern")
});

/// Classify raw bytes. Pure: the same input always yields the same verdict.
/// Bytes need not be valid UTF-8.
pub fn classify(data: &[u8]) -> Classification {
    if KEYWORD_PATTERN.is_match(data) {
        Classification::Infected
    } else {
        Classification::Clean
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordInspector;

#[async_trait]
impl Inspector for KeywordInspector {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn inspect(&self, data: &[u8]) -> Result<Classification, InspectionError> {
        Ok(classify(data))
    }
}
