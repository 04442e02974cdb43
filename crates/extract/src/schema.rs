use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Expression as it appears in a text -> every concept found for it, in
/// first-seen order.
pub type Keywords = IndexMap<String, Vec<ConceptRecord>>;

/// Human-readable form handed to callers.
pub type FormattedKeywords = IndexMap<String, Vec<ConceptView>>;

/// Character span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Parse the engine's `"start,end"` field. Whitespace anywhere is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let (start, end) = compact.split_once(',')?;
        Some(Self::new(start.parse().ok()?, end.parse().ok()?))
    }

    pub fn fits(&self, text_len: usize) -> bool {
        self.start < self.end && self.end <= text_len
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub codes: Vec<String>,
    pub negated: bool,
    pub uncertain: bool,
    pub span: Span,
    pub semantic_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptView {
    #[serde(rename = "cui")]
    pub codes: Vec<String>,
    pub negated: bool,
    pub uncertain: bool,
    pub spans: Vec<Span>,
    #[serde(rename = "semanticGroup")]
    pub semantic_group: String,
}

impl ConceptRecord {
    pub fn to_view(&self) -> ConceptView {
        ConceptView {
            codes: self.codes.clone(),
            negated: self.negated,
            uncertain: self.uncertain,
            spans: vec![self.span],
            semantic_group: self.semantic_group.clone(),
        }
    }
}

/// Keep the first record of each semantic group per expression.
pub fn dedupe(keywords: &Keywords) -> Keywords {
    keywords
        .iter()
        .map(|(expression, records)| {
            let mut seen = HashSet::new();
            let kept = records
                .iter()
                .filter(|record| seen.insert(record.semantic_group.as_str()))
                .cloned()
                .collect();
            (expression.clone(), kept)
        })
        .collect()
}

pub fn format_keywords(keywords: &Keywords) -> FormattedKeywords {
    keywords
        .iter()
        .map(|(expression, records)| {
            (
                expression.clone(),
                records.iter().map(ConceptRecord::to_view).collect(),
            )
        })
        .collect()
}

pub fn expressions(keywords: &Keywords) -> Vec<&str> {
    keywords.keys().map(String::as_str).collect()
}
