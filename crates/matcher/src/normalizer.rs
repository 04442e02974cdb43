use extract::Keywords;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{MatchError, PairedText};

/// Cut trailing parenthetical commentary, then trim to the first and last
/// alphabetic characters.
pub fn filter_garbage(phrase: &str) -> &str {
    let phrase = match phrase.find('(') {
        Some(open) => &phrase[..=open],
        None => phrase,
    };

    let Some(start) = phrase.find(char::is_alphabetic) else {
        return "";
    };
    let end = phrase
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(start);

    &phrase[start..end]
}

/// Read the model's `{pivot: original}` object into pairs, in reply order.
pub fn parse_pairs(reply: &str, keywords: &Keywords) -> Result<Vec<PairedText>, MatchError> {
    let object: IndexMap<String, Value> = serde_json::from_str(reply)?;

    let mut pairs = Vec::with_capacity(object.len());
    for (pivot_raw, value) in &object {
        let Some(original_raw) = value.as_str() else {
            warn!(pivot = %pivot_raw, "Correlation is not a string, skipping");
            continue;
        };

        let trimmed = pivot_raw.trim();
        let pivot = if keywords.contains_key(trimmed) {
            trimmed
        } else {
            filter_garbage(pivot_raw)
        };
        let original = filter_garbage(original_raw);

        if pivot.is_empty() || original.is_empty() {
            debug!(pivot = %pivot_raw, original = %original_raw, "Nothing left after cleanup, skipping");
            continue;
        }

        pairs.push(PairedText {
            original: original.to_string(),
            pivot: pivot.to_string(),
        });
    }

    Ok(pairs)
}
