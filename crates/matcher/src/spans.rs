use std::collections::HashMap;

use extract::{Keywords, Span};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::MatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanPolicy {
    pub case_insensitive: bool,
    /// Remove expressions that never occur in the original text.
    pub drop_unmatched: bool,
}

impl Default for SpanPolicy {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            drop_unmatched: true,
        }
    }
}

/// Overwrite every record's span with its occurrence in `original`
/// (char offsets).
///
/// Records of one expression that share a span form one slot, and the Nth
/// slot takes the Nth occurrence in the text. Slots past the last
/// occurrence reuse it.
pub fn recover_spans(
    original: &str,
    keywords: Keywords,
    policy: &SpanPolicy,
) -> Result<Keywords, MatchError> {
    let keys: Vec<String> = keywords
        .keys()
        .filter(|key| !key.is_empty())
        .cloned()
        .collect();
    if keys.is_empty() {
        return Ok(Keywords::new());
    }

    let fold = |text: &str| {
        if policy.case_insensitive {
            text.to_lowercase()
        } else {
            text.to_string()
        }
    };

    let mut by_fold: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, key) in keys.iter().enumerate() {
        by_fold.entry(fold(key)).or_default().push(i);
    }

    // Longest first, so the longest expression wins at a shared start.
    let mut alternatives: Vec<&String> = keys.iter().collect();
    alternatives.sort_by_key(|key| std::cmp::Reverse(key.chars().count()));
    let pattern = alternatives
        .iter()
        .map(|key| regex::escape(key))
        .collect::<Vec<_>>()
        .join("|");
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(policy.case_insensitive)
        .build()?;

    let mut occurrences: Vec<Vec<Span>> = vec![Vec::new(); keys.len()];
    let mut at = 0;
    let (mut seen_byte, mut seen_char) = (0, 0);

    while at <= original.len() {
        let Some(found) = regex.find_at(original, at) else {
            break;
        };

        seen_char += original[seen_byte..found.start()].chars().count();
        seen_byte = found.start();

        // The match itself and every shorter expression starting here.
        let mut chars = 0;
        for (offset, c) in found.as_str().char_indices() {
            chars += 1;
            let prefix = &found.as_str()[..offset + c.len_utf8()];
            if let Some(indices) = by_fold.get(&fold(prefix)) {
                for &i in indices {
                    occurrences[i].push(Span::new(seen_char, seen_char + chars));
                }
            }
        }

        at = found.start()
            + original[found.start()..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
    }

    let mut recovered = Keywords::new();
    for (key, found) in keys.into_iter().zip(occurrences) {
        let Some(mut records) = keywords.get(&key).cloned() else {
            continue;
        };

        if found.is_empty() {
            warn!(expression = %key, "Expression not found in the original text");
            if !policy.drop_unmatched {
                recovered.insert(key, records);
            }
            continue;
        }

        let mut slots: Vec<Span> = Vec::new();
        for record in &mut records {
            let slot = match slots.iter().position(|span| *span == record.span) {
                Some(slot) => slot,
                None => {
                    slots.push(record.span);
                    slots.len() - 1
                }
            };
            record.span = found[slot.min(found.len() - 1)];
        }

        if slots.len() > found.len() {
            debug!(
                expression = %key,
                slots = slots.len(),
                occurrences = found.len(),
                "Fewer occurrences than extracted slots, reusing the last one"
            );
        }

        recovered.insert(key, records);
    }

    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::ConceptRecord;

    fn record(code: &str, start: usize, end: usize) -> ConceptRecord {
        ConceptRecord {
            codes: vec![code.to_string()],
            negated: false,
            uncertain: false,
            span: Span::new(start, end),
            semantic_group: "Finding".to_string(),
        }
    }

    fn spans(keywords: &Keywords, key: &str) -> Vec<Span> {
        keywords[key].iter().map(|r| r.span).collect()
    }

    #[test]
    fn test_nth_occurrence_goes_to_nth_slot() {
        let original = "Febre alta. Sem febre hoje, febre ontem.";
        let mut keywords = Keywords::new();
        keywords.insert(
            "febre".to_string(),
            vec![record("C1", 0, 5), record("C2", 0, 5), record("C1", 20, 25)],
        );

        let recovered = recover_spans(original, keywords, &SpanPolicy::default()).unwrap();

        assert_eq!(
            spans(&recovered, "febre"),
            vec![Span::new(0, 5), Span::new(0, 5), Span::new(16, 21)]
        );
    }

    #[test]
    fn test_offsets_are_chars() {
        let original = "Índice cardio-torácico normal.";
        let mut keywords = Keywords::new();
        keywords.insert("normal".to_string(), vec![record("C1", 0, 6)]);

        let recovered = recover_spans(original, keywords, &SpanPolicy::default()).unwrap();

        assert_eq!(spans(&recovered, "normal"), vec![Span::new(23, 29)]);
        assert!(recovered["normal"][0].span.fits(original.chars().count()));
    }

    #[test]
    fn test_overlapping_and_nested_expressions() {
        let original = "dor de cabeça";
        let mut keywords = Keywords::new();
        keywords.insert("dor de cabeça".to_string(), vec![record("C1", 0, 8)]);
        keywords.insert("dor".to_string(), vec![record("C2", 0, 4)]);
        keywords.insert("de cabeça".to_string(), vec![record("C3", 4, 8)]);

        let recovered = recover_spans(original, keywords, &SpanPolicy::default()).unwrap();

        assert_eq!(spans(&recovered, "dor de cabeça"), vec![Span::new(0, 13)]);
        assert_eq!(spans(&recovered, "dor"), vec![Span::new(0, 3)]);
        assert_eq!(spans(&recovered, "de cabeça"), vec![Span::new(4, 13)]);
    }

    #[test]
    fn test_unmatched_expression_policy() {
        let original = "Pulmões transparentes.";
        let mut keywords = Keywords::new();
        keywords.insert("pulmões".to_string(), vec![record("C1", 0, 5)]);
        keywords.insert("derrame".to_string(), vec![record("C2", 9, 16)]);

        let dropped = recover_spans(original, keywords.clone(), &SpanPolicy::default()).unwrap();
        assert_eq!(dropped.keys().collect::<Vec<_>>(), vec!["pulmões"]);

        let kept = recover_spans(
            original,
            keywords,
            &SpanPolicy {
                drop_unmatched: false,
                ..SpanPolicy::default()
            },
        )
        .unwrap();
        assert_eq!(spans(&kept, "derrame"), vec![Span::new(9, 16)]);
    }

    #[test]
    fn test_case_sensitive_policy() {
        let original = "FEBRE";
        let mut keywords = Keywords::new();
        keywords.insert("febre".to_string(), vec![record("C1", 0, 5)]);

        let policy = SpanPolicy {
            case_insensitive: false,
            ..SpanPolicy::default()
        };
        assert!(recover_spans(original, keywords, &policy).unwrap().is_empty());
    }

    #[test]
    fn test_recovery_is_idempotent() {
        let original = "Tosse seca. Tosse produtiva há 3 dias. tosse";
        let mut keywords = Keywords::new();
        keywords.insert(
            "tosse".to_string(),
            vec![record("C1", 0, 5), record("C2", 12, 17), record("C3", 40, 45), record("C4", 50, 55)],
        );
        keywords.insert("dias".to_string(), vec![record("C5", 30, 34)]);

        let policy = SpanPolicy::default();
        let once = recover_spans(original, keywords, &policy).unwrap();
        let twice = recover_spans(original, once.clone(), &policy).unwrap();

        assert_eq!(once, twice);
        assert_eq!(spans(&once, "tosse")[3], Span::new(39, 44));
    }
}
