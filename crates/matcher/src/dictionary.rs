use std::collections::HashSet;

use indexmap::IndexMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase, and strip punctuation at the edges. Inner hyphens and
/// apostrophes stay, so compound words remain one word.
fn process(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Strip diacritics for comparison.
fn fold(word: &str) -> String {
    word.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Similarity in `[0, 1]`: `2 * LCS / (|a| + |b|)`, i.e. one minus the
/// normalized insert/delete distance.
pub fn quick_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let lcs = prev[b.len()];
    2.0 * lcs as f64 / (a.len() + b.len()) as f64
}

/// Words of a source text. Comparison happens on folded forms, but
/// corrections return the surface word so it can still be found in the
/// source.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    words: IndexMap<String, String>,
    surfaces: HashSet<String>,
}

impl Vocabulary {
    pub fn from_text(text: &str) -> Self {
        let mut words = IndexMap::new();
        let mut surfaces = HashSet::new();
        for word in text.split_whitespace().map(process) {
            if word.is_empty() {
                continue;
            }
            words.entry(fold(&word)).or_insert_with(|| word.clone());
            surfaces.insert(word);
        }
        Self { words, surfaces }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Closest vocabulary word; first one wins on ties.
    pub fn best_match(&self, word: &str) -> Option<(&str, f64)> {
        let query = fold(&process(word));
        let mut best: Option<(&str, f64)> = None;

        for (folded, surface) in &self.words {
            let score = quick_ratio(&query, folded);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((surface.as_str(), score));
            }
        }

        best
    }

    /// A word already present in the text, up to case and edge punctuation,
    /// is never swapped for a different one.
    pub fn correct_word(&self, word: &str, threshold: f64) -> String {
        let processed = process(word);
        if self.surfaces.contains(&processed) {
            return processed;
        }
        match self.best_match(word) {
            Some((surface, score)) if score >= threshold => surface.to_string(),
            _ => word.to_string(),
        }
    }

    /// Correct each whitespace-separated word independently.
    pub fn correct_phrase(&self, phrase: &str, threshold: f64) -> String {
        phrase
            .split_whitespace()
            .map(|word| self.correct_word(word, threshold))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
