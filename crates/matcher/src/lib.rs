pub mod dictionary;
pub mod normalizer;
pub mod prompt;
pub mod spans;

pub use dictionary::Vocabulary;
pub use spans::{recover_spans, SpanPolicy};

use extract::{expressions, Keywords};
use llm::{CompletionClient, GuidedSchema, LlmError, QueryRequest};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("correlation reply is not a JSON object: {0}")]
    SchemaViolation(#[from] serde_json::Error),

    #[error("failed to build the expression pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A correlation proposed by the model, before it is checked against the
/// extracted expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedText {
    pub original: String,
    pub pivot: String,
}

impl PairedText {
    /// Replace drifted words of the original phrase with the closest words
    /// of the source text.
    pub fn corrected(self, vocabulary: &Vocabulary, threshold: f64) -> Self {
        Self {
            original: vocabulary.correct_phrase(&self.original, threshold),
            pivot: self.pivot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Languages {
    pub original: String,
    pub pivot: String,
}

impl Default for Languages {
    fn default() -> Self {
        Self {
            original: "Portuguese".to_string(),
            pivot: "English".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub languages: Languages,
    pub temperature: f32,
    pub fuzzy_threshold: f64,
    pub spans: SpanPolicy,
    pub verbose: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            languages: Languages::default(),
            temperature: 0.1,
            fuzzy_threshold: 0.6,
            spans: SpanPolicy::default(),
            verbose: false,
        }
    }
}

/// Re-key extracted concepts under their original-language phrases. Pairs
/// naming an unknown pivot phrase are dropped.
pub fn fuse_pairs(pairs: &[PairedText], keywords: &Keywords) -> Keywords {
    let mut fused = Keywords::new();

    for pair in pairs {
        if pair.original.is_empty() {
            continue;
        }
        match keywords.get(&pair.pivot) {
            Some(records) => {
                fused.insert(pair.original.clone(), records.clone());
            }
            None => warn!(
                pivot = %pair.pivot,
                original = %pair.original,
                "Matched phrase is not an extracted expression, probably hallucinated"
            ),
        }
    }

    fused
}

pub struct Matcher {
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Correlate pivot-language expressions back onto the original text and
    /// recover their spans there.
    pub async fn match_keywords<C>(
        &self,
        client: &C,
        original_text: &str,
        pivot_text: &str,
        keywords: &Keywords,
    ) -> Result<Keywords, MatchError>
    where
        C: CompletionClient + ?Sized,
    {
        if keywords.is_empty() {
            return Ok(Keywords::new());
        }

        let targets = expressions(keywords);
        let request = QueryRequest::new(
            prompt::build_match_prompt(original_text, pivot_text, &targets),
            prompt::system_prompt(&self.config.languages),
        )
        .with_schema(GuidedSchema::string_fields(targets.iter().copied()))
        .with_temperature(self.config.temperature)
        .verbose(self.config.verbose);

        let reply = client.query(&request).await?;
        let pairs = normalizer::parse_pairs(&reply, keywords)?;

        let vocabulary = Vocabulary::from_text(original_text);
        let pairs: Vec<PairedText> = pairs
            .into_iter()
            .map(|pair| pair.corrected(&vocabulary, self.config.fuzzy_threshold))
            .collect();
        debug!(pairs = pairs.len(), expressions = keywords.len(), "Correlated expressions");

        let fused = fuse_pairs(&pairs, keywords);
        recover_spans(original_text, fused, &self.config.spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{ConceptRecord, Span};
    use llm::mock::MockClient;

    fn record(code: &str, group: &str, start: usize, end: usize) -> ConceptRecord {
        ConceptRecord {
            codes: vec![code.to_string()],
            negated: false,
            uncertain: false,
            span: Span::new(start, end),
            semantic_group: group.to_string(),
        }
    }

    fn pair(original: &str, pivot: &str) -> PairedText {
        PairedText {
            original: original.to_string(),
            pivot: pivot.to_string(),
        }
    }

    #[test]
    fn test_fuse_rekeys_known_expressions() {
        let mut keywords = Keywords::new();
        keywords.insert("febre".to_string(), vec![record("C1", "Finding", 0, 5)]);

        let fused = fuse_pairs(&[pair("fever", "febre")], &keywords);

        assert_eq!(fused.keys().collect::<Vec<_>>(), vec!["fever"]);
        assert_eq!(fused["fever"], keywords["febre"]);
    }

    #[test]
    fn test_fuse_drops_hallucinated_pivot() {
        let mut keywords = Keywords::new();
        keywords.insert("fever".to_string(), vec![record("C1", "Finding", 0, 5)]);

        let pairs = [pair("dor de cabeça", "headache"), pair("febre", "fever")];
        let fused = fuse_pairs(&pairs, &keywords);

        assert_eq!(fused.keys().collect::<Vec<_>>(), vec!["febre"]);
        for (key, records) in &fused {
            assert!(pairs.iter().any(|p| &p.original == key));
            assert!(keywords.values().any(|input| input == records));
        }
    }

    #[tokio::test]
    async fn test_match_keywords_end_to_end() {
        let original = "Paciente com febre alta e tose seca. Nega dor torácica.";
        let pivot = "Patient with high fever and dry cough. Denies chest pain.";

        let mut keywords = Keywords::new();
        keywords.insert("fever".to_string(), vec![record("C0015967", "Finding", 18, 23)]);
        keywords.insert("cough".to_string(), vec![record("C0010200", "Finding", 32, 37)]);
        keywords.insert(
            "chest pain".to_string(),
            vec![ConceptRecord {
                negated: true,
                ..record("C0008031", "Finding", 46, 56)
            }],
        );

        let client = MockClient::replying([r#"{
            "fever": "febre",
            "cough": "tosse (dry cough)",
            "chest pain": "Dor toracica",
            "headache": "cefaleia"
        }"#]);

        let matched = Matcher::new(MatcherConfig::default())
            .match_keywords(&client, original, pivot, &keywords)
            .await
            .unwrap();

        assert_eq!(
            matched.keys().collect::<Vec<_>>(),
            vec!["febre", "tose", "dor torácica"]
        );
        assert_eq!(matched["febre"][0].span, Span::new(13, 18));
        assert_eq!(matched["tose"][0].span, Span::new(26, 30));
        assert_eq!(matched["dor torácica"][0].span, Span::new(42, 54));
        assert!(matched["dor torácica"][0].negated);

        let request = &client.requests()[0];
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(
            request.schema.as_ref().map(|s| s.fields().len()),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_hyphenated_phrase_keeps_its_span() {
        let original = "Índice cardio-torácico normal.";
        let mut keywords = Keywords::new();
        keywords.insert(
            "cardiothoracic index".to_string(),
            vec![record("C0425802", "Finding", 0, 20)],
        );

        let client = MockClient::replying([r#"{"cardiothoracic index": "Índice cardio-torácico"}"#]);
        let matched = Matcher::new(MatcherConfig::default())
            .match_keywords(&client, original, "Normal cardiothoracic index.", &keywords)
            .await
            .unwrap();

        assert_eq!(matched.keys().collect::<Vec<_>>(), vec!["índice cardio-torácico"]);
        assert_eq!(matched["índice cardio-torácico"][0].span, Span::new(0, 22));
    }

    #[tokio::test]
    async fn test_empty_keywords_skip_the_model() {
        let client = MockClient::replying(Vec::<String>::new());
        let matched = Matcher::new(MatcherConfig::default())
            .match_keywords(&client, "texto", "text", &Keywords::new())
            .await
            .unwrap();

        assert!(matched.is_empty());
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_surfaced() {
        let mut keywords = Keywords::new();
        keywords.insert("fever".to_string(), vec![record("C1", "Finding", 0, 5)]);
        let client = MockClient::replying(["fever - febre"]);

        let result = Matcher::new(MatcherConfig::default())
            .match_keywords(&client, "febre", "fever", &keywords)
            .await;

        assert!(matches!(result, Err(MatchError::SchemaViolation(_))));
    }
}
