pub mod retry;
pub mod soap;
pub mod translator;

pub use retry::{BoundedRetry, Exhausted, RetryConfig};
pub use soap::{generate_soap, normalize_soap_text};
pub use translator::translate;

use std::collections::BTreeMap;

use extract::{dedupe, format_keywords, ConceptExtractor, ExtractError, FormattedKeywords, Keywords};
use llm::{CompletionClient, LlmError};
use matcher::{MatchError, Matcher, MatcherConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("language model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("concept extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("matching failed: {0}")]
    Match(#[from] MatchError),

    #[error("document {document}: matching exhausted after {attempts} attempts")]
    ExhaustedRetries {
        document: usize,
        attempts: usize,
        last_error: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub use_soap: bool,
    pub strict_retry: bool,
    pub retry: RetryConfig,
    pub matcher: MatcherConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_soap: false,
            strict_retry: true,
            retry: RetryConfig::default(),
            matcher: MatcherConfig::default(),
        }
    }
}

/// Per-request switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    pub use_soap: bool,
    /// Retry matching until it yields concepts, failing the document when
    /// attempts run out.
    pub strict_retry: bool,
}

#[derive(Debug)]
pub struct DocumentOutcome {
    pub index: usize,
    pub concepts: Result<FormattedKeywords, PipelineError>,
}

#[derive(Debug)]
pub struct ProcessOutput {
    /// Input texts, SOAP-normalized when requested.
    pub texts: Vec<String>,
    /// One outcome per input text, in input order.
    pub documents: Vec<DocumentOutcome>,
}

impl ProcessOutput {
    pub fn failures(&self) -> impl Iterator<Item = (usize, &PipelineError)> {
        self.documents
            .iter()
            .filter_map(|doc| doc.concepts.as_ref().err().map(|e| (doc.index, e)))
    }

    pub fn concept_count(&self) -> usize {
        self.documents
            .iter()
            .filter_map(|doc| doc.concepts.as_ref().ok())
            .map(|concepts| concepts.values().map(Vec::len).sum::<usize>())
            .sum()
    }
}

/// Drives normalize -> translate -> batch extract -> match for a batch of
/// original-language texts.
pub struct Pipeline {
    extractor: ConceptExtractor,
    matcher: Matcher,
    retry: BoundedRetry,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(extractor: ConceptExtractor, config: PipelineConfig) -> Self {
        Self {
            extractor,
            matcher: Matcher::new(config.matcher.clone()),
            retry: BoundedRetry::from_config(&config.retry),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn default_options(&self) -> ProcessOptions {
        ProcessOptions {
            use_soap: self.config.use_soap,
            strict_retry: self.config.strict_retry,
        }
    }

    /// Transport and extraction failures abort the whole batch; matching
    /// failures only fail their own document.
    pub async fn process<C>(
        &self,
        client: &C,
        texts: &[String],
        api_key: &str,
        options: ProcessOptions,
    ) -> Result<ProcessOutput, PipelineError>
    where
        C: CompletionClient + ?Sized,
    {
        let mut originals = Vec::with_capacity(texts.len());
        for text in texts {
            if options.use_soap {
                originals.push(generate_soap(client, text).await?);
            } else {
                originals.push(text.clone());
            }
        }

        let languages = &self.config.matcher.languages;
        let mut translations = Vec::with_capacity(originals.len());
        for text in &originals {
            translations.push(translate(client, languages, text).await?);
        }
        info!(documents = originals.len(), "Translated batch");

        let extracted = self.extractor.extract(&translations, api_key).await?;

        let documents = self
            .match_extracted(client, &originals, &translations, &extracted, options.strict_retry)
            .await;

        Ok(ProcessOutput {
            texts: originals,
            documents,
        })
    }

    /// Match every document of an extraction result. Documents without
    /// extracted concepts come back empty without a model call.
    pub async fn match_extracted<C>(
        &self,
        client: &C,
        originals: &[String],
        translations: &[String],
        extracted: &BTreeMap<usize, Keywords>,
        strict_retry: bool,
    ) -> Vec<DocumentOutcome>
    where
        C: CompletionClient + ?Sized,
    {
        let mut documents = Vec::with_capacity(originals.len());

        for (index, (original, pivot)) in originals.iter().zip(translations).enumerate() {
            let keywords = match extracted.get(&index) {
                Some(keywords) if !keywords.is_empty() => keywords,
                Some(_) => {
                    info!(document = index, "No concepts extracted");
                    documents.push(DocumentOutcome {
                        index,
                        concepts: Ok(FormattedKeywords::new()),
                    });
                    continue;
                }
                None => {
                    warn!(document = index, "Terminology engine produced no table");
                    documents.push(DocumentOutcome {
                        index,
                        concepts: Ok(FormattedKeywords::new()),
                    });
                    continue;
                }
            };

            let matched = self
                .match_document(client, index, original, pivot, keywords, strict_retry)
                .await;
            if let Err(e) = &matched {
                error!(document = index, error = %e, "Document failed");
            }

            documents.push(DocumentOutcome {
                index,
                concepts: matched.map(|keywords| format_keywords(&dedupe(&keywords))),
            });
        }

        documents
    }

    async fn match_document<C>(
        &self,
        client: &C,
        index: usize,
        original: &str,
        pivot: &str,
        keywords: &Keywords,
        strict_retry: bool,
    ) -> Result<Keywords, PipelineError>
    where
        C: CompletionClient + ?Sized,
    {
        if !strict_retry {
            return Ok(self
                .matcher
                .match_keywords(client, original, pivot, keywords)
                .await?);
        }

        let matcher = &self.matcher;
        self.retry
            .run(
                "match_keywords",
                move |_| matcher.match_keywords(client, original, pivot, keywords),
                |matched: &Keywords| !matched.is_empty(),
            )
            .await
            .map_err(|exhausted| PipelineError::ExhaustedRetries {
                document: index,
                attempts: exhausted.attempts,
                last_error: exhausted.last_error.map(|e| e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{ConceptRecord, ExtractorConfig, Span};
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

    fn pipeline() -> Pipeline {
        Pipeline::new(
            ConceptExtractor::new(ExtractorConfig::default()),
            PipelineConfig::default(),
        )
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_only_their_document() {
        let originals = strings(&["documento zero com febre", "paciente com febre"]);
        let translations = strings(&["document zero with fever", "patient with fever"]);

        let mut extracted = BTreeMap::new();
        for index in 0..2 {
            let mut keywords = Keywords::new();
            keywords.insert("fever".to_string(), vec![record("C0015967", "Finding", 0, 5)]);
            extracted.insert(index, keywords);
        }

        let client = MockClient::new(|request| {
            if request.user_prompt.contains("documento zero") {
                Ok("{}".to_string())
            } else {
                Ok(r#"{"fever": "febre"}"#.to_string())
            }
        });

        let documents = pipeline()
            .match_extracted(&client, &originals, &translations, &extracted, true)
            .await;

        assert_eq!(documents.len(), 2);
        assert!(matches!(
            documents[0].concepts,
            Err(PipelineError::ExhaustedRetries { document: 0, attempts: 4, .. })
        ));
        let concepts = documents[1].concepts.as_ref().unwrap();
        assert_eq!(concepts["febre"][0].spans, vec![Span::new(13, 18)]);
        assert_eq!(client.requests().len(), 5);
    }

    #[tokio::test]
    async fn test_lenient_mode_accepts_empty_result() {
        let originals = strings(&["febre"]);
        let translations = strings(&["fever"]);
        let mut keywords = Keywords::new();
        keywords.insert("fever".to_string(), vec![record("C1", "Finding", 0, 5)]);
        let extracted = BTreeMap::from([(0, keywords)]);

        let client = MockClient::replying(["{}"]);
        let documents = pipeline()
            .match_extracted(&client, &originals, &translations, &extracted, false)
            .await;

        assert!(documents[0].concepts.as_ref().unwrap().is_empty());
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_model_errors() {
        let originals = strings(&["dor lombar"]);
        let translations = strings(&["low back pain"]);
        let mut keywords = Keywords::new();
        keywords.insert(
            "low back pain".to_string(),
            vec![
                record("C0024031", "Symptom", 0, 13),
                record("C0024032", "Symptom", 0, 13),
                record("C0024033", "Disorder", 0, 13),
            ],
        );
        let extracted = BTreeMap::from([(0, keywords)]);

        let client = MockClient::replying(["not json", "{}", r#"{"low back pain": "dor lombar"}"#]);
        let documents = pipeline()
            .match_extracted(&client, &originals, &translations, &extracted, true)
            .await;

        let concepts = documents[0].concepts.as_ref().unwrap();
        let codes: Vec<&str> = concepts["dor lombar"]
            .iter()
            .map(|c| c.codes[0].as_str())
            .collect();
        assert_eq!(codes, vec!["C0024031", "C0024033"]);
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_documents_without_concepts_skip_the_model() {
        let originals = strings(&["sem achados", "nada"]);
        let translations = strings(&["no findings", "nothing"]);
        let extracted = BTreeMap::from([(0, Keywords::new())]);

        let client = MockClient::replying(Vec::<String>::new());
        let documents = pipeline()
            .match_extracted(&client, &originals, &translations, &extracted, true)
            .await;

        assert_eq!(documents.iter().map(|d| d.index).collect::<Vec<_>>(), vec![0, 1]);
        assert!(documents.iter().all(|d| d.concepts.as_ref().unwrap().is_empty()));
        assert!(client.requests().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runs_every_stage() {
        use std::os::unix::fs::PermissionsExt;

        const FAKE_ENGINE: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -i) IN="$2"; shift 2 ;;
    -o) OUT="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$OUT/bsv_table"
for f in "$IN"/*.txt; do
  n=$(basename "$f" .txt)
  printf '%s\n' ' Document Text | Semantic Group | Span | Negated | Uncertain | CUI ' \
    ' fever | Finding | 10,15 | false | false | C0015967 ' > "$OUT/bsv_table/${n}_out.bsv"
done
"#;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("engine/bin");
        std::fs::create_dir_all(&bin).unwrap();
        let launcher = bin.join("runClinicalPipeline.sh");
        std::fs::write(&launcher, FAKE_ENGINE).unwrap();
        std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();

        let extractor = ConceptExtractor::new(ExtractorConfig {
            install_dir: dir.path().join("engine"),
            work_dir: dir.path().join("work"),
            pipeline_file: dir.path().join("pipeline.piper"),
            ..ExtractorConfig::default()
        });
        let pipeline = Pipeline::new(extractor, PipelineConfig::default());

        let client = MockClient::new(|request| {
            if request.schema.is_some() {
                Ok(r#"{"fever": "febre"}"#.to_string())
            } else if request.system_prompt.is_empty() {
                Ok("S: Subjetivo\nPaciente com febre.".to_string())
            } else {
                Ok("Patient with fever.".to_string())
            }
        });

        let output = pipeline
            .process(
                &client,
                &strings(&["Paciente com febre."]),
                "secret",
                ProcessOptions {
                    use_soap: true,
                    strict_retry: true,
                },
            )
            .await
            .unwrap();

        assert!(output.texts[0].starts_with("S: Subjetivo\n\nPaciente com febre."));
        assert_eq!(output.failures().count(), 0);
        assert_eq!(output.concept_count(), 1);

        let concepts = output.documents[0].concepts.as_ref().unwrap();
        assert_eq!(concepts["febre"][0].spans, vec![Span::new(27, 32)]);
    }
}
