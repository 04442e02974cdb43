pub mod engine;
pub mod schema;
pub mod table;

pub use engine::{EngineLayout, EngineRun};
pub use schema::{
    dedupe, expressions, format_keywords, ConceptRecord, ConceptView, FormattedKeywords, Keywords,
    Span,
};

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::engine::EngineInvocation;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no `{stem}` launcher found under {install_dir}")]
    LauncherNotFound { install_dir: PathBuf, stem: String },

    #[error("no engine home (a `bin` directory) found under {0}")]
    HomeNotFound(PathBuf),

    #[error("unexpected file {0} in the table directory; only the extractor may write there")]
    MalformedTableName(PathBuf),

    #[error("failed to read table {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("table {path} has no `{column}` column")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("table {path} has a malformed span `{value}`")]
    BadSpan { path: PathBuf, value: String },

    #[error("terminology engine exited with {code:?}: {stderr}")]
    SubprocessFailed { code: Option<i32>, stderr: String },
}

impl ExtractError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What to do when the engine exits non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failure and parse whatever tables exist.
    #[default]
    Continue,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub install_dir: PathBuf,
    /// Scratch space holding `input/` and `output/`.
    pub work_dir: PathBuf,
    pub pipeline_file: PathBuf,
    pub launcher_stem: String,
    pub on_failure: FailurePolicy,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from("apache-ctakes-6.0.0-bin"),
            work_dir: PathBuf::from("."),
            pipeline_file: PathBuf::from("bsv_table.piper"),
            launcher_stem: "runClinicalPipeline".to_string(),
            on_failure: FailurePolicy::Continue,
        }
    }
}

/// Batch adapter around the external terminology engine.
#[derive(Debug, Clone)]
pub struct ConceptExtractor {
    config: ExtractorConfig,
}

impl ConceptExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn input_dir(&self) -> PathBuf {
        self.config.work_dir.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.work_dir.join("output")
    }

    pub fn table_dir(&self) -> PathBuf {
        self.output_dir().join("bsv_table")
    }

    /// Extract concepts from every pivot-language text in one engine run.
    /// Keys of the result are indexes into `pivot_texts`.
    pub async fn extract(
        &self,
        pivot_texts: &[String],
        api_key: &str,
    ) -> Result<BTreeMap<usize, Keywords>, ExtractError> {
        let input_dir = self.input_dir();
        let output_dir = self.output_dir();

        for dir in [&input_dir, &output_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| ExtractError::io(dir, e))?;
        }

        // Nothing from an earlier batch may be read back as this one's.
        table::remove_files(&input_dir, "txt").await?;
        table::remove_files(&self.table_dir(), "bsv").await?;

        for (index, text) in pivot_texts.iter().enumerate() {
            let path = input_dir.join(format!("{index}.txt"));
            fs::write(&path, text)
                .await
                .map_err(|e| ExtractError::io(&path, e))?;
        }

        let layout = engine::discover(&self.config.install_dir, &self.config.launcher_stem)?;
        let run = engine::run_engine(
            &layout,
            &EngineInvocation {
                input_dir: &input_dir,
                output_dir: &output_dir,
                pipeline_file: &self.config.pipeline_file,
                api_key,
            },
        )
        .await?;

        if run.success() {
            info!(documents = pivot_texts.len(), "Terminology engine completed");
            debug!(stdout = %run.stdout, "Terminology engine output");
        } else {
            error!(code = ?run.code, stderr = %run.stderr, "Terminology engine failed");
            if self.config.on_failure == FailurePolicy::Abort {
                return Err(ExtractError::SubprocessFailed {
                    code: run.code,
                    stderr: run.stderr,
                });
            }
        }

        let mut extracted = BTreeMap::new();
        for table in table::list_tables(&self.table_dir()).await? {
            if table.document >= pivot_texts.len() {
                warn!(
                    document = table.document,
                    path = %table.path.display(),
                    "Ignoring table outside the submitted batch"
                );
                continue;
            }
            let keywords = table::parse_table(&table.path)?;
            let text_len = pivot_texts[table.document].chars().count();
            let out_of_range = keywords
                .values()
                .flatten()
                .filter(|record| !record.span.fits(text_len))
                .count();
            if out_of_range > 0 {
                warn!(
                    document = table.document,
                    records = out_of_range,
                    "Engine spans fall outside the submitted text"
                );
            }
            if extracted.insert(table.document, keywords).is_some() {
                warn!(document = table.document, "Several tables for one document, keeping the last");
            }
        }

        Ok(extracted)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tokio::sync::Mutex;

    // Writing and exec'ing scripts from parallel tests can hit ETXTBSY.
    static ENGINE_LOCK: Mutex<()> = Mutex::const_new(());

    const FAKE_ENGINE: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -i) IN="$2"; shift 2 ;;
    -o) OUT="$2"; shift 2 ;;
    --key) KEY="$2"; shift 2 ;;
    *) shift ;;
  esac
done
[ "$KEY" = "secret" ] || { echo "bad key" >&2; exit 3; }
[ -n "$CTAKES_HOME" ] || { echo "no home" >&2; exit 4; }
mkdir -p "$OUT/bsv_table"
for f in "$IN"/*.txt; do
  n=$(basename "$f" .txt)
  {
    echo ' Document Text | Semantic Group | Span | Negated | Uncertain | CUI '
    echo " $(cat "$f") | Finding | 0, 5 | false | false | C0015967 "
    echo ' alta | Finding | 6,10 | false | false |  '
  } > "$OUT/bsv_table/${n}_table.BSV"
done
echo done
"#;

    fn install_fake_engine(root: &Path) -> ExtractorConfig {
        let bin = root.join("ctakes/bin");
        std::fs::create_dir_all(&bin).unwrap();
        let launcher = bin.join("runClinicalPipeline.sh");
        std::fs::write(&launcher, FAKE_ENGINE).unwrap();
        std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();

        ExtractorConfig {
            install_dir: root.join("ctakes"),
            work_dir: root.join("work"),
            pipeline_file: root.join("pipeline.piper"),
            ..ExtractorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_extract_runs_engine_over_batch() {
        let _guard = ENGINE_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let extractor = ConceptExtractor::new(install_fake_engine(dir.path()));

        // Left over from an earlier, larger batch.
        std::fs::create_dir_all(extractor.table_dir()).unwrap();
        std::fs::write(extractor.table_dir().join("7_table.bsv"), "junk").unwrap();

        let texts = vec!["febre".to_string(), "tosse".to_string()];
        let extracted = extractor.extract(&texts, "secret").await.unwrap();

        assert_eq!(extracted.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(
            extracted[&0].keys().collect::<Vec<_>>(),
            vec!["febre"],
            "rows without codes are dropped"
        );
        assert_eq!(extracted[&1]["tosse"][0].codes, vec!["C0015967"]);
        assert_eq!(extracted[&1]["tosse"][0].span, Span::new(0, 5));
    }

    #[tokio::test]
    async fn test_failed_run_does_not_return_previous_tables() {
        let _guard = ENGINE_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let extractor = ConceptExtractor::new(install_fake_engine(dir.path()));

        let first = extractor
            .extract(&["diabetes".to_string(), "asma".to_string()], "secret")
            .await
            .unwrap();
        assert_eq!(first[&0].keys().collect::<Vec<_>>(), vec!["diabetes"]);

        let second = extractor.extract(&["fever".to_string()], "wrong").await.unwrap();
        assert!(second.is_empty());
        assert!(!extractor.input_dir().join("1.txt").exists());
    }

    #[tokio::test]
    async fn test_engine_failure_follows_policy() {
        let _guard = ENGINE_LOCK.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let config = install_fake_engine(dir.path());
        let texts = vec!["febre".to_string()];

        let lenient = ConceptExtractor::new(config.clone());
        let extracted = lenient.extract(&texts, "wrong").await.unwrap();
        assert!(extracted.is_empty());

        let strict = ConceptExtractor::new(ExtractorConfig {
            on_failure: FailurePolicy::Abort,
            ..config
        });
        match strict.extract(&texts, "wrong").await {
            Err(ExtractError::SubprocessFailed { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("bad key"));
            }
            other => panic!("expected subprocess failure, got {other:?}"),
        }
    }
}
