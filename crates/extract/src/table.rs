use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::schema::{ConceptRecord, Keywords, Span};
use crate::ExtractError;

const DOCUMENT_TEXT: &str = "Document Text";
const SEMANTIC_GROUP: &str = "Semantic Group";
const SPAN: &str = "Span";
const NEGATED: &str = "Negated";
const UNCERTAIN: &str = "Uncertain";
const CUI: &str = "CUI";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFile {
    pub path: PathBuf,
    pub document: usize,
}

/// Leading `<index>_` of a table file name.
pub fn document_index(path: &Path) -> Result<usize, ExtractError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ExtractError::MalformedTableName(path.to_path_buf()))?;

    let (index, _) = stem
        .split_once('_')
        .ok_or_else(|| ExtractError::MalformedTableName(path.to_path_buf()))?;

    index
        .parse()
        .map_err(|_| ExtractError::MalformedTableName(path.to_path_buf()))
}

/// Every `.bsv` table in `dir`, ordered by document index. A missing
/// directory means the engine produced nothing.
pub async fn list_tables(dir: &Path) -> Result<Vec<TableFile>, ExtractError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ExtractError::io(dir, e)),
    };

    let mut tables = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ExtractError::io(dir, e))?
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_table = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("bsv"));
        if is_table {
            let document = document_index(&path)?;
            tables.push(TableFile { path, document });
        }
    }

    tables.sort_by(|a, b| a.document.cmp(&b.document).then_with(|| a.path.cmp(&b.path)));
    Ok(tables)
}

/// Delete every file in `dir` with extension `ext` (any case). A missing
/// directory is already clean.
pub async fn remove_files(dir: &Path, ext: &str) -> Result<(), ExtractError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ExtractError::io(dir, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ExtractError::io(dir, e))?
    {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if matches && path.is_file() {
            fs::remove_file(&path)
                .await
                .map_err(|e| ExtractError::io(&path, e))?;
        }
    }
    Ok(())
}

pub fn parse_table(path: &Path) -> Result<Keywords, ExtractError> {
    let reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .flexible(true)
        .from_path(path)
        .map_err(|source| ExtractError::Table {
            path: path.to_path_buf(),
            source,
        })?;

    parse_records(reader, path)
}

fn parse_records<R: io::Read>(
    mut reader: csv::Reader<R>,
    path: &Path,
) -> Result<Keywords, ExtractError> {
    let table_error = |source| ExtractError::Table {
        path: path.to_path_buf(),
        source,
    };

    let headers = reader.headers().map_err(table_error)?.clone();
    let column = |name: &'static str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| ExtractError::MissingColumn {
                path: path.to_path_buf(),
                column: name,
            })
    };

    let text_col = column(DOCUMENT_TEXT)?;
    let group_col = column(SEMANTIC_GROUP)?;
    let span_col = column(SPAN)?;
    let negated_col = column(NEGATED)?;
    let uncertain_col = column(UNCERTAIN)?;
    let cui_col = column(CUI)?;

    let mut keywords = Keywords::new();

    for row in reader.records() {
        let row = row.map_err(table_error)?;
        let cell = |col: usize| row.get(col).unwrap_or("").trim();

        let codes: Vec<String> = cell(cui_col)
            .split(';')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect();
        if codes.is_empty() {
            continue;
        }

        let text = cell(text_col);
        if text.is_empty() {
            debug!(path = %path.display(), "Skipping row without document text");
            continue;
        }

        let span = Span::parse(cell(span_col)).ok_or_else(|| ExtractError::BadSpan {
            path: path.to_path_buf(),
            value: cell(span_col).to_string(),
        })?;

        keywords
            .entry(text.to_string())
            .or_default()
            .push(ConceptRecord {
                codes,
                negated: parse_flag(cell(negated_col)),
                uncertain: parse_flag(cell(uncertain_col)),
                span,
                semantic_group: cell(group_col).to_string(),
            });
    }

    Ok(keywords)
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}
