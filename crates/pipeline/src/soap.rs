use std::sync::LazyLock;

use llm::{CompletionClient, LlmError, QueryRequest};
use regex::Regex;

/// Written in place of a section the source text says nothing about.
pub const PLACEHOLDER: &str = "Sem dados informados.";

/// Canonical headers, in note order.
pub const HEADERS: [&str; 4] = ["S: Subjetivo", "O: Objetivo", "A: Avaliação", "P: Plano"];

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*[SOAP][ \t]*:[ \t]*(subjetivo|objetivo|avalia[cç][aã]o|plano)\b[ \t]*:?")
        .expect("header pattern is valid")
});
static TRAILING_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ ]+\n").expect("trailing space pattern is valid"));
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank run pattern is valid"));

pub fn build_soap_prompt(text: &str) -> String {
    format!(
        r#"You are a clinical assistant that generates SOAP notes in a fixed format.

Tasks:
1) Read ONLY the text provided.
2) Extract and organize the content into SOAP format.
3) Reply ONLY with the SOAP note, in Portuguese (Brazil), following the structure below. No explanations, markdown, or extra text.

Rules:
- Language: Portuguese (Brazil).
- Do NOT invent data. If a section has no information, write: "{PLACEHOLDER}"
- Remove HTML, tags, or formatting.
- Follow exactly this structure and blank lines.
- Never translate the labels (keep S, O, A, P exactly as below).

Output format (copy exactly):

S: Subjetivo

<texto subjetivo>

O: Objetivo

<texto objetivo>

A: Avaliação

<texto de avaliação>

P: Plano

<texto de plano>

Input text (in Portuguese):
{text}
"#
    )
}

/// Restructure a free-text note into SOAP sections.
pub async fn generate_soap<C>(client: &C, text: &str) -> Result<String, LlmError>
where
    C: CompletionClient + ?Sized,
{
    let raw = client
        .query(&QueryRequest::new(build_soap_prompt(text), ""))
        .await?;
    Ok(normalize_soap_text(&raw))
}

fn section_of(label: &str) -> usize {
    match label.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('s') => 0,
        Some('o') => 1,
        Some('a') => 2,
        _ => 3,
    }
}

fn clean_block(block: &str) -> String {
    let block = TRAILING_SPACES.replace_all(block, "\n");
    BLANK_RUNS.replace_all(block.trim(), "\n\n").into_owned()
}

/// Canonicalize headers and spacing. The result always holds the four
/// headers in order, each followed by one blank line, and ends with a
/// single newline.
pub fn normalize_soap_text(raw: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n").replace('\t', " ");

    let headers: Vec<_> = HEADER.captures_iter(&text).collect();
    let preamble_end = headers
        .first()
        .and_then(|c| c.get(0))
        .map_or(text.len(), |m| m.start());

    let mut bodies: [Vec<String>; 4] = Default::default();
    for (i, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let body_end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());

        let body = clean_block(&text[whole.end()..body_end]);
        if !body.is_empty() {
            bodies[section_of(label.as_str())].push(body);
        }
    }

    let mut note = String::new();
    let preamble = clean_block(&text[..preamble_end]);
    if !preamble.is_empty() {
        note.push_str(&preamble);
        note.push_str("\n\n");
    }

    for (header, body) in HEADERS.iter().zip(&bodies) {
        note.push_str(header);
        note.push_str("\n\n");
        if body.is_empty() {
            note.push_str(PLACEHOLDER);
        } else {
            note.push_str(&body.join("\n\n"));
        }
        note.push_str("\n\n");
    }

    let mut note = note.trim_end().to_string();
    note.push('\n');
    note
}
