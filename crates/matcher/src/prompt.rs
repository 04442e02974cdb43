use crate::Languages;

pub fn system_prompt(languages: &Languages) -> String {
    format!(
        r#"You're being given 2 reports, one of them is the original report in {original} while the other is a translated version in {pivot}.
Your job is to correlate important words, or phrases, from the {pivot} one to the {original} one.
You will receive which words and phrases you should correlate.
Your output is a json with each term and their match.

Output Rules:
1. Respond ONLY with the direct correspondences between the terms.
2. Do NOT explain, comment, or add any text besides these pairs.
3. Copy the {original} phrase exactly as it is written in the original report.

You'll receive the content as follows:
- Original: [<original text goes here>]
- Translated: {{<translated text goes here>}}
- Target Words to Correlate: {{"<{pivot} phrase/term1>", "<{pivot} phrase/term2>"}}

JSON Correlated Terms:
{{
    "<{pivot} phrase/term1>": "<{original} phrase/term1>",
    "<{pivot} phrase/term2>": "<{original} phrase/term2>"
}}"#,
        original = languages.original,
        pivot = languages.pivot,
    )
}

pub fn build_match_prompt(original_text: &str, translated_text: &str, targets: &[&str]) -> String {
    let target_words = targets
        .iter()
        .map(|t| format!("{t:?}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"- Original: [{original_text}]

- Translated: {{{translated_text}}}

- Target Words to Correlate: {{{target_words}}}

JSON Correlated Terms:"#
    )
}
