use llm::{CompletionClient, LlmError, QueryRequest};
use matcher::Languages;

pub fn system_prompt(languages: &Languages) -> String {
    format!(
        "You are a professional translator. You will receive a {original} text and you should translate it to {pivot}. \
If there's a better translation in the medical context, that is, it's more common to use a certain phrase or term, \
you can change the text as long as it means the same thing. Only output the translated text and nothing more.",
        original = languages.original,
        pivot = languages.pivot,
    )
}

/// Translate into the pivot language. The output language is not checked.
pub async fn translate<C>(client: &C, languages: &Languages, text: &str) -> Result<String, LlmError>
where
    C: CompletionClient + ?Sized,
{
    client
        .query(&QueryRequest::new(text, system_prompt(languages)))
        .await
}
