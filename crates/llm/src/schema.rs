use serde_json::{json, Map, Value};

/// Output constraint for guided decoding: an object whose keys are exactly
/// the requested fields, each a required string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidedSchema {
    fields: Vec<String>,
}

impl GuidedSchema {
    pub fn string_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn to_json(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|field| (field.clone(), json!({ "type": "string" })))
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_field_is_a_required_string() {
        let schema = GuidedSchema::string_fields(["fever", "chest pain"]).to_json();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["fever"]["type"], "string");
        assert_eq!(schema["properties"]["chest pain"]["type"], "string");
        assert_eq!(schema["required"], json!(["fever", "chest pain"]));
    }
}
