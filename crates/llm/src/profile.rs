use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named decoding presets. Callers pick a profile by name instead of
/// passing raw sampling parameters around.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodingProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat: Option<u32>,
}

impl DecodingProfile {
    /// Recommended non-thinking defaults for the Qwen3 family.
    pub fn qwen3() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(0.8),
            top_k: Some(20),
            min_p: Some(0.0),
            presence_penalty: Some(1.5),
            frequency_penalty: Some(0.0),
            mirostat: Some(0),
        }
    }

    pub fn gpt_oss() -> Self {
        Self {
            temperature: Some(1.0),
            top_p: Some(1.0),
            ..Self::default()
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "qwen3" => Some(Self::qwen3()),
            "gpt-oss" | "gpt_oss" => Some(Self::gpt_oss()),
            "raw" | "none" => Some(Self::default()),
            _ => None,
        }
    }

    /// Profile with the temperature replaced when an override is given.
    pub fn with_temperature(&self, temperature: Option<f32>) -> Self {
        let mut profile = self.clone();
        if temperature.is_some() {
            profile.temperature = temperature;
        }
        profile
    }

    pub(crate) fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        }
    }
}
