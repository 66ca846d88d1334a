//! Structural validation of AI-backend output. Malformed output is never an
//! error to the caller: each structured endpoint has a documented safe
//! default, and the failure is logged with enough context to spot prompt
//! drift.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const VOICE_FALLBACK_RESPONSE: &str =
    "I can help you navigate this page. Try asking me to fill a form or click a button.";

const LOG_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ResponseFormatError {
    #[error("no JSON object found in model output")]
    NoJsonObject,
    #[error("model output failed schema validation: {0}")]
    Schema(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAnalysis {
    pub elements: Vec<PageElement>,
    pub form_fields: Vec<FormField>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub selector: String,
    pub purpose: String,
    pub help_text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    pub validation: String,
    pub help_text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoiceCommandResult {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub response: String,
}

impl VoiceCommandResult {
    pub fn fallback() -> Self {
        Self {
            action: "explain".to_string(),
            target: None,
            response: VOICE_FALLBACK_RESPONSE.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub translated_text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormHelp {
    pub help_text: String,
}

/// First balanced `{...}` span, aware of strings and escapes.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extracts and parses the embedded object. Unknown fields are ignored;
/// missing or wrong-typed required fields fail.
pub fn parse_response<T: DeserializeOwned>(raw: &str) -> Result<T, ResponseFormatError> {
    let object = extract_json_object(raw).ok_or(ResponseFormatError::NoJsonObject)?;
    Ok(serde_json::from_str(object)?)
}

pub fn page_analysis_or_default(raw: &str) -> PageAnalysis {
    parse_response(raw).unwrap_or_else(|err| {
        warn_fallback("analyze", raw, &err);
        PageAnalysis::default()
    })
}

pub fn voice_command_or_default(raw: &str) -> VoiceCommandResult {
    parse_response(raw).unwrap_or_else(|err| {
        warn_fallback("voice-command", raw, &err);
        VoiceCommandResult::fallback()
    })
}

fn warn_fallback(endpoint: &str, raw: &str, err: &ResponseFormatError) {
    let snippet: String = raw.chars().take(LOG_SNIPPET_CHARS).collect();
    tracing::warn!(
        endpoint,
        error = %err,
        output = %snippet,
        "model output failed validation, substituting fallback"
    );
}
