//! Connector to the generative backend plus the pass-through prompts the
//! assistant endpoints send it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-pro";

const ANALYZE_HTML_LIMIT: usize = 5000;
const PAGE_CONTEXT_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// One model completion: the raw text and, when the backend reported it,
/// the token count that feeds the cost ledger.
#[derive(Clone, Debug, Default)]
pub struct Completion {
    pub text: String,
    pub total_tokens: Option<u64>,
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Completion, BackendError>;

    fn model(&self) -> &str;
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn generate_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let model = self.model.trim();
        if model.starts_with("models/") {
            format!("{base}/{model}:generateContent")
        } else {
            format!("{base}/models/{model}:generateContent")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Value>,
    #[serde(default)]
    usage_metadata: Option<Value>,
}

fn candidate_text(candidate: &Value) -> String {
    let Some(parts) = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };

    let mut text = String::new();
    for part in parts {
        if let Some(chunk) = part.get("text").and_then(Value::as_str) {
            text.push_str(chunk);
        }
    }
    text
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<Completion, BackendError> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(self.generate_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, body });
        }

        let parsed = response.json::<GenerateContentResponse>().await?;
        let text = parsed
            .candidates
            .first()
            .map(candidate_text)
            .unwrap_or_default();
        let total_tokens = parsed
            .usage_metadata
            .as_ref()
            .and_then(|usage| usage.get("totalTokenCount"))
            .and_then(Value::as_u64);

        Ok(Completion { text, total_tokens })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Character-based clip, matching how the upstream prompt limits are counted.
fn clip(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn page_analysis_prompt(html: &str) -> String {
    format!(
        "Analyze this HTML and identify all interactive elements, forms, and their purposes. \
         Return JSON with elements and formFields arrays.\n\nHTML:\n{}\n\nReturn format:\n{{\n  \
         \"elements\": [{{\"type\": \"button\", \"selector\": \"#submit\", \"purpose\": \"Submit form\", \
         \"helpText\": \"Click to submit\"}}],\n  \"formFields\": [{{\"name\": \"email\", \"type\": \"email\", \
         \"required\": true, \"validation\": \"Valid email required\", \"helpText\": \"Enter your email address\"}}]\n}}",
        clip(html, ANALYZE_HTML_LIMIT)
    )
}

pub fn translation_prompt(text: &str, target_lang: &str) -> String {
    format!(
        "Translate the following text to {target_lang}. Return only the translation, no explanations:\n\n{text}"
    )
}

pub fn voice_command_prompt(command: &str, page_context: &str) -> String {
    format!(
        "User voice command: \"{command}\"\nPage context: {}\n\nDetermine the action to take. Return JSON:\n\
         {{\n  \"action\": \"click|fill|navigate|explain|read\",\n  \"target\": \"selector or element description\",\n  \
         \"response\": \"Natural language response to user\"\n}}",
        clip(page_context, PAGE_CONTEXT_LIMIT)
    )
}

pub fn form_help_prompt(field_name: &str, field_type: &str, context: &str) -> String {
    format!(
        "Generate helpful guidance for a form field:\nField name: {field_name}\nField type: {field_type}\n\
         Context: {context}\n\nProvide a brief, helpful explanation (1-2 sentences) about what to enter."
    )
}
