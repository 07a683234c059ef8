use crate::error::{OracleError, Result};
use crate::oracle::ReasoningOracle;
use crate::prompt::StructuredPrompt;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Fields a completion endpoint may put its text in, in lookup order
const CONTENT_FIELDS: &[&str] = &["content", "output", "text", "response", "completion"];

/// Oracle backed by a JSON-over-HTTP completion endpoint.
///
/// Posts `{model, prompt, structured_prompt, response_schema}` and reads the
/// answer from the first string field in [`CONTENT_FIELDS`], or takes the body
/// verbatim. Transport failures and non-2xx statuses count as unavailability.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    api_key: Option<String>,
}

impl HttpOracle {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("drift/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OracleError::unavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: None,
            api_key: None,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReasoningOracle for HttpOracle {
    fn name(&self) -> &str {
        self.model.as_deref().unwrap_or("http")
    }

    async fn reason(&self, prompt: &StructuredPrompt) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": prompt.render_text(),
            "structured_prompt": prompt,
            "response_schema": prompt.response_schema,
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OracleError::unavailable(format!("{}: {e}", self.endpoint)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::unavailable(format!(
                "{} returned {status}",
                self.endpoint
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|e| OracleError::unavailable(format!("{}: {e}", self.endpoint)))?;
        Ok(extract_content(&text))
    }
}

fn extract_content(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for field in CONTENT_FIELDS {
            if let Some(Value::String(text)) = map.get(*field) {
                return text.clone();
            }
        }
    }
    body.to_string()
}
