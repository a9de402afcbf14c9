use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::warn;

use crate::config::GatewaySection;
use crate::job::VariantOutcome;
use crate::plan::{ContentFormat, VariantSpec};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("generator returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generator returned empty content")]
    EmptyContent,
    #[error("generator rejected the request: {0}")]
    Rejected(String),
    #[error("generation gateway endpoint not configured")]
    NotConfigured,
}

/// What the generator is asked to produce for one planned variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationRequest {
    pub target: String,
    pub slot_index: usize,
    pub prompt: String,
    pub max_length: usize,
    pub format: ContentFormat,
    pub parameters: BTreeMap<String, String>,
}

impl GenerationRequest {
    pub fn from_spec(spec: &VariantSpec) -> Self {
        Self {
            target: spec.target.name().to_string(),
            slot_index: spec.slot_index,
            prompt: render_prompt(spec),
            max_length: spec.constraints.max_length,
            format: spec.constraints.format,
            parameters: spec.prompt_params.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedContent {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedContent, GatewayError>;
}

pub struct HttpGenerationGateway {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpGenerationGateway {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &GatewaySection) -> Result<Self, GatewayError> {
        let endpoint = config.endpoint.clone().ok_or(GatewayError::NotConfigured)?;
        Ok(Self::new(endpoint, config.model.clone()))
    }
}

#[derive(Debug, Serialize)]
struct GatewayCall<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a GenerationRequest,
}

#[async_trait]
impl GenerationGateway for HttpGenerationGateway {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedContent, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GatewayCall {
                model: &self.model,
                request: &request,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let mut generated = response.json::<GeneratedContent>().await?;
        let trimmed = generated.content.trim();
        if trimmed.is_empty() {
            return Err(GatewayError::EmptyContent);
        }
        generated.content = fit_to_length(trimmed, request.max_length);
        Ok(generated)
    }
}

/// Calls the gateway for one spec, bounded by `limit`. Errors and timeouts
/// become a failed outcome for that slot.
pub async fn generate_outcome(
    gateway: &dyn GenerationGateway,
    spec: &VariantSpec,
    limit: Duration,
) -> VariantOutcome {
    let request = GenerationRequest::from_spec(spec);
    match timeout(limit, gateway.generate(request)).await {
        Ok(Ok(generated)) => VariantOutcome::generated(generated.content),
        Ok(Err(err)) => {
            warn!(target: "gateway", slot = %spec.key(), "generation failed: {err}");
            VariantOutcome::failed(err.to_string())
        }
        Err(_) => {
            warn!(target: "gateway", slot = %spec.key(), "timeout after {:?}", limit);
            VariantOutcome::failed(format!("generation timed out after {}ms", limit.as_millis()))
        }
    }
}

pub fn render_prompt(spec: &VariantSpec) -> String {
    let mut prompt = match spec.param("content") {
        Some(content) => format!(
            "Rewrite the following copy as a {} variant.\nSource: {}\n",
            spec.target, content
        ),
        None => format!(
            "Write {} copy for {} promoting {}.\n",
            spec.constraints.format,
            spec.target,
            spec.param("brand").unwrap_or("the brand"),
        ),
    };
    for (label, key) in [
        ("Asset", "asset"),
        ("Asset notes", "asset_description"),
        ("Voice", "voice"),
        ("Audience", "audience"),
        ("Call to action", "call_to_action"),
        ("Angle", "angle"),
    ] {
        if let Some(value) = spec.param(key) {
            prompt.push_str(&format!("{label}: {value}\n"));
        }
    }
    prompt.push_str(&format!(
        "Stay within {} characters.\n",
        spec.constraints.max_length
    ));
    prompt
}

/// Truncates to at most `max_chars` characters, preferring the last
/// whitespace boundary when one exists in the second half of the text.
pub fn fit_to_length(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let cut: String = content.chars().take(max_chars).collect();
    match cut.rfind(char::is_whitespace) {
        Some(index) if cut[..index].chars().count() * 2 >= max_chars => {
            cut[..index].trim_end().to_string()
        }
        _ => cut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Constraints, LengthBucket, VariantTarget};

    fn spec() -> VariantSpec {
        let mut prompt_params = BTreeMap::new();
        prompt_params.insert("brand".to_string(), "Acme".to_string());
        prompt_params.insert("angle".to_string(), "urgency".to_string());
        VariantSpec {
            target: VariantTarget::Platform("x".into()),
            slot_index: 0,
            constraints: Constraints {
                max_length: 280,
                format: ContentFormat::Post,
            },
            prompt_params,
        }
    }

    #[test]
    fn fit_prefers_word_boundary() {
        assert_eq!(fit_to_length("short", 10), "short");
        assert_eq!(fit_to_length("hello brave new world", 14), "hello brave");
        assert_eq!(fit_to_length("abcdefghij", 4), "abcd");
        assert_eq!(fit_to_length("café au lait", 4).chars().count(), 4);
    }

    #[test]
    fn prompt_mentions_constraints_and_params() {
        let prompt = render_prompt(&spec());
        assert!(prompt.contains("post copy for x promoting Acme"));
        assert!(prompt.contains("Angle: urgency"));
        assert!(prompt.contains("280 characters"));
    }

    #[test]
    fn bucket_prompt_uses_source_content() {
        let mut bucket = spec();
        bucket.target = VariantTarget::Bucket(LengthBucket::Short);
        bucket
            .prompt_params
            .insert("content".to_string(), "Big sale".to_string());
        let prompt = render_prompt(&bucket);
        assert!(prompt.starts_with("Rewrite the following copy as a short variant."));
        assert!(prompt.contains("Source: Big sale"));
    }

    struct Slow;

    #[async_trait]
    impl GenerationGateway for Slow {
        async fn generate(&self, _request: GenerationRequest) -> Result<GeneratedContent, GatewayError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(GatewayError::EmptyContent)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_becomes_failed_outcome() {
        let outcome = generate_outcome(&Slow, &spec(), Duration::from_millis(50)).await;
        assert_eq!(
            outcome,
            VariantOutcome::failed("generation timed out after 50ms")
        );
    }
}
