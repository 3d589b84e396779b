//! The reasoning capability behind the decision pipeline.
//!
//! The core treats the model as a black-box classifier/extractor/advisor:
//! three pure calls that return structured JSON, with every malformed or
//! failed response recoverable by a deterministic default downstream.
//!
//! Backends (via rig-core):
//! - **Anthropic** — `ANTHROPIC_API_KEY`
//! - **OpenAI** — `OPENAI_API_KEY`
//! - **Offline** — no model; every call fails fast so the pipeline's
//!   deterministic fallbacks take over.

pub mod prompts;

use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::info;

use crate::config::{ReasonerBackend, ReasonerConfig};
use crate::error::LlmError;
use crate::intake::RawMessage;
use prompts::strip_code_fences;

// ── Wire payloads ───────────────────────────────────────────────────

/// Raw triage payload as returned by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct TriageWire {
    #[serde(default)]
    pub classification: String,
    /// Absent in a malformed response; the caller supplies the default.
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub reason: String,
}

/// Raw extraction payload as returned by the model.
///
/// `purchase_date` stays a string here; normalization happens in the
/// extraction stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionWire {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub customer_address: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub product_serial: Option<String>,
    #[serde(default)]
    pub purchase_date: Option<String>,
    #[serde(default)]
    pub purchase_location: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub issue_description: Option<String>,
    #[serde(default)]
    pub has_proof_of_purchase: bool,
}

/// Raw analysis payload as returned by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisWire {
    #[serde(default)]
    pub recommendation: String,
    /// Absent in a malformed response; the caller supplies the default.
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub policy_references: Vec<String>,
    #[serde(default)]
    pub exclusions_triggered: Vec<String>,
}

/// Structured context handed to the analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub customer_name: String,
    pub product_name: String,
    pub product_id: String,
    pub purchase_date: String,
    pub issue_description: String,
    pub has_proof_of_purchase: bool,
    pub serial_number: String,
    pub warranty_check: String,
    pub policy_excerpts: String,
    pub missing_fields: String,
}

// ── Provider trait ──────────────────────────────────────────────────

/// The external reasoning capability. All three calls are pure — no side
/// effects — and any failure must be recoverable by the caller.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Model identifier, recorded on the claim for provenance.
    fn model_name(&self) -> &str;

    /// Classify a message as CLAIM / NON_CLAIM / SPAM.
    async fn classify(&self, message: &RawMessage) -> Result<TriageWire, LlmError>;

    /// Extract structured claim fields from a message.
    async fn extract(&self, message: &RawMessage) -> Result<ExtractionWire, LlmError>;

    /// Recommend an outcome given the analysis context.
    async fn analyze(&self, context: &AnalysisContext) -> Result<AnalysisWire, LlmError>;
}

// ── rig-core bridge ─────────────────────────────────────────────────

/// Object-safe bridge over a built rig agent.
#[async_trait]
trait PromptModel: Send + Sync {
    async fn prompt_text(&self, prompt: String) -> Result<String, LlmError>;
}

struct AgentPrompter<M: rig::completion::CompletionModel> {
    agent: rig::agent::Agent<M>,
    provider: &'static str,
}

#[async_trait]
impl<M> PromptModel for AgentPrompter<M>
where
    M: rig::completion::CompletionModel + Send + Sync + 'static,
{
    async fn prompt_text(&self, prompt: String) -> Result<String, LlmError> {
        self.agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })
    }
}

/// rig-core-backed reasoning provider.
pub struct RigReasoner {
    inner: Box<dyn PromptModel>,
    provider: &'static str,
    model: String,
    company: String,
}

impl RigReasoner {
    async fn prompt_json<T: for<'de> Deserialize<'de>>(
        &self,
        prompt: String,
    ) -> Result<T, LlmError> {
        let raw = self.inner.prompt_text(prompt).await?;
        let cleaned = strip_code_fences(&raw);
        serde_json::from_str(cleaned).map_err(|e| LlmError::InvalidResponse {
            provider: self.provider.to_string(),
            reason: format!(
                "{e}; raw: {}",
                cleaned.chars().take(200).collect::<String>()
            ),
        })
    }
}

#[async_trait]
impl ReasoningProvider for RigReasoner {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, message: &RawMessage) -> Result<TriageWire, LlmError> {
        self.prompt_json(prompts::triage_prompt(&self.company, message))
            .await
    }

    async fn extract(&self, message: &RawMessage) -> Result<ExtractionWire, LlmError> {
        self.prompt_json(prompts::extraction_prompt(&self.company, message))
            .await
    }

    async fn analyze(&self, context: &AnalysisContext) -> Result<AnalysisWire, LlmError> {
        self.prompt_json(prompts::analysis_prompt(&self.company, context))
            .await
    }
}

/// A provider with no model behind it. Every call fails fast, which pushes
/// the pipeline onto its deterministic fallbacks.
pub struct OfflineReasoner;

#[async_trait]
impl ReasoningProvider for OfflineReasoner {
    fn model_name(&self) -> &str {
        "offline"
    }

    async fn classify(&self, _message: &RawMessage) -> Result<TriageWire, LlmError> {
        Err(offline_error())
    }

    async fn extract(&self, _message: &RawMessage) -> Result<ExtractionWire, LlmError> {
        Err(offline_error())
    }

    async fn analyze(&self, _context: &AnalysisContext) -> Result<AnalysisWire, LlmError> {
        Err(offline_error())
    }
}

fn offline_error() -> LlmError {
    LlmError::RequestFailed {
        provider: "offline".to_string(),
        reason: "no reasoning model configured".to_string(),
    }
}

/// Create a reasoning provider from configuration.
pub fn create_reasoner(
    config: &ReasonerConfig,
    company_name: &str,
) -> Result<Arc<dyn ReasoningProvider>, LlmError> {
    match config.backend {
        ReasonerBackend::Anthropic => create_anthropic(config, company_name),
        ReasonerBackend::OpenAi => create_openai(config, company_name),
        ReasonerBackend::Offline => {
            info!("No reasoning model configured; deterministic fallbacks only");
            Ok(Arc::new(OfflineReasoner))
        }
    }
}

fn create_anthropic(
    config: &ReasonerConfig,
    company_name: &str,
) -> Result<Arc<dyn ReasoningProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    let agent = rig::agent::AgentBuilder::new(model).build();
    info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigReasoner {
        inner: Box::new(AgentPrompter {
            agent,
            provider: "anthropic",
        }),
        provider: "anthropic",
        model: config.model.clone(),
        company: company_name.to_string(),
    }))
}

fn create_openai(
    config: &ReasonerConfig,
    company_name: &str,
) -> Result<Arc<dyn ReasoningProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    let agent = rig::agent::AgentBuilder::new(model).build();
    info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigReasoner {
        inner: Box::new(AgentPrompter {
            agent,
            provider: "openai",
        }),
        provider: "openai",
        model: config.model.clone(),
        company: company_name.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[tokio::test]
    async fn create_provider_with_key_constructs() {
        // rig-core clients accept any string as API key at construction time;
        // the actual auth failure happens when making a request.
        let config = ReasonerConfig {
            backend: ReasonerBackend::Anthropic,
            api_key: SecretString::from("test-key"),
            model: "claude-sonnet-4-20250514".to_string(),
        };
        let provider = create_reasoner(&config, "Meridian Appliance Co.");
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn offline_backend_constructs() {
        let config = ReasonerConfig {
            backend: ReasonerBackend::Offline,
            api_key: SecretString::from(""),
            model: String::new(),
        };
        let provider = create_reasoner(&config, "Meridian Appliance Co.").unwrap();
        assert_eq!(provider.model_name(), "offline");
    }

    #[tokio::test]
    async fn offline_calls_fail_fast() {
        let message = RawMessage {
            id: "m".into(),
            from: "a@b.c".into(),
            to: String::new(),
            subject: String::new(),
            date: None,
            body: String::new(),
            attachments: vec![],
            attachment_text: None,
        };
        let err = OfflineReasoner.classify(&message).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }

    #[test]
    fn wire_payloads_tolerate_missing_fields() {
        let triage: TriageWire = serde_json::from_str(r#"{"classification":"CLAIM"}"#).unwrap();
        assert_eq!(triage.classification, "CLAIM");
        assert!(triage.confidence.is_none());

        let extraction: ExtractionWire = serde_json::from_str("{}").unwrap();
        assert!(extraction.customer_name.is_none());
        assert!(!extraction.has_proof_of_purchase);

        let analysis: AnalysisWire =
            serde_json::from_str(r#"{"recommendation":"APPROVE","confidence":0.8}"#).unwrap();
        assert_eq!(analysis.recommendation, "APPROVE");
        assert_eq!(analysis.confidence, Some(0.8));
        assert!(analysis.facts.is_empty());
    }
}
