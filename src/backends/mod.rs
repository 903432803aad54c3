//! Backend client factory and the engine-facing invocation contract.
//!
//! [`BackendClient`] is an enum that wraps a concrete provider adapter chosen
//! at construction time from [`BackendConfig::kind`]. All routing code
//! interacts with the same small API (`chat_completions`, `health_check`);
//! adapter-specific protocol differences — schema translation, auth
//! headers, endpoint paths — are fully encapsulated in the adapter modules.
//! [`BackendFleet`] implements the engine's [`BackendInvoker`] and
//! [`ProbeSource`] traits over the whole registered set.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAIAdapter;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::time::Instant;

use crate::config::{BackendConfig, BackendKind};
use crate::engine::forwarding::{BackendInvoker, GenerateFuture, GenerationResult, TransportError};
use crate::engine::health::{ProbeFuture, ProbeSource};

/// Unified backend client — enum dispatch over concrete provider adapters.
pub enum BackendClient {
    OpenAI(OpenAIAdapter),
    Anthropic(AnthropicAdapter),
    Ollama(OllamaAdapter),
}

impl BackendClient {
    /// Build a backend client from config, resolving any API key from the environment.
    ///
    /// # Errors
    /// Returns an error if the configured `api_key_env` variable is required
    /// but unset in the environment (Anthropic always requires a key).
    pub fn new(cfg: &BackendConfig) -> anyhow::Result<Self> {
        let base_url = cfg.base_url.trim_end_matches('/').to_string();
        let api_key = cfg.api_key();

        Ok(match cfg.kind {
            BackendKind::OpenAI => Self::OpenAI(OpenAIAdapter::new(base_url, cfg.timeout_ms, api_key)),
            BackendKind::Ollama => Self::Ollama(OllamaAdapter::new(base_url, cfg.timeout_ms)),
            BackendKind::Anthropic => {
                let key = api_key.ok_or_else(|| {
                    let env_var = cfg.api_key_env.as_deref().unwrap_or("<unset>");
                    anyhow::anyhow!("Anthropic backend requires an API key; set the `{env_var}` environment variable")
                })?;
                Self::Anthropic(AnthropicAdapter::new(base_url, cfg.timeout_ms, key))
            }
        })
    }

    /// Forward a `/v1/chat/completions`-shaped request to the configured backend.
    pub async fn chat_completions(&self, request: Value) -> anyhow::Result<Value> {
        match self {
            Self::OpenAI(a) => a.chat_completions(request).await,
            Self::Anthropic(a) => a.chat_completions(request).await,
            Self::Ollama(a) => a.chat_completions(request).await,
        }
    }

    /// Probe this backend for liveness. Implementation varies by provider.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        match self {
            Self::OpenAI(a) => a.health_check().await,
            Self::Anthropic(a) => a.health_check().await,
            Self::Ollama(a) => a.health_check().await,
        }
    }

    /// Run one prompt-in, text-out generation by wrapping it in a minimal
    /// single-turn chat completions request.
    async fn generate_text(&self, prompt: &str, model: &str) -> anyhow::Result<GenerationResult> {
        let request = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response = self.chat_completions(request).await?;
        let text = response
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("backend response missing choices[0].message.content"))?
            .to_string();
        let token_count = response
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(GenerationResult { text, token_count })
    }
}

/// The full set of constructed backend clients, keyed by backend id.
///
/// Implements the engine's [`BackendInvoker`] and [`ProbeSource`] traits so
/// the forwarding controller and health prober can drive real backends
/// through the same abstract contract they use in tests.
pub struct BackendFleet {
    clients: HashMap<String, Arc<BackendClient>>,
}

impl BackendFleet {
    pub fn new(clients: HashMap<String, BackendClient>) -> Self {
        Self {
            clients: clients.into_iter().map(|(id, c)| (id, Arc::new(c))).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&BackendClient> {
        self.clients.get(id).map(|c| c.as_ref())
    }
}

impl BackendInvoker for BackendFleet {
    fn generate(&self, backend_id: &str, prompt: &str, model: &str, _deadline: Instant) -> GenerateFuture {
        let backend_id = backend_id.to_string();
        let prompt = prompt.to_string();
        let model = model.to_string();
        match self.clients.get(&backend_id) {
            None => Box::pin(async move { Err(TransportError::Transport(format!("no client for backend `{backend_id}`"))) }),
            Some(client) => {
                let client = Arc::clone(client);
                Box::pin(async move {
                    client
                        .generate_text(&prompt, &model)
                        .await
                        .map_err(|e| TransportError::Transport(e.to_string()))
                })
            }
        }
    }
}

impl ProbeSource for BackendFleet {
    fn probe(&self, backend_id: &str) -> ProbeFuture {
        let backend_id_owned = backend_id.to_string();
        match self.clients.get(backend_id) {
            None => Box::pin(async move { Err(format!("no client for backend `{backend_id_owned}`")) }),
            Some(client) => {
                let client = Arc::clone(client);
                Box::pin(async move { client.health_check().await.map_err(|e| e.to_string()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{HardwareClass, ModelCapability};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg_for(server: &MockServer) -> BackendConfig {
        BackendConfig {
            kind: BackendKind::OpenAI,
            base_url: server.uri(),
            api_key_env: None,
            timeout_ms: 5_000,
            hardware_class: HardwareClass::IntegratedGpu,
            nominal_power_watts: 10.0,
            nominal_latency_ms: 100,
            priority: 1,
            capability: ModelCapability::default(),
            enabled: true,
        }
    }

    fn ok_completion_body() -> serde_json::Value {
        json!({
            "choices": [{
                "message": {
                    "content": "Here is a comprehensive response that is definitely long enough."
                }
            }]
        })
    }

    #[test]
    fn new_succeeds_without_api_key() {
        let cfg = BackendConfig {
            kind: BackendKind::OpenAI,
            base_url: "http://localhost:11434".into(),
            api_key_env: None,
            timeout_ms: 5_000,
            hardware_class: HardwareClass::IntegratedGpu,
            nominal_power_watts: 10.0,
            nominal_latency_ms: 100,
            priority: 1,
            capability: ModelCapability::default(),
            enabled: true,
        };
        assert!(BackendClient::new(&cfg).is_ok());
    }

    #[tokio::test]
    async fn chat_completions_returns_parsed_json_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_completion_body()))
            .mount(&server)
            .await;

        let client = BackendClient::new(&cfg_for(&server)).unwrap();
        let result = client.chat_completions(json!({"model": "test", "messages": []})).await;
        assert!(result.is_ok(), "expected Ok, got: {result:?}");
        assert!(result.unwrap().pointer("/choices/0/message/content").is_some());
    }

    #[tokio::test]
    async fn chat_completions_errors_on_non_2xx_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = BackendClient::new(&cfg_for(&server))
            .unwrap()
            .chat_completions(json!({"model": "test", "messages": []}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn health_check_returns_ok_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": "list", "data": [] })))
            .mount(&server)
            .await;

        assert!(BackendClient::new(&cfg_for(&server)).unwrap().health_check().await.is_ok());
    }

    #[tokio::test]
    async fn fleet_generate_invokes_the_matching_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_completion_body()))
            .mount(&server)
            .await;

        let mut clients = HashMap::new();
        clients.insert("a".to_string(), BackendClient::new(&cfg_for(&server)).unwrap());
        let fleet = BackendFleet::new(clients);

        let result = fleet.generate("a", "hi", "test-model", Instant::now() + std::time::Duration::from_secs(5)).await;
        assert!(result.is_ok());
        assert!(result.unwrap().text.contains("comprehensive"));
    }

    #[tokio::test]
    async fn fleet_generate_reports_transport_error_for_unknown_backend() {
        let fleet = BackendFleet::new(HashMap::new());
        let result = fleet.generate("ghost", "hi", "test-model", Instant::now() + std::time::Duration::from_secs(5)).await;
        assert!(matches!(result, Err(TransportError::Transport(_))));
    }
}
