use crate::config::config::AssistantCfg;
use crate::orchestrator::client::ModelClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Emitted when every upstream provider failed; callers always receive a
/// structured value, never an error.
pub const FALLBACK_SOURCE: &str = "fallback_default";

const FALLBACK_TEXT: &str = "[assistant unavailable] no upstream provider responded";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssistantReply {
    pub text: String,
    /// Provider id that answered, or `fallback_default`.
    pub source: String,
}

impl AssistantReply {
    pub fn is_fallback(&self) -> bool {
        self.source == FALLBACK_SOURCE
    }
}

/// Ordered provider chain for assistant-only tasks (news summaries and
/// the like). The core forecasting path never goes through here.
pub struct AssistantChain {
    cfg: AssistantCfg,
    client: Arc<dyn ModelClient>,
}

impl AssistantChain {
    pub fn new(cfg: AssistantCfg, client: Arc<dyn ModelClient>) -> Self {
        Self { cfg, client }
    }

    /// Try providers in declared order; the first success short-circuits.
    /// Always terminates with a reply.
    pub async fn run(&self, prompt: &str) -> AssistantReply {
        for provider in &self.cfg.providers {
            let api_key = std::env::var(&provider.api_key_env).unwrap_or_default();
            let timeout = self.cfg.provider_timeout;

            let call = self
                .client
                .invoke(&provider.endpoint, &provider.model, &api_key, prompt, timeout);
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    info!(provider = %provider.id, "assistant provider answered");
                    return AssistantReply {
                        text,
                        source: provider.id.clone(),
                    };
                }
                Ok(Ok(_)) => {
                    warn!(provider = %provider.id, "assistant provider returned empty reply");
                }
                Ok(Err(e)) => {
                    warn!(provider = %provider.id, error = %format!("{:#}", e), "assistant provider failed");
                }
                Err(_) => {
                    warn!(
                        provider = %provider.id,
                        timeout_s = timeout.as_secs(),
                        "assistant provider timed out"
                    );
                }
            }
        }

        AssistantReply {
            text: FALLBACK_TEXT.to_string(),
            source: FALLBACK_SOURCE.to_string(),
        }
    }
}
