//! Summary synthesizer: prompt in, generated text out.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! Callers never retry. Every call site pairs [`generate_bounded`] with its
//! own deterministic fallback text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::ExposeSecret;

use crate::error::SynthError;

/// System preamble shared by every synthesizer call.
const PREAMBLE: &str = "\
Você é Alex, um assistente pessoal de reflexão e escrita de diário. \
Responda sempre em português, com calor humano e de forma concisa.";

/// Output budget for a single generation.
const MAX_TOKENS: u64 = 1024;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// Configuration for creating a synthesizer.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Text generation collaborator.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Generate text for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, SynthError>;
}

/// Call the synthesizer with an upper bound on latency.
///
/// Empty output counts as a failure so the caller's fallback kicks in.
pub async fn generate_bounded(
    synth: &dyn Synthesizer,
    prompt: &str,
    timeout: Duration,
) -> Result<String, SynthError> {
    let text = match tokio::time::timeout(timeout, synth.generate(prompt)).await {
        Ok(result) => result?,
        Err(_) => return Err(SynthError::Timeout(timeout)),
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(SynthError::Other("empty response".into()));
    }
    Ok(text.to_string())
}

/// Create a synthesizer from configuration. `None` yields the disabled one.
pub fn create_synthesizer(config: Option<&LlmConfig>) -> Result<Arc<dyn Synthesizer>, SynthError> {
    match config {
        None => {
            tracing::warn!("No LLM API key configured; summaries will use fallbacks");
            Ok(Arc::new(DisabledSynthesizer))
        }
        Some(c) => match c.backend {
            LlmBackend::Anthropic => create_anthropic_synthesizer(c),
            LlmBackend::OpenAi => create_openai_synthesizer(c),
        },
    }
}

fn create_anthropic_synthesizer(config: &LlmConfig) -> Result<Arc<dyn Synthesizer>, SynthError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            SynthError::Other(format!("Failed to create Anthropic client: {e}"))
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(PREAMBLE)
        .max_tokens(MAX_TOKENS)
        .build();
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigSynthesizer::new(agent, &config.model)))
}

fn create_openai_synthesizer(config: &LlmConfig) -> Result<Arc<dyn Synthesizer>, SynthError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            SynthError::Other(format!("Failed to create OpenAI client: {e}"))
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(PREAMBLE)
        .max_tokens(MAX_TOKENS)
        .build();
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigSynthesizer::new(agent, &config.model)))
}

/// Bridges a rig agent to [`Synthesizer`].
pub struct RigSynthesizer<A> {
    agent: A,
    model: String,
}

impl<A> RigSynthesizer<A> {
    pub fn new(agent: A, model: &str) -> Self {
        Self {
            agent,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl<A> Synthesizer for RigSynthesizer<A>
where
    A: Prompt + Send + Sync,
{
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, SynthError> {
        self.agent
            .prompt(prompt.to_string())
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))
    }
}

/// Synthesizer used when no backend is configured. Always fails.
pub struct DisabledSynthesizer;

#[async_trait]
impl Synthesizer for DisabledSynthesizer {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, SynthError> {
        Err(SynthError::Disabled)
    }
}

/// Map a provider error message onto the synthesizer error taxonomy.
pub fn classify_provider_error(message: &str) -> SynthError {
    let lower = message.to_lowercase();
    if lower.contains("429")
        || lower.contains("quota")
        || lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("overloaded")
    {
        SynthError::Quota(message.to_string())
    } else if lower.contains("timed out") || lower.contains("timeout") {
        SynthError::Transport(format!("provider timeout: {message}"))
    } else if lower.contains("http")
        || lower.contains("connect")
        || lower.contains("dns")
        || lower.contains("request")
    {
        SynthError::Transport(message.to_string())
    } else {
        SynthError::Other(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Synthesizer for Slow {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn generate(&self, _prompt: &str) -> Result<String, SynthError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".into())
        }
    }

    struct Blank;

    #[async_trait]
    impl Synthesizer for Blank {
        fn model_name(&self) -> &str {
            "blank"
        }
        async fn generate(&self, _prompt: &str) -> Result<String, SynthError> {
            Ok("   \n".into())
        }
    }

    #[tokio::test]
    async fn test_create_provider_missing_key_still_constructs() {
        // rig-core clients accept any string as API key at construction time.
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-3-5-sonnet-latest".to_string(),
        };
        let synth = create_synthesizer(Some(&config)).unwrap();
        assert_eq!(synth.model_name(), "claude-3-5-sonnet-latest");
    }

    #[tokio::test]
    async fn test_create_openai_provider() {
        let config = LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o".to_string(),
        };
        let synth = create_synthesizer(Some(&config)).unwrap();
        assert_eq!(synth.model_name(), "gpt-4o");
    }

    #[tokio::test]
    async fn no_config_is_disabled() {
        let synth = create_synthesizer(None).unwrap();
        assert_eq!(synth.model_name(), "disabled");
        assert!(matches!(
            synth.generate("olá").await,
            Err(SynthError::Disabled)
        ));
    }

    #[tokio::test]
    async fn bounded_call_times_out() {
        let result = generate_bounded(&Slow, "x", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(SynthError::Timeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn blank_output_is_a_failure() {
        let result = generate_bounded(&Blank, "x", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(SynthError::Other(_))));
    }

    #[test]
    fn classify_quota() {
        assert!(matches!(
            classify_provider_error("ProviderError: 429 Too Many Requests"),
            SynthError::Quota(_)
        ));
        assert!(matches!(
            classify_provider_error("You exceeded your current quota"),
            SynthError::Quota(_)
        ));
    }

    #[test]
    fn classify_transport() {
        assert!(matches!(
            classify_provider_error("HttpError: error sending request"),
            SynthError::Transport(_)
        ));
        assert!(matches!(
            classify_provider_error("operation timed out"),
            SynthError::Transport(_)
        ));
    }

    #[test]
    fn classify_other() {
        assert!(matches!(
            classify_provider_error("JsonError: missing field `content`"),
            SynthError::Other(_)
        ));
    }
}
