//! Answer generation from retrieved passages.
//!
//! [`AnswerGenerator`] is chosen once at startup: the model-backed variant
//! when the API key variable named by `generator.api_key_env` is set and
//! non-empty, the deterministic fallback otherwise. Both produce an
//! [`Answer`] whose `sources` are the distinct filenames of the retrieved
//! passages in ranking order.

use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::http;
use crate::models::{Answer, AppRecord, RetrievalResult};

/// Reply of the fallback generator when nothing was retrieved.
pub const NO_RELEVANT_INFORMATION: &str =
    "No relevant information was found in the uploaded documents.";

/// Leading text of every non-empty fallback answer.
pub const FALLBACK_PREFIX: &str = "Based on the documents: ";

/// Maximum number of context characters quoted by the fallback answer.
pub const FALLBACK_CONTEXT_CHARS: usize = 500;

/// Build the grounding prompt sent to the model.
pub fn build_prompt(app: &AppRecord, message: &str, retrieval: &RetrievalResult) -> String {
    let context = retrieval
        .chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a helpful assistant for the {name} system.\n\
         Answer the question based ONLY on the following context from the uploaded documents.\n\
         If the question cannot be answered from the context, say:\n\
         \"{refusal}\"\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {message}\n\
         \n\
         Answer:",
        name = app.name,
        refusal = not_in_documents(&app.app_id),
        context = context,
        message = message,
    )
}

/// The model's instructed reply for questions outside the documents.
pub fn not_in_documents(app_id: &str) -> String {
    format!(
        "I don't have that information in the uploaded {} documents.",
        app_id
    )
}

/// Calls an OpenAI-compatible `chat/completions` endpoint.
pub struct ModelGenerator {
    model: String,
    api_key: String,
    endpoint: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl ModelGenerator {
    pub fn new(config: &GeneratorConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs).map_err(Error::InvalidConfig)?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        app: &AppRecord,
        message: &str,
        retrieval: &RetrievalResult,
    ) -> Result<Answer> {
        if retrieval.is_empty() {
            return Ok(Answer {
                answer: not_in_documents(&app.app_id),
                sources: Vec::new(),
            });
        }

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "user", "content": build_prompt(app, message, retrieval)}
            ],
        });

        let json = http::post_json_with_retry(
            &self.client,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await
        .map_err(Error::Generation)?;

        let answer = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Generation("response has no message content".into()))?
            .trim()
            .to_string();

        debug!(app_id = %app.app_id, chars = answer.len(), "model answer received");
        Ok(Answer {
            answer,
            sources: retrieval.sources(),
        })
    }
}

/// Assembles answers directly from retrieved passages. Never fails.
#[derive(Debug, Default, Clone)]
pub struct FallbackGenerator;

impl FallbackGenerator {
    pub fn generate(&self, retrieval: &RetrievalResult) -> Answer {
        if retrieval.is_empty() {
            return Answer {
                answer: NO_RELEVANT_INFORMATION.to_string(),
                sources: Vec::new(),
            };
        }

        let context = retrieval
            .chunks
            .iter()
            .map(|c| c.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut quoted: String = context.chars().take(FALLBACK_CONTEXT_CHARS).collect();
        if context.chars().count() > FALLBACK_CONTEXT_CHARS {
            quoted.push_str("...");
        }

        Answer {
            answer: format!("{}{}", FALLBACK_PREFIX, quoted),
            sources: retrieval.sources(),
        }
    }
}

pub enum AnswerGenerator {
    Model(ModelGenerator),
    Fallback(FallbackGenerator),
}

impl AnswerGenerator {
    /// Pick the variant from the environment, once.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => {
                info!(model = %config.model, "using model answer generator");
                Ok(AnswerGenerator::Model(ModelGenerator::new(config, key)?))
            }
            _ => {
                info!(
                    env = %config.api_key_env,
                    "API key not set; using fallback answer generator"
                );
                Ok(AnswerGenerator::Fallback(FallbackGenerator))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnswerGenerator::Model(_) => "model",
            AnswerGenerator::Fallback(_) => "fallback",
        }
    }

    pub async fn generate(
        &self,
        app: &AppRecord,
        message: &str,
        retrieval: &RetrievalResult,
    ) -> Result<Answer> {
        match self {
            AnswerGenerator::Model(model) => model.generate(app, message, retrieval).await,
            AnswerGenerator::Fallback(fallback) => Ok(fallback.generate(retrieval)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetrievedChunk;

    fn passage(text: &str, source: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            text: text.into(),
            source: source.into(),
            score,
        }
    }

    #[test]
    fn test_fallback_empty() {
        let answer = FallbackGenerator.generate(&RetrievalResult::default());
        assert_eq!(answer.answer, NO_RELEVANT_INFORMATION);
        assert!(answer.sources.is_empty());
    }

    #[test]
    fn test_fallback_quotes_passages() {
        let retrieval = RetrievalResult {
            chunks: vec![passage("CSS is a style sheet language.", "doc1.txt", 0.9)],
        };
        let answer = FallbackGenerator.generate(&retrieval);
        assert_eq!(
            answer.answer,
            "Based on the documents: CSS is a style sheet language."
        );
        assert_eq!(answer.sources, vec!["doc1.txt"]);
    }

    #[test]
    fn test_fallback_truncates_long_context() {
        let long = "x".repeat(900);
        let retrieval = RetrievalResult {
            chunks: vec![passage(&long, "a.md", 0.5)],
        };
        let answer = FallbackGenerator.generate(&retrieval);
        assert!(answer.answer.ends_with("..."));
        assert_eq!(
            answer.answer.chars().count(),
            FALLBACK_PREFIX.len() + FALLBACK_CONTEXT_CHARS + 3
        );
    }

    #[test]
    fn test_fallback_sources_distinct_in_rank_order() {
        let retrieval = RetrievalResult {
            chunks: vec![
                passage("one", "b.txt", 0.9),
                passage("two", "a.txt", 0.8),
                passage("three", "b.txt", 0.7),
            ],
        };
        let answer = FallbackGenerator.generate(&retrieval);
        assert_eq!(answer.sources, vec!["b.txt", "a.txt"]);
        assert!(answer.answer.contains("one\n\ntwo\n\nthree"));
    }

    #[test]
    fn test_prompt_mentions_app_and_context() {
        let app = AppRecord::new("css", "CSS Docs");
        let retrieval = RetrievalResult {
            chunks: vec![passage("Selectors pick elements.", "s.md", 0.4)],
        };
        let prompt = build_prompt(&app, "What is a selector?", &retrieval);
        assert!(prompt.starts_with("You are a helpful assistant for the CSS Docs system."));
        assert!(prompt.contains("Context:\nSelectors pick elements.\n\nQuestion: What is a selector?"));
        assert!(prompt.contains("uploaded css documents"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn test_missing_key_selects_fallback() {
        let config = GeneratorConfig {
            api_key_env: "TRAG_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..GeneratorConfig::default()
        };
        let generator = AnswerGenerator::from_config(&config).unwrap();
        assert_eq!(generator.kind(), "fallback");
    }

    #[tokio::test]
    async fn test_model_generator_without_passages_refuses() {
        let generator =
            ModelGenerator::new(&GeneratorConfig::default(), "sk-test".to_string()).unwrap();
        let app = AppRecord::new("css", "CSS");
        let answer = generator
            .generate(&app, "anything", &RetrievalResult::default())
            .await
            .unwrap();
        assert_eq!(answer.answer, not_in_documents("css"));
        assert!(answer.sources.is_empty());
    }
}
