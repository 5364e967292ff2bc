use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::config::{AiSettings, Settings};
use crate::db::models::NewQuestion;
use crate::db::types::{Difficulty, QuestionType};
use crate::services::ai_client::{
    ChatMessage, CompletionBackend, CompletionRequest, HttpCompletionBackend, RemoteError,
};
use crate::services::normalizer::{self, Defaults, DEFAULT_TOPIC};

pub(crate) const MAX_GENERATED_QUESTIONS: u32 = 50;
const API_KEY_PREFIX: &str = "sk-";
const SANITIZE_PATTERN: &str = r"[^\w\s.,!?]";
const SYSTEM_PROMPT: &str = "You are an expert question generator. Respond with valid JSON.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    /// Pause after the zero-based `attempt`: `base_delay * 2^attempt`.
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GenerationParams<'a> {
    pub(crate) text: &'a str,
    pub(crate) num_questions: u32,
    pub(crate) question_types: &'a [QuestionType],
    pub(crate) difficulty: Difficulty,
    pub(crate) topic: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CompletionEnvelope {
    Choices { choices: Vec<Choice> },
    Data { data: DataPayload },
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DataPayload {
    #[serde(default)]
    response: Option<Value>,
}

/// Turns source text into normalized question records through a chat-completions backend.
/// Every failure path yields an empty list; nothing is raised to the caller.
#[derive(Clone)]
pub(crate) struct QuestionGenerator {
    backend: Arc<dyn CompletionBackend>,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    retry: RetryPolicy,
    sanitizer: Regex,
}

impl QuestionGenerator {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let backend = HttpCompletionBackend::from_settings(settings)?;
        Self::new(Arc::new(backend), settings.ai())
    }

    pub(crate) fn new(backend: Arc<dyn CompletionBackend>, settings: &AiSettings) -> Result<Self> {
        let sanitizer = Regex::new(SANITIZE_PATTERN).context("Invalid sanitizer pattern")?;

        Ok(Self {
            backend,
            api_key: settings.credential().map(str::to_string),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                base_delay: settings.retry_base_delay(),
            },
            sanitizer,
        })
    }

    pub(crate) fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) async fn generate(&self, params: &GenerationParams<'_>) -> Vec<NewQuestion> {
        let topic = if params.topic.trim().is_empty() { DEFAULT_TOPIC } else { params.topic.trim() };
        tracing::info!(
            num_questions = params.num_questions,
            topic,
            difficulty = %params.difficulty,
            "Generating questions"
        );

        if params.text.trim().is_empty() {
            tracing::error!("Invalid input text");
            return Vec::new();
        }

        if !(1..=MAX_GENERATED_QUESTIONS).contains(&params.num_questions) {
            tracing::error!(num_questions = params.num_questions, "Invalid number of questions");
            return Vec::new();
        }

        let Some(api_key) = self.api_key.as_deref().filter(|key| key.starts_with(API_KEY_PREFIX))
        else {
            tracing::error!("XAI_API_KEY not set or invalid");
            return Vec::new();
        };

        let question_types = if params.question_types.is_empty() {
            vec![QuestionType::MultipleChoice]
        } else {
            params.question_types.to_vec()
        };

        let text = self.sanitize(params.text);
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage {
                    role: "user",
                    content: build_prompt(
                        &text,
                        params.num_questions,
                        &question_types,
                        params.difficulty,
                        topic,
                    ),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let defaults = Defaults::new(question_types[0], params.difficulty, topic);
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let is_last = attempt + 1 == max_attempts;
            tracing::info!(attempt = attempt + 1, max_attempts, "Making API request");

            match self.backend.complete(api_key, &request).await {
                Ok(body) => {
                    record_attempt("success");
                    let questions = decode_questions(body, params.num_questions, &defaults);
                    metrics::counter!("questions_generated_total")
                        .increment(questions.len() as u64);
                    tracing::info!(count = questions.len(), "Generated questions");
                    return questions;
                }
                Err(err) if err.is_unreachable() => {
                    record_attempt("unreachable");
                    tracing::error!(error = %err, attempt = attempt + 1, "API request timed out or failed to connect");
                    if is_last {
                        return Vec::new();
                    }
                }
                Err(err) if err.is_rate_limited() && !is_last => {
                    record_attempt("rate_limited");
                    tracing::warn!(attempt = attempt + 1, "Rate limit exceeded, retrying");
                }
                Err(err) => {
                    record_attempt(outcome_label(&err));
                    tracing::error!(error = %err, "API request failed");
                    return Vec::new();
                }
            }

            tokio::time::sleep(self.retry.delay_for(attempt)).await;
        }

        Vec::new()
    }

    fn sanitize(&self, text: &str) -> String {
        self.sanitizer.replace_all(text, "").into_owned()
    }
}

fn build_prompt(
    text: &str,
    num_questions: u32,
    question_types: &[QuestionType],
    difficulty: Difficulty,
    topic: &str,
) -> String {
    let types = question_types.iter().map(|item| item.as_str()).collect::<Vec<_>>().join(", ");
    format!(
        "Generate {num_questions} exam questions as JSON array: question, type ({types}), \
         difficulty ({difficulty}), blooms_level (e.g., Remember), topic ({topic}), \
         options (4 for Multiple Choice), answer. Text: \"{text}\""
    )
}

fn decode_questions(body: Value, limit: u32, defaults: &Defaults) -> Vec<NewQuestion> {
    let content = match serde_json::from_value::<CompletionEnvelope>(body) {
        Ok(CompletionEnvelope::Choices { choices }) => match choices.into_iter().next() {
            Some(choice) => choice.message.and_then(|message| message.content),
            None => {
                tracing::error!("API response has no choices");
                return Vec::new();
            }
        },
        Ok(CompletionEnvelope::Data { data }) => data.response,
        Err(_) => {
            tracing::error!("Unexpected API response structure");
            return Vec::new();
        }
    };

    let items = match content {
        None => return Vec::new(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(&raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "Error parsing API response");
                return Vec::new();
            }
        },
        Some(value) => value,
    };

    let Value::Array(items) = items else {
        tracing::error!("API response is not a list");
        return Vec::new();
    };

    items
        .iter()
        .take(limit as usize)
        .filter_map(|candidate| normalizer::from_ai_candidate(candidate, defaults))
        .collect()
}

fn record_attempt(outcome: &'static str) {
    metrics::counter!("ai_generation_attempts_total", "outcome" => outcome).increment(1);
}

fn outcome_label(err: &RemoteError) -> &'static str {
    match err {
        RemoteError::Timeout | RemoteError::Connect(_) => "unreachable",
        RemoteError::Status(429) => "rate_limited",
        RemoteError::Status(_) => "http_error",
        RemoteError::Transport(_) => "transport_error",
        RemoteError::InvalidBody(_) => "invalid_body",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct ScriptedBackend {
        calls: AtomicU32,
        script: Mutex<VecDeque<Result<Value, RemoteError>>>,
        fallback: fn() -> Result<Value, RemoteError>,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl ScriptedBackend {
        fn new(
            script: Vec<Result<Value, RemoteError>>,
            fallback: fn() -> Result<Value, RemoteError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script.into()),
                fallback,
                last_request: Mutex::new(None),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            _api_key: &str,
            request: &CompletionRequest,
        ) -> Result<Value, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| (self.fallback)())
        }
    }

    fn ai_settings(api_key: &str) -> AiSettings {
        AiSettings {
            api_key: api_key.to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            model: "grok-3".to_string(),
            max_tokens: 3000,
            temperature: 0.7,
            request_timeout: 15,
            max_attempts: 3,
            retry_base_ms: 1,
        }
    }

    fn generator(backend: Arc<ScriptedBackend>, api_key: &str) -> QuestionGenerator {
        QuestionGenerator::new(backend, &ai_settings(api_key)).unwrap().with_retry_policy(
            RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1) },
        )
    }

    fn params<'a>(text: &'a str, num_questions: u32, types: &'a [QuestionType]) -> GenerationParams<'a> {
        GenerationParams {
            text,
            num_questions,
            question_types: types,
            difficulty: Difficulty::Medium,
            topic: "Networks",
        }
    }

    fn choices_body(content: &str) -> Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    fn two_questions() -> Value {
        choices_body(
            &json!([
                {
                    "question": "Which layer routes packets?",
                    "type": "Multiple Choice",
                    "options": ["Physical", "Network", "Session", "Application"],
                    "answer": "Network",
                    "blooms_level": "Remember"
                },
                {"question": "Explain TCP handshakes.", "type": "Short Answer", "answer": "SYN, SYN-ACK, ACK"}
            ])
            .to_string(),
        )
    }

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn prompt_lists_allowed_types() {
        let prompt = build_prompt(
            "Routers forward packets.",
            4,
            &[QuestionType::MultipleChoice, QuestionType::Essay],
            Difficulty::Hard,
            "Networks",
        );
        assert!(prompt.starts_with("Generate 4 exam questions as JSON array"));
        assert!(prompt.contains("type (Multiple Choice, Essay)"));
        assert!(prompt.contains("difficulty (Hard)"));
        assert!(prompt.contains("topic (Networks)"));
        assert!(prompt.ends_with("Text: \"Routers forward packets.\""));
    }

    #[tokio::test]
    async fn always_timing_out_makes_three_attempts() {
        let backend = ScriptedBackend::new(Vec::new(), || Err(RemoteError::Timeout));
        let generator = generator(backend.clone(), "sk-test");

        let result = generator.generate(&params("Some text", 5, &[])).await;
        assert!(result.is_empty());
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn rate_limit_then_success() {
        let backend = ScriptedBackend::new(
            vec![Err(RemoteError::Status(429)), Err(RemoteError::Status(429))],
            || Ok(two_questions()),
        );
        let generator = generator(backend.clone(), "sk-test");

        let result = generator.generate(&params("Some text", 5, &[])).await;
        assert_eq!(backend.calls(), 3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].options.len(), 4);
        assert_eq!(result[0].difficulty, Difficulty::Medium);
        assert_eq!(result[1].question_type, QuestionType::ShortAnswer);
        assert_eq!(result[1].topic, "Networks");
        assert_eq!(result[1].blooms_level, "Understand");
    }

    #[tokio::test]
    async fn other_http_errors_abort_immediately() {
        let backend = ScriptedBackend::new(Vec::new(), || Err(RemoteError::Status(500)));
        let generator = generator(backend.clone(), "sk-test");

        assert!(generator.generate(&params("Some text", 5, &[])).await.is_empty());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_credential_skips_remote_call() {
        let backend = ScriptedBackend::new(Vec::new(), || Ok(two_questions()));

        for key in ["", "xai-123"] {
            let generator = generator(backend.clone(), key);
            assert!(generator.generate(&params("Some text", 5, &[])).await.is_empty());
        }
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn precondition_failures_return_empty() {
        let backend = ScriptedBackend::new(Vec::new(), || Ok(two_questions()));
        let generator = generator(backend.clone(), "sk-test");

        assert!(generator.generate(&params("   ", 5, &[])).await.is_empty());
        assert!(generator.generate(&params("Some text", 0, &[])).await.is_empty());
        assert!(generator.generate(&params("Some text", 51, &[])).await.is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn results_are_capped_at_requested_count() {
        let backend = ScriptedBackend::new(Vec::new(), || Ok(two_questions()));
        let generator = generator(backend.clone(), "sk-test");

        let result = generator.generate(&params("Some text", 1, &[])).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].question, "Which layer routes packets?");
    }

    #[tokio::test]
    async fn text_is_sanitized_before_sending() {
        let backend = ScriptedBackend::new(Vec::new(), || Ok(choices_body("[]")));
        let generator = generator(backend.clone(), "sk-test");

        let types = [QuestionType::TrueFalse];
        let result = generator.generate(&params("IP <b>routes</b> & forwards; ok?", 2, &types)).await;
        assert!(result.is_empty());

        let request = backend.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.messages[0].content, SYSTEM_PROMPT);
        assert!(request.messages[1].content.contains("Text: \"IP broutesb  forwards ok?\""));
        assert!(request.messages[1].content.contains("type (True/False)"));
    }

    #[test]
    fn envelope_variants_decode() {
        let defaults = Defaults::new(QuestionType::Essay, Difficulty::Easy, "General");
        let item = json!({"question": "Define entropy.", "type": "Essay", "answer": "..."});

        let data_body = json!({"data": {"response": [item.clone()]}});
        assert_eq!(decode_questions(data_body, 5, &defaults).len(), 1);

        let data_string = json!({"data": {"response": json!([item]).to_string()}});
        assert_eq!(decode_questions(data_string, 5, &defaults).len(), 1);

        assert!(decode_questions(json!({"choices": []}), 5, &defaults).is_empty());
        assert!(decode_questions(json!({"result": []}), 5, &defaults).is_empty());
        assert!(decode_questions(choices_body("not json"), 5, &defaults).is_empty());
        assert!(decode_questions(choices_body("{\"question\": 1}"), 5, &defaults).is_empty());
    }

    #[test]
    fn invalid_candidates_are_skipped() {
        let defaults = Defaults::new(QuestionType::Essay, Difficulty::Easy, "General");
        let body = choices_body(
            &json!([
                {"question": "Missing answer", "type": "Essay"},
                "plain string",
                {"question": "Valid one", "type": "Essay", "answer": "yes"}
            ])
            .to_string(),
        );

        let result = decode_questions(body, 10, &defaults);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].question, "Valid one");
    }
}
