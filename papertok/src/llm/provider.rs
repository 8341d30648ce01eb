//! Wire formats of the supported providers.
//!
//! Each format only builds the HTTP request and reads the completion back out
//! of the response body. Status handling and transport live in the gateway.
use crate::errors::LlmError;
use crate::http::HttpRequest;
use crate::llm::{Completion, CompletionRequest, TokenUsage};
use crate::secrets::LlmConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[value(name = "openai")]
    OpenAi,
    Gemini,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-3-5-haiku-latest",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Gemini => "gemini-1.5-flash",
        }
    }

    pub(crate) fn wire_format(&self) -> &'static dyn WireFormat {
        match self {
            Provider::Anthropic => &AnthropicFormat,
            Provider::OpenAi => &OpenAiFormat,
            Provider::Gemini => &GeminiFormat,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        };
        f.write_str(name)
    }
}

pub(crate) trait WireFormat: Send + Sync {
    fn build_request(
        &self,
        config: &LlmConfig,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> HttpRequest;

    fn parse_response(&self, config: &LlmConfig, body: &str) -> Result<Completion, LlmError>;
}

fn endpoint(config: &LlmConfig, path: &str) -> String {
    format!("{}{}", config.effective_base_url().trim_end_matches('/'), path)
}

fn parse_json(body: &str) -> Result<Value, LlmError> {
    serde_json::from_str(body).map_err(|e| LlmError::InvalidResponse(e.to_string()))
}

fn text_at(value: &Value, pointer: &str) -> Result<String, LlmError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::InvalidResponse(format!("missing {}", pointer)))
}

fn count_at(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

fn model_or_configured(value: &Value, key: &str, config: &LlmConfig) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(&config.model_name)
        .to_string()
}

struct AnthropicFormat;

impl WireFormat for AnthropicFormat {
    fn build_request(
        &self,
        config: &LlmConfig,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> HttpRequest {
        let body = json!({
            "model": config.model_name,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": [{ "role": "user", "content": request.user_prompt }],
        });
        let version = config.api_version.as_deref().unwrap_or(ANTHROPIC_VERSION);
        HttpRequest::post_json(&endpoint(config, "/v1/messages"), body, timeout)
            .header("x-api-key", &config.api_key)
            .header("anthropic-version", version)
    }

    fn parse_response(&self, config: &LlmConfig, body: &str) -> Result<Completion, LlmError> {
        let value = parse_json(body)?;
        Ok(Completion {
            content: text_at(&value, "/content/0/text")?,
            model: model_or_configured(&value, "model", config),
            usage: TokenUsage {
                input_tokens: count_at(&value, "/usage/input_tokens"),
                output_tokens: count_at(&value, "/usage/output_tokens"),
            },
        })
    }
}

struct OpenAiFormat;

impl WireFormat for OpenAiFormat {
    fn build_request(
        &self,
        config: &LlmConfig,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> HttpRequest {
        let body = json!({
            "model": config.model_name,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
        });
        HttpRequest::post_json(&endpoint(config, "/chat/completions"), body, timeout)
            .header("Authorization", &format!("Bearer {}", config.api_key))
    }

    fn parse_response(&self, config: &LlmConfig, body: &str) -> Result<Completion, LlmError> {
        let value = parse_json(body)?;
        Ok(Completion {
            content: text_at(&value, "/choices/0/message/content")?,
            model: model_or_configured(&value, "model", config),
            usage: TokenUsage {
                input_tokens: count_at(&value, "/usage/prompt_tokens"),
                output_tokens: count_at(&value, "/usage/completion_tokens"),
            },
        })
    }
}

struct GeminiFormat;

impl WireFormat for GeminiFormat {
    fn build_request(
        &self,
        config: &LlmConfig,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> HttpRequest {
        // single-turn API: the system prompt rides in front of the user text
        let text = if request.system_prompt.is_empty() {
            request.user_prompt.clone()
        } else {
            format!("{}\n\n{}", request.system_prompt, request.user_prompt)
        };
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });
        let path = format!("/v1beta/models/{}:generateContent", config.model_name);
        HttpRequest::post_json(&endpoint(config, &path), body, timeout)
            .query_param("key", &config.api_key)
    }

    fn parse_response(&self, config: &LlmConfig, body: &str) -> Result<Completion, LlmError> {
        let value = parse_json(body)?;
        Ok(Completion {
            content: text_at(&value, "/candidates/0/content/parts/0/text")?,
            model: model_or_configured(&value, "modelVersion", config),
            usage: TokenUsage {
                input_tokens: count_at(&value, "/usageMetadata/promptTokenCount"),
                output_tokens: count_at(&value, "/usageMetadata/candidatesTokenCount"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn request() -> CompletionRequest {
        CompletionRequest::new("You translate titles.", "Attention Is All You Need", 0.1, 200)
    }

    #[test]
    fn test_anthropic_request_shape() {
        let mut config = LlmConfig::new(Provider::Anthropic, "sk-ant");
        config.model_name = "claude-test".to_string();
        let http = Provider::Anthropic
            .wire_format()
            .build_request(&config, &request(), TIMEOUT);

        assert_eq!(http.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(http.header_value("x-api-key"), Some("sk-ant"));
        assert_eq!(http.header_value("anthropic-version"), Some(ANTHROPIC_VERSION));
        let body = http.body.unwrap();
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 200);
        assert_eq!(body["system"], "You translate titles.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Attention Is All You Need");
    }

    #[test]
    fn test_anthropic_custom_version() {
        let mut config = LlmConfig::new(Provider::Anthropic, "sk-ant");
        config.api_version = Some("2024-10-22".to_string());
        let http = Provider::Anthropic
            .wire_format()
            .build_request(&config, &request(), TIMEOUT);
        assert_eq!(http.header_value("anthropic-version"), Some("2024-10-22"));
    }

    #[test]
    fn test_openai_request_shape() {
        let mut config = LlmConfig::new(Provider::OpenAi, "sk-oa");
        config.base_url = Some("http://localhost:11434/v1/".to_string());
        let http = Provider::OpenAi
            .wire_format()
            .build_request(&config, &request(), TIMEOUT);

        assert_eq!(http.url, "http://localhost:11434/v1/chat/completions");
        assert_eq!(http.header_value("authorization"), Some("Bearer sk-oa"));
        let body = http.body.unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 200);
    }

    #[test]
    fn test_gemini_request_shape() {
        let config = LlmConfig::new(Provider::Gemini, "g-key");
        let http = Provider::Gemini
            .wire_format()
            .build_request(&config, &request(), TIMEOUT);

        assert_eq!(
            http.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert_eq!(http.query_value("key"), Some("g-key"));
        assert!(http.header_value("authorization").is_none());
        let body = http.body.unwrap();
        assert_eq!(
            body["contents"][0]["parts"][0]["text"],
            "You translate titles.\n\nAttention Is All You Need"
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 200);
    }

    #[test]
    fn test_parse_each_provider() {
        let anthropic = r#"{"model":"claude-x","content":[{"type":"text","text":"注意力"}],
            "usage":{"input_tokens":12,"output_tokens":3}}"#;
        let completion = Provider::Anthropic
            .wire_format()
            .parse_response(&LlmConfig::new(Provider::Anthropic, "k"), anthropic)
            .unwrap();
        assert_eq!(completion.content, "注意力");
        assert_eq!(completion.model, "claude-x");
        assert_eq!(completion.usage.total(), 15);

        let openai = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}],
            "usage":{"prompt_tokens":5,"completion_tokens":1}}"#;
        let completion = Provider::OpenAi
            .wire_format()
            .parse_response(&LlmConfig::new(Provider::OpenAi, "k"), openai)
            .unwrap();
        assert_eq!(completion.content, "hello");
        assert_eq!(completion.model, "gpt-4o-mini");
        assert_eq!(completion.usage.input_tokens, 5);

        let gemini = r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}],
            "usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":2}}"#;
        let completion = Provider::Gemini
            .wire_format()
            .parse_response(&LlmConfig::new(Provider::Gemini, "k"), gemini)
            .unwrap();
        assert_eq!(completion.content, "hi");
        assert_eq!(completion.usage.output_tokens, 2);
    }

    #[test]
    fn test_malformed_responses_are_invalid_response() {
        let config = LlmConfig::new(Provider::OpenAi, "k");
        let format = Provider::OpenAi.wire_format();
        for body in ["", "not json", r#"{"choices":[]}"#, r#"{"choices":[{"message":{"content":42}}]}"#] {
            let result = format.parse_response(&config, body);
            assert!(matches!(result, Err(LlmError::InvalidResponse(_))), "{}", body);
        }
    }

    #[test]
    fn test_provider_serde_names() {
        assert_eq!(serde_json::to_string(&Provider::OpenAi).unwrap(), "\"openai\"");
        let provider: Provider = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(provider, Provider::Anthropic);
        assert_eq!(Provider::Gemini.to_string(), "gemini");
    }
}
