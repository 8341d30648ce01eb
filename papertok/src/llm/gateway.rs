use crate::errors::LlmError;
use crate::http::{HttpResponse, HttpTransport, TransportError};
use crate::llm::{Completion, CompletionRequest, LlmBackend};
use crate::secrets::{LlmConfig, SecretsStore};
use crate::utils::truncate_chars;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Upper bound on one completion, response body included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Outer deadline of the connectivity test.
pub const CONNECTION_TEST_DEADLINE: Duration = Duration::from_secs(20);

const BALANCE_MARKERS: &[&str] = &["balance", "quota", "credit", "billing"];
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Maps a non-2xx provider response onto `LlmError`, checked in priority order.
pub fn classify_status(response: &HttpResponse) -> Result<(), LlmError> {
    if response.is_success() {
        return Ok(());
    }
    match response.status {
        401 => Err(LlmError::AuthenticationFailed),
        429 => Err(LlmError::RateLimitExceeded),
        402 => Err(LlmError::InsufficientBalance),
        403 if mentions_balance(&response.body) => Err(LlmError::InsufficientBalance),
        status => Err(LlmError::Api {
            status,
            message: truncate_chars(response.body.trim(), MAX_ERROR_BODY_CHARS),
        }),
    }
}

fn mentions_balance(body: &str) -> bool {
    let lowered = body.to_lowercase();
    BALANCE_MARKERS.iter().any(|m| lowered.contains(m))
}

fn validate(config: LlmConfig) -> Result<LlmConfig, LlmError> {
    if config.api_key.trim().is_empty() {
        return Err(LlmError::InvalidConfiguration("API key is empty".to_string()));
    }
    if config.model_name.trim().is_empty() {
        return Err(LlmError::InvalidConfiguration("model name is empty".to_string()));
    }
    let base_url = config.effective_base_url();
    match reqwest::Url::parse(base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(config),
        _ => Err(LlmError::InvalidConfiguration(format!(
            "invalid base URL: {}",
            base_url
        ))),
    }
}

/// The one entry point to the configured provider.
///
/// The configuration is read from the secrets store on every call, so a
/// reconfiguration takes effect on the next request.
#[derive(Clone)]
pub struct LlmGateway {
    transport: Arc<dyn HttpTransport>,
    secrets: Arc<dyn SecretsStore>,
}

impl LlmGateway {
    pub fn new(transport: Arc<dyn HttpTransport>, secrets: Arc<dyn SecretsStore>) -> Self {
        LlmGateway { transport, secrets }
    }

    pub fn config(&self) -> Result<LlmConfig, LlmError> {
        let config = self
            .secrets
            .load()
            .map_err(|e| LlmError::InvalidConfiguration(e.to_string()))?
            .ok_or_else(|| LlmError::InvalidConfiguration("no provider configured".to_string()))?;
        validate(config)
    }

    /// Races the completion against `cancel`. When `cancel` resolves first the
    /// in-flight request is dropped and `Cancelled` is returned.
    pub async fn complete_until<F>(
        &self,
        request: CompletionRequest,
        cancel: F,
    ) -> Result<Completion, LlmError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.complete(request) => result,
            _ = cancel => {
                debug!("LLM request cancelled by caller");
                Err(LlmError::Cancelled)
            }
        }
    }

    /// Sends a tiny prompt and gives up after `CONNECTION_TEST_DEADLINE`.
    pub async fn test_connection(&self) -> Result<Completion, LlmError> {
        let request = CompletionRequest::new(
            "You are a connectivity check.",
            "Reply with the single word OK.",
            0.0,
            16,
        );
        match self
            .complete_until(request, sleep(CONNECTION_TEST_DEADLINE))
            .await
        {
            Err(LlmError::Cancelled) => Err(LlmError::Timeout),
            other => other,
        }
    }
}

#[async_trait]
impl LlmBackend for LlmGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let config = self.config()?;
        let format = config.provider.wire_format();
        let http_request = format.build_request(&config, &request, REQUEST_TIMEOUT);

        debug!(
            provider = %config.provider,
            model = %config.model_name,
            max_tokens = request.max_tokens,
            "Sending completion request"
        );
        let response = self
            .transport
            .execute(http_request)
            .await
            .map_err(|e| match e {
                TransportError::Timeout => LlmError::Timeout,
                TransportError::Network(message) => LlmError::Network(message),
            })?;
        classify_status(&response)?;

        let completion = format.parse_response(&config, &response.body)?;
        info!(
            provider = %config.provider,
            model = %completion.model,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "Completion received"
        );
        Ok(completion)
    }
}
