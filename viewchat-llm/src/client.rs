use std::fmt;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use url::Url;
use viewchat_core::{LlmRequest, LlmResponse, Runnable, StreamEvent, ViewchatError};

use crate::openai_compatible::{ChatCompletionRequest, ChatCompletionResponse};
use crate::sse::{error_from_response, parse_stream_response};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for any provider speaking the OpenAI chat-completions format.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    endpoint: Url,
    api_key: Option<Secret<String>>,
    default_model: String,
    http: Client,
}

impl fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = if self.api_key.is_some() {
            "<redacted>"
        } else {
            "<none>"
        };
        f.debug_struct("OpenAiCompatibleClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("default_model", &self.default_model)
            .field("api_key", &api_key)
            .finish()
    }
}

#[derive(Default)]
pub struct OpenAiCompatibleBuilder {
    base_url: Option<Url>,
    api_key: Option<Secret<String>>,
    default_model: Option<String>,
    timeout: Option<Duration>,
}

impl OpenAiCompatibleBuilder {
    pub fn base_url(mut self, base_url: impl AsRef<str>) -> Result<Self, ViewchatError> {
        let url = Url::parse(base_url.as_ref()).map_err(|err| {
            ViewchatError::InvalidConfig(format!("invalid base url '{}': {err}", base_url.as_ref()))
        })?;
        self.base_url = Some(url);
        Ok(self)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = if api_key.trim().is_empty() {
            None
        } else {
            Some(Secret::new(api_key))
        };
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<OpenAiCompatibleClient, ViewchatError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ViewchatError::InvalidConfig("base url is required".to_string()))?;
        let default_model = self
            .default_model
            .filter(|model| !model.trim().is_empty())
            .ok_or_else(|| ViewchatError::InvalidConfig("default model is required".to_string()))?;
        if self.api_key.is_none() {
            tracing::warn!(
                base_url = %base_url,
                "no API key configured; requests will be sent unauthenticated"
            );
        }

        let http = Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|err| ViewchatError::LlmProvider(err.to_string()))?;

        Ok(OpenAiCompatibleClient {
            endpoint: completions_endpoint(&base_url)?,
            api_key: self.api_key,
            default_model,
            http,
        })
    }
}

fn completions_endpoint(base_url: &Url) -> Result<Url, ViewchatError> {
    let base = base_url.as_str().trim_end_matches('/');
    let endpoint = if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    };
    Url::parse(&endpoint).map_err(|err| ViewchatError::InvalidConfig(err.to_string()))
}

impl OpenAiCompatibleClient {
    pub fn builder() -> OpenAiCompatibleBuilder {
        OpenAiCompatibleBuilder::default()
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn set_default_model(&mut self, model: impl Into<String>) {
        self.default_model = model.into();
    }

    fn completion_request(&self, input: LlmRequest, stream: bool) -> ChatCompletionRequest {
        let model = if input.model.is_empty() {
            self.default_model.clone()
        } else {
            input.model
        };
        ChatCompletionRequest {
            model,
            messages: input.messages,
            temperature: input.temperature,
            max_tokens: None,
            stream,
        }
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response, ViewchatError> {
        let mut request = self.http.post(self.endpoint.clone()).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }
        let response = request
            .send()
            .await
            .map_err(|err| ViewchatError::LlmProvider(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let error = error_from_response(status, &headers, &body);
        tracing::warn!(status = %status, error = %error, "chat completion request rejected");
        Err(error)
    }
}

#[async_trait::async_trait]
impl Runnable<LlmRequest, LlmResponse> for OpenAiCompatibleClient {
    async fn invoke(&self, input: LlmRequest) -> Result<LlmResponse, ViewchatError> {
        let body = self.completion_request(input, false);
        let response: ChatCompletionResponse = self
            .send(&body)
            .await?
            .json()
            .await
            .map_err(|err| ViewchatError::LlmProvider(err.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ViewchatError::LlmProvider("no choices returned".to_string()))?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %response.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion finished"
            );
        }

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
        })
    }

    fn stream(&self, input: LlmRequest) -> BoxStream<'_, Result<StreamEvent, ViewchatError>> {
        let body = self.completion_request(input, true);

        stream::once(async move { self.send(&body).await })
            .flat_map(|result| match result {
                Ok(response) => parse_stream_response(response),
                Err(err) => stream::iter(vec![Err(err)]).boxed(),
            })
            .boxed()
    }
}
