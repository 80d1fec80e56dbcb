use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, error, info};
use zipp_core::{GenerationError, GenerationOptions, TextGenerator};

use crate::presets::{KOBOLD_OPTIONS, default_preset};

const ROUTE_MAX_CONTEXT_LENGTH: &str = "/api/v1/config/max_context_length";
const ROUTE_MAX_LENGTH: &str = "/api/v1/config/max_length";
const ROUTE_GENERATE: &str = "/api/v1/generate";
const ROUTE_VERSION: &str = "/api/v1/info/version";
const ROUTE_MODEL: &str = "/api/v1/model";
const ROUTE_TOKENCOUNT: &str = "/api/extra/tokencount";

/// Client for a KoboldAI / KoboldCpp compatible text-completion server.
#[derive(Clone)]
pub struct KoboldProvider {
    client: Client,
    base_url: String,
}

impl KoboldProvider {
    /// Every request is bounded by `timeout`; expiry surfaces as a transport error.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("Creating KoboldProvider for {base_url}");
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn max_context_length(&self) -> Result<u32, GenerationError> {
        let response = self.get_api(ROUTE_MAX_CONTEXT_LENGTH).await?;
        parse_u32(&response["value"])
    }

    pub async fn max_length(&self) -> Result<u32, GenerationError> {
        let response = self.get_api(ROUTE_MAX_LENGTH).await?;
        parse_u32(&response["value"])
    }

    pub async fn version(&self) -> Result<String, GenerationError> {
        let response = self.get_api(ROUTE_VERSION).await?;
        parse_str(&response["result"])
    }

    pub async fn model(&self) -> Result<String, GenerationError> {
        let response = self.get_api(ROUTE_MODEL).await?;
        parse_str(&response["result"])
    }

    async fn get_api(&self, route: &str) -> Result<Value, GenerationError> {
        let response = self
            .client
            .get(format!("{}{route}", self.base_url))
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;

        response
            .json::<Value>()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))
    }

    async fn post_api(&self, route: &str, body: &Value) -> Result<Value, GenerationError> {
        let response = self
            .client
            .post(format!("{}{route}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;

        response
            .json::<Value>()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl TextGenerator for KoboldProvider {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        info!("Initiating generate call");
        let body = generate_body(prompt, options);
        let response = self.post_api(ROUTE_GENERATE, &body).await?;
        parse_str(&response["results"][0]["text"])
    }

    async fn count_tokens(&self, text: &str) -> Result<u32, GenerationError> {
        debug!("Counting tokens for {text:?}");
        let response = self
            .post_api(ROUTE_TOKENCOUNT, &json!({ "prompt": text }))
            .await?;
        parse_u32(&response["value"])
    }

    fn default_sampling(&self) -> Map<String, Value> {
        default_preset()
    }

    fn sampling_options(&self) -> &[(&'static str, &'static str)] {
        KOBOLD_OPTIONS
    }
}

/// Sampling values first, then the fields the request itself controls.
fn generate_body(prompt: &str, options: &GenerationOptions) -> Value {
    let mut body = options.sampling.clone();
    body.insert("prompt".to_string(), json!(prompt));
    body.insert("max_length".to_string(), json!(options.max_length));
    body.insert("stop_sequence".to_string(), json!(options.stop_sequences));
    Value::Object(body)
}

fn request_error(e: reqwest::Error) -> GenerationError {
    error!("{e:?}");
    e.status().map_or_else(
        || GenerationError::Transport(e.to_string()),
        |status| GenerationError::Busy(status.as_u16()),
    )
}

fn parse_str(value: &Value) -> Result<String, GenerationError> {
    value
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| GenerationError::InvalidResponse(format!("expected text, got {value}")))
}

fn parse_u32(value: &Value) -> Result<u32, GenerationError> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| GenerationError::InvalidResponse(format!("expected count, got {value}")))
}
