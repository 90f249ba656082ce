//! Anthropic-on-Bedrock invoke client.
//!
//! One POST per prediction. Requests carry a Bedrock API key (bearer token)
//! when one is set, and are SigV4-signed with credentials from the standard
//! AWS chain otherwise (environment keys, shared credentials file, instance
//! role). There is no automatic retry; a failed call fails the prediction.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};

use super::{PredictionError, TextGenerator};
use crate::config::PredictorOptions;

/// Environment variable holding the Bedrock API key
pub const TOKEN_ENV: &str = "AWS_BEARER_TOKEN_BEDROCK";

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// SigV4 service name for bedrock-runtime
const SIGNING_NAME: &str = "bedrock";

const JSON: &str = "application/json";

/// Where request credentials come from
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Bedrock API key from [`TOKEN_ENV`]
    BearerToken(String),
    /// Default AWS credential chain, requests signed with SigV4
    AwsChain,
}

impl CredentialSource {
    pub fn from_env() -> Self {
        Self::from_token(std::env::var(TOKEN_ENV).ok())
    }

    /// The API key wins when set and non-blank.
    pub fn from_token(token: Option<String>) -> Self {
        match token.map(|t| t.trim().to_string()) {
            Some(token) if !token.is_empty() => Self::BearerToken(token),
            _ => Self::AwsChain,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BearerToken(_) => "bearer_token",
            Self::AwsChain => "aws_chain",
        }
    }
}

/// Resolved request authentication
#[derive(Clone)]
pub enum BedrockAuth {
    BearerToken(String),
    SigV4 {
        credentials: SharedCredentialsProvider,
        region: String,
    },
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    anthropic_version: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct BedrockClient {
    client: reqwest::Client,
    endpoint: String,
    auth: BedrockAuth,
    model_id: String,
    max_tokens: u32,
}

impl BedrockClient {
    /// Build a client from predictor settings.
    ///
    /// Uses the API key in [`TOKEN_ENV`] when set, else the AWS credential
    /// chain for `region`.
    pub async fn from_options(
        options: &PredictorOptions,
        region: &str,
    ) -> Result<Self, PredictionError> {
        let source = CredentialSource::from_env();
        info!(
            credential_source = source.as_str(),
            region = %region,
            "Prediction service credentials selected"
        );
        let auth = match source {
            CredentialSource::BearerToken(token) => BedrockAuth::BearerToken(token),
            CredentialSource::AwsChain => {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(region.to_string()))
                    .load()
                    .await;
                let credentials = sdk_config.credentials_provider().ok_or(
                    PredictionError::MissingCredentials(
                        "set AWS_BEARER_TOKEN_BEDROCK or configure AWS credentials",
                    ),
                )?;
                BedrockAuth::SigV4 {
                    credentials,
                    region: region.to_string(),
                }
            }
        };
        let endpoint = options
            .endpoint
            .clone()
            .unwrap_or_else(|| invoke_url(region, &options.model_id));
        Self::new(
            &endpoint,
            auth,
            &options.model_id,
            options.max_tokens,
            options.timeout,
        )
    }

    pub fn new(
        endpoint: &str,
        auth: BedrockAuth,
        model_id: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, PredictionError> {
        let parsed = reqwest::Url::parse(endpoint)
            .map_err(|e| PredictionError::Service(format!("Invalid endpoint '{endpoint}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PredictionError::Service(format!(
                "Endpoint must use http or https, got: {}",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|e| PredictionError::Service(format!("Failed to create HTTP client: {e}")))?;

        info!(model = %model_id, endpoint = %endpoint, "Bedrock client created");

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            auth,
            model_id: model_id.to_string(),
            max_tokens,
        })
    }
}

/// Regional invoke URL. The `:` in versioned model ids is percent-encoded.
pub fn invoke_url(region: &str, model_id: &str) -> String {
    format!(
        "https://bedrock-runtime.{region}.amazonaws.com/model/{}/invoke",
        model_id.replace(':', "%3A")
    )
}

fn request_body(prompt: &str, max_tokens: u32) -> InvokeRequest<'_> {
    InvokeRequest {
        anthropic_version: ANTHROPIC_VERSION,
        max_tokens,
        messages: vec![Message {
            role: "user",
            content: prompt,
        }],
    }
}

/// SigV4 headers for a JSON POST of `body` to `url`.
fn sigv4_headers(
    url: &str,
    credentials: Credentials,
    region: &str,
    body: &[u8],
    time: SystemTime,
) -> Result<Vec<(String, String)>, PredictionError> {
    let signing_failed = |e: &dyn std::fmt::Display| {
        PredictionError::Service(format!("Failed to sign Bedrock request: {e}"))
    };

    let identity = credentials.into();
    let params: aws_sigv4::http_request::SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(SIGNING_NAME)
        .time(time)
        .settings(SigningSettings::default())
        .build()
        .map_err(|e| signing_failed(&e))?
        .into();
    let headers = [("content-type", JSON), ("accept", JSON)];
    let signable = SignableRequest::new("POST", url, headers.into_iter(), SignableBody::Bytes(body))
        .map_err(|e| signing_failed(&e))?;
    let (instructions, _signature) = sign(signable, &params)
        .map_err(|e| signing_failed(&e))?
        .into_parts();

    Ok(instructions
        .headers()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect())
}

/// Concatenated text blocks of the response, `None` when there are none.
fn response_text(response: InvokeResponse) -> Option<String> {
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind.is_empty() || block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl TextGenerator for BedrockClient {
    fn model(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str) -> Result<String, PredictionError> {
        debug!(model = %self.model_id, prompt_chars = prompt.len(), "Invoking Bedrock model");

        let body = serde_json::to_vec(&request_body(prompt, self.max_tokens))
            .map_err(|e| PredictionError::Service(format!("Failed to encode request: {e}")))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, JSON);
        match &self.auth {
            BedrockAuth::BearerToken(token) => request = request.bearer_auth(token),
            BedrockAuth::SigV4 {
                credentials,
                region,
            } => {
                let resolved = credentials.provide_credentials().await.map_err(|e| {
                    PredictionError::Service(format!("Failed to resolve AWS credentials: {e}"))
                })?;
                for (name, value) in
                    sigv4_headers(&self.endpoint, resolved, region, &body, SystemTime::now())?
                {
                    request = request.header(name, value);
                }
            }
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| PredictionError::Service(format!("Failed to reach Bedrock: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Bedrock invoke failed");
            return Err(PredictionError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: InvokeResponse = response.json().await.map_err(|e| {
            PredictionError::Service(format!("Failed to parse Bedrock response: {e}"))
        })?;

        response_text(parsed).ok_or(PredictionError::EmptyResponse)
    }
}
