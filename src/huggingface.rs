use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::HfConfig;
use crate::error::GenerationError;
use crate::models::AdvancedSettings;
use crate::store::{ImageHandle, ImageStore};

const FALLBACK_MIME: &str = "image/png";

/// Result of one successful call: the raw bytes plus a handle that serves them locally.
#[derive(Debug)]
pub struct ImagePayload {
    pub raw_bytes: Bytes,
    pub mime_type: String,
    pub handle: ImageHandle,
}

/// Anything that can turn a prompt into an image. The lifecycle controller
/// only talks to this trait.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn request(&self, prompt: &str, settings: &AdvancedSettings) -> Result<ImagePayload, GenerationError>;

    fn is_configured(&self) -> bool;

    fn supports_advanced_parameters(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct InferenceBody<'a> {
    inputs: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a AdvancedSettings>,
}

pub struct HfClient {
    client: Client,
    api_key: String,
    endpoint: String,
    supports_advanced_parameters: bool,
    store: Arc<ImageStore>,
}

impl HfClient {
    /// Fails when no credential is configured. Callers treat that as fatal at startup.
    pub fn new(config: &HfConfig, store: Arc<ImageStore>) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(GenerationError::MissingCredential)?
            .to_string();

        Ok(Self {
            client: Client::new(),
            api_key,
            endpoint: config.endpoint(),
            supports_advanced_parameters: config.supports_advanced_parameters,
            store,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn perform_api_call(&self, prompt: &str, settings: &AdvancedSettings) -> Result<(Bytes, String), GenerationError> {
        let parameters = if self.supports_advanced_parameters {
            Some(settings)
        } else {
            debug!("Endpoint ignores advanced parameters, dropping {:?}", settings);
            None
        };
        let body = InferenceBody { inputs: prompt, parameters };

        info!("🔗 Making request to: {}", self.endpoint);

        let response = self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ API Error response: {}", error_body);
            return Err(GenerationError::Http { status: status.as_u16(), body: error_body });
        }

        let declared = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(GenerationError::Other("empty image body".into()));
        }

        let mime_type = resolve_mime(declared.as_deref(), &bytes);
        Ok((bytes, mime_type))
    }
}

#[async_trait]
impl ImageBackend for HfClient {
    async fn request(&self, prompt: &str, settings: &AdvancedSettings) -> Result<ImagePayload, GenerationError> {
        info!("Generating image with Hugging Face inference API...");
        match self.perform_api_call(prompt, settings).await {
            Ok((raw_bytes, mime_type)) => {
                let handle = self.store.insert(raw_bytes.clone(), mime_type.clone());
                info!("✅ Successfully generated {} image ({} bytes) at {}", mime_type, raw_bytes.len(), handle.url());
                Ok(ImagePayload { raw_bytes, mime_type, handle })
            }
            Err(e) => {
                error!("❌ Failed to generate image: {}", e);
                Err(e)
            }
        }
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn supports_advanced_parameters(&self) -> bool {
        self.supports_advanced_parameters
    }
}

/// Trusts the response header when it names an image, otherwise sniffs the bytes.
fn resolve_mime(declared: Option<&str>, bytes: &[u8]) -> String {
    if let Some(mime) = declared.filter(|m| m.starts_with("image/")) {
        return mime.to_string();
    }
    image::guess_format(bytes)
        .map(|fmt| fmt.to_mime_type().to_string())
        .unwrap_or_else(|_| FALLBACK_MIME.to_string())
}
